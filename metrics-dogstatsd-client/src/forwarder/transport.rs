use std::{
    io::{self, Write as _},
    net::{Ipv4Addr, SocketAddr, ToSocketAddrs as _, UdpSocket},
    time::Duration,
};

#[cfg(unix)]
use std::{
    os::unix::net::{UnixDatagram, UnixStream},
    path::PathBuf,
};

/// A destination for encoded payloads.
///
/// Implementations are driven by a single background thread, one payload at a time. Each payload is a sequence of
/// complete, newline-terminated lines and must be delivered as a unit.
pub trait Transport: Send {
    /// Writes a single payload, returning the number of payload bytes written.
    ///
    /// # Errors
    ///
    /// If the payload could not be delivered, an error is returned. The payload is then dropped: it is never retried.
    fn write(&mut self, payload: &[u8]) -> io::Result<usize>;

    /// Sets the timeout applied to subsequent writes.
    ///
    /// # Errors
    ///
    /// If the timeout cannot be applied to the underlying resource, an error is returned.
    fn set_write_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Closes the transport, releasing any underlying resources.
    ///
    /// # Errors
    ///
    /// If the underlying resource fails to close cleanly, an error is returned.
    fn close(&mut self) -> io::Result<()>;

    /// Returns a short identifier for the transport, used in logs.
    fn transport_id(&self) -> &'static str {
        "custom"
    }
}

#[derive(Clone, Debug)]
pub(crate) enum RemoteAddr {
    Udp(Vec<SocketAddr>),

    #[cfg(unix)]
    Unixgram(PathBuf),

    #[cfg(unix)]
    Unix(PathBuf),
}

impl RemoteAddr {
    /// Returns the transport ID for the remote address.
    ///
    /// This is a simple acronym related to the transport that will be used for the remote address, such as `udp` for
    /// UDP, and so on.
    pub const fn transport_id(&self) -> &'static str {
        match self {
            RemoteAddr::Udp(_) => "udp",
            #[cfg(unix)]
            RemoteAddr::Unix(_) => "uds-stream",
            #[cfg(unix)]
            RemoteAddr::Unixgram(_) => "uds",
        }
    }
}

impl<'a> TryFrom<&'a str> for RemoteAddr {
    type Error = String;

    fn try_from(addr: &'a str) -> Result<Self, Self::Error> {
        if let Some((scheme, path)) = addr.split_once("://") {
            return match scheme {
                #[cfg(unix)]
                "unix" => Ok(RemoteAddr::Unix(PathBuf::from(path))),
                #[cfg(unix)]
                "unixgram" => Ok(RemoteAddr::Unixgram(PathBuf::from(path))),
                _ => Err(format!("invalid scheme '{}' (expected 'unix' or 'unixgram')", scheme)),
            };
        }

        match addr.to_socket_addrs() {
            Ok(addrs) => {
                let addrs = addrs.collect::<Vec<_>>();
                if addrs.is_empty() {
                    Err(format!("'{}' did not resolve to any address", addr))
                } else {
                    Ok(RemoteAddr::Udp(addrs))
                }
            }
            Err(e) => Err(e.to_string()),
        }
    }
}

enum Socket {
    Udp(UdpSocket),

    #[cfg(unix)]
    Unixgram(UnixDatagram),

    #[cfg(unix)]
    Unix(UnixStream),
}

impl Socket {
    fn connect(remote_addr: &RemoteAddr, write_timeout: Duration) -> io::Result<Self> {
        match remote_addr {
            RemoteAddr::Udp(addrs) => UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).and_then(|socket| {
                socket.connect(&addrs[..])?;
                socket.set_write_timeout(Some(write_timeout))?;
                Ok(Socket::Udp(socket))
            }),

            #[cfg(unix)]
            RemoteAddr::Unixgram(path) => UnixDatagram::unbound().and_then(|socket| {
                socket.connect(path)?;
                socket.set_write_timeout(Some(write_timeout))?;
                Ok(Socket::Unixgram(socket))
            }),

            #[cfg(unix)]
            RemoteAddr::Unix(path) => UnixStream::connect(path).and_then(|socket| {
                socket.set_write_timeout(Some(write_timeout))?;
                Ok(Socket::Unix(socket))
            }),
        }
    }

    fn set_write_timeout(&self, timeout: Duration) -> io::Result<()> {
        match self {
            Socket::Udp(socket) => socket.set_write_timeout(Some(timeout)),

            #[cfg(unix)]
            Socket::Unixgram(socket) => socket.set_write_timeout(Some(timeout)),

            #[cfg(unix)]
            Socket::Unix(socket) => socket.set_write_timeout(Some(timeout)),
        }
    }

    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Socket::Udp(socket) => socket.send(buf),

            #[cfg(unix)]
            Socket::Unixgram(socket) => socket.send(buf),

            // Stream sockets have no message boundaries, so each payload is preceded by its length.
            #[cfg(unix)]
            Socket::Unix(socket) => {
                let len = u32::try_from(buf.len())
                    .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "payload too large for length prefix"))?;
                socket.write_all(&len.to_le_bytes())?;
                socket.write_all(buf)?;
                Ok(buf.len())
            }
        }
    }
}

enum SocketState {
    // Intermediate state during send attempts.
    Inconsistent,

    // Transport is currently disconnected, and will connect on the next write.
    Disconnected,

    // Transport is connected and ready to send payloads.
    Ready(Socket),

    // Transport was closed, and will refuse any further writes.
    Closed,
}

/// A socket-based [`Transport`] for UDP and Unix domain socket addresses.
///
/// The socket is connected lazily on the first write. After a failed write, the socket is dropped and a new one is
/// connected on the next write.
pub struct SocketTransport {
    remote_addr: RemoteAddr,
    write_timeout: Duration,
    state: SocketState,
}

impl SocketTransport {
    pub(crate) fn new(remote_addr: RemoteAddr, write_timeout: Duration) -> Self {
        Self { remote_addr, write_timeout, state: SocketState::Disconnected }
    }

    /// Creates a new `SocketTransport` for the given address.
    ///
    /// The address is in the same format as accepted by
    /// [`DogStatsDBuilder::with_remote_address`][crate::DogStatsDBuilder::with_remote_address]. No connection is made
    /// until the first write.
    ///
    /// # Errors
    ///
    /// If the address cannot be parsed or resolved, an error is returned.
    pub fn from_address(addr: &str, write_timeout: Duration) -> io::Result<Self> {
        let remote_addr =
            RemoteAddr::try_from(addr).map_err(|reason| io::Error::new(io::ErrorKind::InvalidInput, reason))?;
        Ok(Self::new(remote_addr, write_timeout))
    }
}

impl Transport for SocketTransport {
    fn write(&mut self, payload: &[u8]) -> io::Result<usize> {
        loop {
            let old_state = std::mem::replace(&mut self.state, SocketState::Inconsistent);
            match old_state {
                SocketState::Inconsistent => {
                    return Err(io::Error::new(io::ErrorKind::Other, "transport left in an inconsistent state"))
                }
                SocketState::Closed => {
                    self.state = SocketState::Closed;
                    return Err(io::Error::new(io::ErrorKind::NotConnected, "transport is closed"));
                }
                SocketState::Disconnected => {
                    let socket = Socket::connect(&self.remote_addr, self.write_timeout);
                    match socket {
                        Ok(socket) => self.state = SocketState::Ready(socket),
                        Err(e) => {
                            self.state = SocketState::Disconnected;
                            return Err(e);
                        }
                    }
                }
                SocketState::Ready(mut socket) => {
                    let result = socket.send(payload);
                    if result.is_ok() {
                        self.state = SocketState::Ready(socket);
                    } else {
                        self.state = SocketState::Disconnected;
                    }

                    return result;
                }
            }
        }
    }

    fn set_write_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.write_timeout = timeout;
        match &self.state {
            SocketState::Ready(socket) => socket.set_write_timeout(timeout),
            _ => Ok(()),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        self.state = SocketState::Closed;
        Ok(())
    }

    fn transport_id(&self) -> &'static str {
        self.remote_addr.transport_id()
    }
}
