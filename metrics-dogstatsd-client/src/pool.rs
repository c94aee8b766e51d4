use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

use crate::writer::{WireBuffer, WireOptions};

/// A bounded pool of pre-sized wire buffers.
///
/// Borrowing never fails: when the pool is empty, a fresh buffer is allocated. Returned buffers are reset before being
/// reinserted, and are simply dropped if the pool is already full.
pub(crate) struct BufferPool {
    buffers: ArrayQueue<WireBuffer>,
    max_size: usize,
    max_elements: usize,
    options: Arc<WireOptions>,
}

impl BufferPool {
    /// Creates a new `BufferPool` holding up to `capacity` buffers, all of them allocated up front.
    pub fn new(capacity: usize, max_size: usize, max_elements: usize, options: Arc<WireOptions>) -> Self {
        let buffers = ArrayQueue::new(capacity.max(1));
        for _ in 0..buffers.capacity() {
            let _ = buffers.push(WireBuffer::new(max_size, max_elements, Arc::clone(&options)));
        }

        Self { buffers, max_size, max_elements, options }
    }

    /// Takes a buffer out of the pool.
    pub fn borrow(&self) -> WireBuffer {
        self.buffers
            .pop()
            .unwrap_or_else(|| WireBuffer::new(self.max_size, self.max_elements, Arc::clone(&self.options)))
    }

    /// Resets a buffer and puts it back into the pool.
    pub fn put(&self, mut buffer: WireBuffer) {
        buffer.reset();

        // A full pool means more buffers were allocated than it can hold, so the extra one is released.
        let _ = self.buffers.push(buffer);
    }

    /// Returns the number of buffers currently sitting in the pool.
    pub fn available(&self) -> usize {
        self.buffers.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::BufferPool;
    use crate::{sample::MetricSample, writer::WireOptions};

    #[test]
    fn returned_buffers_are_reset() {
        let pool = BufferPool::new(1, 1024, 10, Arc::new(WireOptions::default()));
        assert_eq!(pool.available(), 1);

        let mut buffer = pool.borrow();
        assert_eq!(pool.available(), 0);
        assert_eq!(buffer.write_metric(&MetricSample::count("metric", 1)), Ok(()));
        assert_eq!(buffer.element_count(), 1);
        pool.put(buffer);

        let buffer = pool.borrow();
        assert_eq!(buffer.len(), 0);
        assert_eq!(buffer.element_count(), 0);
        assert!(buffer.is_empty());
    }

    #[test]
    fn borrow_never_fails() {
        let pool = BufferPool::new(2, 1024, 10, Arc::new(WireOptions::default()));
        let buffers = (0..5).map(|_| pool.borrow()).collect::<Vec<_>>();
        assert_eq!(pool.available(), 0);

        for buffer in buffers {
            pool.put(buffer);
        }

        // Extra buffers are dropped rather than growing the pool.
        assert_eq!(pool.available(), 2);
    }
}
