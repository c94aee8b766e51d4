//! A client-side pipeline for sending metrics, events and service checks to a [DogStatsD][dsd]-compatible server.
//!
//! [dsd]: https://docs.datadoghq.com/developers/dogstatsd/
//!
//! # Usage
//!
//! ```no_run
//! # use metrics_dogstatsd_client::DogStatsDBuilder;
//! // First, create a builder.
//! //
//! // The builder can configure many aspects of the client, such as changing the remote address, adjusting how
//! // metrics are aggregated, how payloads are sized, and more.
//! let client = DogStatsDBuilder::default()
//!     .with_namespace("myapp.")
//!     .with_global_tags(["env:prod"])
//!     .build_client()
//!     .expect("failed to build client");
//!
//! client.incr("requests", &["endpoint:/login"], 1.0).expect("failed to send");
//! client.gauge("queue.depth", 42.0, &[], 1.0).expect("failed to send");
//!
//! // Everything sent before closing is written out before `close` returns.
//! client.close().expect("failed to close");
//! ```
//!
//! For applications already instrumented with the [`metrics`] facade, the same pipeline can be installed as the
//! global recorder:
//!
//! ```no_run
//! # use metrics_dogstatsd_client::DogStatsDBuilder;
//! DogStatsDBuilder::default().install().expect("failed to install recorder");
//! ```
//!
//! # Pipeline
//!
//! ## Client-side aggregation
//!
//! Gauges, counts and sets are merged in memory per context (name, tags and cardinality) and flushed on an interval,
//! so that only one line per context is sent. With extended aggregation, histograms, distributions and timings are
//! buffered per context as well, and sent as multi-value lines (DSD v1.1). Samples with an explicit timestamp are
//! never aggregated.
//!
//! ## Sharded workers
//!
//! Samples are routed by metric name to one of several workers, each packing lines into its own payload buffer. This
//! keeps concurrent callers from contending on a single buffer. In channel mode, callers only enqueue samples, and
//! encoding happens on one background thread per worker.
//!
//! ## Payloads
//!
//! Payloads are bounded both in bytes and in number of elements. Full payloads are queued to a background forwarder,
//! which writes them to the transport: UDP, or Unix domain sockets in either `SOCK_DGRAM` or `SOCK_STREAM` mode. Any
//! [`Transport`] implementation can be plugged in instead.
//!
//! ## Telemetry
//!
//! The client counts the points, events and service checks it accepts, the contexts it aggregates, and the payloads
//! and bytes it sends or drops. See [`DogStatsDClient::telemetry`].

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::struct_excessive_bools)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod aggregator;

mod builder;
pub use self::builder::{BuildError, DogStatsDBuilder};

mod client;
pub use self::client::{DogStatsDClient, Error};

mod dispatcher;

mod forwarder;
pub use self::forwarder::{SocketTransport, Transport};

mod pool;

mod recorder;
pub use self::recorder::DogStatsDRecorder;

mod sample;
pub use self::sample::{
    Cardinality, Event, EventAlertType, EventPriority, MetricKind, MetricSample, MetricValue, Sample, ServiceCheck,
    ServiceCheckStatus,
};

mod sampling;

mod telemetry;
pub use self::telemetry::TelemetrySnapshot;

mod worker;
mod writer;
