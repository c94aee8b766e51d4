use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use thiserror::Error;

use crate::{
    aggregator::Context,
    sample::{Cardinality, Event, MetricKind, MetricSample, MetricValue, ServiceCheck},
};

/// The smallest payload that still carries a valid metric.
pub(crate) const SMALLEST_VALID_PAYLOAD: &[u8] = b"a:0|c\n";

/// Reasons a write into a [`WireBuffer`] can be rejected.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
pub(crate) enum WriteError {
    /// The element did not fit, and the buffer was left untouched.
    #[error("buffer is full")]
    BufferFull,

    /// Only the first `k` values of a multi-value line fit in the buffer.
    #[error("only {0} value(s) fit in the buffer")]
    PartialWrite(usize),
}

/// Client-level settings applied to every encoded line.
#[derive(Debug, Default)]
pub(crate) struct WireOptions {
    /// Prefix prepended verbatim to every metric name.
    pub namespace: Option<String>,

    /// Tags written before the per-sample tags of every line.
    pub global_tags: Vec<String>,

    /// Container ID appended as `|c:<id>`.
    pub container_id: Option<String>,

    /// Cardinality used when a sample does not carry one.
    pub default_cardinality: Option<Cardinality>,
}

#[derive(Clone, Copy)]
enum Number {
    Integer(i64),
    Unsigned(u64),
    Float(f64),
}

struct NumberFormatter {
    int_writer: itoa::Buffer,
    float_writer: ryu::Buffer,
}

impl NumberFormatter {
    fn new() -> Self {
        Self { int_writer: itoa::Buffer::new(), float_writer: ryu::Buffer::new() }
    }

    fn format(&mut self, value: Number) -> &str {
        match value {
            Number::Integer(v) => self.int_writer.format(v),
            Number::Unsigned(v) => self.int_writer.format(v),
            Number::Float(v) => {
                // Integral values are written without a fractional part: `1`, not `1.0`.
                let s = self.float_writer.format(v);
                s.strip_suffix(".0").unwrap_or(s)
            }
        }
    }
}

/// The parts of a metric line that surround its value(s).
pub(crate) struct LineParts<'a> {
    pub name: &'a str,
    pub tags: &'a [String],
    pub rate: f64,
    pub cardinality: Option<Cardinality>,
    pub timestamp: Option<u64>,
}

impl<'a> LineParts<'a> {
    fn from_context(context: &'a Context, rate: f64) -> Self {
        Self {
            name: &context.name,
            tags: &context.tags,
            rate,
            cardinality: context.cardinality,
            timestamp: None,
        }
    }
}

impl<'a> From<&'a MetricSample> for LineParts<'a> {
    fn from(sample: &'a MetricSample) -> Self {
        Self {
            name: &sample.name,
            tags: &sample.tags,
            rate: sample.rate,
            cardinality: sample.cardinality,
            timestamp: sample.timestamp,
        }
    }
}

/// Accumulates newline-terminated DogStatsD lines under a byte budget and an element budget.
///
/// Every write either fully succeeds, or leaves the buffer byte-for-byte as it was before the write. The only exception
/// is [`WireBuffer::write_aggregated`], which can write a prefix of its values and report how many made it in.
pub(crate) struct WireBuffer {
    buf: BytesMut,
    trailer_buf: Vec<u8>,
    max_size: usize,
    max_elements: usize,
    element_count: usize,
    options: Arc<WireOptions>,
    formatter: NumberFormatter,
}

impl WireBuffer {
    /// Creates a new `WireBuffer`.
    pub fn new(max_size: usize, max_elements: usize, options: Arc<WireOptions>) -> Self {
        Self {
            buf: BytesMut::with_capacity(max_size),
            trailer_buf: Vec::new(),
            max_size,
            max_elements,
            element_count: 0,
            options,
            formatter: NumberFormatter::new(),
        }
    }

    /// Returns the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..]
    }

    /// Returns the number of encoded bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns `true` if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.element_count == 0
    }

    /// Returns the number of elements written.
    pub fn element_count(&self) -> usize {
        self.element_count
    }

    /// Clears the buffer, keeping its allocation.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.trailer_buf.clear();
        self.element_count = 0;
    }

    fn has_element_room(&self) -> bool {
        self.element_count < self.max_elements
    }

    /// Keeps everything written since `original_len` if it fits, or rolls back to `original_len` otherwise.
    fn commit(&mut self, original_len: usize) -> Result<(), WriteError> {
        if self.buf.len() > self.max_size {
            self.buf.truncate(original_len);
            return Err(WriteError::BufferFull);
        }

        self.element_count += 1;
        Ok(())
    }

    fn write_header(&mut self, name: &str) {
        if let Some(namespace) = &self.options.namespace {
            self.buf.put_slice(namespace.as_bytes());
        }
        self.buf.put_slice(name.as_bytes());
        self.buf.put_u8(b':');
    }

    fn try_write_single(
        &mut self,
        parts: &LineParts<'_>,
        kind: MetricKind,
        value: Number,
    ) -> Result<(), WriteError> {
        if !self.has_element_room() {
            return Err(WriteError::BufferFull);
        }

        let original_len = self.buf.len();
        self.write_header(parts.name);
        let value_str = self.formatter.format(value);
        self.buf.put_slice(value_str.as_bytes());
        write_trailer(&mut self.buf, &mut self.formatter, &self.options, kind, parts);

        self.commit(original_len)
    }

    /// Writes a gauge line.
    pub fn write_gauge(&mut self, parts: &LineParts<'_>, value: f64) -> Result<(), WriteError> {
        self.try_write_single(parts, MetricKind::Gauge, Number::Float(value))
    }

    /// Writes a count line.
    pub fn write_count(&mut self, parts: &LineParts<'_>, value: i64) -> Result<(), WriteError> {
        self.try_write_single(parts, MetricKind::Count, Number::Integer(value))
    }

    /// Writes a histogram line with a single value.
    pub fn write_histogram(&mut self, parts: &LineParts<'_>, value: f64) -> Result<(), WriteError> {
        self.try_write_single(parts, MetricKind::Histogram, Number::Float(value))
    }

    /// Writes a distribution line with a single value.
    pub fn write_distribution(&mut self, parts: &LineParts<'_>, value: f64) -> Result<(), WriteError> {
        self.try_write_single(parts, MetricKind::Distribution, Number::Float(value))
    }

    /// Writes a timing line with a single value.
    pub fn write_timing(&mut self, parts: &LineParts<'_>, value: f64) -> Result<(), WriteError> {
        self.try_write_single(parts, MetricKind::Timing, Number::Float(value))
    }

    /// Writes a set line.
    pub fn write_set(&mut self, parts: &LineParts<'_>, value: &str) -> Result<(), WriteError> {
        if !self.has_element_room() {
            return Err(WriteError::BufferFull);
        }

        let original_len = self.buf.len();
        self.write_header(parts.name);
        put_without_newlines(&mut self.buf, value);
        write_trailer(&mut self.buf, &mut self.formatter, &self.options, MetricKind::Set, parts);

        self.commit(original_len)
    }

    /// Writes a metric sample, picking the line type from its value.
    pub fn write_metric(&mut self, sample: &MetricSample) -> Result<(), WriteError> {
        let parts = LineParts::from(sample);
        match &sample.value {
            MetricValue::Gauge(v) => self.write_gauge(&parts, *v),
            MetricValue::Count(v) => self.write_count(&parts, *v),
            MetricValue::Set(v) => self.write_set(&parts, v),
            MetricValue::Histogram(v) => self.write_histogram(&parts, *v),
            MetricValue::Distribution(v) => self.write_distribution(&parts, *v),
            MetricValue::Timing(v) => self.write_timing(&parts, *v),
        }
    }

    /// Writes a single line carrying as many of `values` as fit.
    ///
    /// Returns the number of values written when all of them fit. When only a prefix fits, the line is still written
    /// and [`WriteError::PartialWrite`] reports the length of that prefix; the caller is expected to continue with the
    /// remaining values in another buffer. When not even the name, trailer and first value fit, the buffer is left
    /// untouched and [`WriteError::BufferFull`] is returned.
    pub fn write_aggregated(
        &mut self,
        kind: MetricKind,
        context: &Context,
        values: &[f64],
        rate: f64,
    ) -> Result<usize, WriteError> {
        if !self.has_element_room() || values.is_empty() {
            return Err(WriteError::BufferFull);
        }

        // The trailer is the same no matter how many values end up in the line, so build it up front to know exactly
        // how much room is left for values.
        let parts = LineParts::from_context(context, rate);
        self.trailer_buf.clear();
        write_trailer(&mut self.trailer_buf, &mut self.formatter, &self.options, kind, &parts);
        let trailer_len = self.trailer_buf.len();

        let original_len = self.buf.len();
        self.write_header(&context.name);
        if self.buf.len() + trailer_len > self.max_size {
            self.buf.truncate(original_len);
            return Err(WriteError::BufferFull);
        }

        let mut written = 0;
        for value in values {
            let previous_len = self.buf.len();
            if written != 0 {
                self.buf.put_u8(b':');
            }
            let value_str = self.formatter.format(Number::Float(*value));
            self.buf.put_slice(value_str.as_bytes());

            if self.buf.len() + trailer_len > self.max_size {
                self.buf.truncate(previous_len);
                break;
            }

            written += 1;
        }

        if written == 0 {
            self.buf.truncate(original_len);
            return Err(WriteError::BufferFull);
        }

        self.buf.put_slice(&self.trailer_buf);
        self.element_count += 1;

        if written < values.len() {
            Err(WriteError::PartialWrite(written))
        } else {
            Ok(written)
        }
    }

    /// Writes an event.
    pub fn write_event(&mut self, event: &Event) -> Result<(), WriteError> {
        if !self.has_element_room() {
            return Err(WriteError::BufferFull);
        }

        let original_len = self.buf.len();
        let title_len = escaped_len(&event.title);
        let text_len = escaped_len(&event.text);

        let buf = &mut self.buf;
        buf.put_slice(b"_e{");
        buf.put_slice(self.formatter.format(Number::Unsigned(title_len as u64)).as_bytes());
        buf.put_u8(b',');
        buf.put_slice(self.formatter.format(Number::Unsigned(text_len as u64)).as_bytes());
        buf.put_slice(b"}:");
        put_escaped(buf, &event.title);
        buf.put_u8(b'|');
        put_escaped(buf, &event.text);

        if let Some(timestamp) = event.timestamp {
            buf.put_slice(b"|d:");
            buf.put_slice(self.formatter.format(Number::Unsigned(timestamp)).as_bytes());
        }
        if let Some(hostname) = &event.hostname {
            buf.put_slice(b"|h:");
            put_without_newlines(buf, hostname);
        }
        if let Some(key) = &event.aggregation_key {
            buf.put_slice(b"|k:");
            put_without_newlines(buf, key);
        }
        if let Some(priority) = event.priority {
            buf.put_slice(b"|p:");
            buf.put_slice(priority.as_str().as_bytes());
        }
        if let Some(source) = &event.source_type_name {
            buf.put_slice(b"|s:");
            put_without_newlines(buf, source);
        }
        if let Some(alert_type) = event.alert_type {
            buf.put_slice(b"|t:");
            buf.put_slice(alert_type.as_str().as_bytes());
        }
        put_tags(buf, &self.options.global_tags, &event.tags);
        put_container_id(buf, &self.options);
        buf.put_u8(b'\n');

        self.commit(original_len)
    }

    /// Writes a service check.
    pub fn write_service_check(&mut self, check: &ServiceCheck) -> Result<(), WriteError> {
        if !self.has_element_room() {
            return Err(WriteError::BufferFull);
        }

        let original_len = self.buf.len();

        let buf = &mut self.buf;
        buf.put_slice(b"_sc|");
        put_without_newlines(buf, &check.name);
        buf.put_u8(b'|');
        buf.put_slice(check.status.as_bytes());

        if let Some(timestamp) = check.timestamp {
            buf.put_slice(b"|d:");
            buf.put_slice(self.formatter.format(Number::Unsigned(timestamp)).as_bytes());
        }
        if let Some(hostname) = &check.hostname {
            buf.put_slice(b"|h:");
            put_without_newlines(buf, hostname);
        }
        put_tags(buf, &self.options.global_tags, &check.tags);
        if let Some(message) = &check.message {
            buf.put_slice(b"|m:");
            put_escaped(buf, &message.replace("m:", "m\\:"));
        }
        put_container_id(buf, &self.options);
        buf.put_u8(b'\n');

        self.commit(original_len)
    }
}

fn write_trailer<B: BufMut>(
    buf: &mut B,
    formatter: &mut NumberFormatter,
    options: &WireOptions,
    kind: MetricKind,
    parts: &LineParts<'_>,
) {
    buf.put_u8(b'|');
    buf.put_slice(kind.as_bytes());

    // A rate of 1.0 is implied.
    if parts.rate < 1.0 {
        buf.put_slice(b"|@");
        buf.put_slice(formatter.format(Number::Float(parts.rate)).as_bytes());
    }

    put_tags(buf, &options.global_tags, parts.tags);
    put_container_id(buf, options);

    if let Some(timestamp) = parts.timestamp {
        buf.put_slice(b"|T");
        buf.put_slice(formatter.format(Number::Unsigned(timestamp)).as_bytes());
    }

    if let Some(cardinality) = parts.cardinality.or(options.default_cardinality) {
        buf.put_slice(b"|card:");
        buf.put_slice(cardinality.as_str().as_bytes());
    }

    buf.put_u8(b'\n');
}

fn put_tags<B: BufMut>(buf: &mut B, global_tags: &[String], tags: &[String]) {
    let mut wrote_tag = false;
    for tag in global_tags.iter().chain(tags) {
        if wrote_tag {
            buf.put_u8(b',');
        } else {
            buf.put_slice(b"|#");
            wrote_tag = true;
        }

        put_without_newlines(buf, tag);
    }
}

fn put_container_id<B: BufMut>(buf: &mut B, options: &WireOptions) {
    if let Some(container_id) = &options.container_id {
        buf.put_slice(b"|c:");
        buf.put_slice(container_id.as_bytes());
    }
}

// Newlines frame lines on the wire, so they are dropped rather than escaped.
fn put_without_newlines<B: BufMut>(buf: &mut B, s: &str) {
    for part in s.split('\n') {
        buf.put_slice(part.as_bytes());
    }
}

fn put_escaped<B: BufMut>(buf: &mut B, s: &str) {
    let mut parts = s.split('\n');
    if let Some(first) = parts.next() {
        buf.put_slice(first.as_bytes());
    }
    for part in parts {
        buf.put_slice(b"\\n");
        buf.put_slice(part.as_bytes());
    }
}

fn escaped_len(s: &str) -> usize {
    s.len() + s.matches('\n').count()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use proptest::{collection::vec as arb_vec, prelude::*, prop_oneof, proptest};

    use super::{LineParts, WireBuffer, WireOptions, WriteError, SMALLEST_VALID_PAYLOAD};
    use crate::{
        aggregator::Context,
        sample::{
            Cardinality, Event, EventAlertType, EventPriority, MetricKind, MetricSample, ServiceCheck,
            ServiceCheckStatus,
        },
    };

    fn options(namespace: Option<&str>, global_tags: &[&str]) -> Arc<WireOptions> {
        Arc::new(WireOptions {
            namespace: namespace.map(ToString::to_string),
            global_tags: global_tags.iter().map(ToString::to_string).collect(),
            container_id: None,
            default_cardinality: None,
        })
    }

    fn string_from_buffer(buffer: &WireBuffer) -> String {
        String::from_utf8(buffer.as_bytes().to_vec()).unwrap()
    }

    fn context(name: &str, tags: &[&str]) -> Context {
        Context {
            name: name.to_string(),
            cardinality: None,
            tags: tags.iter().map(ToString::to_string).collect(),
        }
    }

    #[test]
    fn gauge() {
        // Cases are defined as: sample, namespace, global tags, expected output.
        let cases = [
            (MetricSample::gauge("test_gauge", 42.0), None, &[][..], "test_gauge:42|g\n"),
            (MetricSample::gauge("test_gauge", 1967.5), None, &[], "test_gauge:1967.5|g\n"),
            (
                MetricSample::gauge("test_gauge", 1967.0).with_timestamp(345678),
                None,
                &[],
                "test_gauge:1967|g|T345678\n",
            ),
            (
                MetricSample::gauge("test_gauge", 3.13232).with_tags(["foo:bar", "baz:quux"]),
                None,
                &[],
                "test_gauge:3.13232|g|#foo:bar,baz:quux\n",
            ),
            (
                MetricSample::gauge("test_gauge", 3.13232)
                    .with_tags(["foo:bar", "baz:quux"])
                    .with_timestamp(234567),
                Some("server1."),
                &[],
                "server1.test_gauge:3.13232|g|#foo:bar,baz:quux|T234567\n",
            ),
            (
                MetricSample::gauge("test_gauge", 3.13232)
                    .with_tags(["foo:bar", "baz:quux"])
                    .with_timestamp(234567),
                Some("server1."),
                &["gfoo:bar", "gbaz:quux"][..],
                "server1.test_gauge:3.13232|g|#gfoo:bar,gbaz:quux,foo:bar,baz:quux|T234567\n",
            ),
            (MetricSample::gauge("test_gauge", -0.5), None, &[], "test_gauge:-0.5|g\n"),
        ];

        for (sample, namespace, global_tags, expected) in cases {
            let mut buffer = WireBuffer::new(8192, usize::MAX, options(namespace, global_tags));
            assert_eq!(buffer.write_metric(&sample), Ok(()));
            assert_eq!(buffer.element_count(), 1);
            assert_eq!(string_from_buffer(&buffer), expected);
        }
    }

    #[test]
    fn count() {
        let cases = [
            (MetricSample::count("test_counter", 91919), None, &[][..], "test_counter:91919|c\n"),
            (MetricSample::count("test_counter", -12), None, &[], "test_counter:-12|c\n"),
            (
                MetricSample::count("test_counter", 666).with_timestamp(345678),
                None,
                &[],
                "test_counter:666|c|T345678\n",
            ),
            (
                MetricSample::count("test_counter", 12345).with_tag("bug:boop").with_rate(0.5),
                None,
                &[],
                "test_counter:12345|c|@0.5|#bug:boop\n",
            ),
            (
                MetricSample::count("test_counter", 777).with_tags(["foo:bar", "baz:quux"]),
                Some("server1."),
                &["env:prod"][..],
                "server1.test_counter:777|c|#env:prod,foo:bar,baz:quux\n",
            ),
        ];

        for (sample, namespace, global_tags, expected) in cases {
            let mut buffer = WireBuffer::new(8192, usize::MAX, options(namespace, global_tags));
            assert_eq!(buffer.write_metric(&sample), Ok(()));
            assert_eq!(string_from_buffer(&buffer), expected);
        }
    }

    #[test]
    fn other_kinds() {
        let cases = [
            (MetricSample::set("users", "alice"), "users:alice|s\n"),
            (MetricSample::set("users", "bob\n"), "users:bob|s\n"),
            (MetricSample::histogram("latency", 22.22), "latency:22.22|h\n"),
            (MetricSample::distribution("latency", 88.0).with_tag("foo:bar"), "latency:88|d|#foo:bar\n"),
            (MetricSample::timing("query", std::time::Duration::from_millis(15)), "query:15|ms\n"),
            (MetricSample::histogram("latency", 1.0).with_rate(0.25), "latency:1|h|@0.25\n"),
        ];

        for (sample, expected) in cases {
            let mut buffer = WireBuffer::new(8192, usize::MAX, options(None, &[]));
            assert_eq!(buffer.write_metric(&sample), Ok(()));
            assert_eq!(string_from_buffer(&buffer), expected);
        }
    }

    #[test]
    fn tag_newlines_are_removed() {
        let mut buffer = WireBuffer::new(8192, usize::MAX, options(None, &["glo\nbal"]));
        let sample = MetricSample::count("requests", 1).with_tag("multi\nline\n");
        assert_eq!(buffer.write_metric(&sample), Ok(()));
        assert_eq!(string_from_buffer(&buffer), "requests:1|c|#global,multiline\n");
    }

    #[test]
    fn container_id_and_cardinality() {
        let options = Arc::new(WireOptions {
            namespace: None,
            global_tags: Vec::new(),
            container_id: Some("abc123".to_string()),
            default_cardinality: Some(Cardinality::Low),
        });

        let mut buffer = WireBuffer::new(8192, usize::MAX, Arc::clone(&options));
        let sample = MetricSample::gauge("temp", 2.5).with_tag("room:a").with_timestamp(1000);
        assert_eq!(buffer.write_metric(&sample), Ok(()));
        assert_eq!(string_from_buffer(&buffer), "temp:2.5|g|#room:a|c:abc123|T1000|card:low\n");

        let mut buffer = WireBuffer::new(8192, usize::MAX, options);
        let sample = MetricSample::gauge("temp", 2.5).with_cardinality(Cardinality::High);
        assert_eq!(buffer.write_metric(&sample), Ok(()));
        assert_eq!(string_from_buffer(&buffer), "temp:2.5|g|c:abc123|card:high\n");
    }

    #[test]
    fn round_trip_gauge() {
        let mut buffer = WireBuffer::new(8192, usize::MAX, options(Some("ns."), &[]));
        let sample = MetricSample::gauge("metric", 1.0).with_tag("tag:tag");
        assert_eq!(buffer.write_metric(&sample), Ok(()));
        assert_eq!(string_from_buffer(&buffer), "ns.metric:1|g|#tag:tag\n");
    }

    #[test]
    fn multiple_elements_are_newline_separated() {
        let mut buffer = WireBuffer::new(8192, usize::MAX, options(None, &[]));
        assert_eq!(buffer.write_metric(&MetricSample::count("a", 1)), Ok(()));
        assert_eq!(buffer.write_metric(&MetricSample::gauge("b", 2.0)), Ok(()));
        assert_eq!(buffer.element_count(), 2);
        assert_eq!(string_from_buffer(&buffer), "a:1|c\nb:2|g\n");
    }

    #[test]
    fn max_size() {
        let mut buffer = WireBuffer::new(30, 10, options(Some("namespace."), &["tag:tag"]));
        let sample = MetricSample::gauge("metric", 1.0);

        assert_eq!(buffer.write_metric(&sample), Ok(()));
        assert_eq!(buffer.len(), 30);

        let before = buffer.as_bytes().to_vec();
        assert_eq!(buffer.write_metric(&sample), Err(WriteError::BufferFull));
        assert_eq!(buffer.len(), 30);
        assert_eq!(buffer.as_bytes(), &before[..]);
        assert_eq!(buffer.element_count(), 1);
    }

    #[test]
    fn max_elements() {
        let mut buffer = WireBuffer::new(1024, 1, options(Some("namespace."), &["tag:tag"]));
        let sample = MetricSample::gauge("metric", 1.0);

        assert_eq!(buffer.write_metric(&sample), Ok(()));
        assert_eq!(buffer.write_metric(&sample), Err(WriteError::BufferFull));
        assert_eq!(string_from_buffer(&buffer), "namespace.metric:1|g|#tag:tag\n");
    }

    #[test]
    fn aggregated() {
        let ctx = context("metric", &["tag:tag"]);
        let ns = || options(Some("namespace."), &[]);

        let mut buffer = WireBuffer::new(1024, 1, ns());
        assert_eq!(buffer.write_aggregated(MetricKind::Histogram, &ctx, &[1.0], 1.0), Ok(1));
        assert_eq!(string_from_buffer(&buffer), "namespace.metric:1|h|#tag:tag\n");

        let mut buffer = WireBuffer::new(1024, 1, ns());
        assert_eq!(buffer.write_aggregated(MetricKind::Histogram, &ctx, &[1.0, 2.0, 3.0, 4.0], 1.0), Ok(4));
        assert_eq!(string_from_buffer(&buffer), "namespace.metric:1:2:3:4|h|#tag:tag\n");

        // Element budget already used.
        let mut buffer = WireBuffer::new(1024, 1, ns());
        assert_eq!(buffer.write_aggregated(MetricKind::Histogram, &ctx, &[1.0], 1.0), Ok(1));
        assert_eq!(
            buffer.write_aggregated(MetricKind::Histogram, &ctx, &[1.0], 1.0),
            Err(WriteError::BufferFull)
        );

        // Header and trailer alone do not fit.
        let mut buffer = WireBuffer::new(4, 1, ns());
        assert_eq!(
            buffer.write_aggregated(MetricKind::Histogram, &ctx, &[1.0, 2.0], 1.0),
            Err(WriteError::BufferFull)
        );
        assert!(buffer.as_bytes().is_empty());

        // Not a single value fits.
        let mut buffer = WireBuffer::new(29, 1, ns());
        assert_eq!(
            buffer.write_aggregated(MetricKind::Histogram, &ctx, &[1.0, 2.0], 1.0),
            Err(WriteError::BufferFull)
        );
        assert!(buffer.as_bytes().is_empty());

        // Room for exactly one value.
        let mut buffer = WireBuffer::new(30, 1, ns());
        assert_eq!(
            buffer.write_aggregated(MetricKind::Histogram, &ctx, &[1.0, 2.0, 3.0, 4.0], 1.0),
            Err(WriteError::PartialWrite(1))
        );
        assert_eq!(string_from_buffer(&buffer), "namespace.metric:1|h|#tag:tag\n");

        // First value is too big.
        let mut buffer = WireBuffer::new(30, 1, ns());
        assert_eq!(
            buffer.write_aggregated(MetricKind::Histogram, &ctx, &[12.0, 2.0, 3.0, 4.0], 1.0),
            Err(WriteError::BufferFull)
        );
        assert!(buffer.as_bytes().is_empty());

        // Not enough room left after existing content.
        let mut buffer = WireBuffer::new(40, 2, options(Some("namespace."), &[]));
        let filler = MetricSample::count("abcde", 1);
        assert_eq!(buffer.write_metric(&filler), Ok(()));
        assert_eq!(buffer.len(), 20);
        assert_eq!(
            buffer.write_aggregated(MetricKind::Histogram, &ctx, &[12.0, 2.0, 3.0, 4.0], 1.0),
            Err(WriteError::BufferFull)
        );
        assert_eq!(string_from_buffer(&buffer), "namespace.abcde:1|c\n");
    }

    #[test]
    fn aggregated_partial_write() {
        let ctx = context("metric", &["tag:tag"]);
        let mut buffer = WireBuffer::new(32, 1, options(Some("namespace."), &[]));
        assert_eq!(
            buffer.write_aggregated(MetricKind::Histogram, &ctx, &[1.0, 2.0, 3.0, 4.0], 1.0),
            Err(WriteError::PartialWrite(2))
        );
        assert_eq!(string_from_buffer(&buffer), "namespace.metric:1:2|h|#tag:tag\n");
        assert_eq!(buffer.element_count(), 1);
    }

    #[test]
    fn aggregated_rate_and_kinds() {
        let ctx = context("latency", &[]);
        let cases = [
            (MetricKind::Histogram, 1.0, "latency:1.5:2|h\n"),
            (MetricKind::Distribution, 0.5, "latency:1.5:2|d|@0.5\n"),
            (MetricKind::Timing, 0.25, "latency:1.5:2|ms|@0.25\n"),
        ];

        for (kind, rate, expected) in cases {
            let mut buffer = WireBuffer::new(1024, usize::MAX, options(None, &[]));
            assert_eq!(buffer.write_aggregated(kind, &ctx, &[1.5, 2.0], rate), Ok(2));
            assert_eq!(string_from_buffer(&buffer), expected);
        }
    }

    #[test]
    fn event() {
        // Cases are defined as: event, global tags, expected output.
        let cases = [
            (Event::new("title", "text"), &[][..], "_e{5,4}:title|text\n"),
            (Event::new("title", "line1\nline2"), &[], "_e{5,12}:title|line1\\nline2\n"),
            (
                Event::new("deploy", "v2 is out")
                    .with_timestamp(1_700_000_000)
                    .with_hostname("web-1")
                    .with_aggregation_key("deploys")
                    .with_priority(EventPriority::Low)
                    .with_source_type_name("ci")
                    .with_alert_type(EventAlertType::Success)
                    .with_tags(["team:infra"]),
                &["env:prod"],
                "_e{6,9}:deploy|v2 is out|d:1700000000|h:web-1|k:deploys|p:low|s:ci|t:success|#env:prod,team:infra\n",
            ),
        ];

        for (event, global_tags, expected) in cases {
            // Namespaces only apply to metric names.
            let mut buffer = WireBuffer::new(8192, usize::MAX, options(Some("ignored."), global_tags));
            assert_eq!(buffer.write_event(&event), Ok(()));
            assert_eq!(string_from_buffer(&buffer), expected);
        }
    }

    #[test]
    fn service_check() {
        let cases = [
            (ServiceCheck::new("db.up", ServiceCheckStatus::Ok), "_sc|db.up|0\n"),
            (
                ServiceCheck::new("db.up", ServiceCheckStatus::Critical)
                    .with_timestamp(1_700_000_000)
                    .with_hostname("db-1")
                    .with_tags(["shard:3"])
                    .with_message("down\nm:retrying"),
                "_sc|db.up|2|d:1700000000|h:db-1|#shard:3|m:down\\nm\\:retrying\n",
            ),
        ];

        for (check, expected) in cases {
            let mut buffer = WireBuffer::new(8192, usize::MAX, options(None, &[]));
            assert_eq!(buffer.write_service_check(&check), Ok(()));
            assert_eq!(string_from_buffer(&buffer), expected);
        }
    }

    #[test]
    fn reset_keeps_nothing() {
        let mut buffer = WireBuffer::new(8192, usize::MAX, options(None, &[]));
        assert_eq!(buffer.write_metric(&MetricSample::count("a", 1)), Ok(()));
        buffer.reset();
        assert!(buffer.is_empty());
        assert_eq!(buffer.len(), 0);
        assert_eq!(buffer.element_count(), 0);
    }

    #[test]
    fn line_parts_from_sample() {
        let sample = MetricSample::count("a", 1).with_rate(0.5).with_timestamp(5);
        let parts = LineParts::from(&sample);
        assert_eq!(parts.name, "a");
        assert_eq!(parts.rate, 0.5);
        assert_eq!(parts.timestamp, Some(5));
    }

    #[derive(Debug)]
    enum InputMetric {
        Single(MetricSample),
        Aggregated(Context, Vec<f64>),
    }

    fn arb_tags() -> impl Strategy<Value = Vec<String>> {
        arb_vec("[a-z]{4,12}(:[a-z0-9]{4,16})?", 0..4)
    }

    fn arb_metric() -> impl Strategy<Value = InputMetric> {
        let name_regex = "[a-zA-Z0-9_.]{1,32}";
        let counter = (name_regex, any::<i64>(), arb_tags())
            .prop_map(|(n, v, t)| InputMetric::Single(MetricSample::count(n, v).with_tags(t)));
        let gauge = (name_regex, any::<f64>(), arb_tags())
            .prop_map(|(n, v, t)| InputMetric::Single(MetricSample::gauge(n, v).with_tags(t)));
        let set = (name_regex, "[a-z]{1,16}", arb_tags())
            .prop_map(|(n, v, t)| InputMetric::Single(MetricSample::set(n, v).with_tags(t)));
        let aggregated = (name_regex, arb_vec(any::<f64>(), 1..64), arb_tags()).prop_map(|(n, v, t)| {
            InputMetric::Aggregated(Context { name: n, cardinality: None, tags: t }, v)
        });

        prop_oneof![counter, gauge, set, aggregated]
    }

    proptest! {
        #[test]
        fn property_test_gauntlet(
            max_size in SMALLEST_VALID_PAYLOAD.len()..2048usize,
            max_elements in 1..64usize,
            inputs in arb_vec(arb_metric(), 1..128),
        ) {
            let mut buffer = WireBuffer::new(max_size, max_elements, options(Some("ns."), &["env:test"]));

            for input in inputs {
                let before = buffer.as_bytes().to_vec();
                let elements_before = buffer.element_count();

                match input {
                    InputMetric::Single(sample) => match buffer.write_metric(&sample) {
                        Ok(()) => prop_assert_eq!(buffer.element_count(), elements_before + 1),
                        Err(e) => {
                            prop_assert_eq!(e, WriteError::BufferFull);
                            prop_assert_eq!(buffer.as_bytes(), &before[..]);
                            prop_assert_eq!(buffer.element_count(), elements_before);
                        }
                    },
                    InputMetric::Aggregated(ctx, values) => {
                        match buffer.write_aggregated(MetricKind::Distribution, &ctx, &values, 1.0) {
                            Ok(written) => prop_assert_eq!(written, values.len()),
                            Err(WriteError::PartialWrite(written)) => {
                                prop_assert!(written > 0 && written < values.len());
                                prop_assert_eq!(buffer.element_count(), elements_before + 1);
                            }
                            Err(WriteError::BufferFull) => {
                                prop_assert_eq!(buffer.as_bytes(), &before[..]);
                                prop_assert_eq!(buffer.element_count(), elements_before);
                            }
                        }
                    }
                }

                prop_assert!(buffer.len() <= max_size);
                prop_assert!(buffer.element_count() <= max_elements);
            }

            let payload = std::str::from_utf8(buffer.as_bytes()).unwrap();
            prop_assert_eq!(payload.lines().count(), buffer.element_count());
            prop_assert!(payload.is_empty() || payload.ends_with('\n'));
        }
    }
}
