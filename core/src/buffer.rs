//! the measurement buffer: accumulates completed probes between flushes.

use parking_lot::Mutex;

use crate::metrics;
use crate::model::Measurement;

#[derive(Debug, Default)]
pub struct MeasurementBuffer {
    inner: Mutex<Vec<Measurement>>,
}

impl MeasurementBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, measurement: Measurement) {
        self.inner.lock().push(measurement);
    }

    /// atomically swap out the buffered measurements for an empty `Vec`,
    /// returning whatever had accumulated since the last flush. Nothing is
    /// returned (and the sink is never called) when the buffer is empty.
    pub fn take(&self) -> Vec<Measurement> {
        let mut inner = self.inner.lock();
        let drained = std::mem::take(&mut *inner);
        metrics::MEASUREMENT_BUFFER_LEN.set(drained.len() as i64);
        drained
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::net::Ipv4Addr;

    #[test]
    fn take_drains_and_resets() {
        let buffer = MeasurementBuffer::new();
        buffer.push(Measurement::timed_out("d1".into(), Ipv4Addr::new(1, 2, 3, 4), Utc::now()));
        buffer.push(Measurement::timed_out("d2".into(), Ipv4Addr::new(1, 2, 3, 5), Utc::now()));
        assert_eq!(buffer.len(), 2);

        let drained = buffer.take();
        assert_eq!(drained.len(), 2);
        assert!(buffer.is_empty());
    }

    #[test]
    fn take_on_empty_buffer_returns_empty_vec() {
        let buffer = MeasurementBuffer::new();
        assert!(buffer.take().is_empty());
    }
}
