#![allow(missing_docs)]
//! process-wide metrics for the parts of the pipeline not owned by
//! `ping-engine` or `resolver-pool`.

use lazy_static::lazy_static;
use prometheus::{IntGauge, register_int_counter_vec, register_int_gauge};
use prometheus_static_metric::make_static_metric;

make_static_metric! {
    pub label_enum SinkResult {
        ok,
        error,
    }
    pub struct SinkInsertStats: IntCounter {
        "result" => SinkResult,
    }
    pub struct SinkPurgeStats: IntCounter {
        "result" => SinkResult,
    }
}

lazy_static! {
    pub static ref REGISTRY_DEVICES: IntGauge =
        register_int_gauge!("registry_devices", "count of devices currently tracked").unwrap();
    pub static ref MEASUREMENT_BUFFER_LEN: IntGauge = register_int_gauge!(
        "measurement_buffer_len",
        "length of the measurement buffer sampled at flush time"
    )
    .unwrap();
    pub static ref SINK_INSERT_COUNT: SinkInsertStats = SinkInsertStats::from(
        &register_int_counter_vec!(
            "sink_insert_total",
            "count of measurement insert batches by result",
            &["result"]
        )
        .unwrap(),
    );
    pub static ref SINK_PURGE_COUNT: SinkPurgeStats = SinkPurgeStats::from(
        &register_int_counter_vec!(
            "sink_purge_total",
            "count of purge operations by result",
            &["result"]
        )
        .unwrap(),
    );
    pub static ref SINK_RECONNECT_COUNT: prometheus::IntCounter = prometheus::register_int_counter!(
        "sink_subscription_reconnect_total",
        "count of record sink reconnects"
    )
    .unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::gather;
    use std::collections::HashSet;

    #[test]
    fn metrics_are_registered() {
        REGISTRY_DEVICES.set(3);
        SINK_INSERT_COUNT.ok.inc();
        let names: HashSet<_> = gather().iter().map(|f| f.get_name().to_string()).collect();
        assert!(names.contains("registry_devices"));
        assert!(names.contains("sink_insert_total"));
    }
}
