//! per-probe-outcome counters, gathered into the process-wide registry.

use lazy_static::lazy_static;
use prometheus::{Histogram, IntCounter, register_histogram, register_int_counter};

lazy_static! {
    pub static ref ECHO_REQUEST_COUNT: IntCounter =
        register_int_counter!("icmp_echo_request_total", "count of ICMPv4 echo requests sent").unwrap();
    pub static ref ECHO_REPLY_COUNT: IntCounter =
        register_int_counter!("icmp_echo_reply_total", "count of ICMPv4 echo replies received").unwrap();
    pub static ref PROBE_REPLIED: IntCounter = register_int_counter!(
        "icmp_probe_replied_total",
        "count of probes that completed with a matching reply"
    )
    .unwrap();
    pub static ref PROBE_RTT: Histogram = register_histogram!(
        "icmp_probe_rtt_seconds",
        "round-trip time of replied probes, in seconds"
    )
    .unwrap();
    pub static ref PROBE_TIMEOUT: IntCounter = register_int_counter!(
        "icmp_probe_timeout_total",
        "count of probes that were scavenged without a reply"
    )
    .unwrap();
    pub static ref PROBE_SEND_FAILED: IntCounter = register_int_counter!(
        "icmp_probe_send_failed_total",
        "count of probes that never got an echo request on the wire, \
         whether the send itself failed or registration was rejected \
         for a sequence collision"
    )
    .unwrap();
    pub static ref PROBE_MISMATCHED: IntCounter = register_int_counter!(
        "icmp_probe_mismatched_total",
        "count of replies whose source address didn't match the probed target"
    )
    .unwrap();
    pub static ref PROBE_UNKNOWN_SEQUENCE: IntCounter = register_int_counter!(
        "icmp_probe_unknown_sequence_total",
        "count of replies whose sequence number matched no pending probe"
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
        ECHO_REQUEST_COUNT.inc();
        let names: HashSet<_> = gather().iter().map(|f| f.get_name().to_string()).collect();
        assert!(names.contains("icmp_echo_request_total"));
    }
}
