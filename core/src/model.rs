//! domain types: devices, measurements, and the wire snapshot shape the
//! record sink publishes.

use std::net::Ipv4Addr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// a named device as published by the control plane, with its
/// last-resolved set of IPv4 addresses.
#[derive(Debug)]
pub struct Device {
    pub id: String,
    state: Mutex<DeviceState>,
}

#[derive(Debug, Clone)]
struct DeviceState {
    hostname: String,
    addrs: Vec<Ipv4Addr>,
}

impl Device {
    pub fn new(id: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: Mutex::new(DeviceState {
                hostname: hostname.into(),
                addrs: Vec::new(),
            }),
        }
    }

    pub fn hostname(&self) -> String {
        self.state.lock().hostname.clone()
    }

    pub fn addrs(&self) -> Vec<Ipv4Addr> {
        self.state.lock().addrs.clone()
    }

    /// replace the hostname and clear the address list; a subsequent
    /// resolve is required to repopulate it.
    pub fn set_hostname(&self, hostname: impl Into<String>) {
        let mut state = self.state.lock();
        state.hostname = hostname.into();
        state.addrs.clear();
    }

    pub fn set_addrs(&self, addrs: Vec<Ipv4Addr>) {
        self.state.lock().addrs = addrs;
    }
}

/// a full-replace snapshot entry published by the control plane.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceSnapshot {
    pub id: String,
    pub hostname: String,
}

/// the outcome of a single probe, ready to be forwarded to the sink.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MeasurementOutcome {
    Replied { rtt_ms: u64 },
    TimedOut,
}

/// a single completed probe, attributed to its device. `sent_time` is the
/// probe's send time, not the time it was scavenged/recorded -- purge
/// compares against it directly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Measurement {
    pub device_id: String,
    pub target: Ipv4Addr,
    pub sent_time: DateTime<Utc>,
    pub outcome: MeasurementOutcome,
}

impl Measurement {
    pub fn replied(device_id: String, target: Ipv4Addr, sent_time: DateTime<Utc>, rtt: Duration) -> Self {
        Self {
            device_id,
            target,
            sent_time,
            outcome: MeasurementOutcome::Replied {
                rtt_ms: rtt.as_millis() as u64,
            },
        }
    }

    pub fn timed_out(device_id: String, target: Ipv4Addr, sent_time: DateTime<Utc>) -> Self {
        Self {
            device_id,
            target,
            sent_time,
            outcome: MeasurementOutcome::TimedOut,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_hostname_clears_addrs() {
        let device = Device::new("d1", "old.example.com");
        device.set_addrs(vec!["10.0.0.1".parse().unwrap()]);
        assert_eq!(device.addrs().len(), 1);

        device.set_hostname("new.example.com");
        assert_eq!(device.hostname(), "new.example.com");
        assert!(device.addrs().is_empty());
    }

    #[test]
    fn measurement_serializes_with_outcome_tag() {
        let m = Measurement::replied(
            "d1".into(),
            "1.2.3.4".parse().unwrap(),
            Utc::now(),
            Duration::from_millis(12),
        );
        let json = serde_json::to_string(&m).unwrap();
        assert!(json.contains("\"outcome\":\"replied\""));
    }

    #[test]
    fn measurement_replied_rounds_rtt_to_integer_millis() {
        let m = Measurement::replied(
            "d1".into(),
            "1.2.3.4".parse().unwrap(),
            Utc::now(),
            Duration::from_micros(12_500),
        );
        assert_eq!(m.outcome, MeasurementOutcome::Replied { rtt_ms: 12 });
    }
}
