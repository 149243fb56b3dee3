//! sequence-keyed pending table: outstanding probes awaiting either a
//! matching reply or scavenging at `timeout / 2`.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::errors::{Error, Result};
use crate::metrics;

/// outcome delivered for a probe once it leaves the pending table.
#[derive(Debug, Clone, Copy)]
pub enum Outcome {
    Replied { rtt: Duration },
    TimedOut,
}

/// an outstanding probe, keyed by ICMP sequence number.
#[derive(Debug, Clone)]
pub struct Entry {
    pub device_id: String,
    pub target: IpAddr,
    pub sent: Instant,
    pub sent_time: DateTime<Utc>,
    replied_at: Option<Instant>,
}

/// a probe that has left the table, ready for the caller to turn into a
/// measurement.
#[derive(Debug, Clone)]
pub struct Completed {
    pub seq_cnt: u16,
    pub device_id: String,
    pub target: IpAddr,
    pub sent: Instant,
    pub sent_time: DateTime<Utc>,
    pub outcome: Outcome,
}

#[derive(Debug, Default)]
pub struct PendingTable {
    inner: Mutex<HashMap<u16, Entry>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// register a probe under `seq_cnt`. Fails with `PendingOverflow` if the
    /// slot is already occupied (a wrap-around collision); the caller must
    /// reject the new probe rather than let it silently replace the
    /// outstanding one.
    pub fn insert(&self, seq_cnt: u16, device_id: String, target: IpAddr) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.contains_key(&seq_cnt) {
            warn!(seq_cnt, "sequence collision on register, rejecting new probe");
            return Err(Error::PendingOverflow { seq_cnt });
        }
        inner.insert(
            seq_cnt,
            Entry {
                device_id,
                target,
                sent: Instant::now(),
                sent_time: Utc::now(),
                replied_at: None,
            },
        );
        Ok(())
    }

    /// send failed synchronously: drop the entry immediately, no measurement
    /// is ever produced for it.
    pub fn remove_send_failure(&self, seq_cnt: u16) {
        self.inner.lock().remove(&seq_cnt);
    }

    /// record an inbound echo reply. If the sequence is unknown the reply is
    /// logged and dropped. If the source address doesn't match the probe's
    /// target the mismatch is logged and the entry is left pending (it will
    /// still be collected as a timeout by the scavenger unless a matching
    /// reply later arrives).
    pub fn on_reply(&self, seq_cnt: u16, from: IpAddr) {
        let mut inner = self.inner.lock();
        match inner.get_mut(&seq_cnt) {
            Some(entry) if entry.target == from => {
                entry.replied_at = Some(Instant::now());
            }
            Some(entry) => {
                warn!(
                    seq_cnt,
                    expected = %entry.target,
                    received = %from,
                    "mismatched reply address"
                );
                metrics::PROBE_MISMATCHED.inc();
            }
            None => {
                warn!(seq_cnt, %from, "reply for unknown sequence");
                metrics::PROBE_UNKNOWN_SEQUENCE.inc();
            }
        }
    }

    /// drain every entry that has either been replied to or aged past
    /// `timeout`, called by the scavenger on a `timeout / 2` cadence.
    pub fn scavenge(&self, timeout: Duration) -> Vec<Completed> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let done: Vec<u16> = inner
            .iter()
            .filter(|(_, e)| e.replied_at.is_some() || now.duration_since(e.sent) >= timeout)
            .map(|(seq, _)| *seq)
            .collect();

        done.into_iter()
            .filter_map(|seq| {
                inner.remove(&seq).map(|entry| {
                    let outcome = match entry.replied_at {
                        Some(replied_at) => Outcome::Replied {
                            rtt: replied_at.duration_since(entry.sent),
                        },
                        None => Outcome::TimedOut,
                    };
                    debug!(seq, ?outcome, "scavenged probe");
                    Completed {
                        seq_cnt: seq,
                        device_id: entry.device_id,
                        target: entry.target,
                        sent: entry.sent,
                        sent_time: entry.sent_time,
                        outcome,
                    }
                })
            })
            .collect()
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
    use std::net::Ipv4Addr;
    use std::thread::sleep;

    fn addr(s: &str) -> IpAddr {
        s.parse::<Ipv4Addr>().unwrap().into()
    }

    #[test]
    fn matched_reply_is_scavenged_as_replied() {
        let table = PendingTable::new();
        table.insert(1, "dev-a".into(), addr("10.0.0.1")).unwrap();
        table.on_reply(1, addr("10.0.0.1"));

        let completed = table.scavenge(Duration::from_secs(60));
        assert_eq!(completed.len(), 1);
        assert!(matches!(completed[0].outcome, Outcome::Replied { .. }));
        assert!(table.is_empty());
    }

    #[test]
    fn mismatched_reply_is_left_pending() {
        let table = PendingTable::new();
        table.insert(1, "dev-a".into(), addr("10.0.0.1")).unwrap();
        table.on_reply(1, addr("10.0.0.2"));

        // not yet timed out: still pending, not scavenged
        let completed = table.scavenge(Duration::from_secs(60));
        assert!(completed.is_empty());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn unknown_sequence_reply_is_a_noop() {
        let table = PendingTable::new();
        table.on_reply(99, addr("10.0.0.1"));
        assert!(table.is_empty());
    }

    #[test]
    fn send_failure_drops_entry_without_completion() {
        let table = PendingTable::new();
        table.insert(1, "dev-a".into(), addr("10.0.0.1")).unwrap();
        table.remove_send_failure(1);
        assert!(table.scavenge(Duration::from_secs(0)).is_empty());
    }

    #[test]
    fn unreplied_entry_scavenged_as_timeout_after_deadline() {
        let table = PendingTable::new();
        table.insert(1, "dev-a".into(), addr("10.0.0.1")).unwrap();
        sleep(Duration::from_millis(5));

        let completed = table.scavenge(Duration::from_millis(1));
        assert_eq!(completed.len(), 1);
        assert!(matches!(completed[0].outcome, Outcome::TimedOut));
    }

    #[test]
    fn colliding_sequence_rejects_new_probe_and_keeps_original() {
        let table = PendingTable::new();
        table.insert(7, "dev-a".into(), addr("10.0.0.1")).unwrap();

        let err = table.insert(7, "dev-b".into(), addr("10.0.0.2")).unwrap_err();
        assert!(matches!(err, Error::PendingOverflow { seq_cnt: 7 }));

        // original entry (dev-a) is untouched by the rejected insert
        table.on_reply(7, addr("10.0.0.1"));
        let completed = table.scavenge(Duration::from_secs(60));
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].device_id, "dev-a");
    }
}
