//! ties the codec, transport, sequence allocator and pending table together
//! into a running ICMPv4 ping engine.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::codec::{ECHO_REQUEST_BUFFER_SIZE, EchoReply, EchoRequest};
use crate::errors::{Error, Result};
use crate::metrics;
use crate::pending::{Completed, PendingTable};
use crate::sequence::SequenceAllocator;
use crate::transport::Transport;

/// identifier this process stamps on every echo request it sends. Fixed
/// rather than randomized per-probe, matching conventional ping behavior of
/// tagging the whole process with one identifier.
pub const DEFAULT_IDENTIFIER: u16 = 0x3039;

/// a running ICMPv4 ping engine: a socket, a receiver task decoding replies
/// into the pending table, and a scavenger task draining completed/expired
/// entries out to `measurements`.
#[derive(Debug)]
pub struct PingEngine {
    transport: Arc<Transport>,
    pending: Arc<PendingTable>,
    sequence: SequenceAllocator,
    ident: u16,
    timeout: Duration,
}

impl PingEngine {
    /// start the engine, returning it alongside the channel completed
    /// probes are delivered on. `cancel` stops the background receiver and
    /// scavenger tasks.
    pub fn start(timeout: Duration, cancel: CancellationToken) -> Result<(Arc<Self>, mpsc::Receiver<Completed>)> {
        let transport = Arc::new(Transport::new()?);
        let pending = Arc::new(PendingTable::new());
        let (tx, rx) = mpsc::channel(1024);

        spawn_receiver(transport.clone(), pending.clone(), cancel.clone());
        spawn_scavenger(pending.clone(), timeout, tx, cancel);

        Ok((
            Arc::new(Self {
                transport,
                pending,
                sequence: SequenceAllocator::new(),
                ident: DEFAULT_IDENTIFIER,
                timeout,
            }),
            rx,
        ))
    }

    /// the configured per-probe timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// number of probes currently awaiting a reply or scavenge.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// allocate a sequence number, register a pending entry, and send the
    /// echo request. On send failure the pending entry is removed
    /// immediately and no measurement is ever produced for it.
    pub async fn send_probe(&self, device_id: impl Into<String>, target: IpAddr) -> Result<()> {
        let device_id = device_id.into();
        let seq_cnt = self.sequence.next();
        if let Err(err) = self.pending.insert(seq_cnt, device_id, target) {
            metrics::PROBE_SEND_FAILED.inc();
            return Err(err);
        }

        let mut buf = [0u8; ECHO_REQUEST_BUFFER_SIZE];
        let req = EchoRequest {
            ident: self.ident,
            seq_cnt,
        };
        req.encode(&mut buf)?;

        if let Err(source) = self.transport.send_to(&buf, target).await {
            self.pending.remove_send_failure(seq_cnt);
            error!(seq_cnt, %target, %source, "failed to send echo request");
            metrics::PROBE_SEND_FAILED.inc();
            return Err(Error::SendFailed {
                seq_cnt,
                ident: self.ident,
                source,
            });
        }
        metrics::ECHO_REQUEST_COUNT.inc();
        debug!(seq_cnt, %target, "sent echo request");
        Ok(())
    }
}

fn spawn_receiver(transport: Arc<Transport>, pending: Arc<PendingTable>, cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut buf = [0u8; 1024];
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("ping engine receiver stopping");
                    return;
                }
                res = transport.recv(&mut buf) => {
                    match res {
                        Ok((n, addr)) => {
                            match EchoReply::decode(&buf[..n], transport.decode_header) {
                                Ok(reply) => {
                                    metrics::ECHO_REPLY_COUNT.inc();
                                    if reply.ident != DEFAULT_IDENTIFIER {
                                        debug!(ident = reply.ident, "dropped reply with foreign identifier");
                                        continue;
                                    }
                                    pending.on_reply(reply.seq_cnt, addr.ip());
                                }
                                Err(err) => {
                                    debug!(?err, "dropped unparseable icmp packet");
                                }
                            }
                        }
                        Err(err) => {
                            error!(?err, "error receiving from icmp socket");
                        }
                    }
                }
            }
        }
    });
}

fn spawn_scavenger(
    pending: Arc<PendingTable>,
    timeout: Duration,
    out: mpsc::Sender<Completed>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(timeout / 2);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("ping engine scavenger stopping");
                    return;
                }
                _ = ticker.tick() => {
                    for completed in pending.scavenge(timeout) {
                        match &completed.outcome {
                            crate::pending::Outcome::Replied { rtt } => {
                                metrics::PROBE_REPLIED.inc();
                                metrics::PROBE_RTT.observe(rtt.as_secs_f64());
                            }
                            crate::pending::Outcome::TimedOut => metrics::PROBE_TIMEOUT.inc(),
                        }
                        if out.send(completed).await.is_err() {
                            debug!("measurement receiver dropped, scavenger stopping");
                            return;
                        }
                    }
                }
            }
        }
    });
}
