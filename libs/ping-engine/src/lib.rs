//! sequence-multiplexed ICMPv4 echo request/reply engine.
#![warn(missing_debug_implementations, rust_2018_idioms)]

mod codec;
mod engine;
mod errors;
mod metrics;
mod pending;
mod sequence;
mod transport;

pub use codec::{ECHO_REQUEST_BUFFER_SIZE, EchoReply, EchoRequest, ICMP_HEADER_SIZE};
pub use engine::{DEFAULT_IDENTIFIER, PingEngine};
pub use errors::{Error, Result};
pub use pending::{Completed, Outcome};
pub use sequence::SequenceAllocator;
