//! error types for the ping engine

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid size")]
    InvalidSize,
    #[error("invalid packet")]
    InvalidPacket,
    #[error("malformed icmp packet")]
    Malformed,
    #[error("bad checksum")]
    BadChecksum,
    #[error("ipv4 packet failed")]
    BadIpv4,
    #[error("io error: {0:?}")]
    Io(#[from] std::io::Error),
    #[error("probe timed out: seq={seq_cnt} ident={ident}")]
    Timeout { seq_cnt: u16, ident: u16 },
    #[error("send failed: seq={seq_cnt} ident={ident}: {source}")]
    SendFailed {
        seq_cnt: u16,
        ident: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("sequence {seq_cnt} already pending, wrap collision")]
    PendingOverflow { seq_cnt: u16 },
}

pub type Result<T> = std::result::Result<T, Error>;
