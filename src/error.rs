//! Error types for subnet ingestion
//!
//! Lookups in the topology structures never fail; they return `Option`.
//! Errors only arise at the ingestion boundary, when a measurement record
//! is malformed or breaks a structural contract (inverted borders).

use std::net::Ipv4Addr;
use thiserror::Error;

/// Errors raised while reading or building subnet records
#[derive(Debug, Error)]
pub enum Error {
    /// A subnet record line could not be parsed
    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },

    /// Subnet borders are inverted or do not describe a CIDR block
    #[error("invalid subnet borders {lower} - {upper}")]
    InvalidBorders { lower: Ipv4Addr, upper: Ipv4Addr },

    /// Pivot TTL of zero (a subnet is always at least one hop away)
    #[error("invalid pivot TTL 0 for {0}")]
    ZeroPivotTtl(String),

    /// I/O error while reading or writing subnet files
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn parse(reason: impl Into<String>) -> Self {
        Error::Parse {
            line: 0,
            reason: reason.into(),
        }
    }

    /// Attach a line number to a parse error
    pub(crate) fn at_line(self, line: usize) -> Self {
        match self {
            Error::Parse { reason, .. } => Error::Parse { line, reason },
            other => other,
        }
    }
}

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, Error>;
