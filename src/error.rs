use std::io::{self, ErrorKind};

use thiserror::Error;

use crate::piece::BlockRequest;

/// Errors raised by the piece manager.
///
/// Every variant is returned before any queue or block state is touched, so a
/// caller may drop the offending message and carry on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PieceError {
    #[error("invalid piece layout: {reason}")]
    Config { reason: String },

    #[error("received block {received:?} does not match outstanding request {expected:?}")]
    Mismatch {
        expected: BlockRequest,
        received: BlockRequest,
    },

    #[error("piece {index} is not in progress")]
    UnknownPiece { index: usize },

    #[error("piece {index} has no block at offset {offset}")]
    UnknownBlock { index: usize, offset: u32 },
}

impl PieceError {
    pub(crate) fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }
}

/// Errors raised by the UDP tracker scrape client.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("tracker response too short: {len} bytes, expected at least {expected}")]
    ShortResponse { len: usize, expected: usize },

    #[error("transaction id mismatch: sent {sent:#010x}, received {received:#010x}")]
    TransactionMismatch { sent: i32, received: i32 },

    #[error("tracker returned an error: {0}")]
    Tracker(String),

    #[error("unexpected tracker action {0}")]
    UnexpectedAction(i32),

    #[error("cannot scrape {requested} info hashes in one request (max {max})")]
    Capacity { requested: usize, max: usize },

    #[error("no tracker response after {attempts} attempt(s)")]
    Timeout { attempts: u32 },

    #[error("invalid tracker url: {0}")]
    InvalidUrl(String),

    #[error("tracker i/o error")]
    Io(#[from] io::Error),
}

impl TrackerError {
    /// Whether a fresh attempt (new transaction id) may succeed.
    ///
    /// A refused datagram (ICMP port unreachable on a connected socket) is
    /// as transient as a lost one.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ShortResponse { .. } | Self::TransactionMismatch { .. } | Self::Timeout { .. } => {
                true
            }
            Self::Io(e) => matches!(
                e.kind(),
                ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset
            ),
            _ => false,
        }
    }
}
