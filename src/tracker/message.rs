//! UDP tracker datagrams (BEP 15), connect and scrape only.
//!
//! All integers are big-endian. Requests carry a transaction id drawn from
//! the thread-local CSPRNG; responses are only accepted when they echo it.

use nom::{
    IResult, Parser,
    multi::count,
    number::complete::{be_i32, be_i64, be_u32},
};
use rand::Rng;

use crate::error::TrackerError;
use crate::tracker::{InfoHash, ScrapeStats};

/// Magic connection id for the connect request.
pub const PROTOCOL_ID: i64 = 0x41727101980;
/// Most info hashes a single scrape datagram may carry.
pub const MAX_SCRAPE_HASHES: usize = 74;

const HEADER_LEN: usize = 8; // action + transaction id
const CONNECT_RESPONSE_LEN: usize = 16;
const SCRAPE_ENTRY_LEN: usize = 12;

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Connect = 0,
    Scrape = 2,
    Error = 3,
}

impl Action {
    fn from_wire(value: i32) -> Result<Self, TrackerError> {
        match value {
            0 => Ok(Self::Connect),
            2 => Ok(Self::Scrape),
            3 => Ok(Self::Error),
            other => Err(TrackerError::UnexpectedAction(other)),
        }
    }
}

/// A fresh, unpredictable transaction id spanning the full 32 bits.
pub fn new_transaction_id() -> i32 {
    rand::rng().random()
}

#[derive(Debug, Clone, Copy)]
pub struct ConnectRequest {
    pub transaction_id: i32,
}

impl ConnectRequest {
    pub fn new() -> Self {
        Self {
            transaction_id: new_transaction_id(),
        }
    }

    pub fn serialize(&self) -> [u8; 16] {
        let mut buf = [0u8; 16];
        buf[0..8].copy_from_slice(&PROTOCOL_ID.to_be_bytes());
        buf[8..12].copy_from_slice(&(Action::Connect as i32).to_be_bytes());
        buf[12..16].copy_from_slice(&self.transaction_id.to_be_bytes());
        buf
    }
}

impl Default for ConnectRequest {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct ScrapeRequest<'a> {
    pub connection_id: i64,
    pub transaction_id: i32,
    pub info_hashes: &'a [InfoHash],
}

impl<'a> ScrapeRequest<'a> {
    /// Fails with [`TrackerError::Capacity`] when `info_hashes` would not fit
    /// one datagram.
    pub fn new(connection_id: i64, info_hashes: &'a [InfoHash]) -> Result<Self, TrackerError> {
        if info_hashes.len() > MAX_SCRAPE_HASHES {
            return Err(TrackerError::Capacity {
                requested: info_hashes.len(),
                max: MAX_SCRAPE_HASHES,
            });
        }
        Ok(Self {
            connection_id,
            transaction_id: new_transaction_id(),
            info_hashes,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16 + 20 * self.info_hashes.len());
        buf.extend_from_slice(&self.connection_id.to_be_bytes());
        buf.extend_from_slice(&(Action::Scrape as i32).to_be_bytes());
        buf.extend_from_slice(&self.transaction_id.to_be_bytes());
        for hash in self.info_hashes {
            buf.extend_from_slice(hash);
        }
        buf
    }
}

fn header(input: &[u8]) -> IResult<&[u8], (i32, i32)> {
    (be_i32, be_i32).parse(input)
}

fn connection_id(input: &[u8]) -> IResult<&[u8], i64> {
    be_i64(input)
}

fn scrape_entry(input: &[u8]) -> IResult<&[u8], (u32, u32, u32)> {
    (be_u32, be_u32, be_u32).parse(input)
}

/// Reads the transaction id of any tracker response, if it is long enough
/// to carry one.
pub fn response_transaction_id(buf: &[u8]) -> Option<i32> {
    header(buf).ok().map(|(_, (_, transaction_id))| transaction_id)
}

/// Checks the header and transaction id, then returns the action and the
/// body.
fn parse_header(buf: &[u8], sent_transaction_id: i32) -> Result<(i32, &[u8]), TrackerError> {
    let (body, (action, transaction_id)) =
        header(buf).map_err(|_| TrackerError::ShortResponse {
            len: buf.len(),
            expected: HEADER_LEN,
        })?;

    if transaction_id != sent_transaction_id {
        return Err(TrackerError::TransactionMismatch {
            sent: sent_transaction_id,
            received: transaction_id,
        });
    }
    Ok((action, body))
}

fn tracker_error(body: &[u8]) -> TrackerError {
    let message = String::from_utf8_lossy(body);
    TrackerError::Tracker(message.trim_end_matches('\0').to_string())
}

/// Extracts the connection id from a connect response.
///
/// Error replies only carry the 8-byte header and their message, so the full
/// 16 bytes are required for a successful connect only.
pub fn parse_connect_response(buf: &[u8], sent_transaction_id: i32) -> Result<i64, TrackerError> {
    let (action, body) = parse_header(buf, sent_transaction_id)?;

    match Action::from_wire(action)? {
        Action::Connect => {
            if buf.len() < CONNECT_RESPONSE_LEN {
                return Err(TrackerError::ShortResponse {
                    len: buf.len(),
                    expected: CONNECT_RESPONSE_LEN,
                });
            }
            let (_, connection_id) =
                connection_id(body).map_err(|_| TrackerError::ShortResponse {
                    len: buf.len(),
                    expected: CONNECT_RESPONSE_LEN,
                })?;
            Ok(connection_id)
        }
        Action::Error => Err(tracker_error(body)),
        other => Err(TrackerError::UnexpectedAction(other as i32)),
    }
}

/// Reads one (seeders, completed, leechers) triple per requested hash, in
/// request order.
pub fn parse_scrape_response(
    buf: &[u8],
    sent_transaction_id: i32,
    info_hashes: &[InfoHash],
) -> Result<Vec<ScrapeStats>, TrackerError> {
    let (action, body) = parse_header(buf, sent_transaction_id)?;

    match Action::from_wire(action)? {
        Action::Scrape => {
            let expected = HEADER_LEN + SCRAPE_ENTRY_LEN * info_hashes.len();
            let (_, entries) = count(scrape_entry, info_hashes.len())
                .parse(body)
                .map_err(|_| TrackerError::ShortResponse {
                    len: buf.len(),
                    expected,
                })?;

            Ok(info_hashes
                .iter()
                .zip(entries)
                .map(|(info_hash, (seeders, completed, leechers))| ScrapeStats {
                    info_hash: *info_hash,
                    seeders,
                    completed,
                    leechers,
                })
                .collect())
        }
        Action::Error => Err(tracker_error(body)),
        other => Err(TrackerError::UnexpectedAction(other as i32)),
    }
}
