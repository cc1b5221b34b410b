use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use tokio::net::{UdpSocket, lookup_host};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};
use url::{Host, Url};

use crate::error::TrackerError;

pub mod config;
pub mod message;

pub use config::TrackerConfig;
use message::{
    ConnectRequest, MAX_SCRAPE_HASHES, ScrapeRequest, parse_connect_response,
    parse_scrape_response, response_transaction_id,
};

pub type InfoHash = [u8; 20];

const MAX_DATAGRAM: usize = 2048;

/// Swarm statistics for one torrent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrapeStats {
    pub info_hash: InfoHash,
    pub seeders: u32,
    pub completed: u32,
    pub leechers: u32,
}

/// State of one scrape call. Dropped when the call returns, so nothing from
/// an abandoned call leaks into the next one.
struct ScrapeSession<'a> {
    info_hashes: &'a [InfoHash],
    connection: Option<(i64, Instant)>,
    connection_id_ttl: Duration,
}

impl<'a> ScrapeSession<'a> {
    fn new(info_hashes: &'a [InfoHash], connection_id_ttl: Duration) -> Self {
        Self {
            info_hashes,
            connection: None,
            connection_id_ttl,
        }
    }

    fn connection_id(&self) -> Option<i64> {
        self.connection
            .filter(|(_, obtained)| obtained.elapsed() < self.connection_id_ttl)
            .map(|(id, _)| id)
    }
}

/// Client for a single UDP tracker.
///
/// Each [`scrape`](Self::scrape) call uses its own socket, so calls for
/// different torrents or trackers may run concurrently.
#[derive(Debug, Clone)]
pub struct UdpTracker {
    addr: SocketAddr,
    config: TrackerConfig,
}

impl UdpTracker {
    pub fn new(addr: SocketAddr, config: TrackerConfig) -> Self {
        Self { addr, config }
    }

    /// Resolves a `udp://host:port[/path]` announce URL.
    pub async fn from_url(tracker_url: &str, config: TrackerConfig) -> Result<Self, TrackerError> {
        let url = Url::parse(tracker_url)
            .map_err(|e| TrackerError::InvalidUrl(format!("{tracker_url}: {e}")))?;
        if url.scheme() != "udp" {
            return Err(TrackerError::InvalidUrl(format!(
                "{tracker_url}: expected udp scheme"
            )));
        }
        let port = url
            .port()
            .ok_or_else(|| TrackerError::InvalidUrl(format!("{tracker_url}: missing port")))?;

        let addr = match url.host() {
            Some(Host::Ipv4(ip)) => SocketAddr::from((ip, port)),
            Some(Host::Ipv6(ip)) => SocketAddr::from((ip, port)),
            Some(Host::Domain(domain)) => lookup_host((domain, port))
                .await?
                .next()
                .ok_or_else(|| TrackerError::InvalidUrl(format!("{domain}: no addresses")))?,
            None => {
                return Err(TrackerError::InvalidUrl(format!(
                    "{tracker_url}: missing host"
                )));
            }
        };

        Ok(Self::new(addr, config))
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Fetches seeders, completed downloads and leechers for each hash, in
    /// the order given.
    ///
    /// At most [`MAX_SCRAPE_HASHES`] hashes fit one call; larger batches are
    /// rejected before anything is sent. Timeouts and garbled responses are
    /// retried with a longer timeout and a fresh transaction id, up to
    /// `max_attempts` in total.
    pub async fn scrape(&self, info_hashes: &[InfoHash]) -> Result<Vec<ScrapeStats>, TrackerError> {
        if info_hashes.len() > MAX_SCRAPE_HASHES {
            return Err(TrackerError::Capacity {
                requested: info_hashes.len(),
                max: MAX_SCRAPE_HASHES,
            });
        }
        if info_hashes.is_empty() {
            return Ok(Vec::new());
        }

        info!(tracker = %self.addr, hashes = info_hashes.len(), "scraping udp tracker");

        let bind_addr: SocketAddr = if self.addr.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(self.addr).await?;

        let mut session = ScrapeSession::new(info_hashes, self.config.connection_id_ttl);
        let mut attempt = 1;
        loop {
            match self.scrape_attempt(&socket, &mut session, attempt).await {
                Ok(stats) => return Ok(stats),
                Err(e) if e.is_retryable() && attempt < self.config.max_attempts => {
                    warn!(tracker = %self.addr, attempt, error = %e, "scrape attempt failed, retrying");
                    attempt += 1;
                }
                Err(e) => {
                    warn!(tracker = %self.addr, attempt, error = %e, "scrape failed");
                    return Err(e);
                }
            }
        }
    }

    async fn scrape_attempt(
        &self,
        socket: &UdpSocket,
        session: &mut ScrapeSession<'_>,
        attempt: u32,
    ) -> Result<Vec<ScrapeStats>, TrackerError> {
        let deadline = Instant::now() + self.config.attempt_timeout(attempt);

        let connection_id = match session.connection_id() {
            Some(id) => id,
            None => {
                let request = ConnectRequest::new();
                let response = self
                    .round_trip(
                        socket,
                        &request.serialize(),
                        request.transaction_id,
                        deadline,
                        attempt,
                    )
                    .await?;
                let id = parse_connect_response(&response, request.transaction_id)?;
                debug!(tracker = %self.addr, connection_id = id, "obtained connection id");
                session.connection = Some((id, Instant::now()));
                id
            }
        };

        let request = ScrapeRequest::new(connection_id, session.info_hashes)?;
        let response = self
            .round_trip(
                socket,
                &request.serialize(),
                request.transaction_id,
                deadline,
                attempt,
            )
            .await?;
        parse_scrape_response(&response, request.transaction_id, session.info_hashes)
    }

    /// Sends `datagram` and waits until `deadline` for the reply carrying
    /// `transaction_id`. Replies to earlier transactions are discarded.
    async fn round_trip(
        &self,
        socket: &UdpSocket,
        datagram: &[u8],
        transaction_id: i32,
        deadline: Instant,
        attempt: u32,
    ) -> Result<Vec<u8>, TrackerError> {
        socket.send(datagram).await?;

        let mut buf = vec![0u8; MAX_DATAGRAM];
        let mut stale = None;
        loop {
            let len = match timeout_at(deadline, socket.recv(&mut buf)).await {
                Ok(received) => received?,
                Err(_) => {
                    return Err(stale.unwrap_or(TrackerError::Timeout { attempts: attempt }));
                }
            };

            match response_transaction_id(&buf[..len]) {
                Some(received) if received != transaction_id => {
                    debug!(tracker = %self.addr, received, "discarding response to stale transaction");
                    stale = Some(TrackerError::TransactionMismatch {
                        sent: transaction_id,
                        received,
                    });
                }
                _ => {
                    buf.truncate(len);
                    return Ok(buf);
                }
            }
        }
    }
}
