//! Drives `UdpTracker` against an in-process fake tracker.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;

use assert_matches::assert_matches;
use rs_swarm::tracker::message::PROTOCOL_ID;
use rs_swarm::{InfoHash, ScrapeStats, TrackerConfig, TrackerError, UdpTracker};
use tokio::net::UdpSocket;

const CONNECTION_ID: i64 = 0x0BAD_F00D_CAFE_0001;

async fn fake_tracker() -> (UdpSocket, UdpTracker) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let config = TrackerConfig::default()
        .with_timeout(Duration::from_millis(200))
        .with_max_attempts(3);
    let tracker = UdpTracker::new(socket.local_addr().unwrap(), config);
    (socket, tracker)
}

async fn recv(socket: &UdpSocket) -> (Vec<u8>, SocketAddr) {
    let mut buf = vec![0u8; 2048];
    let (len, from) = socket.recv_from(&mut buf).await.unwrap();
    buf.truncate(len);
    (buf, from)
}

fn request_action(request: &[u8]) -> i32 {
    i32::from_be_bytes(request[8..12].try_into().unwrap())
}

fn request_transaction(request: &[u8]) -> i32 {
    i32::from_be_bytes(request[12..16].try_into().unwrap())
}

fn reply(action: i32, transaction_id: i32, body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&action.to_be_bytes());
    buf.extend_from_slice(&transaction_id.to_be_bytes());
    buf.extend_from_slice(body);
    buf
}

fn scrape_body(entries: &[(u32, u32, u32)]) -> Vec<u8> {
    entries
        .iter()
        .flat_map(|(s, c, l)| [s.to_be_bytes(), c.to_be_bytes(), l.to_be_bytes()])
        .flatten()
        .collect()
}

/// Answers one connect and one scrape request with `entries`.
async fn serve_scrape(socket: &UdpSocket, entries: &[(u32, u32, u32)]) -> Vec<u8> {
    let (connect, from) = recv(socket).await;
    assert_eq!(connect.len(), 16);
    assert_eq!(&connect[0..8], &PROTOCOL_ID.to_be_bytes());
    assert_eq!(request_action(&connect), 0);
    let response = reply(0, request_transaction(&connect), &CONNECTION_ID.to_be_bytes());
    socket.send_to(&response, from).await.unwrap();

    let (scrape, from) = recv(socket).await;
    assert_eq!(&scrape[0..8], &CONNECTION_ID.to_be_bytes());
    assert_eq!(request_action(&scrape), 2);
    let response = reply(2, request_transaction(&scrape), &scrape_body(entries));
    socket.send_to(&response, from).await.unwrap();
    scrape
}

#[tokio::test]
async fn test_scrape_round_trip() {
    let (socket, tracker) = fake_tracker().await;
    let hashes: Vec<InfoHash> = vec![[0x23u8; 20], [0x42u8; 20]];

    let server = tokio::spawn(async move { serve_scrape(&socket, &[(5, 2, 1), (0, 7, 3)]).await });
    let stats = tracker.scrape(&hashes).await.unwrap();
    let scrape_request = server.await.unwrap();

    assert_eq!(&scrape_request[16..36], &hashes[0]);
    assert_eq!(&scrape_request[36..56], &hashes[1]);
    assert_eq!(
        stats,
        vec![
            ScrapeStats {
                info_hash: hashes[0],
                seeders: 5,
                completed: 2,
                leechers: 1,
            },
            ScrapeStats {
                info_hash: hashes[1],
                seeders: 0,
                completed: 7,
                leechers: 3,
            },
        ]
    );
}

#[tokio::test]
async fn test_too_many_hashes_sends_nothing() {
    let (socket, tracker) = fake_tracker().await;
    let hashes = vec![[1u8; 20]; 75];

    let result = tracker.scrape(&hashes).await;
    assert_matches!(
        result,
        Err(TrackerError::Capacity {
            requested: 75,
            max: 74
        })
    );

    let mut buf = [0u8; 64];
    let err = socket.try_recv_from(&mut buf).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WouldBlock);
}

#[tokio::test]
async fn test_timeout_retries_with_fresh_transaction() {
    let (socket, tracker) = fake_tracker().await;
    let hashes = vec![[9u8; 20]];

    let server = tokio::spawn(async move {
        // Ignore the first connect, forcing a retry.
        let (first, _) = recv(&socket).await;
        serve_answering_connect(&socket, request_transaction(&first)).await
    });

    let stats = tracker.scrape(&hashes).await.unwrap();
    assert_eq!(stats[0].seeders, 4);
    server.await.unwrap();
}

/// Serves a connect/scrape exchange, checking the retried connect does not
/// reuse `abandoned` as its transaction id.
async fn serve_answering_connect(socket: &UdpSocket, abandoned: i32) {
    let (connect, from) = recv(socket).await;
    assert_eq!(request_action(&connect), 0);
    assert_ne!(request_transaction(&connect), abandoned);
    let response = reply(0, request_transaction(&connect), &CONNECTION_ID.to_be_bytes());
    socket.send_to(&response, from).await.unwrap();

    let (scrape, from) = recv(socket).await;
    let response = reply(2, request_transaction(&scrape), &scrape_body(&[(4, 0, 0)]));
    socket.send_to(&response, from).await.unwrap();
}

#[tokio::test]
async fn test_stale_response_is_discarded() {
    let (socket, tracker) = fake_tracker().await;
    let hashes = vec![[9u8; 20]];

    let server = tokio::spawn(async move {
        let (connect, from) = recv(&socket).await;
        let transaction_id = request_transaction(&connect);

        // A reply to some other transaction arrives first.
        let stale = reply(0, transaction_id.wrapping_add(1), &1i64.to_be_bytes());
        socket.send_to(&stale, from).await.unwrap();
        let response = reply(0, transaction_id, &CONNECTION_ID.to_be_bytes());
        socket.send_to(&response, from).await.unwrap();

        let (scrape, from) = recv(&socket).await;
        assert_eq!(&scrape[0..8], &CONNECTION_ID.to_be_bytes());
        let response = reply(2, request_transaction(&scrape), &scrape_body(&[(1, 1, 1)]));
        socket.send_to(&response, from).await.unwrap();
    });

    let stats = tracker.scrape(&hashes).await.unwrap();
    assert_eq!((stats[0].seeders, stats[0].completed, stats[0].leechers), (1, 1, 1));
    server.await.unwrap();
}

#[tokio::test]
async fn test_tracker_error_is_not_retried() {
    let (socket, tracker) = fake_tracker().await;
    let hashes = vec![[9u8; 20]];

    let server = tokio::spawn(async move {
        let (connect, from) = recv(&socket).await;
        let response = reply(3, request_transaction(&connect), b"banned");
        socket.send_to(&response, from).await.unwrap();

        let mut buf = [0u8; 64];
        let again = tokio::time::timeout(Duration::from_millis(300), socket.recv_from(&mut buf)).await;
        assert!(again.is_err(), "client retried after a tracker error");
    });

    let result = tracker.scrape(&hashes).await;
    assert_matches!(result, Err(TrackerError::Tracker(message)) if message == "banned");
    server.await.unwrap();
}

#[tokio::test]
async fn test_gives_up_after_max_attempts() {
    let (socket, _) = fake_tracker().await;
    let config = TrackerConfig::default()
        .with_timeout(Duration::from_millis(50))
        .with_max_attempts(2);
    let tracker = UdpTracker::new(socket.local_addr().unwrap(), config);

    let server = tokio::spawn(async move {
        let (first, _) = recv(&socket).await;
        let (second, _) = recv(&socket).await;
        assert_ne!(request_transaction(&first), request_transaction(&second));
    });

    let result = tracker.scrape(&[[9u8; 20]]).await;
    assert_matches!(result, Err(TrackerError::Timeout { attempts: 2 }));
    server.await.unwrap();
}
