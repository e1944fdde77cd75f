mod common;
use common::*;

use omnik_bridge::bridge::BridgeStats;
use omnik_bridge::omnik::session::{ChannelData, CloseReason, ConnectionTracker};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

struct Harness {
    client: TcpStream,
    events: broadcast::Receiver<ChannelData>,
    close: Option<oneshot::Sender<CloseReason>>,
    handle: JoinHandle<CloseReason>,
    stats: Arc<Mutex<BridgeStats>>,
}

impl Harness {
    async fn start(idle_timeout: Duration) -> Self {
        common_setup();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap())
            .await
            .unwrap();
        let (server, peer) = listener.accept().await.unwrap();

        let channels = Channels::new();
        let events = channels.from_session.subscribe();
        let stats = Arc::new(Mutex::new(BridgeStats::default()));

        let tracker = ConnectionTracker::new(
            1,
            peer,
            Factory::session_settings(idle_timeout),
            channels,
            stats.clone(),
        );
        let (close, close_rx) = oneshot::channel();
        let handle = tokio::spawn(tracker.run(server, close_rx));

        let mut harness = Self {
            client,
            events,
            close: Some(close),
            handle,
            stats,
        };
        assert!(matches!(
            harness.next_event().await,
            ChannelData::Connected { session: 1, .. }
        ));
        harness
    }

    async fn next_event(&mut self) -> ChannelData {
        within(self.events.recv()).await.unwrap()
    }

    async fn send(&mut self, bytes: &[u8]) {
        self.client.write_all(bytes).await.unwrap();
        self.client.flush().await.unwrap();
    }

    fn stats(&self) -> BridgeStats {
        self.stats.lock().unwrap().clone()
    }
}

#[tokio::test]
async fn frame_split_across_reads() {
    let mut h = Harness::start(Duration::from_secs(5)).await;

    let frame = Factory::frame();
    h.send(&frame[..12]).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    h.send(&frame[12..60]).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    h.send(&frame[60..]).await;

    assert_eq!(
        h.next_event().await,
        ChannelData::Telemetry(1, Factory::telemetry())
    );
    assert_eq!(h.stats().frames_decoded, 1);
}

#[tokio::test]
async fn peer_close_discards_partial_frame() {
    let mut h = Harness::start(Duration::from_secs(5)).await;

    h.send(&Factory::frame()[..30]).await;
    h.client.shutdown().await.unwrap();

    assert_eq!(
        h.next_event().await,
        ChannelData::Disconnect {
            session: 1,
            reason: CloseReason::PeerClosed
        }
    );
    assert_eq!(within(h.handle).await.unwrap(), CloseReason::PeerClosed);
}

#[tokio::test]
async fn idle_timeout_closes_session_once() {
    let idle = Duration::from_millis(200);
    let mut h = Harness::start(idle).await;

    h.send(&Factory::frame()).await;
    assert!(matches!(h.next_event().await, ChannelData::Telemetry(1, _)));

    assert_eq!(
        h.next_event().await,
        ChannelData::Disconnect {
            session: 1,
            reason: CloseReason::Failed(SessionError::Timeout(idle))
        }
    );

    let stats = h.stats.clone();
    within(h.handle).await.unwrap();
    assert_eq!(stats.lock().unwrap().idle_timeouts, 1);
    assert!(h.events.try_recv().is_err());
}

#[tokio::test]
async fn noise_does_not_count_as_activity() {
    let idle = Duration::from_millis(300);
    let mut h = Harness::start(idle).await;

    // keep sending garbage; the session must still idle out
    for _ in 0..3 {
        h.send(&[0xff, 0x00, 0xff]).await;
        tokio::time::sleep(Duration::from_millis(80)).await;
    }

    assert_eq!(
        h.next_event().await,
        ChannelData::Disconnect {
            session: 1,
            reason: CloseReason::Failed(SessionError::Timeout(idle))
        }
    );
}

#[tokio::test]
async fn bad_checksum_is_dropped_and_session_survives() {
    let mut h = Harness::start(Duration::from_secs(5)).await;

    h.send(&Factory::corrupted_frame()).await;
    h.send(&Factory::frame()).await;

    // the corrupted frame produces no event at all
    assert_eq!(
        h.next_event().await,
        ChannelData::Telemetry(1, Factory::telemetry())
    );
    assert_eq!(h.stats().checksum_failures, 1);
    assert_eq!(h.stats().frames_decoded, 1);
}

#[tokio::test]
async fn inverter_change_is_reported_first() {
    let mut h = Harness::start(Duration::from_secs(5)).await;

    h.send(&Factory::frame()).await;
    assert!(matches!(h.next_event().await, ChannelData::Telemetry(1, _)));

    h.send(&Factory::frame_for(&Factory::payload_for("SWAPPED", 712)))
        .await;

    assert_eq!(
        h.next_event().await,
        ChannelData::IdentityChanged {
            session: 1,
            channel: Channel::InverterId,
            previous: Factory::INVERTER.to_string(),
            current: "SWAPPED".to_string(),
        }
    );
    match h.next_event().await {
        ChannelData::Telemetry(1, t) => assert_eq!(t.inverter_id, "SWAPPED"),
        other => panic!("expected telemetry, got {:?}", other),
    }
    assert_eq!(h.stats().identity_changes, 1);
}

#[tokio::test]
async fn close_on_request() {
    let mut h = Harness::start(Duration::from_secs(5)).await;

    h.close.take().unwrap().send(CloseReason::Replaced).unwrap();

    assert_eq!(
        h.next_event().await,
        ChannelData::Disconnect {
            session: 1,
            reason: CloseReason::Replaced
        }
    );
    assert_eq!(within(h.handle).await.unwrap(), CloseReason::Replaced);
}
