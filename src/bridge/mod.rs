pub mod publisher;
pub mod stats;

pub use publisher::Publisher;
pub use stats::BridgeStats;

use crate::prelude::*;
use crate::omnik::session::{self, CloseReason, ConnectionTracker, SessionId, SessionSettings};

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::Instant;

struct ActiveSession {
    id: SessionId,
    peer: SocketAddr,
    close: oneshot::Sender<CloseReason>,
    handle: JoinHandle<CloseReason>,
}

/// Owns the listening socket and at most one live session, and is the only
/// thing that talks to the sensor sink.
pub struct Bridge {
    config: ConfigWrapper,
    channels: Channels,
    publisher: Publisher,
    stats: Arc<Mutex<BridgeStats>>,
    active: Option<ActiveSession>,
    next_session: SessionId,
    availability_deadline: Option<Instant>,
}

impl Bridge {
    pub fn new(config: ConfigWrapper, channels: Channels, sink: Sink) -> Self {
        let stats = Arc::new(Mutex::new(BridgeStats::default()));
        let publisher = Publisher::new(
            config.sensors().iter().copied(),
            config.listener().refresh_interval(),
            sink,
            stats.clone(),
        );

        Self {
            config,
            channels,
            publisher,
            stats,
            active: None,
            next_session: 0,
            availability_deadline: None,
        }
    }

    pub fn stats(&self) -> Arc<Mutex<BridgeStats>> {
        self.stats.clone()
    }

    pub async fn bind(&self) -> Result<TcpListener, NetworkError> {
        let l = self.config.listener();
        let addr = format!("{}:{}", l.host(), l.port());

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| NetworkError::Bind {
                addr: addr.clone(),
                source,
            })?;

        info!("listening for the datalogger on {}", addr);
        Ok(listener)
    }

    pub async fn run(
        mut self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        let mut events = self.channels.from_session.subscribe();

        self.publisher.set_connected(false);
        // nothing heard yet: clear stale values once the connectivity window
        // has passed instead of waiting out a full availability window
        self.arm_availability(self.config.listener().idle_timeout());

        loop {
            let deadline = self.availability_deadline;

            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.accept(stream, peer).await,
                    Err(e) => warn!("accept failed: {}", e),
                },

                event = events.recv() => match event {
                    Ok(data) => self.handle_event(data),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("{} session events lost", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        bail!("session event channel closed");
                    }
                },

                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.availability_deadline = None;
                    self.publisher.mark_unavailable(std::time::Instant::now());
                }

                _ = shutdown.recv() => {
                    info!("bridge received shutdown signal");
                    break;
                }
            }
        }

        if let Some(active) = self.active.take() {
            self.close_session(active, CloseReason::Shutdown).await;
        }
        // the closed session's last events are still queued
        while let Ok(data) = events.try_recv() {
            self.handle_event(data);
        }

        info!("bridge exiting");
        Ok(())
    }

    async fn accept(&mut self, stream: TcpStream, peer: SocketAddr) {
        if let Some(old) = self.active.take() {
            info!(
                "connection from {} replaces session {} ({})",
                peer, old.id, old.peer
            );
            if let Ok(mut stats) = self.stats.lock() {
                stats.sessions_replaced += 1;
            }
            self.close_session(old, CloseReason::Replaced).await;
        }

        let settings = SessionSettings::from_config(self.config.listener());
        let stream = match ConnectionTracker::configure_socket(stream, settings.tcp_nodelay) {
            Ok(stream) => stream,
            Err(e) => {
                warn!("dropping connection from {}: {}", peer, e);
                return;
            }
        };

        self.next_session += 1;
        let id = self.next_session;
        if let Ok(mut stats) = self.stats.lock() {
            stats.sessions_accepted += 1;
        }

        let tracker = ConnectionTracker::new(
            id,
            peer,
            settings,
            self.channels.clone(),
            self.stats.clone(),
        );
        let (close, close_rx) = oneshot::channel();
        let handle = tokio::spawn(tracker.run(stream, close_rx));

        self.active = Some(ActiveSession {
            id,
            peer,
            close,
            handle,
        });
    }

    // waits until the session has sent its Disconnect, so that it is
    // ordered before anything the next session reports
    async fn close_session(&self, session: ActiveSession, reason: CloseReason) {
        // the session may already be on its way out on its own
        let _ = session.close.send(reason);

        if let Err(e) = session.handle.await {
            error!("session {} task failed: {}", session.id, e);
        }
    }

    fn handle_event(&mut self, data: session::ChannelData) {
        use session::ChannelData as Event;

        match data {
            Event::Connected { session, peer } => {
                debug!("session {} from {} is up", session, peer);
            }
            Event::Telemetry(session, telemetry) => {
                if log::log_enabled!(log::Level::Debug) {
                    match serde_json::to_string(&telemetry) {
                        Ok(json) => debug!("session {}: {}", session, json),
                        Err(e) => warn!("session {}: unprintable report: {}", session, e),
                    }
                }
                self.publisher.set_connected(true);
                self.publisher
                    .publish_telemetry(&telemetry, std::time::Instant::now());
                self.arm_availability(self.config.listener().availability_timeout());
            }
            Event::IdentityChanged {
                session,
                channel,
                previous,
                current,
            } => {
                warn!(
                    "session {}: publishing new {} {} (was {})",
                    session, channel, current, previous
                );
            }
            Event::Disconnect { session, reason } => {
                debug!("session {} closed: {}", session, reason);
                if self.active.as_ref().map(|a| a.id) == Some(session) {
                    self.active = None;
                }
                self.publisher.set_connected(false);
            }
        }
    }

    fn arm_availability(&mut self, after: std::time::Duration) {
        self.availability_deadline = Some(Instant::now() + after);
    }
}
