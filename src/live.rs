//! Live stats reconciler.
//!
//! SYSTEM CONTEXT
//! ==============
//! The dashboard keeps a websocket open to
//! `{ws_base}/api/realtime/ws/dashboard/{session}` and shallow-merges every
//! `stats_update` payload into its [`StatsSnapshot`]. When the socket drops
//! the dashboard waits a fixed delay and tries again, forever.
//!
//! DESIGN
//! ======
//! One tokio task owns the socket, the retry sleep and the optional
//! simulation ticker. All state mutation happens on that task and is
//! published through a `watch` channel; callers only ever read snapshots of
//! [`LiveState`].
//!
//! The retry is a `sleep` inside the owner loop rather than a spawned timer,
//! so at most one reconnection attempt can ever be pending. Teardown flips a
//! `watch` flag that every `select!` in the loop listens to.
//!
//! Simulation is opt-in. The ticker branch only exists while the task is not
//! in its connected loop, so simulated deltas can never interleave with live
//! updates. Every simulated update is tagged [`UpdateSource::Simulated`].

#[path = "live_message.rs"]
pub mod message;
#[path = "live_socket.rs"]
pub mod socket;

#[cfg(test)]
#[path = "live_test.rs"]
mod live_test;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at, sleep};
use tracing::{debug, info, warn};

use crate::config::LiveConfig;
use crate::stats::{StatsSnapshot, simulate_tick};

pub use message::{LiveMessage, MessageError, parse_message};
pub use socket::{LiveConnector, LiveError, LiveSocket, WsConnector};

/// Number of activity items kept in [`LiveState::recent_activity`].
pub const RECENT_ACTIVITY_LIMIT: usize = 20;

// =============================================================================
// STATE
// =============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Origin of the most recent snapshot change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateSource {
    Live,
    Simulated,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    NewPost,
    SentimentAlert,
}

/// A `new_post` or `sentiment_alert` notification.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Activity {
    pub kind: ActivityKind,
    pub data: Value,
    pub received_ms: i64,
}

/// Everything observers can see about the live feed.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct LiveState {
    pub snapshot: StatsSnapshot,
    pub status: ConnectionStatus,
    /// Milliseconds since the epoch of the last snapshot change.
    pub last_update_ms: Option<i64>,
    pub last_source: Option<UpdateSource>,
    /// Newest first, capped at [`RECENT_ACTIVITY_LIMIT`].
    pub recent_activity: VecDeque<Activity>,
    /// Connection attempts started since spawn.
    pub connect_attempts: u64,
}

/// What applying one inbound message did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Applied {
    /// Keys merged into the snapshot.
    Merged(usize),
    Activity,
    /// Text to send back on the socket.
    Reply(String),
    Ignored,
}

impl LiveState {
    #[must_use]
    pub fn new(snapshot: StatsSnapshot) -> Self {
        Self { snapshot, ..Self::default() }
    }

    pub fn apply_message(&mut self, message: LiveMessage, now_ms: i64) -> Applied {
        match message {
            LiveMessage::StatsUpdate(patch) => {
                let written = self.snapshot.merge(patch);
                self.mark_updated(UpdateSource::Live, now_ms);
                Applied::Merged(written)
            }
            LiveMessage::NewPost(data) => self.push_activity(ActivityKind::NewPost, data, now_ms),
            LiveMessage::SentimentAlert(data) => self.push_activity(ActivityKind::SentimentAlert, data, now_ms),
            LiveMessage::Ping => Applied::Reply(message::pong_message(now_ms)),
            LiveMessage::Pong | LiveMessage::Other(_) => Applied::Ignored,
        }
    }

    pub fn apply_simulated_tick<R: Rng + ?Sized>(&mut self, rng: &mut R, now_ms: i64) {
        simulate_tick(&mut self.snapshot, rng);
        self.mark_updated(UpdateSource::Simulated, now_ms);
    }

    fn mark_updated(&mut self, source: UpdateSource, now_ms: i64) {
        self.last_update_ms = Some(now_ms);
        self.last_source = Some(source);
    }

    fn push_activity(&mut self, kind: ActivityKind, data: Value, now_ms: i64) -> Applied {
        self.recent_activity.push_front(Activity { kind, data, received_ms: now_ms });
        self.recent_activity.truncate(RECENT_ACTIVITY_LIMIT);
        Applied::Activity
    }
}

// =============================================================================
// HANDLE
// =============================================================================

/// Handle to the task that owns the live connection.
///
/// Dropping the handle tears the task down; [`LiveReconciler::shutdown`] does
/// the same but waits for the socket to close.
pub struct LiveReconciler {
    state: watch::Receiver<LiveState>,
    outbound: mpsc::UnboundedSender<String>,
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl LiveReconciler {
    /// Start the owner task. Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(config: LiveConfig, connector: Arc<dyn LiveConnector>, initial: StatsSnapshot) -> Self {
        let (state_tx, state) = watch::channel(LiveState::new(initial));
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let ticker = config.simulate.then(|| simulation_ticker(config.simulate_interval));
        let worker = Worker {
            config,
            connector,
            state: state_tx,
            outbound: outbound_rx,
            shutdown: shutdown_rx,
            ticker,
            rng: StdRng::from_os_rng(),
        };
        let task = tokio::spawn(worker.run());

        Self { state, outbound, shutdown_tx, task: Some(task) }
    }

    #[must_use]
    pub fn state(&self) -> LiveState {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.state.borrow().status
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LiveState> {
        self.state.clone()
    }

    /// Ask the server for a fresh snapshot. Returns `false` (and sends
    /// nothing) unless currently connected.
    pub fn request_update(&self) -> bool {
        if self.status() != ConnectionStatus::Connected {
            return false;
        }
        self.outbound.send(message::request_update_message()).is_ok()
    }

    /// Stop reconnecting, close the socket, and wait for the task to exit.
    pub async fn shutdown(mut self) {
        self.shutdown_tx.send_replace(true);
        if let Some(task) = self.task.take()
            && let Err(error) = task.await
        {
            warn!(%error, "live reconciler task ended abnormally");
        }
    }
}

impl Drop for LiveReconciler {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// =============================================================================
// OWNER TASK
// =============================================================================

enum SessionEnd {
    Shutdown,
    Closed,
    Failed(LiveError),
}

struct Worker {
    config: LiveConfig,
    connector: Arc<dyn LiveConnector>,
    state: watch::Sender<LiveState>,
    outbound: mpsc::UnboundedReceiver<String>,
    shutdown: watch::Receiver<bool>,
    ticker: Option<Interval>,
    rng: StdRng,
}

impl Worker {
    async fn run(mut self) {
        let endpoint = self.config.endpoint();
        self.drive(&endpoint).await;
        self.set_status(ConnectionStatus::Disconnected);
        debug!(%endpoint, "live reconciler stopped");
    }

    async fn drive(&mut self, endpoint: &str) {
        loop {
            if *self.shutdown.borrow() {
                return;
            }

            self.state.send_modify(|state| {
                state.status = ConnectionStatus::Connecting;
                state.connect_attempts += 1;
            });
            debug!(%endpoint, "connecting to live endpoint");

            let connector = Arc::clone(&self.connector);
            let connect = connector.connect(endpoint);
            tokio::pin!(connect);
            let attempt = loop {
                tokio::select! {
                    _ = self.shutdown.changed() => return,
                    result = &mut connect => break result,
                    () = next_tick(&mut self.ticker) => self.simulate(),
                }
            };

            match attempt {
                Ok(mut socket) => {
                    // Requests queued against an earlier session are stale.
                    while self.outbound.try_recv().is_ok() {}
                    self.set_status(ConnectionStatus::Connected);
                    info!(%endpoint, "live connection established");

                    match self.run_connected(socket.as_mut()).await {
                        SessionEnd::Shutdown => {
                            socket.close().await;
                            return;
                        }
                        SessionEnd::Closed => info!(%endpoint, "live connection closed"),
                        SessionEnd::Failed(error) => warn!(%endpoint, %error, "live connection lost"),
                    }
                    if let Some(ticker) = self.ticker.as_mut() {
                        ticker.reset();
                    }
                }
                Err(error) => warn!(%endpoint, %error, "live connection attempt failed"),
            }

            self.set_status(ConnectionStatus::Disconnected);
            let delay = self.config.reconnect_delay;
            debug!(?delay, "scheduling live reconnect");

            let retry = sleep(delay);
            tokio::pin!(retry);
            loop {
                tokio::select! {
                    _ = self.shutdown.changed() => return,
                    () = &mut retry => break,
                    () = next_tick(&mut self.ticker) => self.simulate(),
                }
            }
        }
    }

    async fn run_connected(&mut self, socket: &mut dyn LiveSocket) -> SessionEnd {
        loop {
            tokio::select! {
                _ = self.shutdown.changed() => return SessionEnd::Shutdown,
                Some(text) = self.outbound.recv() => {
                    if let Err(error) = socket.send(text).await {
                        return SessionEnd::Failed(error);
                    }
                }
                frame = socket.recv() => match frame {
                    None => return SessionEnd::Closed,
                    Some(Err(error)) => return SessionEnd::Failed(error),
                    Some(Ok(text)) => {
                        if let Some(reply) = self.handle_text(&text)
                            && let Err(error) = socket.send(reply).await
                        {
                            return SessionEnd::Failed(error);
                        }
                    }
                },
            }
        }
    }

    /// Apply one inbound frame. Returns a reply to send, if any.
    fn handle_text(&mut self, text: &str) -> Option<String> {
        let message = match parse_message(text) {
            Ok(message) => message,
            Err(error) => {
                warn!(%error, "ignoring malformed live message");
                return None;
            }
        };

        let kind = message.kind().to_owned();
        let now = now_ms();
        let mut applied = Applied::Ignored;
        self.state.send_if_modified(|state| {
            applied = state.apply_message(message, now);
            matches!(applied, Applied::Merged(_) | Applied::Activity)
        });

        match applied {
            Applied::Merged(keys) => {
                debug!(keys, "merged live stats update");
                None
            }
            Applied::Activity => None,
            Applied::Reply(reply) => Some(reply),
            Applied::Ignored => {
                debug!(%kind, "ignoring live message");
                None
            }
        }
    }

    fn simulate(&mut self) {
        let now = now_ms();
        let rng = &mut self.rng;
        self.state.send_modify(|state| state.apply_simulated_tick(rng, now));
        debug!("applied simulated stats tick");
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.state.send_if_modified(|state| {
            let changed = state.status != status;
            state.status = status;
            changed
        });
    }
}

fn simulation_ticker(period: Duration) -> Interval {
    let period = period.max(Duration::from_millis(1));
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

/// Resolves on the next tick, or never when simulation is off.
async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
}
