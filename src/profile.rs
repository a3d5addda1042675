//! Dual-write social profile store.
//!
//! SYSTEM CONTEXT
//! ==============
//! The settings page lets a user record their social handles. The record is
//! written to the device unconditionally and to the remote API when a token
//! is present. Reads start from the device copy and let a valid remote
//! record supersede it.
//!
//! DESIGN
//! ======
//! Each write returns a two-phase [`WriteReport`] (`local`, `remote`) rather
//! than a single success flag, so callers can tell "fully synced" apart from
//! "safe on this device only". Remote failures never surface as errors; they
//! become outcomes plus user-facing [`Notice`]s.
//!
//! Progress through a write is published on a `watch` channel as a
//! [`SyncPhase`]:
//! `Idle → LocalWritePending → LocalWriteDone → RemoteWritePending →
//! RemoteOk | RemoteUnreachable | RemoteRejected → Settled`.
//! Guest writes skip the remote phases.
//!
//! Device store calls are blocking file I/O, so every one of them runs on
//! tokio's blocking pool via `spawn_blocking`. The async methods therefore
//! need a tokio runtime.
//!
//! TRADE-OFFS
//! ==========
//! Overlapping writes are not serialized. Two concurrent saves may finish in
//! either order and the later response wins remotely; the device copy always
//! holds whichever local write ran last.

#[cfg(test)]
#[path = "profile_test.rs"]
mod profile_test;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::api::{ProfileRemote, RemoteError};
use crate::session::{Account, Credentials, load_credentials};
use crate::storage::{LocalStore, SOCIAL_PROFILES_KEY, StoreError, load_json, save_json};

/// Platform keys the settings form knows about.
pub const PLATFORM_KEYS: [&str; 6] = [
    "twitter_handle",
    "linkedin_profile",
    "facebook_profile",
    "instagram_handle",
    "youtube_channel",
    "tiktok_handle",
];

// =============================================================================
// PROFILE RECORD
// =============================================================================

/// Platform key to user-supplied handle or URL.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileRecord(BTreeMap<String, String>);

impl ProfileRecord {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle stored for `platform`, or `""` when unset.
    #[must_use]
    pub fn get(&self, platform: &str) -> &str {
        self.0.get(platform).map_or("", String::as_str)
    }

    pub fn set(&mut self, platform: impl Into<String>, handle: impl Into<String>) {
        self.0.insert(platform.into(), handle.into());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of platforms with a non-blank handle.
    #[must_use]
    pub fn connected_platforms(&self) -> usize {
        self.0.values().filter(|v| !v.trim().is_empty()).count()
    }

    /// Fill every known platform key that is missing with `""`.
    #[must_use]
    pub fn with_known_platforms(mut self) -> Self {
        for key in PLATFORM_KEYS {
            self.0.entry(key.to_owned()).or_default();
        }
        self
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ProfileRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

// =============================================================================
// OUTCOMES
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Success,
    Info,
    Error,
}

/// Non-blocking, user-visible message about a profile operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    fn new(level: NoticeLevel, message: impl Into<String>) -> Self {
        Self { level, message: message.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LocalOutcome {
    Written,
    Removed,
    Failed { error: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RemoteOutcome {
    Synced,
    /// No token: the remote was never contacted.
    Skipped,
    Unreachable { error: String },
    Rejected { status: u16, detail: Option<String> },
}

impl From<Result<(), RemoteError>> for RemoteOutcome {
    fn from(result: Result<(), RemoteError>) -> Self {
        match result {
            Ok(()) => Self::Synced,
            Err(RemoteError::Rejected { status, detail }) => Self::Rejected { status, detail },
            Err(error) => Self::Unreachable { error: error.to_string() },
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteKind {
    Save,
    Clear,
}

/// Result of a dual write: what happened on the device and what happened remotely.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WriteReport {
    pub kind: WriteKind,
    pub local: LocalOutcome,
    pub remote: RemoteOutcome,
}

impl WriteReport {
    /// Both stores hold the new state.
    #[must_use]
    pub fn is_synced(&self) -> bool {
        self.is_locally_safe() && self.remote == RemoteOutcome::Synced
    }

    /// The device copy holds the new state.
    #[must_use]
    pub fn is_locally_safe(&self) -> bool {
        !matches!(self.local, LocalOutcome::Failed { .. })
    }

    #[must_use]
    pub fn notices(&self) -> Vec<Notice> {
        let mut notices = Vec::new();
        if let LocalOutcome::Failed { error } = &self.local {
            let verb = match self.kind {
                WriteKind::Save => "save",
                WriteKind::Clear => "clear",
            };
            notices.push(Notice::new(
                NoticeLevel::Error,
                format!("Failed to {verb} social profiles on this device: {error}"),
            ));
        }

        match (self.kind, &self.remote) {
            (WriteKind::Save, RemoteOutcome::Synced) => {
                notices.push(Notice::new(NoticeLevel::Success, "Social profiles updated successfully!"));
            }
            (WriteKind::Clear, RemoteOutcome::Synced) => {
                notices.push(Notice::new(NoticeLevel::Success, "Social profiles cleared"));
            }
            (WriteKind::Save, RemoteOutcome::Rejected { detail, .. }) => {
                let message = detail
                    .clone()
                    .unwrap_or_else(|| "Failed to update social profiles on server".to_owned());
                notices.push(Notice::new(NoticeLevel::Error, message));
                if self.is_locally_safe() {
                    notices.push(Notice::new(NoticeLevel::Info, "Profiles saved locally"));
                }
            }
            (WriteKind::Clear, RemoteOutcome::Rejected { .. }) => {
                notices.push(Notice::new(NoticeLevel::Error, "Failed to clear social profiles on server"));
                if self.is_locally_safe() {
                    notices.push(Notice::new(NoticeLevel::Info, "Profiles cleared locally"));
                }
            }
            (WriteKind::Save, RemoteOutcome::Skipped | RemoteOutcome::Unreachable { .. }) => {
                if self.is_locally_safe() {
                    notices.push(Notice::new(NoticeLevel::Success, "Social profiles saved locally"));
                }
            }
            (WriteKind::Clear, RemoteOutcome::Skipped | RemoteOutcome::Unreachable { .. }) => {
                if self.is_locally_safe() {
                    notices.push(Notice::new(NoticeLevel::Success, "Social profiles cleared locally"));
                }
            }
        }
        notices
    }
}

/// Where the record in a [`ProfileView`] came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordSource {
    Remote,
    Local,
    Empty,
}

/// What `load` hands to the settings page.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProfileView {
    pub record: ProfileRecord,
    pub source: RecordSource,
    pub account: Account,
    pub notices: Vec<Notice>,
}

/// Position of the store within a single write cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    #[default]
    Idle,
    LocalWritePending,
    LocalWriteDone,
    RemoteWritePending,
    RemoteOk,
    RemoteUnreachable,
    RemoteRejected,
    Settled,
}

impl SyncPhase {
    /// Phase reached once the remote leg produced `outcome`.
    #[must_use]
    pub fn after_remote(outcome: &RemoteOutcome) -> Option<Self> {
        match outcome {
            RemoteOutcome::Synced => Some(Self::RemoteOk),
            RemoteOutcome::Unreachable { .. } => Some(Self::RemoteUnreachable),
            RemoteOutcome::Rejected { .. } => Some(Self::RemoteRejected),
            RemoteOutcome::Skipped => None,
        }
    }
}

// =============================================================================
// STORE
// =============================================================================

/// Profile persistence across the device store and the remote API.
pub struct ProfileStore {
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn ProfileRemote>,
    phase: watch::Sender<SyncPhase>,
    #[cfg(test)]
    history: std::sync::Mutex<Vec<SyncPhase>>,
}

impl ProfileStore {
    #[must_use]
    pub fn new(local: Arc<dyn LocalStore>, remote: Arc<dyn ProfileRemote>) -> Self {
        let (phase, _) = watch::channel(SyncPhase::Idle);
        Self {
            local,
            remote,
            phase,
            #[cfg(test)]
            history: std::sync::Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn phase(&self) -> SyncPhase {
        *self.phase.borrow()
    }

    #[must_use]
    pub fn watch_phase(&self) -> watch::Receiver<SyncPhase> {
        self.phase.subscribe()
    }

    /// Current credentials as stored on the device.
    pub async fn credentials(&self) -> Credentials {
        match self.on_local(|local| Ok(load_credentials(local))).await {
            Ok(credentials) => credentials,
            Err(error) => {
                warn!(%error, "token lookup failed; continuing as guest");
                Credentials::Guest
            }
        }
    }

    /// Write `record` to the device, then to the remote when signed in.
    pub async fn save(&self, record: &ProfileRecord) -> WriteReport {
        self.enter(SyncPhase::LocalWritePending);
        let owned = record.clone();
        let local = match self.on_local(move |local| save_json(local, SOCIAL_PROFILES_KEY, &owned)).await {
            Ok(()) => LocalOutcome::Written,
            Err(error) => {
                warn!(%error, "local social profile write failed");
                LocalOutcome::Failed { error: error.to_string() }
            }
        };
        self.enter(SyncPhase::LocalWriteDone);

        let remote = match self.credentials().await {
            Credentials::Guest => RemoteOutcome::Skipped,
            Credentials::Bearer(token) => {
                self.enter(SyncPhase::RemoteWritePending);
                let outcome = RemoteOutcome::from(self.remote.put_social_profiles(&token, record).await);
                self.enter_after_remote(&outcome);
                outcome
            }
        };

        self.settle(WriteReport { kind: WriteKind::Save, local, remote })
    }

    /// Remove the device copy, then ask the remote to forget it too.
    pub async fn clear(&self) -> WriteReport {
        self.enter(SyncPhase::LocalWritePending);
        let local = match self.on_local(|local| local.remove(SOCIAL_PROFILES_KEY)).await {
            Ok(()) => LocalOutcome::Removed,
            Err(error) => {
                warn!(%error, "local social profile removal failed");
                LocalOutcome::Failed { error: error.to_string() }
            }
        };
        self.enter(SyncPhase::LocalWriteDone);

        let remote = match self.credentials().await {
            Credentials::Guest => RemoteOutcome::Skipped,
            Credentials::Bearer(token) => {
                self.enter(SyncPhase::RemoteWritePending);
                let outcome = RemoteOutcome::from(self.remote.delete_social_profiles(&token).await);
                self.enter_after_remote(&outcome);
                outcome
            }
        };

        self.settle(WriteReport { kind: WriteKind::Clear, local, remote })
    }

    /// Device record first; a valid remote record supersedes it.
    pub async fn load(&self) -> ProfileView {
        let mut notices = Vec::new();

        let stored = self.on_local(|local| load_json::<ProfileRecord>(local, SOCIAL_PROFILES_KEY)).await;
        let (mut record, mut source) = match stored {
            Ok(Some(record)) => (record, RecordSource::Local),
            Ok(None) => (ProfileRecord::new(), RecordSource::Empty),
            Err(error) => {
                warn!(%error, "ignoring unreadable local social profiles");
                (ProfileRecord::new(), RecordSource::Empty)
            }
        };

        let account = match self.credentials().await {
            Credentials::Guest => Account::guest(),
            Credentials::Bearer(token) => match self.remote.fetch_profile(&token).await {
                Ok(remote) => {
                    if let Some(remote_record) = remote.social_profiles {
                        record = remote_record;
                        source = RecordSource::Remote;
                    }
                    remote.account
                }
                Err(error) => {
                    warn!(%error, "remote profile unavailable; using local data");
                    notices.push(load_failure_notice(&error));
                    Account::demo()
                }
            },
        };

        ProfileView { record, source, account, notices }
    }

    /// Run `op` against the device store on the blocking pool.
    async fn on_local<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(&dyn LocalStore) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let local = Arc::clone(&self.local);
        tokio::task::spawn_blocking(move || op(local.as_ref())).await?
    }

    fn enter(&self, phase: SyncPhase) {
        #[cfg(test)]
        self.record_phase(phase);
        self.phase.send_replace(phase);
    }

    #[cfg(test)]
    fn record_phase(&self, phase: SyncPhase) {
        if let Ok(mut history) = self.history.lock() {
            history.push(phase);
        }
    }

    /// Every phase entered so far, oldest first.
    #[cfg(test)]
    fn phase_history(&self) -> Vec<SyncPhase> {
        self.history.lock().map(|history| history.clone()).unwrap_or_default()
    }

    fn enter_after_remote(&self, outcome: &RemoteOutcome) {
        if let Some(phase) = SyncPhase::after_remote(outcome) {
            self.enter(phase);
        }
    }

    fn settle(&self, report: WriteReport) -> WriteReport {
        self.enter(SyncPhase::Settled);
        info!(
            kind = ?report.kind,
            synced = report.is_synced(),
            locally_safe = report.is_locally_safe(),
            "social profile write settled"
        );
        report
    }
}

fn load_failure_notice(error: &RemoteError) -> Notice {
    match error {
        RemoteError::Rejected { status, .. } => Notice::new(
            NoticeLevel::Info,
            format!("Server rejected the profile request ({status}); showing data saved on this device"),
        ),
        RemoteError::Malformed(_) => {
            Notice::new(NoticeLevel::Info, "Server sent an unreadable profile; showing data saved on this device")
        }
        RemoteError::ClientBuild(_) | RemoteError::Unreachable(_) => {
            Notice::new(NoticeLevel::Info, "Using demo data - backend API not available")
        }
    }
}
