use std::sync::Mutex;
use std::thread::{self, ThreadId};

use async_trait::async_trait;

use super::*;
use crate::api::RemoteProfile;
use crate::session::store_token;
use crate::storage::{MemoryStore, StoreError};

// =============================================================================
// FIXTURES
// =============================================================================

#[derive(Clone, Copy)]
enum Mode {
    /// Remember writes and serve them back on fetch.
    Echo,
    Down,
    Reject(u16),
}

struct MockRemote {
    mode: Mutex<Mode>,
    stored: Mutex<Option<ProfileRecord>>,
    calls: Mutex<Vec<&'static str>>,
}

impl MockRemote {
    fn new(mode: Mode) -> Arc<Self> {
        Arc::new(Self { mode: Mutex::new(mode), stored: Mutex::new(None), calls: Mutex::new(Vec::new()) })
    }

    fn set_mode(&self, mode: Mode) {
        *self.mode.lock().unwrap() = mode;
    }

    fn seed(&self, record: ProfileRecord) {
        *self.stored.lock().unwrap() = Some(record);
    }

    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn check(&self, call: &'static str) -> Result<(), RemoteError> {
        self.calls.lock().unwrap().push(call);
        match *self.mode.lock().unwrap() {
            Mode::Echo => Ok(()),
            Mode::Down => Err(RemoteError::Unreachable("connection refused".to_owned())),
            Mode::Reject(status) => Err(RemoteError::Rejected { status, detail: Some("Invalid token".to_owned()) }),
        }
    }
}

#[async_trait]
impl ProfileRemote for MockRemote {
    async fn fetch_profile(&self, _token: &str) -> Result<RemoteProfile, RemoteError> {
        self.check("fetch")?;
        Ok(RemoteProfile {
            account: Account { id: 42, email: "ana@example.com".to_owned(), full_name: None, plan: "pro".to_owned() },
            social_profiles: self.stored.lock().unwrap().clone(),
        })
    }

    async fn put_social_profiles(&self, _token: &str, record: &ProfileRecord) -> Result<(), RemoteError> {
        self.check("put")?;
        *self.stored.lock().unwrap() = Some(record.clone());
        Ok(())
    }

    async fn delete_social_profiles(&self, _token: &str) -> Result<(), RemoteError> {
        self.check("delete")?;
        *self.stored.lock().unwrap() = None;
        Ok(())
    }
}

/// Local store whose writes always fail.
struct BrokenStore;

impl LocalStore for BrokenStore {
    fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Ok(None)
    }

    fn set(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
        Err(StoreError::Poisoned)
    }

    fn remove(&self, _key: &str) -> Result<(), StoreError> {
        Err(StoreError::Poisoned)
    }
}

/// Memory store that remembers which threads touched it.
#[derive(Default)]
struct ThreadRecordingStore {
    inner: MemoryStore,
    threads: Mutex<Vec<ThreadId>>,
}

impl ThreadRecordingStore {
    fn note(&self) {
        self.threads.lock().unwrap().push(thread::current().id());
    }
}

impl LocalStore for ThreadRecordingStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.note();
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.note();
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.note();
        self.inner.remove(key)
    }
}

fn signed_in(mode: Mode) -> (ProfileStore, Arc<MockRemote>, Arc<MemoryStore>) {
    let local = Arc::new(MemoryStore::new());
    store_token(local.as_ref(), "tok").unwrap();
    let remote = MockRemote::new(mode);
    let store = ProfileStore::new(local.clone(), remote.clone());
    (store, remote, local)
}

fn guest(mode: Mode) -> (ProfileStore, Arc<MockRemote>) {
    let remote = MockRemote::new(mode);
    let store = ProfileStore::new(Arc::new(MemoryStore::new()), remote.clone());
    (store, remote)
}

fn record(handle: &str) -> ProfileRecord {
    [("twitter_handle", handle), ("linkedin_profile", "")].into_iter().collect()
}

// =============================================================================
// PROFILE RECORD
// =============================================================================

#[test]
fn record_counts_only_non_blank_platforms() {
    let record: ProfileRecord =
        [("twitter_handle", "@a"), ("linkedin_profile", "  "), ("mastodon", "@a@x")].into_iter().collect();
    assert_eq!(record.connected_platforms(), 2);
    assert_eq!(record.get("youtube_channel"), "");
}

#[test]
fn with_known_platforms_keeps_unknown_keys() {
    let record: ProfileRecord = [("mastodon", "@a@x")].into_iter().collect();
    let filled = record.with_known_platforms();
    assert_eq!(filled.len(), PLATFORM_KEYS.len() + 1);
    assert_eq!(filled.get("mastodon"), "@a@x");
}

#[test]
fn record_serializes_as_flat_mapping() {
    let json = serde_json::to_value(record("@ana")).unwrap();
    assert_eq!(json, serde_json::json!({ "linkedin_profile": "", "twitter_handle": "@ana" }));
}

// =============================================================================
// SAVE / LOAD / CLEAR
// =============================================================================

#[tokio::test]
async fn save_then_load_with_remote_down_returns_local_record() {
    let (store, _remote, _local) = signed_in(Mode::Down);
    let saved = record("@local");

    let report = store.save(&saved).await;
    assert_eq!(report.local, LocalOutcome::Written);
    assert!(matches!(report.remote, RemoteOutcome::Unreachable { .. }));
    assert!(report.is_locally_safe());
    assert!(!report.is_synced());

    let view = store.load().await;
    assert_eq!(view.record, saved);
    assert_eq!(view.source, RecordSource::Local);
    assert_eq!(view.account, Account::demo());
    assert_eq!(view.notices[0].message, "Using demo data - backend API not available");
}

#[tokio::test]
async fn remote_record_supersedes_local_record() {
    let (store, remote, _local) = signed_in(Mode::Echo);
    store.save(&record("@local")).await;
    remote.seed(record("@remote"));

    let view = store.load().await;
    assert_eq!(view.record.get("twitter_handle"), "@remote");
    assert_eq!(view.source, RecordSource::Remote);
    assert_eq!(view.account.id, 42);
    assert!(view.notices.is_empty());
}

#[tokio::test]
async fn remote_without_record_keeps_local_record_and_remote_account() {
    let (store, remote, _local) = signed_in(Mode::Down);
    store.save(&record("@local")).await;
    remote.set_mode(Mode::Echo);

    let view = store.load().await;
    assert_eq!(view.record.get("twitter_handle"), "@local");
    assert_eq!(view.source, RecordSource::Local);
    assert_eq!(view.account.id, 42);
}

#[tokio::test]
async fn clear_then_load_with_remote_down_is_empty() {
    let (store, _remote, _local) = signed_in(Mode::Down);
    store.save(&record("@local")).await;

    let report = store.clear().await;
    assert_eq!(report.local, LocalOutcome::Removed);
    assert_eq!(
        report.notices(),
        vec![Notice { level: NoticeLevel::Success, message: "Social profiles cleared locally".to_owned() }]
    );

    let view = store.load().await;
    assert!(view.record.is_empty());
    assert_eq!(view.source, RecordSource::Empty);
}

#[tokio::test]
async fn synced_save_reports_success_notice() {
    let (store, remote, _local) = signed_in(Mode::Echo);
    let report = store.save(&record("@ana")).await;

    assert!(report.is_synced());
    assert_eq!(remote.calls(), vec!["put"]);
    assert_eq!(
        report.notices(),
        vec![Notice { level: NoticeLevel::Success, message: "Social profiles updated successfully!".to_owned() }]
    );
}

#[tokio::test]
async fn rejected_save_surfaces_detail_and_local_fallback() {
    let (store, _remote, local) = signed_in(Mode::Reject(401));
    let report = store.save(&record("@ana")).await;

    assert_eq!(report.remote, RemoteOutcome::Rejected { status: 401, detail: Some("Invalid token".to_owned()) });
    let notices = report.notices();
    assert_eq!(notices[0], Notice { level: NoticeLevel::Error, message: "Invalid token".to_owned() });
    assert_eq!(notices[1], Notice { level: NoticeLevel::Info, message: "Profiles saved locally".to_owned() });

    let stored: Option<ProfileRecord> = load_json(local.as_ref(), SOCIAL_PROFILES_KEY).unwrap();
    assert_eq!(stored, Some(record("@ana")));
}

#[tokio::test]
async fn rejected_load_keeps_local_record_with_info_notice() {
    let (store, remote, _local) = signed_in(Mode::Down);
    store.save(&record("@local")).await;
    remote.set_mode(Mode::Reject(403));

    let view = store.load().await;
    assert_eq!(view.record.get("twitter_handle"), "@local");
    assert_eq!(view.notices.len(), 1);
    assert_eq!(view.notices[0].level, NoticeLevel::Info);
    assert!(view.notices[0].message.contains("403"));
}

#[tokio::test]
async fn guest_never_contacts_remote() {
    let (store, remote) = guest(Mode::Echo);
    let report = store.save(&record("@guest")).await;
    assert_eq!(report.remote, RemoteOutcome::Skipped);
    assert_eq!(
        report.notices(),
        vec![Notice { level: NoticeLevel::Success, message: "Social profiles saved locally".to_owned() }]
    );

    let view = store.load().await;
    assert_eq!(view.account, Account::guest());
    assert_eq!(view.record.get("twitter_handle"), "@guest");

    store.clear().await;
    assert!(remote.calls().is_empty());
}

#[tokio::test]
async fn unreadable_local_record_is_treated_as_absent() {
    let (store, _remote) = guest(Mode::Echo);
    store.local.set(SOCIAL_PROFILES_KEY, "{not json").unwrap();

    let view = store.load().await;
    assert!(view.record.is_empty());
    assert_eq!(view.source, RecordSource::Empty);
}

#[tokio::test]
async fn failed_local_write_is_not_reported_as_safe() {
    let remote = MockRemote::new(Mode::Echo);
    let store = ProfileStore::new(Arc::new(BrokenStore), remote.clone());

    let report = store.save(&record("@ana")).await;
    assert!(matches!(report.local, LocalOutcome::Failed { .. }));
    assert_eq!(report.remote, RemoteOutcome::Skipped);
    assert!(!report.is_locally_safe());
    assert_eq!(report.notices()[0].level, NoticeLevel::Error);
}

// =============================================================================
// SYNC PHASES
// =============================================================================

#[tokio::test]
async fn phase_settles_after_every_write() {
    let (store, _remote, _local) = signed_in(Mode::Down);
    assert_eq!(store.phase(), SyncPhase::Idle);

    store.save(&record("@a")).await;
    assert_eq!(store.phase(), SyncPhase::Settled);

    store.clear().await;
    assert_eq!(store.phase(), SyncPhase::Settled);
}

#[tokio::test]
async fn synced_save_walks_every_phase_in_order() {
    let (store, _remote, _local) = signed_in(Mode::Echo);
    store.save(&record("@a")).await;

    assert_eq!(
        store.phase_history(),
        vec![
            SyncPhase::LocalWritePending,
            SyncPhase::LocalWriteDone,
            SyncPhase::RemoteWritePending,
            SyncPhase::RemoteOk,
            SyncPhase::Settled,
        ]
    );
}

#[tokio::test]
async fn rejected_save_settles_through_rejected_phase() {
    let (store, _remote, _local) = signed_in(Mode::Reject(401));
    store.save(&record("@a")).await;

    assert_eq!(
        store.phase_history(),
        vec![
            SyncPhase::LocalWritePending,
            SyncPhase::LocalWriteDone,
            SyncPhase::RemoteWritePending,
            SyncPhase::RemoteRejected,
            SyncPhase::Settled,
        ]
    );
}

#[tokio::test]
async fn unreachable_clear_settles_through_unreachable_phase() {
    let (store, _remote, _local) = signed_in(Mode::Down);
    store.clear().await;

    assert_eq!(
        store.phase_history(),
        vec![
            SyncPhase::LocalWritePending,
            SyncPhase::LocalWriteDone,
            SyncPhase::RemoteWritePending,
            SyncPhase::RemoteUnreachable,
            SyncPhase::Settled,
        ]
    );
}

#[tokio::test]
async fn guest_save_skips_remote_phases() {
    let (store, _remote) = guest(Mode::Echo);
    store.save(&record("@a")).await;

    assert_eq!(
        store.phase_history(),
        vec![SyncPhase::LocalWritePending, SyncPhase::LocalWriteDone, SyncPhase::Settled]
    );
}

#[tokio::test]
async fn watcher_is_notified_when_write_settles() {
    let (store, _remote, _local) = signed_in(Mode::Echo);
    let mut rx = store.watch_phase();
    rx.mark_unchanged();

    store.save(&record("@a")).await;
    assert!(rx.has_changed().unwrap());
    assert_eq!(*rx.borrow_and_update(), SyncPhase::Settled);
}

#[test]
fn remote_outcome_maps_to_terminal_phase() {
    assert_eq!(SyncPhase::after_remote(&RemoteOutcome::Synced), Some(SyncPhase::RemoteOk));
    assert_eq!(
        SyncPhase::after_remote(&RemoteOutcome::Unreachable { error: "x".to_owned() }),
        Some(SyncPhase::RemoteUnreachable)
    );
    assert_eq!(
        SyncPhase::after_remote(&RemoteOutcome::Rejected { status: 500, detail: None }),
        Some(SyncPhase::RemoteRejected)
    );
    assert_eq!(SyncPhase::after_remote(&RemoteOutcome::Skipped), None);
}

#[test]
fn remote_errors_convert_to_outcomes() {
    assert_eq!(RemoteOutcome::from(Ok(())), RemoteOutcome::Synced);
    assert!(matches!(
        RemoteOutcome::from(Err(RemoteError::Malformed("bad".to_owned()))),
        RemoteOutcome::Unreachable { .. }
    ));
}

// =============================================================================
// BLOCKING I/O
// =============================================================================

#[tokio::test]
async fn device_store_runs_off_the_async_thread() {
    let local = Arc::new(ThreadRecordingStore::default());
    let store = ProfileStore::new(local.clone(), MockRemote::new(Mode::Echo));

    store.save(&record("@a")).await;
    store.load().await;
    store.clear().await;

    let async_thread = thread::current().id();
    let threads = local.threads.lock().unwrap().clone();
    assert!(!threads.is_empty());
    assert!(threads.iter().all(|id| *id != async_thread));
}
