//! Client sync core for the SocialPulse dashboard.
//!
//! Two independent components keep the dashboard's view of the world
//! current without ever failing the process:
//!
//! - the live stats reconciler, which keeps a websocket to the realtime
//!   endpoint open, merges partial `stats_update` payloads into a snapshot,
//!   and reconnects after a fixed delay whenever the socket drops;
//! - the profile store, which writes social profile handles to the device
//!   first and to the remote API second, reporting each leg separately.
//!
//! ## Module layout
//!
//! | Module | Role |
//! |--------|------|
//! | [`live`] | Reconciler task, live state, websocket transport seam |
//! | [`stats`] | Snapshot merge and offline liveness simulation |
//! | [`profile`] | Dual-write profile store and write reports |
//! | [`api`] | REST client for the remote profile endpoints |
//! | [`storage`] | Device-local key/value persistence |
//! | [`session`] | Stored token and account identity |
//! | [`config`] | Environment-driven configuration |

pub mod api;
pub mod config;
pub mod live;
pub mod profile;
pub mod session;
pub mod stats;
pub mod storage;
