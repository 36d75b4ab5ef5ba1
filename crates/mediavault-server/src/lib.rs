//! MediaVault Server - media asset lifecycle service
//!
//! Tracks externally hosted media assets across an authoritative record
//! store and a mirrored metadata store, driven by caller requests and
//! provider webhooks.

pub mod app;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod lifecycle;
pub mod metadata;
pub mod mirror;
pub mod models;
pub mod notifier;
pub mod provider;
pub mod routes;
pub mod store;
pub mod sweep;
pub mod webhook;

pub use context::{CallTimeouts, RequestContext};
pub use error::{AppError, AppResult};
pub use lifecycle::LifecycleEngine;
pub use routes::{create_router, AppState};
