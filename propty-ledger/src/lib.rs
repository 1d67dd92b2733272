//! Property registry, reputation and escrow ledger
//!
//! This crate implements the PropTy protocol as an ordinary transactional
//! ledger:
//! - User, property, review and soulbound badge registries
//! - A multi-party escrow state machine with funds held on the ledger
//! - Dispute resolution and platform statistics through an admin coordinator
//! - A JSON request/response API and snapshot persistence
//!
//! Every registry shares one [`ledger::Ledger`]; [`platform::Platform`] builds
//! and wires them from a single [`config::PlatformConfig`].

pub mod admin_coordinator;
pub mod api;
pub mod badge_registry;
pub mod clock;
pub mod config;
pub mod error;
pub mod escrow_engine;
pub mod event_publisher;
pub mod funds;
pub mod ledger;
pub mod models;
pub mod platform;
pub mod property_registry;
pub mod review_registry;
pub mod storage;
pub mod user_registry;
pub mod validation;

/// Result type alias for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;

pub use admin_coordinator::{AdminCoordinator, NewDispute, Registries};
pub use api::{ApiError, ApiResult, Request, Response};
pub use badge_registry::BadgeRegistry;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::PlatformConfig;
pub use error::{ErrorKind, LedgerError};
pub use escrow_engine::EscrowEngine;
pub use ledger::{Ledger, LedgerSnapshot};
pub use platform::{Platform, PlatformHealth};
pub use property_registry::{NewProperty, PropertyRegistry};
pub use review_registry::{NewReview, ReviewRegistry};
pub use storage::{JsonFileStore, MemoryStore, SnapshotStore};
pub use user_registry::UserRegistry;
