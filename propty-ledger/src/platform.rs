//! Platform - Builds and wires every component from one configuration
//!
//! Construction follows deployment order: the shared ledger, then the user
//! registry, the registries that depend on it, the escrow engine and finally
//! the admin coordinator, which is wired to the live registries once.

use crate::{
    admin_coordinator::{AdminCoordinator, Registries},
    badge_registry::BadgeRegistry,
    clock::{Clock, SystemClock},
    config::PlatformConfig,
    escrow_engine::EscrowEngine,
    ledger::{Ledger, LedgerSnapshot},
    models::{LedgerEvent, PlatformStats},
    property_registry::PropertyRegistry,
    review_registry::ReviewRegistry,
    storage::SnapshotStore,
    user_registry::UserRegistry,
    LedgerResult,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Main platform that owns all components
#[derive(Debug)]
pub struct Platform {
    ledger: Arc<Ledger>,
    users: UserRegistry,
    properties: PropertyRegistry,
    reviews: ReviewRegistry,
    badges: BadgeRegistry,
    escrow: EscrowEngine,
    admin: AdminCoordinator,
}

/// Platform health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformHealth {
    pub healthy: bool,
    pub wired: bool,
    pub issues: Vec<String>,
    pub stats: PlatformStats,
    pub timestamp: DateTime<Utc>,
}

impl Platform {
    /// Create a fresh platform on the system clock
    pub fn new(config: PlatformConfig) -> LedgerResult<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a fresh platform on the given clock
    pub fn with_clock(config: PlatformConfig, clock: Arc<dyn Clock>) -> LedgerResult<Self> {
        config.validate()?;
        Self::assemble(Ledger::new(config, clock))
    }

    /// Rebuild a platform on top of a saved snapshot
    pub fn restore(config: PlatformConfig, snapshot: LedgerSnapshot) -> LedgerResult<Self> {
        Self::restore_with_clock(config, Arc::new(SystemClock), snapshot)
    }

    pub fn restore_with_clock(
        config: PlatformConfig,
        clock: Arc<dyn Clock>,
        snapshot: LedgerSnapshot,
    ) -> LedgerResult<Self> {
        config.validate()?;
        Self::assemble(Ledger::from_snapshot(config, clock, snapshot)?)
    }

    /// Restore from the store if it holds a snapshot, start fresh otherwise
    pub async fn open(config: PlatformConfig, store: &dyn SnapshotStore) -> LedgerResult<Self> {
        match store.load().await? {
            Some(snapshot) => Self::restore(config, snapshot),
            None => Self::new(config),
        }
    }

    fn assemble(ledger: Ledger) -> LedgerResult<Self> {
        info!("Initializing platform components");

        let ledger = Arc::new(ledger);
        let users = UserRegistry::new(ledger.clone());
        let properties = PropertyRegistry::new(&users);
        let reviews = ReviewRegistry::new(&users, &properties);
        let badges = BadgeRegistry::new(&users);
        let escrow = EscrowEngine::new(&users, &properties);

        let admin = AdminCoordinator::new(ledger.clone());
        admin.wire_contracts(Registries {
            users: users.clone(),
            properties: properties.clone(),
            reviews: reviews.clone(),
            badges: badges.clone(),
            escrow: escrow.clone(),
        })?;

        info!("Platform initialized successfully");

        Ok(Self {
            ledger,
            users,
            properties,
            reviews,
            badges,
            escrow,
            admin,
        })
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn config(&self) -> &PlatformConfig {
        self.ledger.config()
    }

    pub fn users(&self) -> &UserRegistry {
        &self.users
    }

    pub fn properties(&self) -> &PropertyRegistry {
        &self.properties
    }

    pub fn reviews(&self) -> &ReviewRegistry {
        &self.reviews
    }

    pub fn badges(&self) -> &BadgeRegistry {
        &self.badges
    }

    pub fn escrow(&self) -> &EscrowEngine {
        &self.escrow
    }

    pub fn admin(&self) -> &AdminCoordinator {
        &self.admin
    }

    /// Subscribe to events committed from now on
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.ledger.subscribe()
    }

    pub async fn events_since(&self, sequence: u64) -> Vec<LedgerEvent> {
        self.ledger.events_since(sequence).await
    }

    pub async fn snapshot(&self) -> LedgerSnapshot {
        self.ledger.snapshot().await
    }

    /// Save the current state to a store
    pub async fn persist(&self, store: &dyn SnapshotStore) -> LedgerResult<()> {
        store.save(&self.snapshot().await).await
    }

    /// Health check for the platform
    pub async fn health_check(&self) -> PlatformHealth {
        let mut issues = self.ledger.audit().await;

        let wired = self.admin.is_wired();
        if !wired {
            issues.push("admin coordinator is not wired".to_string());
        }

        if !issues.is_empty() {
            warn!(issues = ?issues, "Platform health check found issues");
        }

        PlatformHealth {
            healthy: issues.is_empty(),
            wired,
            issues,
            stats: self.admin.get_platform_stats().await,
            timestamp: self.ledger.now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::LedgerError,
        models::{AccountId, Role},
        storage::MemoryStore,
    };

    #[tokio::test]
    async fn test_platform_initialization() {
        let platform = Platform::new(PlatformConfig::default()).unwrap();

        let health = platform.health_check().await;
        assert!(health.healthy);
        assert!(health.wired);
        assert_eq!(health.stats, PlatformStats::default());
    }

    #[tokio::test]
    async fn test_platform_is_already_wired() {
        let platform = Platform::new(PlatformConfig::default()).unwrap();
        let again = platform
            .admin()
            .wire_contracts(platform.admin().registries().unwrap().clone());
        assert!(matches!(again, Err(LedgerError::AlreadyWired)));
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = PlatformConfig::default();
        config.escrow.min_deal_amount = 0;
        assert!(matches!(Platform::new(config), Err(LedgerError::Config(_))));
    }

    #[tokio::test]
    async fn test_open_restores_from_store() {
        let store = MemoryStore::new();
        let platform = Platform::open(PlatformConfig::default(), &store).await.unwrap();
        platform
            .users()
            .register(&AccountId::from("0xabc"), "Ada", "did:ada", Role::Seeker)
            .await
            .unwrap();
        platform.persist(&store).await.unwrap();

        let restored = Platform::open(PlatformConfig::default(), &store).await.unwrap();
        assert_eq!(restored.admin().get_platform_stats().await.total_users, 1);
        assert_eq!(restored.events_since(0).await.len(), 1);
    }
}
