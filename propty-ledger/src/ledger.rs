//! Ledger store - the single serialized state shared by every registry
//!
//! All tables live in one [`LedgerState`] behind one lock. A mutation is a
//! closure run under the write guard by [`Ledger::transact`]: it validates
//! first, applies second, and its events are only sequenced and published
//! once it returns `Ok`. Readers never observe a half-applied mutation, even
//! when it spans several registries.

use crate::{
    admin_coordinator::DisputeTable,
    badge_registry::BadgeTable,
    clock::Clock,
    config::PlatformConfig,
    error::LedgerError,
    escrow_engine::DealTable,
    event_publisher::{EventLog, EventPublisher, PendingEvent},
    funds::FundsLedger,
    models::{
        AccountId, DealState, DisputeStatus, EntityKind, LedgerEvent, PlatformStats,
        PropertyStatus, Role,
    },
    property_registry::PropertyTable,
    review_registry::ReviewTable,
    user_registry::UserTable,
    validation::Validator,
    LedgerResult,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc};
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

/// Snapshot format version
pub const SNAPSHOT_VERSION: u32 = 1;

/// Append-friendly table keyed by a per-kind sequential id starting at 1
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table<T> {
    last_id: u64,
    rows: BTreeMap<u64, T>,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            last_id: 0,
            rows: BTreeMap::new(),
        }
    }
}

impl<T> Table<T> {
    /// Id the next inserted row will receive
    pub fn next_id(&self) -> u64 {
        self.last_id + 1
    }

    /// Insert a row built from its freshly assigned id
    pub(crate) fn insert_with<F>(&mut self, build: F) -> u64
    where
        F: FnOnce(u64) -> T,
    {
        let id = self.next_id();
        self.rows.insert(id, build(id));
        self.last_id = id;
        id
    }

    pub fn get(&self, id: u64) -> Option<&T> {
        self.rows.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: u64) -> Option<&mut T> {
        self.rows.get_mut(&id)
    }

    /// Rows in id (insertion) order
    pub fn values(&self) -> impl Iterator<Item = &T> + Clone {
        self.rows.values()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Every table of the ledger
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerState {
    pub(crate) users: UserTable,
    pub(crate) properties: PropertyTable,
    pub(crate) reviews: ReviewTable,
    pub(crate) badges: BadgeTable,
    pub(crate) deals: DealTable,
    pub(crate) disputes: DisputeTable,
    pub(crate) funds: FundsLedger,
    pub(crate) events: EventLog,
}

impl LedgerState {
    /// Admin authority: a configured genesis admin, or an active Admin user
    pub(crate) fn has_admin_authority(&self, config: &PlatformConfig, caller: &AccountId) -> bool {
        config.is_genesis_admin(caller) || self.users.is_active_with_role(caller, Role::Admin)
    }

    /// Derive platform statistics from the tables
    pub fn platform_stats(&self) -> PlatformStats {
        let users = self.users.rows.values();
        let properties = self.properties.rows.values();
        let reviews = self.reviews.rows.values();
        let deals = self.deals.rows.values();
        let disputes = self.disputes.rows.values();

        let completed: Vec<_> = deals
            .clone()
            .filter(|d| d.state == DealState::Completed)
            .collect();

        PlatformStats {
            total_users: self.users.rows.len() as u64,
            active_users: users.filter(|u| u.active).count() as u64,
            total_properties: self.properties.rows.len() as u64,
            active_listings: properties
                .filter(|p| p.status == PropertyStatus::Listed)
                .count() as u64,
            total_reviews: self.reviews.rows.len() as u64,
            valid_reviews: reviews.filter(|r| r.valid).count() as u64,
            total_badges: self.badges.rows.len() as u64,
            total_deals: self.deals.rows.len() as u64,
            completed_deals: completed.len() as u64,
            total_volume: completed
                .iter()
                .fold(0u64, |acc, d| acc.saturating_add(d.amount)),
            escrow_held: self.funds.held(),
            total_disputes_open: disputes
                .clone()
                .filter(|d| d.status != DisputeStatus::Resolved)
                .count() as u64,
            total_disputes_resolved: disputes
                .filter(|d| d.status == DisputeStatus::Resolved)
                .count() as u64,
        }
    }

    /// Cross-table consistency checks. Empty when the ledger is sound.
    pub fn audit(&self) -> Vec<String> {
        let mut issues = Vec::new();

        for property in self.properties.rows.values() {
            if !self.users.rows.contains_key(&property.owner) {
                issues.push(format!(
                    "property {} is owned by unregistered account {}",
                    property.id, property.owner
                ));
            }

            let open_deals = self
                .deals
                .rows
                .values()
                .filter(|d| d.property_id == property.id && !d.state.is_terminal())
                .count();
            let in_escrow = property.status == PropertyStatus::InEscrow;

            if in_escrow && open_deals != 1 {
                issues.push(format!(
                    "property {} is in escrow with {} open deals",
                    property.id, open_deals
                ));
            }
            if !in_escrow && open_deals > 0 {
                issues.push(format!(
                    "property {} has {} open deals but status {:?}",
                    property.id, open_deals, property.status
                ));
            }
        }

        let expected_hold = self
            .deals
            .rows
            .values()
            .filter(|d| d.is_funded() && !d.state.is_terminal())
            .fold(0u64, |acc, d| acc.saturating_add(d.amount));
        if expected_hold != self.funds.held() {
            issues.push(format!(
                "escrow hold is {} but funded open deals total {}",
                self.funds.held(),
                expected_hold
            ));
        }

        issues
    }
}

/// Serializable copy of the whole ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub version: u32,
    pub taken_at: DateTime<Utc>,
    pub state: LedgerState,
}

/// Mutable view handed to a transaction closure
pub(crate) struct Tx<'a> {
    pub state: &'a mut LedgerState,
    pub config: &'a PlatformConfig,
    pub now: DateTime<Utc>,
    events: Vec<PendingEvent>,
}

impl<'a> Tx<'a> {
    /// Record an event, published only if the transaction commits
    pub fn emit<I: ToString>(
        &mut self,
        entity_kind: EntityKind,
        entity_id: I,
        operation: &'static str,
        actor: Option<&AccountId>,
    ) {
        self.events.push(PendingEvent {
            entity_kind,
            entity_id: entity_id.to_string(),
            operation,
            actor: actor.cloned(),
        });
    }

    pub fn validator(&self) -> Validator<'a> {
        let config: &'a PlatformConfig = self.config;
        Validator::new(&config.validation)
    }

    pub fn has_admin_authority(&self, caller: &AccountId) -> bool {
        self.state.has_admin_authority(self.config, caller)
    }

    pub fn require_admin(&self, caller: &AccountId, action: &str) -> LedgerResult<()> {
        if self.has_admin_authority(caller) {
            Ok(())
        } else {
            Err(LedgerError::unauthorized(format!(
                "{} requires admin authority, {} has none",
                action, caller
            )))
        }
    }
}

/// Shared ledger store
#[derive(Debug)]
pub struct Ledger {
    state: RwLock<LedgerState>,
    config: PlatformConfig,
    clock: Arc<dyn Clock>,
    publisher: EventPublisher,
}

impl Ledger {
    /// Create an empty ledger
    pub fn new(config: PlatformConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_state(config, clock, LedgerState::default())
    }

    /// Create a ledger on top of existing state
    pub fn with_state(config: PlatformConfig, clock: Arc<dyn Clock>, state: LedgerState) -> Self {
        let publisher = EventPublisher::new(&config.events);
        Self {
            state: RwLock::new(state),
            config,
            clock,
            publisher,
        }
    }

    /// Restore a ledger from a snapshot
    pub fn from_snapshot(
        config: PlatformConfig,
        clock: Arc<dyn Clock>,
        snapshot: LedgerSnapshot,
    ) -> LedgerResult<Self> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(LedgerError::storage(format!(
                "unsupported snapshot version {}, expected {}",
                snapshot.version, SNAPSHOT_VERSION
            )));
        }
        Ok(Self::with_state(config, clock, snapshot.state))
    }

    /// Run one all-or-nothing mutation
    pub(crate) async fn transact<T, F>(&self, f: F) -> LedgerResult<T>
    where
        F: FnOnce(&mut Tx<'_>) -> LedgerResult<T>,
    {
        let mut guard = self.state.write().await;
        let now = self.clock.now();

        let (output, pending) = {
            let mut tx = Tx {
                state: &mut *guard,
                config: &self.config,
                now,
                events: Vec::new(),
            };
            match f(&mut tx) {
                Ok(output) => (output, tx.events),
                Err(err) => {
                    debug!(error = %err, "Transaction rejected, nothing written");
                    return Err(err);
                }
            }
        };

        let committed = guard.events.append(pending, now);
        drop(guard);

        for event in committed {
            self.publisher.publish(event);
        }

        Ok(output)
    }

    /// Run a read-only closure against a consistent view
    pub(crate) async fn read<T, F>(&self, f: F) -> T
    where
        F: FnOnce(&LedgerState) -> T,
    {
        let guard = self.state.read().await;
        f(&guard)
    }

    pub async fn snapshot(&self) -> LedgerSnapshot {
        let state = self.state.read().await.clone();
        LedgerSnapshot {
            version: SNAPSHOT_VERSION,
            taken_at: self.clock.now(),
            state,
        }
    }

    pub async fn platform_stats(&self) -> PlatformStats {
        self.read(LedgerState::platform_stats).await
    }

    pub async fn audit(&self) -> Vec<String> {
        self.read(LedgerState::audit).await
    }

    pub async fn events_since(&self, sequence: u64) -> Vec<LedgerEvent> {
        self.read(|state| state.events.since(sequence)).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.publisher.subscribe()
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
