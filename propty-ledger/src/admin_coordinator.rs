//! Admin Coordinator - Disputes, arbitration and platform statistics
//!
//! The coordinator is the only component that reaches into every registry.
//! It is bound once to the live registry handles with
//! [`AdminCoordinator::wire_contracts`]; until then every operation except
//! the statistics read fails with `NotWired`.
//!
//! Resolving a dispute applies its side effect (refund, completion, review
//! invalidation, listing removal) in the same ledger transaction as the
//! status change, so a dispute is never resolved without its outcome.

use crate::{
    badge_registry::BadgeRegistry,
    error::LedgerError,
    escrow_engine::{cancel_in, complete_in, dispute_in, refund_in, restore_in, EscrowEngine},
    ledger::{Ledger, Table, Tx},
    models::{
        AccountId, DealState, Dispute, DisputeId, DisputeStatus, DisputeType, EntityKind,
        PlatformStats, PropertyStatus, Resolution,
    },
    property_registry::{move_status_in, PropertyRegistry},
    review_registry::{invalidate_in, ReviewRegistry},
    user_registry::UserRegistry,
    LedgerResult,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Dispute details supplied by the complainant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDispute {
    pub dispute_type: DisputeType,
    pub respondent: AccountId,
    pub related_entity_id: u64,
    pub evidence_hash: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DisputeTable {
    pub(crate) rows: Table<Dispute>,
}

impl DisputeTable {
    pub(crate) fn require(&self, id: DisputeId) -> LedgerResult<&Dispute> {
        self.rows
            .get(id)
            .ok_or_else(|| LedgerError::not_found("dispute", id))
    }

    /// Whether an unresolved dispute already targets the entity
    pub fn has_unresolved(&self, dispute_type: DisputeType, related_entity_id: u64) -> bool {
        self.rows.values().any(|d| {
            d.dispute_type == dispute_type
                && d.related_entity_id == related_entity_id
                && d.status != DisputeStatus::Resolved
        })
    }
}

/// Live registry handles bound to the coordinator
#[derive(Debug, Clone)]
pub struct Registries {
    pub users: UserRegistry,
    pub properties: PropertyRegistry,
    pub reviews: ReviewRegistry,
    pub badges: BadgeRegistry,
    pub escrow: EscrowEngine,
}

impl Registries {
    /// Whether every registry runs on `ledger`
    fn share_ledger(&self, ledger: &Arc<Ledger>) -> bool {
        [
            self.users.ledger(),
            self.properties.ledger(),
            self.reviews.ledger(),
            self.badges.ledger(),
            self.escrow.ledger(),
        ]
        .into_iter()
        .all(|l| Arc::ptr_eq(l, ledger))
    }
}

fn create_dispute_in(
    tx: &mut Tx<'_>,
    caller: &AccountId,
    dispute: &NewDispute,
) -> LedgerResult<DisputeId> {
    tx.state.users.require_active_caller(caller, "open a dispute")?;
    tx.state.users.require(&dispute.respondent)?;
    if caller == &dispute.respondent {
        return Err(LedgerError::invalid_input(
            "complainant and respondent must differ",
        ));
    }
    tx.validator()
        .content_hash("evidence_hash", &dispute.evidence_hash)?;

    let entity_id = dispute.related_entity_id;
    let mut freeze_deal = false;
    match dispute.dispute_type {
        DisputeType::PropertyDispute => {
            tx.state.properties.require(entity_id)?;
        }
        DisputeType::ReviewDispute => {
            tx.state.reviews.require(entity_id)?;
        }
        DisputeType::TransactionDispute => {
            let deal = tx.state.deals.require(entity_id)?;
            if !deal.is_party(caller) || !deal.is_party(&dispute.respondent) {
                return Err(LedgerError::unauthorized(format!(
                    "a dispute over deal {} must be between its buyer and seller",
                    entity_id
                )));
            }
            if deal.state.is_terminal() {
                return Err(LedgerError::state_transition(
                    format!("deal {}", entity_id),
                    deal.state,
                    DealState::Disputed,
                ));
            }
            freeze_deal = deal.state != DealState::Disputed;
        }
    }

    if tx.state.disputes.has_unresolved(dispute.dispute_type, entity_id) {
        return Err(LedgerError::DisputeAlreadyOpen(format!(
            "{:?} {}",
            dispute.dispute_type, entity_id
        )));
    }

    let dispute_id = tx.state.disputes.rows.next_id();
    if freeze_deal {
        dispute_in(tx, entity_id, caller, &format!("dispute {}", dispute_id))?;
    }

    let now = tx.now;
    tx.state.disputes.rows.insert_with(|id| Dispute {
        id,
        dispute_type: dispute.dispute_type,
        complainant: caller.clone(),
        respondent: dispute.respondent.clone(),
        related_entity_id: entity_id,
        evidence_hash: dispute.evidence_hash.clone(),
        status: DisputeStatus::Open,
        resolution: Resolution::None,
        resolved_by: None,
        created_at: now,
        resolved_at: None,
    });
    tx.emit(EntityKind::Dispute, dispute_id, "opened", Some(caller));
    Ok(dispute_id)
}

fn begin_review_in(tx: &mut Tx<'_>, caller: &AccountId, dispute_id: DisputeId) -> LedgerResult<()> {
    tx.require_admin(caller, "review dispute")?;
    let dispute = tx.state.disputes.require(dispute_id)?;
    if dispute.status != DisputeStatus::Open {
        return Err(LedgerError::state_transition(
            format!("dispute {}", dispute_id),
            dispute.status,
            DisputeStatus::UnderReview,
        ));
    }

    if let Some(dispute) = tx.state.disputes.rows.get_mut(dispute_id) {
        dispute.status = DisputeStatus::UnderReview;
    }
    tx.emit(EntityKind::Dispute, dispute_id, "under_review", Some(caller));
    Ok(())
}

/// Apply the outcome of a transaction dispute to its deal
fn settle_deal(
    tx: &mut Tx<'_>,
    dispute: &Dispute,
    resolution: Resolution,
    caller: &AccountId,
) -> LedgerResult<()> {
    let deal = tx.state.deals.require(dispute.related_entity_id)?;
    let deal_id = deal.id;

    if deal.state != DealState::Disputed {
        return Err(LedgerError::state_transition(
            format!("deal {}", deal_id),
            deal.state,
            DealState::Disputed,
        ));
    }
    let (funded, buyer) = (deal.is_funded(), deal.buyer.clone());

    match dispute.favored_party(resolution) {
        None => restore_in(tx, deal_id, caller),
        Some(favored) if favored == &buyer => refund_in(tx, deal_id, caller),
        // Nothing is held to release to the seller
        Some(_) if !funded => cancel_in(tx, deal_id, caller),
        Some(_) => complete_in(tx, deal_id, caller),
    }
}

fn resolve_in(
    tx: &mut Tx<'_>,
    caller: &AccountId,
    dispute_id: DisputeId,
    resolution: Resolution,
) -> LedgerResult<()> {
    tx.require_admin(caller, "resolve dispute")?;
    if resolution == Resolution::None {
        return Err(LedgerError::invalid_input("a resolution must be chosen"));
    }

    let dispute = tx.state.disputes.require(dispute_id)?.clone();
    if dispute.status == DisputeStatus::Resolved {
        return Err(LedgerError::AlreadyResolved(dispute_id));
    }

    match (dispute.dispute_type, resolution) {
        (DisputeType::TransactionDispute, _) => settle_deal(tx, &dispute, resolution, caller)?,
        (DisputeType::ReviewDispute, Resolution::FavorComplainant) => {
            let review_id = dispute.related_entity_id;
            if tx.state.reviews.require(review_id)?.valid {
                invalidate_in(tx, caller, review_id)?;
            }
        }
        (DisputeType::PropertyDispute, Resolution::FavorComplainant) => {
            move_status_in(
                tx,
                dispute.related_entity_id,
                PropertyStatus::Removed,
                Some(caller),
            )?;
        }
        _ => {}
    }

    let now = tx.now;
    if let Some(dispute) = tx.state.disputes.rows.get_mut(dispute_id) {
        dispute.status = DisputeStatus::Resolved;
        dispute.resolution = resolution;
        dispute.resolved_by = Some(caller.clone());
        dispute.resolved_at = Some(now);
    }
    tx.emit(EntityKind::Dispute, dispute_id, "resolved", Some(caller));
    Ok(())
}

/// Main admin coordinator
#[derive(Debug)]
pub struct AdminCoordinator {
    ledger: Arc<Ledger>,
    registries: OnceCell<Registries>,
}

impl AdminCoordinator {
    /// Create an unwired coordinator over the shared ledger
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self {
            ledger,
            registries: OnceCell::new(),
        }
    }

    /// Bind the coordinator to the live registries, once
    pub fn wire_contracts(&self, registries: Registries) -> LedgerResult<()> {
        if self.registries.initialized() {
            return Err(LedgerError::AlreadyWired);
        }
        if !registries.share_ledger(&self.ledger) {
            return Err(LedgerError::config(
                "registries must share the coordinator's ledger",
            ));
        }

        self.registries
            .set(registries)
            .map_err(|_| LedgerError::AlreadyWired)?;

        info!("Admin coordinator wired to registries");
        Ok(())
    }

    pub fn is_wired(&self) -> bool {
        self.registries.initialized()
    }

    /// The wired registries
    pub fn registries(&self) -> LedgerResult<&Registries> {
        self.registries.get().ok_or(LedgerError::NotWired)
    }

    /// Open a dispute as the caller
    pub async fn create_dispute(
        &self,
        caller: &AccountId,
        dispute: NewDispute,
    ) -> LedgerResult<DisputeId> {
        self.registries()?;

        let result = self
            .ledger
            .transact(|tx| create_dispute_in(tx, caller, &dispute))
            .await;

        match &result {
            Ok(id) => warn!(
                "Dispute {} opened by {} against {} ({:?} {})",
                id, caller, dispute.respondent, dispute.dispute_type, dispute.related_entity_id
            ),
            Err(err @ LedgerError::Unauthorized(_)) => {
                warn!(complainant = %caller, error = %err, "Rejected dispute")
            }
            Err(_) => {}
        }

        result
    }

    /// Take an open dispute under review. Requires admin authority.
    pub async fn begin_review(&self, caller: &AccountId, dispute_id: DisputeId) -> LedgerResult<()> {
        self.registries()?;

        self.ledger
            .transact(|tx| begin_review_in(tx, caller, dispute_id))
            .await?;

        info!(dispute_id, by = %caller, "Dispute under review");
        Ok(())
    }

    /// Adjudicate a dispute and apply its outcome. Requires admin authority.
    pub async fn resolve_dispute(
        &self,
        caller: &AccountId,
        dispute_id: DisputeId,
        resolution: Resolution,
    ) -> LedgerResult<()> {
        self.registries()?;

        let result = self
            .ledger
            .transact(|tx| resolve_in(tx, caller, dispute_id, resolution))
            .await;

        match &result {
            Ok(()) => info!("Resolved dispute {} as {:?}", dispute_id, resolution),
            Err(err @ LedgerError::Unauthorized(_)) => {
                warn!(dispute_id, caller = %caller, error = %err, "Rejected resolution")
            }
            Err(_) => {}
        }

        result
    }

    pub async fn get_dispute(&self, dispute_id: DisputeId) -> LedgerResult<Dispute> {
        self.registries()?;
        self.ledger
            .read(|state| state.disputes.require(dispute_id).cloned())
            .await
    }

    /// Disputes in creation order, optionally filtered by status
    pub async fn list_disputes(&self, status: Option<DisputeStatus>) -> LedgerResult<Vec<Dispute>> {
        self.registries()?;
        Ok(self
            .ledger
            .read(|state| {
                state
                    .disputes
                    .rows
                    .values()
                    .filter(|d| status.map_or(true, |s| d.status == s))
                    .cloned()
                    .collect()
            })
            .await)
    }

    /// Platform statistics derived from the ledger tables
    pub async fn get_platform_stats(&self) -> PlatformStats {
        let stats = self.ledger.platform_stats().await;
        debug!(?stats, "Derived platform stats");
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::SystemClock,
        config::PlatformConfig,
        models::{PropertyType, ReviewType, Role},
        property_registry::NewProperty,
        review_registry::NewReview,
    };

    fn registries(ledger: Arc<Ledger>) -> Registries {
        let users = UserRegistry::new(ledger);
        let properties = PropertyRegistry::new(&users);
        Registries {
            reviews: ReviewRegistry::new(&users, &properties),
            badges: BadgeRegistry::new(&users),
            escrow: EscrowEngine::new(&users, &properties),
            properties,
            users,
        }
    }

    fn wired() -> (AdminCoordinator, Registries) {
        let config = PlatformConfig::default().with_genesis_admin("root");
        let ledger = Arc::new(Ledger::new(config, Arc::new(SystemClock)));
        let coordinator = AdminCoordinator::new(ledger.clone());
        let registries = registries(ledger);
        coordinator.wire_contracts(registries.clone()).unwrap();
        (coordinator, registries)
    }

    #[tokio::test]
    async fn test_wiring_is_one_time() {
        let (coordinator, registries) = wired();
        assert!(coordinator.is_wired());
        assert!(matches!(
            coordinator.wire_contracts(registries),
            Err(LedgerError::AlreadyWired)
        ));
    }

    #[tokio::test]
    async fn test_unwired_coordinator() {
        let ledger = Arc::new(Ledger::new(PlatformConfig::default(), Arc::new(SystemClock)));
        let coordinator = AdminCoordinator::new(ledger);

        assert!(matches!(
            coordinator.get_dispute(1).await,
            Err(LedgerError::NotWired)
        ));
        assert_eq!(coordinator.get_platform_stats().await, PlatformStats::default());
    }

    #[tokio::test]
    async fn test_foreign_ledger_is_rejected() {
        let ledger = Arc::new(Ledger::new(PlatformConfig::default(), Arc::new(SystemClock)));
        let other = Arc::new(Ledger::new(PlatformConfig::default(), Arc::new(SystemClock)));
        let coordinator = AdminCoordinator::new(ledger);

        assert!(matches!(
            coordinator.wire_contracts(registries(other)),
            Err(LedgerError::Config(_))
        ));
        assert!(!coordinator.is_wired());
    }

    #[tokio::test]
    async fn test_review_dispute_invalidates_review() {
        let (coordinator, r) = wired();
        let root = AccountId::from("root");
        let owner = AccountId::from("owner");
        let critic = AccountId::from("critic");
        r.users.register(&owner, "Owner", "did:o", Role::Owner).await.unwrap();
        r.users.register(&critic, "Critic", "did:c", Role::Seeker).await.unwrap();

        let property_id = r
            .properties
            .create(
                &owner,
                NewProperty {
                    property_type: PropertyType::Commercial,
                    location: "Victoria Island".to_string(),
                    price: 10,
                    terms: String::new(),
                    content_hash: "QmShop".to_string(),
                    metadata_uri: String::new(),
                },
            )
            .await
            .unwrap();
        let review_id = r
            .reviews
            .submit(
                &critic,
                NewReview {
                    property_id,
                    review_type: ReviewType::Visitor,
                    content_hash: "QmRant".to_string(),
                    rating: 1,
                    comment: "Terrible".to_string(),
                },
            )
            .await
            .unwrap();

        let dispute_id = coordinator
            .create_dispute(
                &owner,
                NewDispute {
                    dispute_type: DisputeType::ReviewDispute,
                    respondent: critic.clone(),
                    related_entity_id: review_id,
                    evidence_hash: "QmProof".to_string(),
                },
            )
            .await
            .unwrap();

        let duplicate = coordinator
            .create_dispute(
                &owner,
                NewDispute {
                    dispute_type: DisputeType::ReviewDispute,
                    respondent: critic.clone(),
                    related_entity_id: review_id,
                    evidence_hash: "QmProof2".to_string(),
                },
            )
            .await;
        assert!(matches!(duplicate, Err(LedgerError::DisputeAlreadyOpen(_))));

        coordinator.begin_review(&root, dispute_id).await.unwrap();
        let none = coordinator
            .resolve_dispute(&root, dispute_id, Resolution::None)
            .await;
        assert!(matches!(none, Err(LedgerError::InvalidInput(_))));

        coordinator
            .resolve_dispute(&root, dispute_id, Resolution::FavorComplainant)
            .await
            .unwrap();

        assert!(!r.reviews.get(review_id).await.unwrap().valid);
        assert_eq!(r.reviews.rating(property_id).await.unwrap().average, None);

        let dispute = coordinator.get_dispute(dispute_id).await.unwrap();
        assert_eq!(dispute.status, DisputeStatus::Resolved);
        assert_eq!(dispute.resolved_by, Some(root.clone()));
        assert!(matches!(
            coordinator
                .resolve_dispute(&root, dispute_id, Resolution::Rejected)
                .await,
            Err(LedgerError::AlreadyResolved(_))
        ));

        let stats = coordinator.get_platform_stats().await;
        assert_eq!(stats.total_reviews, 1);
        assert_eq!(stats.valid_reviews, 0);
        assert_eq!(stats.total_disputes_resolved, 1);
        assert_eq!(
            coordinator
                .list_disputes(Some(DisputeStatus::Open))
                .await
                .unwrap()
                .len(),
            0
        );
    }

    #[tokio::test]
    async fn test_property_dispute_removes_listing() {
        let (coordinator, r) = wired();
        let root = AccountId::from("root");
        let owner = AccountId::from("owner");
        let seeker = AccountId::from("seeker");
        r.users.register(&owner, "Owner", "did:o", Role::Owner).await.unwrap();
        r.users.register(&seeker, "Seeker", "did:s", Role::Seeker).await.unwrap();

        let property_id = r
            .properties
            .create(
                &owner,
                NewProperty {
                    property_type: PropertyType::Land,
                    location: "Ajah".to_string(),
                    price: 10,
                    terms: String::new(),
                    content_hash: "QmPlot".to_string(),
                    metadata_uri: String::new(),
                },
            )
            .await
            .unwrap();

        let self_dispute = coordinator
            .create_dispute(
                &owner,
                NewDispute {
                    dispute_type: DisputeType::PropertyDispute,
                    respondent: owner.clone(),
                    related_entity_id: property_id,
                    evidence_hash: "Qm".to_string(),
                },
            )
            .await;
        assert!(matches!(self_dispute, Err(LedgerError::InvalidInput(_))));

        let dispute_id = coordinator
            .create_dispute(
                &seeker,
                NewDispute {
                    dispute_type: DisputeType::PropertyDispute,
                    respondent: owner.clone(),
                    related_entity_id: property_id,
                    evidence_hash: "QmFakeTitle".to_string(),
                },
            )
            .await
            .unwrap();

        let denied = coordinator
            .resolve_dispute(&seeker, dispute_id, Resolution::FavorComplainant)
            .await;
        assert!(matches!(denied, Err(LedgerError::Unauthorized(_))));

        coordinator
            .resolve_dispute(&root, dispute_id, Resolution::FavorComplainant)
            .await
            .unwrap();
        assert_eq!(
            r.properties.get(property_id).await.unwrap().status,
            PropertyStatus::Removed
        );
    }
}
