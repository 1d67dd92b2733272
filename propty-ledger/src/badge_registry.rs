//! Reputation Badge Registry - Soulbound badges awarded by admins
//!
//! Badges record reputation milestones (trusted owner, verified agent, ...).
//! They are bound to their recipient for life: nothing here rewrites a
//! recipient, and [`BadgeRegistry::transfer`] cannot succeed because its
//! success type is uninhabited. Raising a badge to a higher level mints a
//! new badge and retires the old one, which stays on record.

use crate::{
    error::LedgerError,
    ledger::{Ledger, Table, Tx},
    models::{AccountId, Badge, BadgeId, BadgeType, EntityKind},
    user_registry::UserRegistry,
    LedgerResult,
};
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, sync::Arc};
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BadgeTable {
    pub(crate) rows: Table<Badge>,
}

impl BadgeTable {
    pub(crate) fn require(&self, id: BadgeId) -> LedgerResult<&Badge> {
        self.rows
            .get(id)
            .ok_or_else(|| LedgerError::not_found("badge", id))
    }

    /// Active badge of a type held by a recipient
    pub fn active_of(&self, recipient: &AccountId, badge_type: BadgeType) -> Option<&Badge> {
        self.rows
            .values()
            .filter(|b| b.active && b.badge_type == badge_type && &b.recipient == recipient)
            .max_by_key(|b| b.level)
    }

    /// Highest level ever awarded for a type, revoked and superseded badges included
    pub fn highest_level(&self, recipient: &AccountId, badge_type: BadgeType) -> Option<u32> {
        self.rows
            .values()
            .filter(|b| b.badge_type == badge_type && &b.recipient == recipient)
            .map(|b| b.level)
            .max()
    }
}

fn award_in(
    tx: &mut Tx<'_>,
    caller: &AccountId,
    recipient: &AccountId,
    badge_type: BadgeType,
    content_hash: &str,
    level: u32,
) -> LedgerResult<BadgeId> {
    tx.require_admin(caller, "award badge")?;
    tx.state.users.require(recipient)?;

    if level == 0 {
        return Err(LedgerError::invalid_input("badge level must be at least 1"));
    }
    tx.validator().content_hash("content_hash", content_hash)?;

    // Levels only ever rise, even across a revoke
    match tx.state.badges.highest_level(recipient, badge_type) {
        Some(held) if held == level => {
            return Err(LedgerError::AlreadyHeld {
                recipient: recipient.to_string(),
                badge_type: format!("{:?}", badge_type),
                level,
            })
        }
        Some(held) if held > level => {
            return Err(LedgerError::BadgeLevelNotIncreasing {
                badge_type: format!("{:?}", badge_type),
                held,
                requested: level,
            })
        }
        _ => {}
    }
    let superseded = tx
        .state
        .badges
        .active_of(recipient, badge_type)
        .map(|held| held.id);

    let now = tx.now;
    let badges = &mut tx.state.badges;
    if let Some(previous) = superseded.and_then(|id| badges.rows.get_mut(id)) {
        previous.active = false;
    }
    let badge_id = badges.rows.insert_with(|id| Badge {
        id,
        recipient: recipient.clone(),
        badge_type,
        content_hash: content_hash.to_string(),
        level,
        active: true,
        awarded_at: now,
        transferable: Badge::TRANSFERABLE,
    });

    if let Some(previous) = superseded {
        tx.emit(EntityKind::Badge, previous, "superseded", Some(caller));
    }
    tx.emit(EntityKind::Badge, badge_id, "awarded", Some(caller));
    Ok(badge_id)
}

/// Handle to the badge table
#[derive(Debug, Clone)]
pub struct BadgeRegistry {
    ledger: Arc<Ledger>,
}

impl BadgeRegistry {
    /// Create a registry sharing the user registry's ledger
    pub fn new(users: &UserRegistry) -> Self {
        Self {
            ledger: users.ledger().clone(),
        }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Award a badge. Requires admin authority.
    pub async fn award(
        &self,
        caller: &AccountId,
        recipient: &AccountId,
        badge_type: BadgeType,
        content_hash: &str,
        level: u32,
    ) -> LedgerResult<BadgeId> {
        let badge_id = self
            .ledger
            .transact(|tx| award_in(tx, caller, recipient, badge_type, content_hash, level))
            .await?;

        info!(
            badge_id,
            recipient = %recipient,
            badge_type = ?badge_type,
            level,
            "Awarded badge"
        );
        Ok(badge_id)
    }

    /// Badges are soulbound. This always fails, before any lookup.
    pub fn transfer(
        &self,
        caller: &AccountId,
        badge_id: BadgeId,
        to: &AccountId,
    ) -> LedgerResult<Infallible> {
        warn!(badge_id, caller = %caller, to = %to, "Rejected soulbound badge transfer");
        Err(LedgerError::SoulboundTransferForbidden(badge_id))
    }

    /// Revoke an active badge. Requires admin authority.
    pub async fn revoke(&self, caller: &AccountId, badge_id: BadgeId) -> LedgerResult<()> {
        self.ledger
            .transact(|tx| {
                tx.require_admin(caller, "revoke badge")?;
                if !tx.state.badges.require(badge_id)?.active {
                    return Err(LedgerError::InvalidStateTransition {
                        entity: format!("badge {}", badge_id),
                        from_state: "Inactive".to_string(),
                        to_state: "Inactive".to_string(),
                    });
                }

                if let Some(badge) = tx.state.badges.rows.get_mut(badge_id) {
                    badge.active = false;
                }
                tx.emit(EntityKind::Badge, badge_id, "revoked", Some(caller));
                Ok(())
            })
            .await?;

        info!(badge_id, by = %caller, "Revoked badge");
        Ok(())
    }

    pub async fn get(&self, badge_id: BadgeId) -> LedgerResult<Badge> {
        self.ledger
            .read(|state| state.badges.require(badge_id).cloned())
            .await
    }

    /// Active badges of a recipient
    pub async fn held_by(&self, recipient: &AccountId) -> Vec<Badge> {
        self.ledger
            .read(|state| {
                state
                    .badges
                    .rows
                    .values()
                    .filter(|b| b.active && &b.recipient == recipient)
                    .cloned()
                    .collect()
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::SystemClock, config::PlatformConfig, models::Role};

    async fn setup() -> BadgeRegistry {
        let config = PlatformConfig::default().with_genesis_admin("root");
        let users = UserRegistry::new(Arc::new(Ledger::new(config, Arc::new(SystemClock))));
        users
            .register(&AccountId::from("agent"), "Ada Agent", "did:agent", Role::Agent)
            .await
            .unwrap();
        BadgeRegistry::new(&users)
    }

    #[tokio::test]
    async fn test_transfer_always_forbidden() {
        let badges = setup().await;
        let root = AccountId::from("root");
        let agent = AccountId::from("agent");
        let id = badges
            .award(&root, &agent, BadgeType::VerifiedAgent, "QmBadge", 1)
            .await
            .unwrap();

        let result = badges.transfer(&agent, id, &root);
        assert!(matches!(result, Err(LedgerError::SoulboundTransferForbidden(b)) if b == id));

        // Unknown badges fail the same way
        let missing = badges.transfer(&agent, 404, &root);
        assert!(matches!(missing, Err(LedgerError::SoulboundTransferForbidden(404))));

        let badge = badges.get(id).await.unwrap();
        assert_eq!(badge.recipient, agent);
        assert!(!badge.transferable);
    }

    #[tokio::test]
    async fn test_level_must_increase() {
        let badges = setup().await;
        let root = AccountId::from("root");
        let agent = AccountId::from("agent");

        let first = badges
            .award(&root, &agent, BadgeType::TrustedOwner, "QmL2", 2)
            .await
            .unwrap();

        let same = badges.award(&root, &agent, BadgeType::TrustedOwner, "QmL2", 2).await;
        assert!(matches!(same, Err(LedgerError::AlreadyHeld { level: 2, .. })));

        let lower = badges.award(&root, &agent, BadgeType::TrustedOwner, "QmL1", 1).await;
        assert!(matches!(
            lower,
            Err(LedgerError::BadgeLevelNotIncreasing { held: 2, requested: 1, .. })
        ));

        let upgraded = badges
            .award(&root, &agent, BadgeType::TrustedOwner, "QmL3", 3)
            .await
            .unwrap();
        assert!(!badges.get(first).await.unwrap().active);

        let held = badges.held_by(&agent).await;
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].id, upgraded);
    }

    #[tokio::test]
    async fn test_award_requires_admin_and_recipient() {
        let badges = setup().await;
        let agent = AccountId::from("agent");

        let denied = badges
            .award(&agent, &agent, BadgeType::EarlyAdopter, "Qm", 1)
            .await;
        assert!(matches!(denied, Err(LedgerError::Unauthorized(_))));

        let missing = badges
            .award(&AccountId::from("root"), &AccountId::from("ghost"), BadgeType::EarlyAdopter, "Qm", 1)
            .await;
        assert!(matches!(missing, Err(LedgerError::NotFound { .. })));

        let zero = badges
            .award(&AccountId::from("root"), &agent, BadgeType::EarlyAdopter, "Qm", 0)
            .await;
        assert!(matches!(zero, Err(LedgerError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_revoke() {
        let badges = setup().await;
        let root = AccountId::from("root");
        let agent = AccountId::from("agent");
        let id = badges
            .award(&root, &agent, BadgeType::HelpfulReviewer, "Qm", 1)
            .await
            .unwrap();

        badges.revoke(&root, id).await.unwrap();
        assert!(badges.held_by(&agent).await.is_empty());
        assert!(matches!(
            badges.revoke(&root, id).await,
            Err(LedgerError::InvalidStateTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_revoked_level_cannot_be_reissued() {
        let badges = setup().await;
        let root = AccountId::from("root");
        let agent = AccountId::from("agent");
        let id = badges
            .award(&root, &agent, BadgeType::VerifiedAgent, "QmL3", 3)
            .await
            .unwrap();
        badges.revoke(&root, id).await.unwrap();

        let same = badges.award(&root, &agent, BadgeType::VerifiedAgent, "QmL3", 3).await;
        assert!(matches!(same, Err(LedgerError::AlreadyHeld { level: 3, .. })));

        let lower = badges.award(&root, &agent, BadgeType::VerifiedAgent, "QmL1", 1).await;
        assert!(matches!(
            lower,
            Err(LedgerError::BadgeLevelNotIncreasing { held: 3, requested: 1, .. })
        ));
        assert!(badges.held_by(&agent).await.is_empty());

        let higher = badges
            .award(&root, &agent, BadgeType::VerifiedAgent, "QmL4", 4)
            .await
            .unwrap();
        assert_eq!(badges.held_by(&agent).await[0].id, higher);
    }
}
