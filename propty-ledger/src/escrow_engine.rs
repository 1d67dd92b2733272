//! Escrow Engine - Multi-party escrow deals over listed properties
//!
//! A deal locks a property, takes the buyer's funds into the escrow hold,
//! runs an inspection window and then either completes (ownership to the
//! buyer, funds to the seller) or unwinds (funds back to the buyer,
//! property back on the market). Every transition touches the deal, the
//! property and the funds ledger inside one ledger transaction.

use crate::{
    error::LedgerError,
    funds::{Settlement, SettlementKind},
    ledger::{Ledger, Table, Tx},
    models::{AccountId, DealId, DealState, EntityKind, EscrowDeal, PropertyId, PropertyStatus},
    property_registry::{move_status_in, transfer_ownership_in, PropertyRegistry},
    user_registry::UserRegistry,
    LedgerResult,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DealTable {
    pub(crate) rows: Table<EscrowDeal>,
}

impl DealTable {
    pub(crate) fn require(&self, id: DealId) -> LedgerResult<&EscrowDeal> {
        self.rows
            .get(id)
            .ok_or_else(|| LedgerError::not_found("deal", id))
    }
}

/// Deal is not in a state that allows `action`
fn not_in_state(deal: &EscrowDeal, action: &str) -> LedgerError {
    LedgerError::InvalidStateTransition {
        entity: format!("deal {}", deal.id),
        from_state: format!("{:?}", deal.state),
        to_state: action.to_string(),
    }
}

fn require_party(deal: &EscrowDeal, caller: &AccountId, action: &str) -> LedgerResult<()> {
    if deal.is_party(caller) {
        Ok(())
    } else {
        Err(LedgerError::unauthorized(format!(
            "{} is not a party to deal {} and cannot {}",
            caller, deal.id, action
        )))
    }
}

fn require_party_or_admin(
    tx: &Tx<'_>,
    deal: &EscrowDeal,
    caller: &AccountId,
    action: &str,
) -> LedgerResult<()> {
    if deal.is_party(caller) || tx.has_admin_authority(caller) {
        Ok(())
    } else {
        Err(LedgerError::unauthorized(format!(
            "{} cannot {} deal {}",
            caller, action, deal.id
        )))
    }
}

fn inspection_deadline(now: DateTime<Utc>, period_secs: u64) -> LedgerResult<DateTime<Utc>> {
    i64::try_from(period_secs)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|period| now.checked_add_signed(period))
        .ok_or_else(|| {
            LedgerError::config(format!(
                "escrow.inspection_period_secs {} is out of range",
                period_secs
            ))
        })
}

fn set_state(
    tx: &mut Tx<'_>,
    deal_id: DealId,
    to_state: DealState,
    actor: &AccountId,
    operation: &'static str,
) {
    let now = tx.now;
    if let Some(deal) = tx.state.deals.rows.get_mut(deal_id) {
        deal.state = to_state;
        deal.updated_at = now;
    }
    tx.emit(EntityKind::Deal, deal_id, operation, Some(actor));
}

fn open_in(
    tx: &mut Tx<'_>,
    caller: &AccountId,
    property_id: PropertyId,
    buyer: &AccountId,
    seller: &AccountId,
    amount: u64,
) -> LedgerResult<DealId> {
    if caller != buyer && caller != seller && !tx.has_admin_authority(caller) {
        return Err(LedgerError::unauthorized(format!(
            "{} must be the buyer, the seller or an admin to open a deal",
            caller
        )));
    }
    if buyer == seller {
        return Err(LedgerError::invalid_input("buyer and seller must differ"));
    }

    tx.state.users.require_active(buyer)?;
    tx.state.users.require_active(seller)?;

    let property = tx.state.properties.require(property_id)?;
    if &property.owner != seller {
        return Err(LedgerError::unauthorized(format!(
            "{} does not own property {}",
            seller, property_id
        )));
    }
    property.validate_transition(PropertyStatus::InEscrow)?;

    let min_amount = tx.config.escrow.min_deal_amount.max(1);
    if amount < min_amount {
        return Err(LedgerError::invalid_input(format!(
            "deal amount {} is below the minimum {}",
            amount, min_amount
        )));
    }

    let now = tx.now;
    let deal_id = tx.state.deals.rows.insert_with(|id| {
        EscrowDeal::new(id, property_id, buyer.clone(), seller.clone(), amount, now)
    });
    tx.emit(EntityKind::Deal, deal_id, "opened", Some(caller));
    move_status_in(tx, property_id, PropertyStatus::InEscrow, Some(caller))?;
    Ok(deal_id)
}

fn fund_in(tx: &mut Tx<'_>, caller: &AccountId, deal_id: DealId, amount: u64) -> LedgerResult<()> {
    let deal = tx.state.deals.require(deal_id)?;
    if &deal.buyer != caller {
        return Err(LedgerError::unauthorized(format!(
            "only the buyer can fund deal {}",
            deal_id
        )));
    }
    if deal.is_funded() {
        return Err(LedgerError::AlreadyFunded(deal_id));
    }
    if deal.state != DealState::Created {
        return Err(LedgerError::state_transition(
            format!("deal {}", deal_id),
            deal.state,
            DealState::Funded,
        ));
    }
    if amount != deal.amount {
        return Err(LedgerError::AmountMismatch {
            expected: deal.amount,
            actual: amount,
        });
    }
    tx.state.funds.ensure_can_hold(amount)?;

    let now = tx.now;
    tx.state.funds.hold(amount);
    if let Some(deal) = tx.state.deals.rows.get_mut(deal_id) {
        deal.funded_at = Some(now);
    }
    set_state(tx, deal_id, DealState::Funded, caller, "funded");
    Ok(())
}

fn advance_in(tx: &mut Tx<'_>, caller: &AccountId, deal_id: DealId) -> LedgerResult<DateTime<Utc>> {
    let deal = tx.state.deals.require(deal_id)?;
    require_party_or_admin(tx, deal, caller, "start inspection on")?;
    deal.validate_transition(DealState::InspectionPeriod)?;

    let deadline = inspection_deadline(tx.now, tx.config.escrow.inspection_period_secs)?;
    if let Some(deal) = tx.state.deals.rows.get_mut(deal_id) {
        deal.inspection_deadline = Some(deadline);
    }
    set_state(tx, deal_id, DealState::InspectionPeriod, caller, "inspection_started");
    Ok(deadline)
}

fn confirm_in(tx: &mut Tx<'_>, caller: &AccountId, deal_id: DealId) -> LedgerResult<()> {
    let deal = tx.state.deals.require(deal_id)?;
    require_party(deal, caller, "confirm")?;
    if deal.state != DealState::InspectionPeriod {
        return Err(not_in_state(deal, "Confirmed"));
    }
    if deal.deadline_elapsed(tx.now) {
        return Err(LedgerError::DeadlineElapsed(deal_id));
    }

    let is_buyer = &deal.buyer == caller;
    let already = if is_buyer {
        deal.buyer_confirmed
    } else {
        deal.seller_confirmed
    };
    if already {
        return Ok(());
    }

    let now = tx.now;
    if let Some(deal) = tx.state.deals.rows.get_mut(deal_id) {
        if is_buyer {
            deal.buyer_confirmed = true;
        } else {
            deal.seller_confirmed = true;
        }
        deal.updated_at = now;
    }
    tx.emit(EntityKind::Deal, deal_id, "confirmed", Some(caller));
    Ok(())
}

fn request_cancellation_in(tx: &mut Tx<'_>, caller: &AccountId, deal_id: DealId) -> LedgerResult<()> {
    let deal = tx.state.deals.require(deal_id)?;
    require_party(deal, caller, "request cancellation of")?;
    if !deal.state.can_refund() {
        return Err(not_in_state(deal, "CancellationRequested"));
    }

    let is_buyer = &deal.buyer == caller;
    let now = tx.now;
    if let Some(deal) = tx.state.deals.rows.get_mut(deal_id) {
        if is_buyer {
            deal.buyer_cancel_requested = true;
        } else {
            deal.seller_cancel_requested = true;
        }
        deal.updated_at = now;
    }
    tx.emit(EntityKind::Deal, deal_id, "cancellation_requested", Some(caller));
    Ok(())
}

/// Complete a deal: ownership to the buyer, held funds to the seller.
/// Authorization is checked by the caller of this function.
pub(crate) fn complete_in(tx: &mut Tx<'_>, deal_id: DealId, actor: &AccountId) -> LedgerResult<()> {
    let deal = tx.state.deals.require(deal_id)?;
    deal.validate_transition(DealState::Completed)?;
    let (property_id, buyer, seller, amount) = (
        deal.property_id,
        deal.buyer.clone(),
        deal.seller.clone(),
        deal.amount,
    );
    tx.state
        .properties
        .require(property_id)?
        .validate_transition(PropertyStatus::Sold)?;
    tx.state.funds.ensure_can_settle(&seller, amount)?;

    transfer_ownership_in(tx, property_id, &buyer)?;
    move_status_in(tx, property_id, PropertyStatus::Sold, Some(actor))?;
    let now = tx.now;
    tx.state
        .funds
        .settle(deal_id, SettlementKind::Release, &seller, amount, now);
    set_state(tx, deal_id, DealState::Completed, actor, "completed");
    Ok(())
}

/// Refund a deal: held funds (if any) to the buyer, property back on the
/// market. Authorization is checked by the caller of this function.
pub(crate) fn refund_in(tx: &mut Tx<'_>, deal_id: DealId, actor: &AccountId) -> LedgerResult<()> {
    let deal = tx.state.deals.require(deal_id)?;
    deal.validate_transition(DealState::Refunded)?;
    let (property_id, buyer, amount, funded) = (
        deal.property_id,
        deal.buyer.clone(),
        deal.amount,
        deal.is_funded(),
    );
    tx.state
        .properties
        .require(property_id)?
        .validate_transition(PropertyStatus::Listed)?;
    if funded {
        tx.state.funds.ensure_can_settle(&buyer, amount)?;
    }

    move_status_in(tx, property_id, PropertyStatus::Listed, Some(actor))?;
    if funded {
        let now = tx.now;
        tx.state
            .funds
            .settle(deal_id, SettlementKind::Refund, &buyer, amount, now);
    }
    set_state(tx, deal_id, DealState::Refunded, actor, "refunded");
    Ok(())
}

/// Close an unfunded deal and release the property
pub(crate) fn cancel_in(tx: &mut Tx<'_>, deal_id: DealId, actor: &AccountId) -> LedgerResult<()> {
    let deal = tx.state.deals.require(deal_id)?;
    deal.validate_transition(DealState::Cancelled)?;
    let property_id = deal.property_id;
    tx.state
        .properties
        .require(property_id)?
        .validate_transition(PropertyStatus::Listed)?;

    move_status_in(tx, property_id, PropertyStatus::Listed, Some(actor))?;
    set_state(tx, deal_id, DealState::Cancelled, actor, "cancelled");
    Ok(())
}

/// Put a deal under dispute, remembering where it was
pub(crate) fn dispute_in(
    tx: &mut Tx<'_>,
    deal_id: DealId,
    actor: &AccountId,
    reason: &str,
) -> LedgerResult<()> {
    let deal = tx.state.deals.require(deal_id)?;
    deal.validate_transition(DealState::Disputed)?;
    let from_state = deal.state;

    if let Some(deal) = tx.state.deals.rows.get_mut(deal_id) {
        deal.disputed_from = Some(from_state);
        deal.dispute_reason = Some(reason.to_string());
    }
    set_state(tx, deal_id, DealState::Disputed, actor, "disputed");
    Ok(())
}

/// Return a disputed deal to the state it was disputed from
pub(crate) fn restore_in(tx: &mut Tx<'_>, deal_id: DealId, actor: &AccountId) -> LedgerResult<()> {
    let deal = tx.state.deals.require(deal_id)?;
    let restored = deal.disputed_from.ok_or_else(|| not_in_state(deal, "Restored"))?;
    deal.validate_transition(restored)?;

    if let Some(deal) = tx.state.deals.rows.get_mut(deal_id) {
        deal.disputed_from = None;
        deal.dispute_reason = None;
    }
    set_state(tx, deal_id, restored, actor, "restored");
    Ok(())
}

/// Handle to the deal table and escrow funds
#[derive(Debug, Clone)]
pub struct EscrowEngine {
    ledger: Arc<Ledger>,
}

impl EscrowEngine {
    /// Create an engine sharing the ledger of its dependencies
    pub fn new(users: &UserRegistry, properties: &PropertyRegistry) -> Self {
        debug_assert!(Arc::ptr_eq(users.ledger(), properties.ledger()));
        Self {
            ledger: properties.ledger().clone(),
        }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Open a deal and lock the property
    pub async fn open(
        &self,
        caller: &AccountId,
        property_id: PropertyId,
        buyer: &AccountId,
        seller: &AccountId,
        amount: u64,
    ) -> LedgerResult<DealId> {
        let deal_id = self
            .ledger
            .transact(|tx| open_in(tx, caller, property_id, buyer, seller, amount))
            .await?;

        info!(
            "Opened deal {} on property {} ({} -> {}, amount {})",
            deal_id, property_id, seller, buyer, amount
        );
        Ok(deal_id)
    }

    /// Move the buyer's funds into escrow
    pub async fn fund(&self, caller: &AccountId, deal_id: DealId, amount: u64) -> LedgerResult<()> {
        let result = self
            .ledger
            .transact(|tx| fund_in(tx, caller, deal_id, amount))
            .await;

        match &result {
            Ok(()) => info!("Funded deal {} with {}", deal_id, amount),
            Err(err @ (LedgerError::AlreadyFunded(_) | LedgerError::AmountMismatch { .. })) => {
                warn!(deal_id, error = %err, "Rejected funding")
            }
            Err(_) => {}
        }

        result
    }

    /// Start the inspection window, returning its deadline
    pub async fn advance_to_inspection(
        &self,
        caller: &AccountId,
        deal_id: DealId,
    ) -> LedgerResult<DateTime<Utc>> {
        let deadline = self
            .ledger
            .transact(|tx| advance_in(tx, caller, deal_id))
            .await?;

        info!("Deal {} in inspection until {}", deal_id, deadline);
        Ok(deadline)
    }

    /// Acknowledge the deal as one of its parties
    pub async fn confirm(&self, caller: &AccountId, deal_id: DealId) -> LedgerResult<()> {
        self.ledger
            .transact(|tx| confirm_in(tx, caller, deal_id))
            .await?;

        info!(deal_id, party = %caller, "Deal confirmed");
        Ok(())
    }

    /// Settle the deal. Needs both confirmations unless the caller is an admin.
    pub async fn complete(&self, caller: &AccountId, deal_id: DealId) -> LedgerResult<()> {
        self.ledger
            .transact(|tx| {
                let deal = tx.state.deals.require(deal_id)?;
                require_party_or_admin(tx, deal, caller, "complete")?;
                if deal.state != DealState::InspectionPeriod {
                    return Err(LedgerError::state_transition(
                        format!("deal {}", deal_id),
                        deal.state,
                        DealState::Completed,
                    ));
                }
                if !deal.both_confirmed() && !tx.has_admin_authority(caller) {
                    return Err(LedgerError::missing_confirmation(format!(
                        "deal {} needs confirmation from both buyer and seller",
                        deal_id
                    )));
                }
                complete_in(tx, deal_id, caller)
            })
            .await?;

        info!("Completed deal {}", deal_id);
        Ok(())
    }

    /// Record the caller's wish to unwind a funded deal
    pub async fn request_cancellation(&self, caller: &AccountId, deal_id: DealId) -> LedgerResult<()> {
        self.ledger
            .transact(|tx| request_cancellation_in(tx, caller, deal_id))
            .await?;

        info!(deal_id, party = %caller, "Cancellation requested");
        Ok(())
    }

    /// Return held funds to the buyer
    pub async fn refund(&self, caller: &AccountId, deal_id: DealId) -> LedgerResult<()> {
        self.ledger
            .transact(|tx| {
                let deal = tx.state.deals.require(deal_id)?;
                require_party_or_admin(tx, deal, caller, "refund")?;
                if !deal.state.can_refund() {
                    return Err(LedgerError::state_transition(
                        format!("deal {}", deal_id),
                        deal.state,
                        DealState::Refunded,
                    ));
                }

                let allowed = deal.deadline_elapsed(tx.now)
                    || deal.cancellation_agreed()
                    || tx.has_admin_authority(caller);
                if !allowed {
                    return Err(LedgerError::missing_confirmation(format!(
                        "deal {} can only be refunded after the inspection deadline or with both parties' agreement",
                        deal_id
                    )));
                }
                refund_in(tx, deal_id, caller)
            })
            .await?;

        info!("Refunded deal {}", deal_id);
        Ok(())
    }

    /// Close a deal that was never funded
    pub async fn cancel(&self, caller: &AccountId, deal_id: DealId) -> LedgerResult<()> {
        self.ledger
            .transact(|tx| {
                let deal = tx.state.deals.require(deal_id)?;
                require_party_or_admin(tx, deal, caller, "cancel")?;
                if deal.state != DealState::Created {
                    return Err(LedgerError::state_transition(
                        format!("deal {}", deal_id),
                        deal.state,
                        DealState::Cancelled,
                    ));
                }
                cancel_in(tx, deal_id, caller)
            })
            .await?;

        info!("Cancelled deal {}", deal_id);
        Ok(())
    }

    /// Freeze the deal pending arbitration
    pub async fn raise_dispute(
        &self,
        caller: &AccountId,
        deal_id: DealId,
        reason: &str,
    ) -> LedgerResult<()> {
        self.ledger
            .transact(|tx| {
                let deal = tx.state.deals.require(deal_id)?;
                require_party_or_admin(tx, deal, caller, "dispute")?;
                tx.validator().text("reason", reason)?;
                dispute_in(tx, deal_id, caller, reason)
            })
            .await?;

        warn!(deal_id, by = %caller, reason, "Deal disputed");
        Ok(())
    }

    pub async fn get(&self, deal_id: DealId) -> LedgerResult<EscrowDeal> {
        debug!(deal_id, "Getting deal");
        self.ledger
            .read(|state| state.deals.require(deal_id).cloned())
            .await
    }

    /// Released credit of an account
    pub async fn balance_of(&self, account: &AccountId) -> u64 {
        self.ledger.read(|state| state.funds.balance_of(account)).await
    }

    /// Total currently held in escrow
    pub async fn escrow_held(&self) -> u64 {
        self.ledger.read(|state| state.funds.held()).await
    }

    pub async fn settlements(&self, deal_id: DealId) -> Vec<Settlement> {
        self.ledger
            .read(|state| state.funds.settlements_for(deal_id))
            .await
    }
}
