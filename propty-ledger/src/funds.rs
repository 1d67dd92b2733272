//! Funds Ledger - Balance transitions behind escrow deals
//!
//! Escrow money never leaves the ledger: funding moves an amount into the
//! escrow hold, and settlement moves it out again to the seller (release) or
//! back to the buyer (refund). Each settlement is kept for audit.

use crate::{
    error::LedgerError,
    models::{AccountId, DealId},
    LedgerResult,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Direction of a settlement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementKind {
    /// Held funds paid to the seller
    Release,
    /// Held funds returned to the buyer
    Refund,
}

/// Settlement record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub deal_id: DealId,
    pub kind: SettlementKind,
    pub to: AccountId,
    pub amount: u64,
    pub settled_at: DateTime<Utc>,
}

/// Escrow hold plus released balances per account
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FundsLedger {
    held: u64,
    balances: BTreeMap<AccountId, u64>,
    settlements: Vec<Settlement>,
}

impl FundsLedger {
    /// Check that `amount` can enter the hold without overflow
    pub(crate) fn ensure_can_hold(&self, amount: u64) -> LedgerResult<()> {
        self.held
            .checked_add(amount)
            .map(|_| ())
            .ok_or_else(|| LedgerError::invalid_input("escrow hold would overflow"))
    }

    /// Check that a settlement of `amount` is covered by the hold and
    /// cannot overflow the recipient balance
    pub(crate) fn ensure_can_settle(&self, to: &AccountId, amount: u64) -> LedgerResult<()> {
        if amount > self.held {
            return Err(LedgerError::invalid_input(format!(
                "settlement of {} exceeds escrow hold {}",
                amount, self.held
            )));
        }

        self.balance_of(to)
            .checked_add(amount)
            .map(|_| ())
            .ok_or_else(|| LedgerError::invalid_input(format!("balance of {} would overflow", to)))
    }

    /// Move funds into the hold. Callers check [`Self::ensure_can_hold`] first.
    pub(crate) fn hold(&mut self, amount: u64) {
        self.held = self.held.saturating_add(amount);
    }

    /// Move held funds to an account. Callers check
    /// [`Self::ensure_can_settle`] first.
    pub(crate) fn settle(
        &mut self,
        deal_id: DealId,
        kind: SettlementKind,
        to: &AccountId,
        amount: u64,
        at: DateTime<Utc>,
    ) {
        self.held = self.held.saturating_sub(amount);
        let balance = self.balances.entry(to.clone()).or_default();
        *balance = balance.saturating_add(amount);
        self.settlements.push(Settlement {
            deal_id,
            kind,
            to: to.clone(),
            amount,
            settled_at: at,
        });
    }

    pub fn held(&self) -> u64 {
        self.held
    }

    pub fn balance_of(&self, account: &AccountId) -> u64 {
        self.balances.get(account).copied().unwrap_or(0)
    }

    pub fn settlements(&self) -> &[Settlement] {
        &self.settlements
    }

    pub fn settlements_for(&self, deal_id: DealId) -> Vec<Settlement> {
        self.settlements
            .iter()
            .filter(|s| s.deal_id == deal_id)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hold_then_release() {
        let mut funds = FundsLedger::default();
        let seller = AccountId::from("seller");

        funds.ensure_can_hold(500).unwrap();
        funds.hold(500);
        funds.ensure_can_settle(&seller, 500).unwrap();
        funds.settle(1, SettlementKind::Release, &seller, 500, Utc::now());

        assert_eq!(funds.held(), 0);
        assert_eq!(funds.balance_of(&seller), 500);
        assert_eq!(funds.settlements_for(1).len(), 1);
    }

    #[test]
    fn test_settlement_cannot_exceed_hold() {
        let mut funds = FundsLedger::default();
        funds.hold(100);
        let err = funds
            .ensure_can_settle(&AccountId::from("buyer"), 101)
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInput(_)));
        assert_eq!(funds.held(), 100);
    }

    #[test]
    fn test_hold_overflow_is_rejected() {
        let mut funds = FundsLedger::default();
        funds.hold(u64::MAX);
        assert!(funds.ensure_can_hold(1).is_err());
    }
}
