//! User Registry - Participant records and authorization predicates
//!
//! Every other registry asks this one whether a caller exists, is active and
//! holds a role. A user record is created once per identifier and can only
//! ever be deactivated, never deleted or re-registered.

use crate::{
    error::LedgerError,
    ledger::{Ledger, Tx},
    models::{AccountId, EntityKind, Role, User},
    LedgerResult,
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, info, warn};

/// Users keyed by identifier
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserTable {
    pub(crate) last_sequence: u64,
    pub(crate) rows: BTreeMap<AccountId, User>,
}

impl UserTable {
    pub fn get(&self, id: &AccountId) -> Option<&User> {
        self.rows.get(id)
    }

    pub fn is_active(&self, id: &AccountId) -> bool {
        self.rows.get(id).is_some_and(|u| u.active)
    }

    pub fn is_active_with_role(&self, id: &AccountId, role: Role) -> bool {
        self.rows.get(id).is_some_and(|u| u.active && u.role == role)
    }

    /// Registered user, `NotFound` otherwise
    pub(crate) fn require(&self, id: &AccountId) -> LedgerResult<&User> {
        self.rows
            .get(id)
            .ok_or_else(|| LedgerError::not_found("user", id))
    }

    /// Registered and active user, `NotFound` or `Unauthorized` otherwise
    pub(crate) fn require_active(&self, id: &AccountId) -> LedgerResult<&User> {
        let user = self.require(id)?;
        if !user.active {
            return Err(LedgerError::unauthorized(format!(
                "user {} is deactivated",
                id
            )));
        }
        Ok(user)
    }

    /// Caller acting on its own behalf: unknown and inactive callers are
    /// both `Unauthorized`
    pub(crate) fn require_active_caller(&self, caller: &AccountId, action: &str) -> LedgerResult<&User> {
        match self.rows.get(caller) {
            Some(user) if user.active => Ok(user),
            Some(_) => Err(LedgerError::unauthorized(format!(
                "{} cannot {}: account is deactivated",
                caller, action
            ))),
            None => Err(LedgerError::unauthorized(format!(
                "{} cannot {}: account is not registered",
                caller, action
            ))),
        }
    }
}

pub(crate) fn register_in(
    tx: &mut Tx<'_>,
    caller: &AccountId,
    full_name: &str,
    decentralized_id: &str,
    role: Role,
) -> LedgerResult<AccountId> {
    if tx.state.users.rows.contains_key(caller) {
        return Err(LedgerError::AlreadyRegistered(caller.to_string()));
    }

    let validator = tx.validator();
    validator.name("full_name", full_name)?;
    validator.content_hash("decentralized_id", decentralized_id)?;

    if role == Role::Admin && !tx.config.is_genesis_admin(caller) {
        return Err(LedgerError::unauthorized(format!(
            "{} cannot self-register as admin",
            caller
        )));
    }

    let now = tx.now;
    let users = &mut tx.state.users;
    users.last_sequence += 1;
    let user = User {
        id: caller.clone(),
        full_name: full_name.to_string(),
        decentralized_id: decentralized_id.to_string(),
        role,
        active: true,
        registered_at: now,
        sequence: users.last_sequence,
    };
    users.rows.insert(caller.clone(), user);

    tx.emit(EntityKind::User, caller, "registered", Some(caller));
    Ok(caller.clone())
}

/// Handle to the user table
#[derive(Debug, Clone)]
pub struct UserRegistry {
    ledger: Arc<Ledger>,
}

impl UserRegistry {
    /// Create a registry over the shared ledger
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Register the caller
    pub async fn register(
        &self,
        caller: &AccountId,
        full_name: &str,
        decentralized_id: &str,
        role: Role,
    ) -> LedgerResult<AccountId> {
        let result = self
            .ledger
            .transact(|tx| register_in(tx, caller, full_name, decentralized_id, role))
            .await;

        match &result {
            Ok(id) => info!(user = %id, role = ?role, "Registered user"),
            Err(err @ (LedgerError::AlreadyRegistered(_) | LedgerError::Unauthorized(_))) => {
                warn!(user = %caller, error = %err, "Rejected registration")
            }
            Err(_) => {}
        }

        result
    }

    pub async fn get(&self, user_id: &AccountId) -> LedgerResult<User> {
        debug!(user = %user_id, "Getting user");
        self.ledger
            .read(|state| state.users.require(user_id).cloned())
            .await
    }

    pub async fn is_active(&self, user_id: &AccountId) -> bool {
        self.ledger.read(|state| state.users.is_active(user_id)).await
    }

    /// Whether the user is active and holds `role`
    pub async fn has_role(&self, user_id: &AccountId, role: Role) -> bool {
        self.ledger
            .read(|state| state.users.is_active_with_role(user_id, role))
            .await
    }

    /// Deactivate a user. Requires admin authority.
    pub async fn deactivate(&self, caller: &AccountId, user_id: &AccountId) -> LedgerResult<()> {
        let result = self
            .ledger
            .transact(|tx| {
                tx.require_admin(caller, "deactivate user")?;

                let user = tx.state.users.require(user_id)?;
                if !user.active {
                    return Err(LedgerError::InvalidStateTransition {
                        entity: format!("user {}", user_id),
                        from_state: "Deactivated".to_string(),
                        to_state: "Deactivated".to_string(),
                    });
                }

                if let Some(user) = tx.state.users.rows.get_mut(user_id) {
                    user.active = false;
                }
                tx.emit(EntityKind::User, user_id, "deactivated", Some(caller));
                Ok(())
            })
            .await;

        match &result {
            Ok(()) => info!(user = %user_id, by = %caller, "Deactivated user"),
            Err(err @ LedgerError::Unauthorized(_)) => {
                warn!(caller = %caller, error = %err, "Rejected deactivation")
            }
            Err(_) => {}
        }

        result
    }

    /// All users in registration order
    pub async fn list(&self) -> Vec<User> {
        self.ledger
            .read(|state| {
                let mut users: Vec<User> = state.users.rows.values().cloned().collect();
                users.sort_by_key(|u| u.sequence);
                users
            })
            .await
    }
}
