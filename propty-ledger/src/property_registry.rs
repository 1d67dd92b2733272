//! Property Registry - Listings, owner quotas and the listing lifecycle
//!
//! Owners and agents list properties against a free upload allowance; past
//! it a subscription is required. Public status moves are limited to
//! withdrawal and moderation. Escrow and sale states are reachable only
//! through the escrow engine, which uses the crate-private functions here.

use crate::{
    error::LedgerError,
    ledger::{Ledger, Table, Tx},
    models::{
        AccountId, EntityKind, Property, PropertyId, PropertyStatus, PropertyType, UploadQuota,
    },
    user_registry::UserRegistry,
    LedgerResult,
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, info, warn};

/// Listing details supplied by the owner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProperty {
    pub property_type: PropertyType,
    pub location: String,
    pub price: u64,
    #[serde(default)]
    pub terms: String,
    pub content_hash: String,
    #[serde(default)]
    pub metadata_uri: String,
}

/// Properties plus per-owner upload quotas
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PropertyTable {
    pub(crate) rows: Table<Property>,
    pub(crate) quotas: BTreeMap<AccountId, UploadQuota>,
}

impl PropertyTable {
    pub fn get(&self, id: PropertyId) -> Option<&Property> {
        self.rows.get(id)
    }

    pub(crate) fn require(&self, id: PropertyId) -> LedgerResult<&Property> {
        self.rows
            .get(id)
            .ok_or_else(|| LedgerError::not_found("property", id))
    }

    /// Quota of an owner, zero-valued if the owner never listed
    pub fn quota(&self, owner: &AccountId) -> UploadQuota {
        self.quotas
            .get(owner)
            .cloned()
            .unwrap_or_else(|| UploadQuota::new(owner.clone()))
    }
}

pub(crate) fn create_in(
    tx: &mut Tx<'_>,
    caller: &AccountId,
    listing: &NewProperty,
) -> LedgerResult<PropertyId> {
    let owner = tx.state.users.require_active_caller(caller, "list a property")?;
    if !owner.role.can_list() {
        return Err(LedgerError::unauthorized(format!(
            "{} has role {:?}, only owners and agents can list",
            caller, owner.role
        )));
    }

    let validator = tx.validator();
    validator.name("location", &listing.location)?;
    validator.text("terms", &listing.terms)?;
    validator.content_hash("content_hash", &listing.content_hash)?;
    validator.uri("metadata_uri", &listing.metadata_uri)?;

    if listing.price == 0 {
        return Err(LedgerError::invalid_input("price must be greater than 0"));
    }
    if listing.price > tx.config.properties.max_price {
        return Err(LedgerError::invalid_input(format!(
            "price {} exceeds maximum {}",
            listing.price, tx.config.properties.max_price
        )));
    }

    let limit = tx.config.properties.free_upload_limit;
    let mut quota = tx.state.properties.quota(caller);
    let uses_free_upload = quota.free_uploads_used < limit;
    if !uses_free_upload && !quota.subscribed {
        return Err(LedgerError::FreeUploadLimitReached {
            owner: caller.to_string(),
            limit,
        });
    }

    let now = tx.now;
    let properties = &mut tx.state.properties;
    let property_id = properties.rows.insert_with(|id| Property {
        id,
        owner: caller.clone(),
        property_type: listing.property_type,
        location: listing.location.clone(),
        price: listing.price,
        terms: listing.terms.clone(),
        content_hash: listing.content_hash.clone(),
        metadata_uri: listing.metadata_uri.clone(),
        status: PropertyStatus::Listed,
        created_at: now,
        updated_at: now,
    });
    if uses_free_upload {
        quota.free_uploads_used += 1;
    }
    properties.quotas.insert(caller.clone(), quota);

    tx.emit(EntityKind::Property, property_id, "listed", Some(caller));
    Ok(property_id)
}

/// Move a property through its lifecycle after validating the transition
pub(crate) fn move_status_in(
    tx: &mut Tx<'_>,
    property_id: PropertyId,
    to_status: PropertyStatus,
    actor: Option<&AccountId>,
) -> LedgerResult<()> {
    tx.state
        .properties
        .require(property_id)?
        .validate_transition(to_status)?;

    let now = tx.now;
    if let Some(property) = tx.state.properties.rows.get_mut(property_id) {
        property.status = to_status;
        property.updated_at = now;
    }

    let operation = match to_status {
        PropertyStatus::Listed => "relisted",
        PropertyStatus::UnderReview => "under_review",
        PropertyStatus::InEscrow => "escrow_locked",
        PropertyStatus::Sold => "sold",
        PropertyStatus::Removed => "removed",
    };
    tx.emit(EntityKind::Property, property_id, operation, actor);
    Ok(())
}

/// Hand a property to its buyer. Only escrow completion calls this.
pub(crate) fn transfer_ownership_in(
    tx: &mut Tx<'_>,
    property_id: PropertyId,
    new_owner: &AccountId,
) -> LedgerResult<()> {
    tx.state.properties.require(property_id)?;

    let now = tx.now;
    if let Some(property) = tx.state.properties.rows.get_mut(property_id) {
        property.owner = new_owner.clone();
        property.updated_at = now;
    }

    tx.emit(
        EntityKind::Property,
        property_id,
        "ownership_transferred",
        Some(new_owner),
    );
    Ok(())
}

pub(crate) fn set_status_in(
    tx: &mut Tx<'_>,
    caller: &AccountId,
    property_id: PropertyId,
    to_status: PropertyStatus,
) -> LedgerResult<()> {
    let property = tx.state.properties.require(property_id)?;
    let from_status = property.status;
    let is_owner = property.owner == *caller;
    let is_admin = tx.has_admin_authority(caller);

    let allowed = match (from_status, to_status) {
        (PropertyStatus::Listed, PropertyStatus::Removed) => is_owner || is_admin,
        (PropertyStatus::Listed, PropertyStatus::UnderReview)
        | (PropertyStatus::UnderReview, PropertyStatus::Listed)
        | (PropertyStatus::UnderReview, PropertyStatus::Removed) => is_admin,
        (from, to) => {
            return Err(LedgerError::state_transition(
                format!("property {}", property_id),
                from,
                to,
            ))
        }
    };

    if !allowed {
        return Err(LedgerError::unauthorized(format!(
            "{} cannot move property {} from {:?} to {:?}",
            caller, property_id, from_status, to_status
        )));
    }

    move_status_in(tx, property_id, to_status, Some(caller))
}

/// Handle to the property table
#[derive(Debug, Clone)]
pub struct PropertyRegistry {
    ledger: Arc<Ledger>,
    users: UserRegistry,
}

impl PropertyRegistry {
    /// Create a registry sharing the user registry's ledger
    pub fn new(users: &UserRegistry) -> Self {
        Self {
            ledger: users.ledger().clone(),
            users: users.clone(),
        }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn users(&self) -> &UserRegistry {
        &self.users
    }

    /// List a new property owned by the caller
    pub async fn create(&self, caller: &AccountId, listing: NewProperty) -> LedgerResult<PropertyId> {
        let result = self
            .ledger
            .transact(|tx| create_in(tx, caller, &listing))
            .await;

        match &result {
            Ok(id) => info!(
                property_id = id,
                owner = %caller,
                price = listing.price,
                "Listed property"
            ),
            Err(err @ (LedgerError::Unauthorized(_) | LedgerError::FreeUploadLimitReached { .. })) => {
                warn!(owner = %caller, error = %err, "Rejected listing")
            }
            Err(_) => {}
        }

        result
    }

    pub async fn get(&self, property_id: PropertyId) -> LedgerResult<Property> {
        debug!(property_id, "Getting property");
        self.ledger
            .read(|state| state.properties.require(property_id).cloned())
            .await
    }

    pub async fn list_by_owner(&self, owner: &AccountId) -> Vec<Property> {
        self.ledger
            .read(|state| {
                state
                    .properties
                    .rows
                    .values()
                    .filter(|p| &p.owner == owner)
                    .cloned()
                    .collect()
            })
            .await
    }

    pub async fn quota(&self, owner: &AccountId) -> UploadQuota {
        self.ledger.read(|state| state.properties.quota(owner)).await
    }

    /// Turn an owner's subscription on or off. Requires admin authority.
    pub async fn set_subscription(
        &self,
        caller: &AccountId,
        owner: &AccountId,
        active: bool,
    ) -> LedgerResult<()> {
        self.ledger
            .transact(|tx| {
                tx.require_admin(caller, "set subscription")?;
                tx.state.users.require(owner)?;

                let mut quota = tx.state.properties.quota(owner);
                quota.subscribed = active;
                tx.state.properties.quotas.insert(owner.clone(), quota);

                let operation = if active { "subscribed" } else { "unsubscribed" };
                tx.emit(EntityKind::UploadQuota, owner, operation, Some(caller));
                Ok(())
            })
            .await?;

        info!(owner = %owner, active, "Updated subscription");
        Ok(())
    }

    /// Withdraw or moderate a listing
    pub async fn set_status(
        &self,
        caller: &AccountId,
        property_id: PropertyId,
        status: PropertyStatus,
    ) -> LedgerResult<()> {
        let result = self
            .ledger
            .transact(|tx| set_status_in(tx, caller, property_id, status))
            .await;

        match &result {
            Ok(()) => info!(property_id, status = ?status, by = %caller, "Property status changed"),
            Err(err @ LedgerError::Unauthorized(_)) => {
                warn!(property_id, caller = %caller, error = %err, "Rejected status change")
            }
            Err(_) => {}
        }

        result
    }
}
