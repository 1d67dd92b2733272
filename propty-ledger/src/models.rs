//! Core data models for the ledger
//!
//! This module contains the records stored in the ledger tables, the state
//! machines of properties, deals and disputes, and the derived statistics
//! handed to dashboards.

use crate::{error::LedgerError, LedgerResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub type PropertyId = u64;
pub type ReviewId = u64;
pub type BadgeId = u64;
pub type DealId = u64;
pub type DisputeId = u64;

/// Stable identifier of a participant (an address, a key, a login)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for AccountId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Participant role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Seeker,
    Owner,
    Agent,
    Admin,
}

impl Role {
    /// Roles allowed to list properties
    pub fn can_list(self) -> bool {
        matches!(self, Self::Owner | Self::Agent)
    }
}

/// Registered participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: AccountId,
    pub full_name: String,
    pub decentralized_id: String,
    pub role: Role,
    pub active: bool,
    pub registered_at: DateTime<Utc>,
    /// Registration order, starting at 1
    pub sequence: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    Residential,
    Commercial,
    Land,
    Industrial,
    MixedUse,
}

/// Listing lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyStatus {
    /// Open for offers
    Listed,
    /// Held back for moderation
    UnderReview,
    /// Locked by an open escrow deal
    InEscrow,
    /// Ownership moved to a buyer
    Sold,
    /// Withdrawn by the owner or by moderation
    Removed,
}

impl PropertyStatus {
    /// Check if this is a terminal state (no further transitions possible)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sold | Self::Removed)
    }

    /// Check if this state accepts a new escrow deal
    pub fn can_open_deal(&self) -> bool {
        matches!(self, Self::Listed)
    }
}

/// Property listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub id: PropertyId,
    pub owner: AccountId,
    pub property_type: PropertyType,
    pub location: String,
    /// Asking price in minor currency units
    pub price: u64,
    pub terms: String,
    pub content_hash: String,
    pub metadata_uri: String,
    pub status: PropertyStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Property {
    /// Validate a status change against the listing lifecycle.
    ///
    /// Listings only move forward, with two exceptions: an escrow that ends
    /// without a sale puts the property back on the market, and moderation
    /// can clear a listing it put under review.
    pub fn validate_transition(&self, to_status: PropertyStatus) -> LedgerResult<()> {
        let valid = matches!(
            (self.status, to_status),
            (PropertyStatus::Listed, PropertyStatus::UnderReview)
                | (PropertyStatus::Listed, PropertyStatus::InEscrow)
                | (PropertyStatus::Listed, PropertyStatus::Removed)
                | (PropertyStatus::UnderReview, PropertyStatus::Listed)
                | (PropertyStatus::UnderReview, PropertyStatus::Removed)
                | (PropertyStatus::InEscrow, PropertyStatus::Sold)
                | (PropertyStatus::InEscrow, PropertyStatus::Listed)
        );

        if valid {
            Ok(())
        } else {
            Err(LedgerError::state_transition(
                format!("property {}", self.id),
                self.status,
                to_status,
            ))
        }
    }
}

/// Per-owner listing quota
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadQuota {
    pub owner: AccountId,
    /// Listings created against the free allowance
    pub free_uploads_used: u32,
    /// Set by the billing collaborator
    pub subscribed: bool,
}

impl UploadQuota {
    pub fn new(owner: AccountId) -> Self {
        Self {
            owner,
            free_uploads_used: 0,
            subscribed: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewType {
    Resident,
    Tenant,
    Community,
    Visitor,
}

/// Property review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub id: ReviewId,
    pub property_id: PropertyId,
    pub reviewer: AccountId,
    pub review_type: ReviewType,
    pub content_hash: String,
    pub rating: u8,
    pub comment: String,
    /// Cleared by moderation; invalid reviews stay for audit
    pub valid: bool,
    pub helpful_votes: u32,
    pub created_at: DateTime<Utc>,
}

/// Aggregate rating of a property over its valid reviews
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RatingSummary {
    pub valid_reviews: u32,
    pub average: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BadgeType {
    TrustedOwner,
    VerifiedAgent,
    HelpfulReviewer,
    CommunityLeader,
    FirstTransaction,
    EarlyAdopter,
    TopRatedSeller,
}

/// Soulbound reputation badge.
///
/// The recipient is fixed at mint time. Nothing in the ledger rewrites it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Badge {
    pub id: BadgeId,
    pub recipient: AccountId,
    pub badge_type: BadgeType,
    pub content_hash: String,
    pub level: u32,
    pub active: bool,
    pub awarded_at: DateTime<Utc>,
    pub transferable: bool,
}

impl Badge {
    pub const TRANSFERABLE: bool = false;
}

/// Escrow deal state machine enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealState {
    /// Deal opened, property locked, no funds yet
    Created,
    /// Buyer funds held in escrow
    Funded,
    /// Buyer inspecting, deadline running
    InspectionPeriod,
    /// Ownership moved to buyer, funds released to seller
    Completed,
    /// Under arbitration
    Disputed,
    /// Funds returned to buyer
    Refunded,
    /// Closed before any funds moved
    Cancelled,
}

impl DealState {
    /// Check if this is a terminal state (no further transitions possible)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Refunded | Self::Cancelled)
    }

    /// Check if this state allows disputes
    pub fn can_dispute(&self) -> bool {
        matches!(self, Self::Created | Self::Funded | Self::InspectionPeriod)
    }

    /// Check if this state allows refunds
    pub fn can_refund(&self) -> bool {
        matches!(self, Self::Funded | Self::InspectionPeriod)
    }
}

/// Escrow deal between a buyer and a seller over one property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscrowDeal {
    pub id: DealId,
    pub property_id: PropertyId,
    pub buyer: AccountId,
    pub seller: AccountId,
    pub amount: u64,
    pub state: DealState,

    // Two-phase acknowledgements
    pub buyer_confirmed: bool,
    pub seller_confirmed: bool,
    pub buyer_cancel_requested: bool,
    pub seller_cancel_requested: bool,

    // Escrow progress
    pub funded_at: Option<DateTime<Utc>>,
    pub inspection_deadline: Option<DateTime<Utc>>,
    pub disputed_from: Option<DealState>,
    pub dispute_reason: Option<String>,

    // Timestamps
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EscrowDeal {
    /// Create a new deal in the `Created` state
    pub fn new(
        id: DealId,
        property_id: PropertyId,
        buyer: AccountId,
        seller: AccountId,
        amount: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            property_id,
            buyer,
            seller,
            amount,
            state: DealState::Created,
            buyer_confirmed: false,
            seller_confirmed: false,
            buyer_cancel_requested: false,
            seller_cancel_requested: false,
            funded_at: None,
            inspection_deadline: None,
            disputed_from: None,
            dispute_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_party(&self, account: &AccountId) -> bool {
        &self.buyer == account || &self.seller == account
    }

    pub fn is_funded(&self) -> bool {
        self.funded_at.is_some()
    }

    pub fn both_confirmed(&self) -> bool {
        self.buyer_confirmed && self.seller_confirmed
    }

    pub fn cancellation_agreed(&self) -> bool {
        self.buyer_cancel_requested && self.seller_cancel_requested
    }

    /// Whether the inspection window is over at `now`
    pub fn deadline_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.state == DealState::InspectionPeriod
            && self.inspection_deadline.is_some_and(|deadline| now >= deadline)
    }

    /// Validate a state transition
    pub fn validate_transition(&self, to_state: DealState) -> LedgerResult<()> {
        let valid = match (self.state, to_state) {
            (DealState::Created, DealState::Funded) => true,
            (DealState::Created, DealState::Cancelled) => true,
            (DealState::Created, DealState::Disputed) => true,
            (DealState::Funded, DealState::InspectionPeriod) => true,
            (DealState::Funded, DealState::Refunded) => true,
            (DealState::Funded, DealState::Disputed) => true,
            (DealState::InspectionPeriod, DealState::Completed) => true,
            (DealState::InspectionPeriod, DealState::Refunded) => true,
            (DealState::InspectionPeriod, DealState::Disputed) => true,
            (DealState::Disputed, DealState::Completed) => self.is_funded(),
            (DealState::Disputed, DealState::Refunded) => true,
            (DealState::Disputed, DealState::Cancelled) => !self.is_funded(),
            // Rejected disputes put the deal back where it was
            (DealState::Disputed, restored) => self.disputed_from == Some(restored),
            _ => false,
        };

        if valid {
            Ok(())
        } else {
            Err(LedgerError::state_transition(
                format!("deal {}", self.id),
                self.state,
                to_state,
            ))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeType {
    PropertyDispute,
    TransactionDispute,
    ReviewDispute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeStatus {
    Open,
    UnderReview,
    Resolved,
}

/// Dispute resolution enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Not adjudicated yet
    None,
    FavorComplainant,
    FavorRespondent,
    Rejected,
}

/// Dispute raised against a property, a deal or a review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dispute {
    pub id: DisputeId,
    pub dispute_type: DisputeType,
    pub complainant: AccountId,
    pub respondent: AccountId,
    pub related_entity_id: u64,
    pub evidence_hash: String,
    pub status: DisputeStatus,
    pub resolution: Resolution,
    pub resolved_by: Option<AccountId>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Dispute {
    /// Party favored by a resolution, if any
    pub fn favored_party(&self, resolution: Resolution) -> Option<&AccountId> {
        match resolution {
            Resolution::FavorComplainant => Some(&self.complainant),
            Resolution::FavorRespondent => Some(&self.respondent),
            Resolution::Rejected | Resolution::None => None,
        }
    }
}

/// Platform statistics, always derived from the ledger tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlatformStats {
    pub total_users: u64,
    pub active_users: u64,
    pub total_properties: u64,
    pub active_listings: u64,
    pub total_reviews: u64,
    pub valid_reviews: u64,
    pub total_badges: u64,
    pub total_deals: u64,
    pub completed_deals: u64,
    /// Sum of completed deal amounts
    pub total_volume: u64,
    /// Funds currently held in escrow
    pub escrow_held: u64,
    pub total_disputes_open: u64,
    pub total_disputes_resolved: u64,
}

/// Kind of entity a ledger event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    User,
    Property,
    UploadQuota,
    Review,
    Badge,
    Deal,
    Dispute,
}

/// Observable record of one successful mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub id: Uuid,
    /// Position in the event log, starting at 1
    pub sequence: u64,
    pub entity_kind: EntityKind,
    pub entity_id: String,
    pub operation: String,
    pub actor: Option<AccountId>,
    pub timestamp: DateTime<Utc>,
}
