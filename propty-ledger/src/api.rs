//! Request/response envelope over the platform operations
//!
//! Requests are tagged JSON objects (`{"op": "fund_deal", ...}`) carrying the
//! caller identity explicitly. Failures come back as an [`ApiError`] holding
//! the error kind and a fixed user-facing message for it; internal detail
//! stays in the logs.

use crate::{
    admin_coordinator::NewDispute,
    error::{ErrorKind, LedgerError},
    models::{
        AccountId, Badge, BadgeId, BadgeType, DealId, Dispute, DisputeId, DisputeStatus,
        EscrowDeal, PlatformStats, Property, PropertyId, PropertyStatus, RatingSummary,
        Resolution, Review, ReviewId, Role, UploadQuota, User,
    },
    platform::Platform,
    property_registry::NewProperty,
    review_registry::NewReview,
    LedgerResult,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    // Users
    RegisterUser {
        caller: AccountId,
        full_name: String,
        decentralized_id: String,
        role: Role,
    },
    GetUser {
        user_id: AccountId,
    },
    ListUsers,
    DeactivateUser {
        caller: AccountId,
        user_id: AccountId,
    },

    // Properties
    CreateProperty {
        caller: AccountId,
        listing: NewProperty,
    },
    GetProperty {
        property_id: PropertyId,
    },
    ListPropertiesByOwner {
        owner: AccountId,
    },
    GetQuota {
        owner: AccountId,
    },
    SetSubscription {
        caller: AccountId,
        owner: AccountId,
        active: bool,
    },
    SetPropertyStatus {
        caller: AccountId,
        property_id: PropertyId,
        status: PropertyStatus,
    },

    // Reviews
    SubmitReview {
        caller: AccountId,
        review: NewReview,
    },
    GetReview {
        review_id: ReviewId,
    },
    ListReviews {
        property_id: PropertyId,
    },
    GetRating {
        property_id: PropertyId,
    },
    InvalidateReview {
        caller: AccountId,
        review_id: ReviewId,
    },
    MarkHelpful {
        caller: AccountId,
        review_id: ReviewId,
    },
    MostHelpful {
        property_id: PropertyId,
    },

    // Badges
    AwardBadge {
        caller: AccountId,
        recipient: AccountId,
        badge_type: BadgeType,
        content_hash: String,
        level: u32,
    },
    TransferBadge {
        caller: AccountId,
        badge_id: BadgeId,
        to: AccountId,
    },
    RevokeBadge {
        caller: AccountId,
        badge_id: BadgeId,
    },
    GetBadge {
        badge_id: BadgeId,
    },
    BadgesHeldBy {
        recipient: AccountId,
    },

    // Escrow
    OpenDeal {
        caller: AccountId,
        property_id: PropertyId,
        buyer: AccountId,
        seller: AccountId,
        amount: u64,
    },
    FundDeal {
        caller: AccountId,
        deal_id: DealId,
        amount: u64,
    },
    StartInspection {
        caller: AccountId,
        deal_id: DealId,
    },
    ConfirmDeal {
        caller: AccountId,
        deal_id: DealId,
    },
    CompleteDeal {
        caller: AccountId,
        deal_id: DealId,
    },
    RequestCancellation {
        caller: AccountId,
        deal_id: DealId,
    },
    RefundDeal {
        caller: AccountId,
        deal_id: DealId,
    },
    CancelDeal {
        caller: AccountId,
        deal_id: DealId,
    },
    RaiseDispute {
        caller: AccountId,
        deal_id: DealId,
        reason: String,
    },
    GetDeal {
        deal_id: DealId,
    },
    BalanceOf {
        account: AccountId,
    },

    // Administration
    CreateDispute {
        caller: AccountId,
        dispute: NewDispute,
    },
    BeginReview {
        caller: AccountId,
        dispute_id: DisputeId,
    },
    ResolveDispute {
        caller: AccountId,
        dispute_id: DisputeId,
        resolution: Resolution,
    },
    GetDispute {
        dispute_id: DisputeId,
    },
    ListDisputes {
        #[serde(default)]
        status: Option<DisputeStatus>,
    },
    GetPlatformStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Response {
    Account(AccountId),
    /// Id of a created record
    Id(u64),
    Deadline(DateTime<Utc>),
    Count(u32),
    User(User),
    Users(Vec<User>),
    Property(Property),
    Properties(Vec<Property>),
    Quota(UploadQuota),
    Review(Review),
    Reviews(Vec<Review>),
    MaybeReview(Option<Review>),
    Rating(RatingSummary),
    Badge(Badge),
    Badges(Vec<Badge>),
    Deal(EscrowDeal),
    Balance(u64),
    Dispute(Dispute),
    Disputes(Vec<Dispute>),
    Stats(PlatformStats),
}

/// Failure as seen by API callers
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        let kind = err.kind();
        Self {
            kind,
            message: kind.message().to_string(),
        }
    }
}

pub type ApiResult = Result<Response, ApiError>;

/// Answer an update with the id of the record it touched
fn updated(result: LedgerResult<()>, id: u64) -> LedgerResult<Response> {
    result.map(|()| Response::Id(id))
}

impl Platform {
    /// Execute one request
    pub async fn execute(&self, request: Request) -> ApiResult {
        debug!(?request, "Executing request");

        self.dispatch(request).await.map_err(|err| {
            warn!(error = %err, kind = ?err.kind(), "Request failed");
            ApiError::from(err)
        })
    }

    async fn dispatch(&self, request: Request) -> LedgerResult<Response> {
        let users = self.users();
        let properties = self.properties();
        let reviews = self.reviews();
        let badges = self.badges();
        let escrow = self.escrow();
        let admin = self.admin();

        match request {
            Request::RegisterUser {
                caller,
                full_name,
                decentralized_id,
                role,
            } => users
                .register(&caller, &full_name, &decentralized_id, role)
                .await
                .map(Response::Account),
            Request::GetUser { user_id } => users.get(&user_id).await.map(Response::User),
            Request::ListUsers => Ok(Response::Users(users.list().await)),
            Request::DeactivateUser { caller, user_id } => {
                users
                    .deactivate(&caller, &user_id)
                    .await
                    .map(|()| Response::Account(user_id))
            }

            Request::CreateProperty { caller, listing } => {
                properties.create(&caller, listing).await.map(Response::Id)
            }
            Request::GetProperty { property_id } => {
                properties.get(property_id).await.map(Response::Property)
            }
            Request::ListPropertiesByOwner { owner } => {
                Ok(Response::Properties(properties.list_by_owner(&owner).await))
            }
            Request::GetQuota { owner } => Ok(Response::Quota(properties.quota(&owner).await)),
            Request::SetSubscription {
                caller,
                owner,
                active,
            } => properties
                .set_subscription(&caller, &owner, active)
                .await
                .map(|()| Response::Account(owner)),
            Request::SetPropertyStatus {
                caller,
                property_id,
                status,
            } => updated(
                properties.set_status(&caller, property_id, status).await,
                property_id,
            ),

            Request::SubmitReview { caller, review } => {
                reviews.submit(&caller, review).await.map(Response::Id)
            }
            Request::GetReview { review_id } => reviews.get(review_id).await.map(Response::Review),
            Request::ListReviews { property_id } => {
                Ok(Response::Reviews(reviews.for_property(property_id).await))
            }
            Request::GetRating { property_id } => {
                reviews.rating(property_id).await.map(Response::Rating)
            }
            Request::InvalidateReview { caller, review_id } => {
                updated(reviews.invalidate(&caller, review_id).await, review_id)
            }
            Request::MarkHelpful { caller, review_id } => reviews
                .mark_helpful(&caller, review_id)
                .await
                .map(Response::Count),
            Request::MostHelpful { property_id } => Ok(Response::MaybeReview(
                reviews.most_helpful(property_id).await,
            )),

            Request::AwardBadge {
                caller,
                recipient,
                badge_type,
                content_hash,
                level,
            } => badges
                .award(&caller, &recipient, badge_type, &content_hash, level)
                .await
                .map(Response::Id),
            Request::TransferBadge {
                caller,
                badge_id,
                to,
            } => match badges.transfer(&caller, badge_id, &to) {
                Ok(never) => match never {},
                Err(err) => Err(err),
            },
            Request::RevokeBadge { caller, badge_id } => {
                updated(badges.revoke(&caller, badge_id).await, badge_id)
            }
            Request::GetBadge { badge_id } => badges.get(badge_id).await.map(Response::Badge),
            Request::BadgesHeldBy { recipient } => {
                Ok(Response::Badges(badges.held_by(&recipient).await))
            }

            Request::OpenDeal {
                caller,
                property_id,
                buyer,
                seller,
                amount,
            } => escrow
                .open(&caller, property_id, &buyer, &seller, amount)
                .await
                .map(Response::Id),
            Request::FundDeal {
                caller,
                deal_id,
                amount,
            } => updated(escrow.fund(&caller, deal_id, amount).await, deal_id),
            Request::StartInspection { caller, deal_id } => escrow
                .advance_to_inspection(&caller, deal_id)
                .await
                .map(Response::Deadline),
            Request::ConfirmDeal { caller, deal_id } => {
                updated(escrow.confirm(&caller, deal_id).await, deal_id)
            }
            Request::CompleteDeal { caller, deal_id } => {
                updated(escrow.complete(&caller, deal_id).await, deal_id)
            }
            Request::RequestCancellation { caller, deal_id } => {
                updated(escrow.request_cancellation(&caller, deal_id).await, deal_id)
            }
            Request::RefundDeal { caller, deal_id } => {
                updated(escrow.refund(&caller, deal_id).await, deal_id)
            }
            Request::CancelDeal { caller, deal_id } => {
                updated(escrow.cancel(&caller, deal_id).await, deal_id)
            }
            Request::RaiseDispute {
                caller,
                deal_id,
                reason,
            } => updated(escrow.raise_dispute(&caller, deal_id, &reason).await, deal_id),
            Request::GetDeal { deal_id } => escrow.get(deal_id).await.map(Response::Deal),
            Request::BalanceOf { account } => Ok(Response::Balance(escrow.balance_of(&account).await)),

            Request::CreateDispute { caller, dispute } => admin
                .create_dispute(&caller, dispute)
                .await
                .map(Response::Id),
            Request::BeginReview { caller, dispute_id } => {
                updated(admin.begin_review(&caller, dispute_id).await, dispute_id)
            }
            Request::ResolveDispute {
                caller,
                dispute_id,
                resolution,
            } => updated(
                admin.resolve_dispute(&caller, dispute_id, resolution).await,
                dispute_id,
            ),
            Request::GetDispute { dispute_id } => {
                admin.get_dispute(dispute_id).await.map(Response::Dispute)
            }
            Request::ListDisputes { status } => {
                admin.list_disputes(status).await.map(Response::Disputes)
            }
            Request::GetPlatformStats => Ok(Response::Stats(admin.get_platform_stats().await)),
        }
    }
}
