//! Error types for the ledger
//!
//! Every failed operation maps to exactly one variant. All of them are
//! precondition failures raised before any state is touched, so a caller that
//! receives an error can rely on the ledger being exactly as it was.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for ledger operations
#[derive(Error, Debug)]
pub enum LedgerError {
    /// The caller identifier already owns a user record
    #[error("Account {0} is already registered")]
    AlreadyRegistered(String),

    /// Referenced entity does not exist
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// Role, ownership or authority check failed
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Owner used up the free listings and has no subscription
    #[error("Free upload limit reached for {owner} ({limit} listings)")]
    FreeUploadLimitReached { owner: String, limit: u32 },

    /// The reviewer already reviewed this property
    #[error("Account {reviewer} already reviewed property {property_id}")]
    DuplicateReview { reviewer: String, property_id: u64 },

    /// Rating outside 1..=5
    #[error("Rating {0} is outside the 1..=5 range")]
    InvalidRating(u8),

    /// Reputation badges never change hands
    #[error("Soulbound badge {0} cannot be transferred")]
    SoulboundTransferForbidden(u64),

    /// Recipient already holds this badge type at the requested level
    #[error("{recipient} already holds {badge_type} at level {level}")]
    AlreadyHeld {
        recipient: String,
        badge_type: String,
        level: u32,
    },

    /// Repeat award of a badge type must raise the level
    #[error("Badge level must increase for {badge_type}: held {held}, requested {requested}")]
    BadgeLevelNotIncreasing {
        badge_type: String,
        held: u32,
        requested: u32,
    },

    /// State machine transition errors
    #[error("Invalid state transition for {entity}: {from_state} -> {to_state}")]
    InvalidStateTransition {
        entity: String,
        from_state: String,
        to_state: String,
    },

    /// Funding amount differs from the declared deal amount
    #[error("Amount mismatch: deal expects {expected}, got {actual}")]
    AmountMismatch { expected: u64, actual: u64 },

    /// Deal has already received its funds
    #[error("Deal {0} is already funded")]
    AlreadyFunded(u64),

    /// Dispute has already been adjudicated
    #[error("Dispute {0} is already resolved")]
    AlreadyResolved(u64),

    /// The admin coordinator can only be wired once
    #[error("Admin coordinator is already wired")]
    AlreadyWired,

    /// The admin coordinator has not been wired yet
    #[error("Admin coordinator is not wired to its registries")]
    NotWired,

    /// Malformed or out-of-range input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A two-party acknowledgement is still outstanding
    #[error("Missing confirmation: {0}")]
    MissingConfirmation(String),

    /// The inspection window of a deal is over
    #[error("Inspection deadline of deal {0} has elapsed")]
    DeadlineElapsed(u64),

    /// One helpful vote per account and review
    #[error("Account {voter} already voted on review {review_id}")]
    DuplicateVote { voter: String, review_id: u64 },

    /// An unresolved dispute already targets the entity
    #[error("An unresolved dispute already exists for {0}")]
    DisputeAlreadyOpen(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Snapshot persistence errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Serializable failure kind surfaced to callers of the request API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AlreadyRegistered,
    NotFound,
    Unauthorized,
    FreeUploadLimitReached,
    DuplicateReview,
    InvalidRating,
    SoulboundTransferForbidden,
    AlreadyHeld,
    BadgeLevelNotIncreasing,
    InvalidStateTransition,
    AmountMismatch,
    AlreadyFunded,
    AlreadyResolved,
    AlreadyWired,
    NotWired,
    InvalidInput,
    MissingConfirmation,
    DeadlineElapsed,
    DuplicateVote,
    DisputeAlreadyOpen,
    Config,
    Storage,
    Serialization,
}

impl ErrorKind {
    /// User-facing message for the kind, free of internal detail
    pub fn message(self) -> &'static str {
        match self {
            Self::AlreadyRegistered => "This account is already registered.",
            Self::NotFound => "The requested record does not exist.",
            Self::Unauthorized => "You are not allowed to perform this action.",
            Self::FreeUploadLimitReached => {
                "Free upload limit reached. A subscription is required to list more properties."
            }
            Self::DuplicateReview => "You have already reviewed this property.",
            Self::InvalidRating => "Ratings must be between 1 and 5.",
            Self::SoulboundTransferForbidden => "Reputation badges cannot be transferred.",
            Self::AlreadyHeld => "This badge is already held at that level.",
            Self::BadgeLevelNotIncreasing => "A repeated badge must have a higher level.",
            Self::InvalidStateTransition => {
                "The record is not in a state that allows this action. Refresh and try again."
            }
            Self::AmountMismatch => "The amount does not match the escrow amount.",
            Self::AlreadyFunded => "This escrow deal is already funded.",
            Self::AlreadyResolved => "This dispute has already been resolved.",
            Self::AlreadyWired => "The platform is already initialized.",
            Self::NotWired => "The platform is not initialized yet.",
            Self::InvalidInput => "Some of the submitted values are invalid.",
            Self::MissingConfirmation => "Both parties must confirm before this action.",
            Self::DeadlineElapsed => "The inspection period has ended.",
            Self::DuplicateVote => "You have already voted on this review.",
            Self::DisputeAlreadyOpen => "A dispute is already open for this record.",
            Self::Config | Self::Storage | Self::Serialization => {
                "The service is temporarily unavailable."
            }
        }
    }
}

impl LedgerError {
    /// Create a not-found error
    pub fn not_found<S: ToString>(entity: &'static str, id: S) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Create an authorization error
    pub fn unauthorized<S: Into<String>>(msg: S) -> Self {
        Self::Unauthorized(msg.into())
    }

    /// Create an input validation error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a state transition error
    pub fn state_transition<E: Into<String>, S: std::fmt::Debug>(
        entity: E,
        from_state: S,
        to_state: S,
    ) -> Self {
        Self::InvalidStateTransition {
            entity: entity.into(),
            from_state: format!("{:?}", from_state),
            to_state: format!("{:?}", to_state),
        }
    }

    /// Create a missing confirmation error
    pub fn missing_confirmation<S: Into<String>>(msg: S) -> Self {
        Self::MissingConfirmation(msg.into())
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create a storage error
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }

    /// Failure kind, for callers that key their messages on it
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AlreadyRegistered(_) => ErrorKind::AlreadyRegistered,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::FreeUploadLimitReached { .. } => ErrorKind::FreeUploadLimitReached,
            Self::DuplicateReview { .. } => ErrorKind::DuplicateReview,
            Self::InvalidRating(_) => ErrorKind::InvalidRating,
            Self::SoulboundTransferForbidden(_) => ErrorKind::SoulboundTransferForbidden,
            Self::AlreadyHeld { .. } => ErrorKind::AlreadyHeld,
            Self::BadgeLevelNotIncreasing { .. } => ErrorKind::BadgeLevelNotIncreasing,
            Self::InvalidStateTransition { .. } => ErrorKind::InvalidStateTransition,
            Self::AmountMismatch { .. } => ErrorKind::AmountMismatch,
            Self::AlreadyFunded(_) => ErrorKind::AlreadyFunded,
            Self::AlreadyResolved(_) => ErrorKind::AlreadyResolved,
            Self::AlreadyWired => ErrorKind::AlreadyWired,
            Self::NotWired => ErrorKind::NotWired,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::MissingConfirmation(_) => ErrorKind::MissingConfirmation,
            Self::DeadlineElapsed(_) => ErrorKind::DeadlineElapsed,
            Self::DuplicateVote { .. } => ErrorKind::DuplicateVote,
            Self::DisputeAlreadyOpen(_) => ErrorKind::DisputeAlreadyOpen,
            Self::Config(_) => ErrorKind::Config,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Serialization(_) => ErrorKind::Serialization,
        }
    }

    /// Whether re-reading state and retrying can succeed without new input
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::InvalidStateTransition { .. })
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<config::ConfigError> for LedgerError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
