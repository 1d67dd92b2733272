//! Review Registry - Property reviews, moderation and helpful votes
//!
//! One review per (reviewer, property). Moderation never deletes: an
//! invalidated review stays in the table for audit but no longer counts
//! toward the property's rating.

use crate::{
    error::LedgerError,
    ledger::{Ledger, Table, Tx},
    models::{
        AccountId, EntityKind, PropertyId, RatingSummary, Review, ReviewId, ReviewType,
    },
    property_registry::PropertyRegistry,
    user_registry::UserRegistry,
    LedgerResult,
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, sync::Arc};
use tracing::{debug, info, warn};

pub const MIN_RATING: u8 = 1;
pub const MAX_RATING: u8 = 5;

/// Review details supplied by the reviewer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewReview {
    pub property_id: PropertyId,
    pub review_type: ReviewType,
    pub content_hash: String,
    pub rating: u8,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewTable {
    pub(crate) rows: Table<Review>,
    /// (reviewer, property) pairs that already have a review
    pub(crate) reviewed: BTreeSet<(AccountId, PropertyId)>,
    /// (review, voter) pairs that already voted helpful
    pub(crate) helpful_votes: BTreeSet<(ReviewId, AccountId)>,
}

impl ReviewTable {
    pub(crate) fn require(&self, id: ReviewId) -> LedgerResult<&Review> {
        self.rows
            .get(id)
            .ok_or_else(|| LedgerError::not_found("review", id))
    }

    /// Mean rating over the valid reviews of a property
    pub fn rating_of(&self, property_id: PropertyId) -> RatingSummary {
        let (count, sum) = self
            .rows
            .values()
            .filter(|r| r.property_id == property_id && r.valid)
            .fold((0u32, 0u64), |(count, sum), r| {
                (count + 1, sum + u64::from(r.rating))
            });

        RatingSummary {
            valid_reviews: count,
            average: (count > 0).then(|| sum as f64 / f64::from(count)),
        }
    }

    /// Valid review with the most helpful votes, earliest first on ties
    pub fn most_helpful(&self, property_id: PropertyId) -> Option<&Review> {
        self.rows
            .values()
            .filter(|r| r.property_id == property_id && r.valid)
            .max_by(|a, b| {
                a.helpful_votes
                    .cmp(&b.helpful_votes)
                    .then_with(|| b.id.cmp(&a.id))
            })
    }
}

pub(crate) fn submit_in(
    tx: &mut Tx<'_>,
    caller: &AccountId,
    review: &NewReview,
) -> LedgerResult<ReviewId> {
    tx.state.users.require_active_caller(caller, "submit a review")?;
    tx.state.properties.require(review.property_id)?;

    if !(MIN_RATING..=MAX_RATING).contains(&review.rating) {
        return Err(LedgerError::InvalidRating(review.rating));
    }

    let pair = (caller.clone(), review.property_id);
    if tx.state.reviews.reviewed.contains(&pair) {
        return Err(LedgerError::DuplicateReview {
            reviewer: caller.to_string(),
            property_id: review.property_id,
        });
    }

    tx.validator().content_hash("content_hash", &review.content_hash)?;
    let comment_len = review.comment.chars().count();
    if comment_len > tx.config.reviews.max_comment_len {
        return Err(LedgerError::invalid_input(format!(
            "comment is {} characters, maximum is {}",
            comment_len, tx.config.reviews.max_comment_len
        )));
    }

    let now = tx.now;
    let reviews = &mut tx.state.reviews;
    let review_id = reviews.rows.insert_with(|id| Review {
        id,
        property_id: review.property_id,
        reviewer: caller.clone(),
        review_type: review.review_type,
        content_hash: review.content_hash.clone(),
        rating: review.rating,
        comment: review.comment.clone(),
        valid: true,
        helpful_votes: 0,
        created_at: now,
    });
    reviews.reviewed.insert(pair);

    tx.emit(EntityKind::Review, review_id, "submitted", Some(caller));
    Ok(review_id)
}

/// Clear the valid flag. Authority is checked by the caller of this function.
pub(crate) fn invalidate_in(
    tx: &mut Tx<'_>,
    actor: &AccountId,
    review_id: ReviewId,
) -> LedgerResult<()> {
    if !tx.state.reviews.require(review_id)?.valid {
        return Err(LedgerError::InvalidStateTransition {
            entity: format!("review {}", review_id),
            from_state: "Invalid".to_string(),
            to_state: "Invalid".to_string(),
        });
    }

    if let Some(review) = tx.state.reviews.rows.get_mut(review_id) {
        review.valid = false;
    }
    tx.emit(EntityKind::Review, review_id, "invalidated", Some(actor));
    Ok(())
}

fn mark_helpful_in(tx: &mut Tx<'_>, caller: &AccountId, review_id: ReviewId) -> LedgerResult<u32> {
    tx.state.users.require_active_caller(caller, "vote on a review")?;

    let review = tx.state.reviews.require(review_id)?;
    if &review.reviewer == caller {
        return Err(LedgerError::unauthorized(format!(
            "{} cannot vote on their own review {}",
            caller, review_id
        )));
    }
    if !review.valid {
        return Err(LedgerError::invalid_input(format!(
            "review {} has been invalidated",
            review_id
        )));
    }

    let vote = (review_id, caller.clone());
    if tx.state.reviews.helpful_votes.contains(&vote) {
        return Err(LedgerError::DuplicateVote {
            voter: caller.to_string(),
            review_id,
        });
    }

    let reviews = &mut tx.state.reviews;
    reviews.helpful_votes.insert(vote);
    let votes = match reviews.rows.get_mut(review_id) {
        Some(review) => {
            review.helpful_votes = review.helpful_votes.saturating_add(1);
            review.helpful_votes
        }
        None => 0,
    };

    tx.emit(EntityKind::Review, review_id, "helpful_vote", Some(caller));
    Ok(votes)
}

/// Handle to the review table
#[derive(Debug, Clone)]
pub struct ReviewRegistry {
    ledger: Arc<Ledger>,
}

impl ReviewRegistry {
    /// Create a registry sharing the ledger of its dependencies
    pub fn new(users: &UserRegistry, properties: &PropertyRegistry) -> Self {
        debug_assert!(Arc::ptr_eq(users.ledger(), properties.ledger()));
        Self {
            ledger: properties.ledger().clone(),
        }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Submit the caller's review of a property
    pub async fn submit(&self, caller: &AccountId, review: NewReview) -> LedgerResult<ReviewId> {
        let result = self
            .ledger
            .transact(|tx| submit_in(tx, caller, &review))
            .await;

        match &result {
            Ok(id) => info!(
                review_id = id,
                property_id = review.property_id,
                rating = review.rating,
                "Submitted review"
            ),
            Err(err @ (LedgerError::DuplicateReview { .. } | LedgerError::Unauthorized(_))) => {
                warn!(reviewer = %caller, error = %err, "Rejected review")
            }
            Err(_) => {}
        }

        result
    }

    pub async fn get(&self, review_id: ReviewId) -> LedgerResult<Review> {
        self.ledger
            .read(|state| state.reviews.require(review_id).cloned())
            .await
    }

    /// Reviews of a property in submission order, invalidated ones included
    pub async fn for_property(&self, property_id: PropertyId) -> Vec<Review> {
        self.ledger
            .read(|state| {
                state
                    .reviews
                    .rows
                    .values()
                    .filter(|r| r.property_id == property_id)
                    .cloned()
                    .collect()
            })
            .await
    }

    pub async fn rating(&self, property_id: PropertyId) -> LedgerResult<RatingSummary> {
        debug!(property_id, "Computing rating");
        self.ledger
            .read(|state| -> LedgerResult<RatingSummary> {
                state.properties.require(property_id)?;
                Ok(state.reviews.rating_of(property_id))
            })
            .await
    }

    /// Invalidate a review. Requires admin authority.
    pub async fn invalidate(&self, caller: &AccountId, review_id: ReviewId) -> LedgerResult<()> {
        self.ledger
            .transact(|tx| {
                tx.require_admin(caller, "invalidate review")?;
                invalidate_in(tx, caller, review_id)
            })
            .await?;

        info!(review_id, by = %caller, "Invalidated review");
        Ok(())
    }

    /// Record the caller's helpful vote, returning the new vote count
    pub async fn mark_helpful(&self, caller: &AccountId, review_id: ReviewId) -> LedgerResult<u32> {
        let result = self
            .ledger
            .transact(|tx| mark_helpful_in(tx, caller, review_id))
            .await;

        match &result {
            Ok(votes) => info!(review_id, votes, "Marked review helpful"),
            Err(err @ (LedgerError::DuplicateVote { .. } | LedgerError::Unauthorized(_))) => {
                warn!(review_id, voter = %caller, error = %err, "Rejected helpful vote")
            }
            Err(_) => {}
        }

        result
    }

    pub async fn most_helpful(&self, property_id: PropertyId) -> Option<Review> {
        self.ledger
            .read(|state| state.reviews.most_helpful(property_id).cloned())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::SystemClock,
        config::PlatformConfig,
        models::{PropertyType, Role},
        property_registry::NewProperty,
    };

    struct Fixture {
        reviews: ReviewRegistry,
        property_id: PropertyId,
    }

    async fn setup() -> Fixture {
        let config = PlatformConfig::default().with_genesis_admin("root");
        let users = UserRegistry::new(Arc::new(Ledger::new(config, Arc::new(SystemClock))));
        for (id, role) in [("owner", Role::Owner), ("ann", Role::Seeker), ("ben", Role::Seeker)] {
            users
                .register(&AccountId::from(id), id, "did:x", role)
                .await
                .unwrap();
        }
        let properties = PropertyRegistry::new(&users);
        let property_id = properties
            .create(
                &AccountId::from("owner"),
                NewProperty {
                    property_type: PropertyType::Land,
                    location: "Epe, Lagos".to_string(),
                    price: 50_000,
                    terms: String::new(),
                    content_hash: "QmLand".to_string(),
                    metadata_uri: String::new(),
                },
            )
            .await
            .unwrap();

        Fixture {
            reviews: ReviewRegistry::new(&users, &properties),
            property_id,
        }
    }

    fn review(property_id: PropertyId, rating: u8, comment: &str) -> NewReview {
        NewReview {
            property_id,
            review_type: ReviewType::Community,
            content_hash: "QmReview".to_string(),
            rating,
            comment: comment.to_string(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_review_regardless_of_content() {
        let f = setup().await;
        let ann = AccountId::from("ann");

        f.reviews
            .submit(&ann, review(f.property_id, 4, "Quiet street"))
            .await
            .unwrap();
        let second = f
            .reviews
            .submit(&ann, review(f.property_id, 1, "Changed my mind"))
            .await;

        assert!(matches!(second, Err(LedgerError::DuplicateReview { .. })));
        assert_eq!(f.reviews.for_property(f.property_id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_submit_checks_in_order() {
        let f = setup().await;

        let unknown = f
            .reviews
            .submit(&AccountId::from("ghost"), review(f.property_id, 9, ""))
            .await;
        assert!(matches!(unknown, Err(LedgerError::Unauthorized(_))));

        let missing = f.reviews.submit(&AccountId::from("ann"), review(99, 9, "")).await;
        assert!(matches!(missing, Err(LedgerError::NotFound { .. })));

        let rating = f
            .reviews
            .submit(&AccountId::from("ann"), review(f.property_id, 0, ""))
            .await;
        assert!(matches!(rating, Err(LedgerError::InvalidRating(0))));
    }

    #[tokio::test]
    async fn test_invalidated_review_leaves_average() {
        let f = setup().await;
        let root = AccountId::from("root");

        let first = f
            .reviews
            .submit(&AccountId::from("ann"), review(f.property_id, 5, ""))
            .await
            .unwrap();
        f.reviews
            .submit(&AccountId::from("ben"), review(f.property_id, 2, ""))
            .await
            .unwrap();
        assert_eq!(
            f.reviews.rating(f.property_id).await.unwrap().average,
            Some(3.5)
        );

        f.reviews.invalidate(&root, first).await.unwrap();
        let summary = f.reviews.rating(f.property_id).await.unwrap();
        assert_eq!(summary.valid_reviews, 1);
        assert_eq!(summary.average, Some(2.0));

        let twice = f.reviews.invalidate(&root, first).await;
        assert!(matches!(twice, Err(LedgerError::InvalidStateTransition { .. })));
        assert!(!f.reviews.get(first).await.unwrap().valid);
    }

    #[tokio::test]
    async fn test_helpful_votes() {
        let f = setup().await;
        let ann = AccountId::from("ann");
        let ben = AccountId::from("ben");

        let first = f
            .reviews
            .submit(&ann, review(f.property_id, 4, ""))
            .await
            .unwrap();
        let second = f
            .reviews
            .submit(&ben, review(f.property_id, 3, ""))
            .await
            .unwrap();

        // Ties go to the earliest review
        assert_eq!(f.reviews.most_helpful(f.property_id).await.unwrap().id, first);

        let own = f.reviews.mark_helpful(&ben, second).await;
        assert!(matches!(own, Err(LedgerError::Unauthorized(_))));

        assert_eq!(f.reviews.mark_helpful(&ann, second).await.unwrap(), 1);
        let again = f.reviews.mark_helpful(&ann, second).await;
        assert!(matches!(again, Err(LedgerError::DuplicateVote { .. })));

        assert_eq!(f.reviews.most_helpful(f.property_id).await.unwrap().id, second);
    }
}
