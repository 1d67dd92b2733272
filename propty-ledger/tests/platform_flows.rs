use chrono::Duration;
use propty_ledger::{
    models::{
        AccountId, BadgeType, DealState, DisputeStatus, DisputeType, PropertyStatus,
        PropertyType, Resolution, ReviewType, Role,
    },
    ErrorKind, JsonFileStore, LedgerError, ManualClock, NewDispute, NewProperty, NewReview,
    Platform, PlatformConfig, Request, Response, SnapshotStore,
};
use std::sync::Arc;

const PRICE: u64 = 500_000;

struct Market {
    platform: Arc<Platform>,
    clock: Arc<ManualClock>,
    admin: AccountId,
    owner: AccountId,
    buyer: AccountId,
}

async fn market() -> Market {
    let clock = Arc::new(ManualClock::default());
    let admin = AccountId::from("0xadmin");
    let config = PlatformConfig::default().with_genesis_admin(admin.clone());
    let platform = Platform::with_clock(config, clock.clone()).unwrap();

    let owner = AccountId::from("0xowner");
    let buyer = AccountId::from("0xbuyer");
    platform
        .users()
        .register(&owner, "Olu Owner", "did:propty:owner", Role::Owner)
        .await
        .unwrap();
    platform
        .users()
        .register(&buyer, "Bisi Buyer", "did:propty:buyer", Role::Seeker)
        .await
        .unwrap();

    Market {
        platform: Arc::new(platform),
        clock,
        admin,
        owner,
        buyer,
    }
}

fn listing(location: &str) -> NewProperty {
    NewProperty {
        property_type: PropertyType::Residential,
        location: location.to_string(),
        price: PRICE,
        terms: "Outright purchase".to_string(),
        content_hash: format!("Qm{}", location.replace(' ', "")),
        metadata_uri: String::new(),
    }
}

impl Market {
    async fn list(&self, location: &str) -> u64 {
        self.platform
            .properties()
            .create(&self.owner, listing(location))
            .await
            .unwrap()
    }

    /// Open and fund a deal, then start its inspection window
    async fn deal_in_inspection(&self, property_id: u64) -> u64 {
        let escrow = self.platform.escrow();
        let deal_id = escrow
            .open(&self.buyer, property_id, &self.buyer, &self.owner, PRICE)
            .await
            .unwrap();
        escrow.fund(&self.buyer, deal_id, PRICE).await.unwrap();
        escrow
            .advance_to_inspection(&self.buyer, deal_id)
            .await
            .unwrap();
        deal_id
    }

    async fn dispute_deal(&self, deal_id: u64) -> u64 {
        self.platform
            .admin()
            .create_dispute(
                &self.buyer,
                NewDispute {
                    dispute_type: DisputeType::TransactionDispute,
                    respondent: self.owner.clone(),
                    related_entity_id: deal_id,
                    evidence_hash: "QmInspectionReport".to_string(),
                },
            )
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn test_fresh_platform_reports_zero_stats() {
    let platform = Platform::new(PlatformConfig::default()).unwrap();
    let stats = platform.admin().get_platform_stats().await;

    assert_eq!(stats.total_users, 0);
    assert_eq!(stats.total_properties, 0);
    assert_eq!(stats.total_reviews, 0);
    assert_eq!(stats.total_deals, 0);
    assert_eq!(stats.escrow_held, 0);
    assert_eq!(stats.total_disputes_open, 0);
}

#[tokio::test]
async fn test_register_twice_is_rejected() {
    let m = market().await;
    let again = m
        .platform
        .users()
        .register(&m.owner, "Olu Again", "did:propty:owner2", Role::Owner)
        .await;

    assert!(matches!(again, Err(LedgerError::AlreadyRegistered(_))));
    assert_eq!(m.platform.admin().get_platform_stats().await.total_users, 2);
}

#[tokio::test]
async fn test_free_upload_limit_then_subscription() {
    let m = market().await;
    m.list("Plot 1 Lekki").await;
    m.list("Plot 2 Lekki").await;

    let third = m
        .platform
        .properties()
        .create(&m.owner, listing("Plot 3 Lekki"))
        .await;
    assert!(matches!(
        third,
        Err(LedgerError::FreeUploadLimitReached { limit: 2, .. })
    ));

    m.platform
        .properties()
        .set_subscription(&m.admin, &m.owner, true)
        .await
        .unwrap();
    m.list("Plot 3 Lekki").await;

    let quota = m.platform.properties().quota(&m.owner).await;
    assert_eq!(quota.free_uploads_used, 2);
    assert!(quota.subscribed);
    assert_eq!(m.platform.properties().list_by_owner(&m.owner).await.len(), 3);
}

#[tokio::test]
async fn test_duplicate_review_is_rejected() {
    let m = market().await;
    let property_id = m.list("Ikoyi Terrace").await;
    let review = NewReview {
        property_id,
        review_type: ReviewType::Visitor,
        content_hash: "QmVisit".to_string(),
        rating: 5,
        comment: String::new(),
    };

    m.platform.reviews().submit(&m.buyer, review.clone()).await.unwrap();
    let again = m.platform.reviews().submit(&m.buyer, review).await;
    assert!(matches!(again, Err(LedgerError::DuplicateReview { .. })));

    let rating = m.platform.reviews().rating(property_id).await.unwrap();
    assert_eq!(rating.valid_reviews, 1);
}

#[tokio::test]
async fn test_badges_are_soulbound() {
    let m = market().await;
    let badge_id = m
        .platform
        .badges()
        .award(&m.admin, &m.owner, BadgeType::TrustedOwner, "QmBadge", 1)
        .await
        .unwrap();

    let transfer = m.platform.badges().transfer(&m.owner, badge_id, &m.buyer);
    assert!(matches!(
        transfer,
        Err(LedgerError::SoulboundTransferForbidden(id)) if id == badge_id
    ));
    assert_eq!(m.platform.badges().get(badge_id).await.unwrap().recipient, m.owner);
}

#[tokio::test]
async fn test_escrow_happy_path_transfers_ownership() {
    let m = market().await;
    let property_id = m.list("Banana Island").await;
    let deal_id = m.deal_in_inspection(property_id).await;
    let escrow = m.platform.escrow();

    let again = escrow.fund(&m.buyer, deal_id, PRICE).await;
    assert!(matches!(again, Err(LedgerError::AlreadyFunded(_))));

    escrow.confirm(&m.buyer, deal_id).await.unwrap();
    escrow.confirm(&m.owner, deal_id).await.unwrap();
    escrow.complete(&m.owner, deal_id).await.unwrap();

    let property = m.platform.properties().get(property_id).await.unwrap();
    assert_eq!(property.owner, m.buyer);
    assert_eq!(property.status, PropertyStatus::Sold);

    let stats = m.platform.admin().get_platform_stats().await;
    assert_eq!(stats.completed_deals, 1);
    assert_eq!(stats.total_volume, PRICE);
    assert_eq!(stats.escrow_held, 0);
    assert_eq!(escrow.balance_of(&m.owner).await, PRICE);
    assert!(m.platform.health_check().await.healthy);
}

#[tokio::test]
async fn test_buyer_favored_dispute_refunds() {
    let m = market().await;
    let property_id = m.list("Victoria Island").await;
    let deal_id = m.deal_in_inspection(property_id).await;
    let dispute_id = m.dispute_deal(deal_id).await;

    assert_eq!(
        m.platform.escrow().get(deal_id).await.unwrap().state,
        DealState::Disputed
    );

    let admin = m.platform.admin();
    admin.begin_review(&m.admin, dispute_id).await.unwrap();
    admin
        .resolve_dispute(&m.admin, dispute_id, Resolution::FavorComplainant)
        .await
        .unwrap();

    let deal = m.platform.escrow().get(deal_id).await.unwrap();
    assert_eq!(deal.state, DealState::Refunded);
    assert_eq!(m.platform.escrow().balance_of(&m.buyer).await, PRICE);
    assert_eq!(
        m.platform.properties().get(property_id).await.unwrap().status,
        PropertyStatus::Listed
    );

    let again = admin
        .resolve_dispute(&m.admin, dispute_id, Resolution::FavorRespondent)
        .await;
    assert!(matches!(again, Err(LedgerError::AlreadyResolved(id)) if id == dispute_id));

    let dispute = admin.get_dispute(dispute_id).await.unwrap();
    assert_eq!(dispute.status, DisputeStatus::Resolved);
    assert_eq!(dispute.resolution, Resolution::FavorComplainant);
    assert_eq!(dispute.resolved_by, Some(m.admin.clone()));
}

#[tokio::test]
async fn test_dispute_on_open_deal_refunds_without_settlement() {
    let m = market().await;
    let property_id = m.list("Ikeja GRA").await;
    let deal_id = m
        .platform
        .escrow()
        .open(&m.buyer, property_id, &m.buyer, &m.owner, PRICE)
        .await
        .unwrap();
    let dispute_id = m.dispute_deal(deal_id).await;

    m.platform
        .admin()
        .resolve_dispute(&m.admin, dispute_id, Resolution::FavorComplainant)
        .await
        .unwrap();

    let escrow = m.platform.escrow();
    assert_eq!(escrow.get(deal_id).await.unwrap().state, DealState::Refunded);
    assert_eq!(escrow.balance_of(&m.buyer).await, 0);
    assert!(escrow.settlements(deal_id).await.is_empty());
    assert_eq!(
        m.platform.properties().get(property_id).await.unwrap().status,
        PropertyStatus::Listed
    );
    assert!(m.platform.health_check().await.healthy);
}

#[tokio::test]
async fn test_seller_favored_dispute_on_open_deal_cancels() {
    let m = market().await;
    let property_id = m.list("Ogudu Orchard").await;
    let deal_id = m
        .platform
        .escrow()
        .open(&m.buyer, property_id, &m.buyer, &m.owner, PRICE)
        .await
        .unwrap();
    let dispute_id = m.dispute_deal(deal_id).await;

    m.platform
        .admin()
        .resolve_dispute(&m.admin, dispute_id, Resolution::FavorRespondent)
        .await
        .unwrap();

    assert_eq!(
        m.platform.escrow().get(deal_id).await.unwrap().state,
        DealState::Cancelled
    );
    assert_eq!(
        m.platform.properties().get(property_id).await.unwrap().owner,
        m.owner
    );
}

#[tokio::test]
async fn test_seller_favored_dispute_completes() {
    let m = market().await;
    let property_id = m.list("Yaba Flat").await;
    let deal_id = m.deal_in_inspection(property_id).await;
    let dispute_id = m.dispute_deal(deal_id).await;

    m.platform
        .admin()
        .resolve_dispute(&m.admin, dispute_id, Resolution::FavorRespondent)
        .await
        .unwrap();

    assert_eq!(
        m.platform.escrow().get(deal_id).await.unwrap().state,
        DealState::Completed
    );
    assert_eq!(m.platform.escrow().balance_of(&m.owner).await, PRICE);
    assert_eq!(
        m.platform.properties().get(property_id).await.unwrap().owner,
        m.buyer
    );
}

#[tokio::test]
async fn test_rejected_dispute_restores_deal() {
    let m = market().await;
    let property_id = m.list("Surulere Duplex").await;
    let deal_id = m.deal_in_inspection(property_id).await;
    let dispute_id = m.dispute_deal(deal_id).await;

    m.platform
        .admin()
        .resolve_dispute(&m.admin, dispute_id, Resolution::Rejected)
        .await
        .unwrap();

    let deal = m.platform.escrow().get(deal_id).await.unwrap();
    assert_eq!(deal.state, DealState::InspectionPeriod);
    assert_eq!(deal.disputed_from, None);
    assert_eq!(m.platform.escrow().escrow_held().await, PRICE);
}

#[tokio::test]
async fn test_review_dispute_invalidates_review() {
    let m = market().await;
    let property_id = m.list("Ajah Bungalow").await;
    let review_id = m
        .platform
        .reviews()
        .submit(
            &m.buyer,
            NewReview {
                property_id,
                review_type: ReviewType::Tenant,
                content_hash: "QmRant".to_string(),
                rating: 1,
                comment: "Flooded every rainy season".to_string(),
            },
        )
        .await
        .unwrap();

    let dispute_id = m
        .platform
        .admin()
        .create_dispute(
            &m.owner,
            NewDispute {
                dispute_type: DisputeType::ReviewDispute,
                respondent: m.buyer.clone(),
                related_entity_id: review_id,
                evidence_hash: "QmDrainageCert".to_string(),
            },
        )
        .await
        .unwrap();
    m.platform
        .admin()
        .resolve_dispute(&m.admin, dispute_id, Resolution::FavorComplainant)
        .await
        .unwrap();

    assert!(!m.platform.reviews().get(review_id).await.unwrap().valid);
    let rating = m.platform.reviews().rating(property_id).await.unwrap();
    assert_eq!(rating.valid_reviews, 0);
}

#[tokio::test]
async fn test_failed_operations_leave_state_unchanged() {
    let m = market().await;
    let property_id = m.list("Magodo Estate").await;
    let deal_id = m
        .platform
        .escrow()
        .open(&m.buyer, property_id, &m.buyer, &m.owner, PRICE)
        .await
        .unwrap();

    let stats_before = m.platform.admin().get_platform_stats().await;
    let events_before = m.platform.events_since(0).await.len();
    let deal_before = m.platform.escrow().get(deal_id).await.unwrap();

    let mismatch = m.platform.escrow().fund(&m.buyer, deal_id, PRICE - 1).await;
    assert!(matches!(mismatch, Err(LedgerError::AmountMismatch { .. })));
    let early = m.platform.escrow().advance_to_inspection(&m.buyer, deal_id).await;
    assert!(matches!(early, Err(LedgerError::InvalidStateTransition { .. })));
    let complete = m.platform.escrow().complete(&m.admin, deal_id).await;
    assert!(matches!(complete, Err(LedgerError::InvalidStateTransition { .. })));

    assert_eq!(m.platform.admin().get_platform_stats().await, stats_before);
    assert_eq!(m.platform.events_since(0).await.len(), events_before);
    assert_eq!(m.platform.escrow().get(deal_id).await.unwrap(), deal_before);
}

#[tokio::test]
async fn test_concurrent_funding_is_linearized() {
    let m = market().await;
    let property_id = m.list("Gbagada Court").await;
    let deal_id = m
        .platform
        .escrow()
        .open(&m.buyer, property_id, &m.buyer, &m.owner, PRICE)
        .await
        .unwrap();

    let tasks: Vec<_> = (0..2)
        .map(|_| {
            let platform = m.platform.clone();
            let buyer = m.buyer.clone();
            tokio::spawn(async move { platform.escrow().fund(&buyer, deal_id, PRICE).await })
        })
        .collect();

    let mut funded = 0;
    let mut rejected = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(()) => funded += 1,
            Err(LedgerError::AlreadyFunded(_)) => rejected += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!((funded, rejected), (1, 1));
    assert_eq!(m.platform.escrow().escrow_held().await, PRICE);
}

#[tokio::test]
async fn test_refund_after_inspection_deadline() {
    let m = market().await;
    let property_id = m.list("Festac Town").await;
    let deal_id = m.deal_in_inspection(property_id).await;

    let early = m.platform.escrow().refund(&m.buyer, deal_id).await;
    assert!(matches!(early, Err(LedgerError::MissingConfirmation(_))));

    m.clock.advance(Duration::days(7) + Duration::seconds(1));
    m.platform.escrow().refund(&m.buyer, deal_id).await.unwrap();

    assert_eq!(
        m.platform.escrow().get(deal_id).await.unwrap().state,
        DealState::Refunded
    );
    assert_eq!(m.platform.escrow().balance_of(&m.buyer).await, PRICE);
}

#[tokio::test]
async fn test_api_round_trip_through_json() {
    let m = market().await;
    let request: Request = serde_json::from_value(serde_json::json!({
        "op": "create_property",
        "caller": "0xowner",
        "listing": {
            "property_type": "commercial",
            "location": "Allen Avenue, Ikeja",
            "price": 900000,
            "content_hash": "QmShop"
        }
    }))
    .unwrap();

    let response = m.platform.execute(request).await.unwrap();
    assert_eq!(response, Response::Id(1));

    let err = m
        .platform
        .execute(Request::CancelDeal {
            caller: m.buyer.clone(),
            deal_id: 99,
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}

#[tokio::test]
async fn test_json_store_preserves_state() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::new(dir.path().join("ledger.json"));

    let m = market().await;
    let property_id = m.list("Lekki Phase 2").await;
    m.deal_in_inspection(property_id).await;
    m.platform.persist(&store).await.unwrap();
    let stats = m.platform.admin().get_platform_stats().await;

    let snapshot = store.load().await.unwrap().unwrap();
    let config = PlatformConfig::default().with_genesis_admin("0xadmin");
    let restored = Platform::restore(config, snapshot).unwrap();

    assert_eq!(restored.admin().get_platform_stats().await, stats);
    assert_eq!(
        restored.properties().get(property_id).await.unwrap().status,
        PropertyStatus::InEscrow
    );
    assert!(restored.health_check().await.healthy);
}
