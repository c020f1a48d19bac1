mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use simbridge_core::{EventId, OfferId, UserId};
use simbridge_fulfillment::{
    Buyer, FailureReason, FulfillmentOutcome, FulfillmentRequest, FulfillmentState, GUEST_USER_ID,
};
use simbridge_infra::incidents::{InMemoryIncidentSink, Incident};
use simbridge_infra::provider::ProviderError;
use simbridge_infra::store::{FulfillmentLedger, InMemoryCatalogStore, InMemoryLedger};
use simbridge_infra::FulfillmentCoordinator;

use common::{FakeProvider, seeded_catalog};

struct Harness {
    coordinator: Arc<FulfillmentCoordinator>,
    ledger: Arc<InMemoryLedger>,
    provider: Arc<FakeProvider>,
    incidents: Arc<InMemoryIncidentSink>,
    offer_id: OfferId,
}

async fn harness() -> Harness {
    let (catalog, offers) = seeded_catalog(&[("pkg-de-5", "DE", 30, 5.0, 9.99)]).await;
    harness_with(catalog, offers[0].id)
}

fn harness_with(catalog: Arc<InMemoryCatalogStore>, offer_id: OfferId) -> Harness {
    let ledger = Arc::new(InMemoryLedger::new());
    let provider = FakeProvider::new();
    let incidents = Arc::new(InMemoryIncidentSink::new());
    let coordinator = Arc::new(FulfillmentCoordinator::new(
        catalog,
        ledger.clone(),
        provider.clone(),
        incidents.clone(),
        Duration::from_secs(120),
    ));
    Harness {
        coordinator,
        ledger,
        provider,
        incidents,
        offer_id,
    }
}

fn request(event: &str, offer_id: OfferId, buyer: Buyer) -> FulfillmentRequest {
    FulfillmentRequest {
        event_id: EventId::parse(event).unwrap(),
        offer_id,
        buyer,
    }
}

#[tokio::test]
async fn concurrent_duplicates_place_one_order() {
    let h = harness().await;
    *h.provider.order_delay.lock().unwrap() = Duration::from_millis(50);

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let coordinator = h.coordinator.clone();
        let req = request("evt_123", h.offer_id, Buyer::Guest);
        tasks.push(tokio::spawn(async move { coordinator.handle(req).await.unwrap() }));
    }

    let mut completed = 0;
    for task in tasks {
        match task.await.unwrap() {
            FulfillmentOutcome::Completed { replayed: false, .. } => completed += 1,
            FulfillmentOutcome::InProgress => {}
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    assert_eq!(completed, 1);
    assert_eq!(h.provider.orders(), 1);
    assert_eq!(h.ledger.list_entitlements().await.unwrap().len(), 1);
    assert_eq!(*h.provider.idempotency_keys.lock().unwrap(), vec!["evt_123".to_string()]);
}

#[tokio::test]
async fn redelivery_after_completion_replays_the_entitlement() {
    let h = harness().await;
    let buyer = Buyer::Registered(UserId::new());

    let first = h.coordinator.handle(request("evt_1", h.offer_id, buyer)).await.unwrap();
    let FulfillmentOutcome::Completed { entitlement, replayed: false } = first else {
        panic!("expected completion, got {first:?}");
    };
    assert_eq!(entitlement.user_id, buyer.user_id());
    assert_eq!(entitlement.canonical_id.as_str(), "esim-de-30days-5gb-all");
    assert!(entitlement.activation.lpa_code.is_some());

    let second = h.coordinator.handle(request("evt_1", h.offer_id, buyer)).await.unwrap();
    match second {
        FulfillmentOutcome::Completed { entitlement: again, replayed: true } => assert_eq!(again.id, entitlement.id),
        other => panic!("expected replay, got {other:?}"),
    }
    assert_eq!(h.provider.orders(), 1);
}

#[tokio::test]
async fn guest_buyers_get_the_guest_identity() {
    let h = harness().await;
    let outcome = h.coordinator.handle(request("evt_guest", h.offer_id, Buyer::Guest)).await.unwrap();
    let FulfillmentOutcome::Completed { entitlement, .. } = outcome else {
        panic!("expected completion");
    };
    assert_eq!(entitlement.user_id, GUEST_USER_ID);
}

#[tokio::test]
async fn unknown_offer_fails_without_calling_the_provider() {
    let h = harness().await;
    let outcome = h
        .coordinator
        .handle(request("evt_2", OfferId::new(), Buyer::Guest))
        .await
        .unwrap();

    match &outcome {
        FulfillmentOutcome::Failed {
            reason: FailureReason::MissingCatalogMapping { .. },
            replayed: false,
        } => {}
        other => panic!("expected missing mapping, got {other:?}"),
    }
    assert_eq!(h.provider.orders(), 0);
    assert!(matches!(
        h.incidents.all().as_slice(),
        [Incident::FulfillmentFailed { .. }]
    ));

    let replay = h
        .coordinator
        .handle(request("evt_2", OfferId::new(), Buyer::Guest))
        .await
        .unwrap();
    assert!(replay.is_replay());
    assert_eq!(h.incidents.all().len(), 1);
}

#[tokio::test]
async fn offer_whose_package_left_the_catalog_is_not_substituted() {
    use simbridge_catalog::Generation;
    use simbridge_infra::store::CatalogStore;

    let (catalog, offers) = seeded_catalog(&[("pkg-de-5", "DE", 30, 5.0, 9.99)]).await;
    // A similar package replaces the original in the next snapshot.
    let replacement = common::packages(common::feed(&[("pkg-de-5b", "DE", 30, 5.0, 8.99)]));
    catalog.publish_snapshot(Generation(2), &replacement).await.unwrap();

    let h = harness_with(catalog, offers[0].id);
    let outcome = h.coordinator.handle(request("evt_3", h.offer_id, Buyer::Guest)).await.unwrap();
    assert!(matches!(
        outcome,
        FulfillmentOutcome::Failed {
            reason: FailureReason::MissingCatalogMapping { .. },
            ..
        }
    ));
    assert_eq!(h.provider.orders(), 0);
}

#[tokio::test]
async fn transient_activation_failure_is_retried_without_reordering() {
    let h = harness().await;
    h.provider
        .activate_failures
        .lock()
        .unwrap()
        .push_back(ProviderError::Unavailable("timeout".into()));

    let first = h.coordinator.handle(request("evt_4", h.offer_id, Buyer::Guest)).await.unwrap();
    assert_eq!(first, FulfillmentOutcome::RetryLater);

    let event = h
        .ledger
        .get_event(&EventId::parse("evt_4").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.state, FulfillmentState::Processing);
    assert_eq!(
        event.provider_order.as_ref().map(|p| p.canonical_id.as_str()),
        Some("esim-de-30days-5gb-all")
    );
    assert_eq!(event.last_error.as_deref(), Some("provider unavailable: timeout"));

    let second = h.coordinator.handle(request("evt_4", h.offer_id, Buyer::Guest)).await.unwrap();
    assert!(matches!(second, FulfillmentOutcome::Completed { replayed: false, .. }));
    assert_eq!(h.provider.orders(), 1);
    assert_eq!(h.provider.activations.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn transient_order_failure_keeps_the_event_open() {
    let h = harness().await;
    h.provider
        .order_failures
        .lock()
        .unwrap()
        .push_back(ProviderError::Unavailable("HTTP 503".into()));

    let first = h.coordinator.handle(request("evt_5", h.offer_id, Buyer::Guest)).await.unwrap();
    assert_eq!(first, FulfillmentOutcome::RetryLater);
    assert!(h.ledger.list_entitlements().await.unwrap().is_empty());

    let second = h.coordinator.handle(request("evt_5", h.offer_id, Buyer::Guest)).await.unwrap();
    assert!(matches!(second, FulfillmentOutcome::Completed { .. }));
    assert_eq!(
        *h.provider.idempotency_keys.lock().unwrap(),
        vec!["evt_5".to_string(), "evt_5".to_string()]
    );
}

#[tokio::test]
async fn rejected_order_is_terminal() {
    let h = harness().await;
    h.provider.order_failures.lock().unwrap().push_back(ProviderError::Rejected {
        status: 400,
        body: "package discontinued".into(),
    });

    let outcome = h.coordinator.handle(request("evt_6", h.offer_id, Buyer::Guest)).await.unwrap();
    assert!(matches!(
        outcome,
        FulfillmentOutcome::Failed {
            reason: FailureReason::ProviderRejected { .. },
            replayed: false
        }
    ));

    let replay = h.coordinator.handle(request("evt_6", h.offer_id, Buyer::Guest)).await.unwrap();
    assert!(replay.is_replay());
    assert_eq!(h.provider.orders(), 1);
}

#[tokio::test]
async fn placed_order_completes_even_after_the_package_leaves_the_catalog() {
    use simbridge_catalog::Generation;
    use simbridge_infra::store::CatalogStore;

    let (catalog, offers) = seeded_catalog(&[("pkg-de-5", "DE", 30, 5.0, 9.99)]).await;
    let h = harness_with(catalog.clone(), offers[0].id);
    h.provider
        .activate_failures
        .lock()
        .unwrap()
        .push_back(ProviderError::Unavailable("timeout".into()));

    let first = h.coordinator.handle(request("evt_7", h.offer_id, Buyer::Guest)).await.unwrap();
    assert_eq!(first, FulfillmentOutcome::RetryLater);

    // The next sync drops the ordered package before the redelivery arrives.
    let unrelated = common::packages(common::feed(&[("pkg-fr-1", "FR", 7, 1.0, 3.5)]));
    catalog.publish_snapshot(Generation(2), &unrelated).await.unwrap();

    let second = h.coordinator.handle(request("evt_7", h.offer_id, Buyer::Guest)).await.unwrap();
    let FulfillmentOutcome::Completed { entitlement, replayed: false } = second else {
        panic!("expected completion, got {second:?}");
    };
    assert_eq!(entitlement.canonical_id.as_str(), "esim-de-30days-5gb-all");
    assert_eq!(entitlement.provider_order_id, "ord-1");
    assert_eq!(h.provider.orders(), 1);
    assert!(h.incidents.all().is_empty());
}
