//! End-to-end tests for the acknowledgement dispatcher.
//!
//! Tests cover:
//! - Completion when every requested label reports
//! - Timeout entries for labels that never report
//! - Empty request sets, duplicate correlation ids and configured limits
//! - First-wins, stale and unrequested acknowledgements
//! - Arrival-order independence of the aggregate result
//! - Cancellation, shutdown and concurrent delivery

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use twinlink_core::acks::{
    AckStatus, Acknowledgement, AcknowledgementLabel, Acknowledgements, CorrelationId, RequestSet,
    RequestSetBuilder,
};
use twinlink_core::aggregator::{
    Command, Dispatcher, IgnoreReason, RouteOutcome, SeverityMerge, StatusMerge,
};
use twinlink_core::config::AckConfig;
use twinlink_core::error::ErrorCode;

const ENTITY: &str = "org.acme:boiler-1";

fn dispatcher() -> Dispatcher {
    Dispatcher::new(AckConfig::default())
}

fn label(name: &str) -> AcknowledgementLabel {
    name.parse().unwrap()
}

fn request_set(labels: &[&str]) -> RequestSet {
    RequestSet::build(
        labels.iter().map(|name| label(name)),
        &HashMap::new(),
        Duration::from_secs(10),
        AckConfig::default().max_labels,
    )
    .unwrap()
}

fn ack(name: &str, correlation_id: &str, status: AckStatus) -> Acknowledgement {
    Acknowledgement::new(label(name), ENTITY, correlation_id, status)
}

fn labels_of(result: &Acknowledgements) -> Vec<&str> {
    result.iter().map(|a| a.label().as_str()).collect()
}

// ============================================================================
// Completion
// ============================================================================

#[tokio::test]
async fn test_all_labels_succeed() {
    let dispatcher = dispatcher();
    let command = Command::new(ENTITY, "cmd-a");
    let pending = dispatcher
        .submit(&command, request_set(&["persisted", "indexed"]))
        .unwrap();
    assert!(dispatcher.is_open(command.correlation_id()));

    assert_eq!(
        dispatcher.route_acknowledgement(ack("indexed", "cmd-a", AckStatus::OK)),
        RouteOutcome::Accepted
    );
    assert_eq!(
        dispatcher.route_acknowledgement(ack("persisted", "cmd-a", AckStatus::OK)),
        RouteOutcome::Completed
    );

    let result = pending.await.unwrap();
    assert_eq!(result.overall_status(), AckStatus::OK);
    assert_eq!(result.len(), 2);
    assert!(result.iter().all(Acknowledgement::is_success));
    assert_eq!(labels_of(&result), vec!["persisted", "indexed"]);
    assert_eq!(result.entity_id(), ENTITY);
    assert_eq!(result.correlation_id().as_str(), "cmd-a");

    assert!(!dispatcher.is_open(command.correlation_id()));
    assert_eq!(dispatcher.open_count(), 0);
}

#[tokio::test]
async fn test_single_label_keeps_its_status() {
    let dispatcher = dispatcher();
    let pending = dispatcher
        .submit(&Command::new(ENTITY, "cmd-single"), request_set(&["live-response"]))
        .unwrap();

    let reply = ack("live-response", "cmd-single", AckStatus::CREATED)
        .with_payload(serde_json::json!({ "temperature": 21.5 }));
    dispatcher.route_acknowledgement(reply);

    let result = pending.await.unwrap();
    assert_eq!(result.overall_status(), AckStatus::CREATED);
    let entry = result.get(&AcknowledgementLabel::LIVE_RESPONSE).unwrap();
    assert_eq!(entry.payload().unwrap()["temperature"], 21.5);
}

#[tokio::test]
async fn test_partial_failure_is_not_an_error() {
    let dispatcher = dispatcher();
    let pending = dispatcher
        .submit(
            &Command::new(ENTITY, "cmd-partial"),
            request_set(&["persisted", "indexed", "audit"]),
        )
        .unwrap();

    dispatcher.route_acknowledgement(ack("persisted", "cmd-partial", AckStatus::OK));
    dispatcher.route_acknowledgement(ack("indexed", "cmd-partial", AckStatus::SERVICE_UNAVAILABLE));
    dispatcher.route_acknowledgement(ack("audit", "cmd-partial", AckStatus::FORBIDDEN));

    let result = pending.await.unwrap();
    assert_eq!(result.overall_status(), AckStatus::SERVICE_UNAVAILABLE);
    assert_eq!(result.successful().count(), 1);
    assert_eq!(result.failed().count(), 2);
}

// ============================================================================
// Deadlines
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_missing_label_times_out() {
    let dispatcher = dispatcher();
    let pending = dispatcher
        .submit(&Command::new(ENTITY, "cmd-b"), request_set(&["persisted", "indexed"]))
        .unwrap();
    dispatcher.route_acknowledgement(ack("persisted", "cmd-b", AckStatus::OK));

    let result = pending.await.unwrap();
    assert_eq!(labels_of(&result), vec!["persisted", "indexed"]);
    assert_eq!(
        result.get(&AcknowledgementLabel::PERSISTED).unwrap().status(),
        AckStatus::OK
    );
    let indexed = result.get(&AcknowledgementLabel::INDEXED).unwrap();
    assert!(indexed.is_timeout());
    assert_eq!(result.overall_status(), AckStatus::REQUEST_TIMEOUT);
    assert_eq!(
        result.missing_labels().map(AcknowledgementLabel::as_str).collect::<Vec<_>>(),
        vec!["indexed"]
    );

    let stats = dispatcher.stats();
    assert_eq!(stats.timed_out, 1);
    assert_eq!(stats.open, 0);
}

#[tokio::test(start_paused = true)]
async fn test_nothing_reports() {
    let dispatcher = dispatcher();
    let started = tokio::time::Instant::now();
    let pending = dispatcher
        .submit(&Command::new(ENTITY, "cmd-silent"), request_set(&["persisted", "indexed"]))
        .unwrap();

    let result = pending.await.unwrap();
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert!(started.elapsed() < Duration::from_secs(11));
    assert_eq!(result.missing_labels().count(), 2);
    assert!(!result.is_successful());
}

#[tokio::test(start_paused = true)]
async fn test_per_label_timeout_expires_independently() {
    let config = AckConfig::default();
    let dispatcher = Dispatcher::new(config.clone());
    let requests = RequestSetBuilder::new(&config)
        .request_with_timeout(AcknowledgementLabel::PERSISTED, Duration::from_secs(1))
        .request(AcknowledgementLabel::INDEXED)
        .build()
        .unwrap();
    let started = tokio::time::Instant::now();
    let pending = dispatcher
        .submit(&Command::new(ENTITY, "cmd-short"), requests)
        .unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(dispatcher.is_open(&CorrelationId::from("cmd-short")));

    dispatcher.route_acknowledgement(ack("indexed", "cmd-short", AckStatus::OK));
    let result = pending.await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(result.get(&AcknowledgementLabel::PERSISTED).unwrap().is_timeout());
    assert!(result.get(&AcknowledgementLabel::INDEXED).unwrap().is_success());
    assert_eq!(result.overall_status(), AckStatus::REQUEST_TIMEOUT);
}

#[tokio::test(start_paused = true)]
async fn test_late_acknowledgement_after_timeout_is_stale() {
    let dispatcher = dispatcher();
    let pending = dispatcher
        .submit(&Command::new(ENTITY, "cmd-late"), request_set(&["persisted"]))
        .unwrap();
    let result = pending.await.unwrap();
    assert!(result.get(&AcknowledgementLabel::PERSISTED).unwrap().is_timeout());

    assert_eq!(
        dispatcher.route_acknowledgement(ack("persisted", "cmd-late", AckStatus::OK)),
        RouteOutcome::Stale
    );
    assert_eq!(dispatcher.stats().stale_arrivals, 1);
}

// ============================================================================
// Submission
// ============================================================================

#[tokio::test]
async fn test_empty_request_set_resolves_immediately() {
    let dispatcher = dispatcher();
    let pending = dispatcher
        .submit(
            &Command::new(ENTITY, "cmd-c"),
            RequestSet::empty(Duration::from_secs(10)),
        )
        .unwrap();

    assert!(pending.is_immediate());
    assert_eq!(dispatcher.open_count(), 0);
    assert_eq!(dispatcher.stats().submitted, 0);

    let result = pending.await.unwrap();
    assert!(result.is_empty());
    assert_eq!(result.overall_status(), AckStatus::OK);
}

#[tokio::test]
async fn test_duplicate_correlation_id_rejected_while_open() {
    let dispatcher = dispatcher();
    let command = Command::new(ENTITY, "cmd-d");
    let first = dispatcher.submit(&command, request_set(&["persisted"])).unwrap();

    let err = dispatcher
        .submit(&command, request_set(&["indexed"]))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::DuplicateCorrelationId);
    assert_eq!(dispatcher.open_count(), 1);

    // the first aggregation is untouched
    dispatcher.route_acknowledgement(ack("persisted", "cmd-d", AckStatus::OK));
    assert!(first.await.unwrap().is_successful());

    // and the id is free again once it finished
    let again = dispatcher.submit(&command, request_set(&["indexed"]));
    assert!(again.is_ok());
    dispatcher.shutdown();
}

#[tokio::test]
async fn test_submit_enforces_configured_max_labels() {
    let dispatcher = Dispatcher::new(AckConfig {
        max_labels: 2,
        ..AckConfig::default()
    });
    let oversized = RequestSet::build(
        (0..50).map(|i| label(&format!("consumer-{i}"))),
        &HashMap::new(),
        Duration::from_secs(10),
        usize::MAX,
    )
    .unwrap();

    let err = dispatcher
        .submit(&Command::new(ENTITY, "cmd-many"), oversized)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::TooManyLabels);
    assert_eq!(dispatcher.open_count(), 0);
    assert_eq!(dispatcher.stats().submitted, 0);

    let within = dispatcher.submit(&Command::new(ENTITY, "cmd-few"), request_set(&["persisted", "indexed"]));
    assert!(within.is_ok());
    dispatcher.shutdown();
}

#[tokio::test]
async fn test_submit_enforces_configured_label_length() {
    let dispatcher = Dispatcher::new(AckConfig {
        max_label_length: 10,
        ..AckConfig::default()
    });
    let decoded: RequestSet = RequestSet::from_requests(
        vec![serde_json::from_value(serde_json::json!({ "label": "warehouse:replicated" })).unwrap()],
        Duration::from_secs(10),
        20,
    )
    .unwrap();

    let err = dispatcher
        .submit(&Command::new(ENTITY, "cmd-long"), decoded)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidLabel);
    assert!(!dispatcher.is_open(&CorrelationId::from("cmd-long")));
}

#[tokio::test]
async fn test_huge_per_label_timeout_is_accepted() {
    let dispatcher = dispatcher();
    let mut timeouts = HashMap::new();
    timeouts.insert(AcknowledgementLabel::PERSISTED, Duration::from_secs(u64::MAX / 2));
    let requests = RequestSet::build(
        [AcknowledgementLabel::PERSISTED],
        &timeouts,
        Duration::from_secs(10),
        20,
    )
    .unwrap();

    let pending = dispatcher
        .submit(&Command::new(ENTITY, "cmd-forever"), requests)
        .unwrap();
    assert!(dispatcher.is_open(&CorrelationId::from("cmd-forever")));

    assert_eq!(
        dispatcher.route_acknowledgement(ack("persisted", "cmd-forever", AckStatus::OK)),
        RouteOutcome::Completed
    );
    let result = pending.await.unwrap();
    assert!(result.is_successful());
    assert_eq!(dispatcher.open_count(), 0);
}

// ============================================================================
// Routing edge cases
// ============================================================================

#[tokio::test]
async fn test_first_acknowledgement_per_label_wins() {
    let dispatcher = dispatcher();
    let pending = dispatcher
        .submit(&Command::new(ENTITY, "cmd-first"), request_set(&["persisted", "indexed"]))
        .unwrap();

    dispatcher.route_acknowledgement(ack("persisted", "cmd-first", AckStatus::CONFLICT));
    assert_eq!(
        dispatcher.route_acknowledgement(ack("persisted", "cmd-first", AckStatus::OK)),
        RouteOutcome::Ignored(IgnoreReason::AlreadyReceived)
    );
    dispatcher.route_acknowledgement(ack("indexed", "cmd-first", AckStatus::OK));

    let result = pending.await.unwrap();
    assert_eq!(
        result.get(&AcknowledgementLabel::PERSISTED).unwrap().status(),
        AckStatus::CONFLICT
    );
    assert_eq!(result.overall_status(), AckStatus::CONFLICT);
}

#[tokio::test]
async fn test_unrequested_label_ignored() {
    let dispatcher = dispatcher();
    let _pending = dispatcher
        .submit(&Command::new(ENTITY, "cmd-x"), request_set(&["persisted"]))
        .unwrap();

    assert_eq!(
        dispatcher.route_acknowledgement(ack("indexed", "cmd-x", AckStatus::OK)),
        RouteOutcome::Ignored(IgnoreReason::NotRequested)
    );
    assert!(dispatcher.is_open(&CorrelationId::from("cmd-x")));
    dispatcher.shutdown();
}

#[tokio::test]
async fn test_unknown_correlation_id_is_stale() {
    let dispatcher = dispatcher();
    let before = dispatcher.open_count();

    let outcome = dispatcher.route_acknowledgement(ack("persisted", "cmd-nobody", AckStatus::OK));

    assert_eq!(outcome, RouteOutcome::Stale);
    assert_eq!(dispatcher.open_count(), before);
    assert_eq!(dispatcher.stats().stale_arrivals, 1);
}

#[tokio::test]
async fn test_arrival_order_does_not_change_result() {
    let deliveries = [
        ("persisted", AckStatus::OK),
        ("indexed", AckStatus::BAD_REQUEST),
        ("audit", AckStatus::INTERNAL_SERVER_ERROR),
    ];
    let orders: [[usize; 3]; 6] = [
        [0, 1, 2],
        [0, 2, 1],
        [1, 0, 2],
        [1, 2, 0],
        [2, 0, 1],
        [2, 1, 0],
    ];

    let dispatcher = dispatcher();
    let mut results = Vec::new();
    for (run, order) in orders.iter().enumerate() {
        let correlation_id = format!("cmd-perm-{run}");
        let pending = dispatcher
            .submit(
                &Command::new(ENTITY, correlation_id.as_str()),
                request_set(&["persisted", "indexed", "audit"]),
            )
            .unwrap();
        for &index in order {
            let (name, status) = deliveries[index];
            dispatcher.route_acknowledgement(ack(name, &correlation_id, status));
        }
        results.push(pending.await.unwrap());
    }

    let first = &results[0];
    assert_eq!(first.overall_status(), AckStatus::INTERNAL_SERVER_ERROR);
    for result in &results[1..] {
        assert_eq!(result.overall_status(), first.overall_status());
        assert_eq!(labels_of(result), labels_of(first));
        let statuses: Vec<_> = result.iter().map(Acknowledgement::status).collect();
        let expected: Vec<_> = first.iter().map(Acknowledgement::status).collect();
        assert_eq!(statuses, expected);
    }
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_cancel_delivers_partial_result() {
    let dispatcher = dispatcher();
    let id = CorrelationId::from("cmd-cancel");
    let pending = dispatcher
        .submit(&Command::new(ENTITY, id.clone()), request_set(&["persisted", "indexed"]))
        .unwrap();
    dispatcher.route_acknowledgement(ack("persisted", "cmd-cancel", AckStatus::OK));

    assert!(dispatcher.cancel(&id));
    assert!(!dispatcher.cancel(&id));

    let result = pending.await.unwrap();
    assert!(result.get(&AcknowledgementLabel::INDEXED).unwrap().is_timeout());
    assert_eq!(dispatcher.stats().cancelled, 1);
}

#[tokio::test]
async fn test_shutdown_cancels_everything_open() {
    let dispatcher = dispatcher();
    let first = dispatcher
        .submit(&Command::new(ENTITY, "cmd-s1"), request_set(&["persisted"]))
        .unwrap();
    let second = dispatcher
        .submit(&Command::new(ENTITY, "cmd-s2"), request_set(&["indexed"]))
        .unwrap();

    assert_eq!(dispatcher.shutdown(), 2);
    assert_eq!(dispatcher.open_count(), 0);
    assert_eq!(first.await.unwrap().missing_labels().count(), 1);
    assert_eq!(second.await.unwrap().missing_labels().count(), 1);
}

#[tokio::test]
async fn test_dropped_caller_still_reclaims_entry() {
    let dispatcher = dispatcher();
    let pending = dispatcher
        .submit(&Command::new(ENTITY, "cmd-gone"), request_set(&["persisted"]))
        .unwrap();
    drop(pending);

    assert_eq!(
        dispatcher.route_acknowledgement(ack("persisted", "cmd-gone", AckStatus::OK)),
        RouteOutcome::Completed
    );
    assert_eq!(dispatcher.open_count(), 0);
}

// ============================================================================
// Policy and concurrency
// ============================================================================

#[derive(Debug)]
struct AlwaysAccepted;

impl StatusMerge for AlwaysAccepted {
    fn merge(&self, _requested: usize, _entries: &[Acknowledgement]) -> AckStatus {
        AckStatus::ACCEPTED
    }
}

#[tokio::test]
async fn test_custom_merge_policy() {
    let dispatcher = Dispatcher::with_merge(AckConfig::default(), Arc::new(AlwaysAccepted));
    let pending = dispatcher
        .submit(&Command::new(ENTITY, "cmd-policy"), request_set(&["persisted"]))
        .unwrap();
    dispatcher.route_acknowledgement(ack("persisted", "cmd-policy", AckStatus::NOT_FOUND));

    assert_eq!(pending.await.unwrap().overall_status(), AckStatus::ACCEPTED);
    assert_eq!(
        SeverityMerge.merge(1, &[ack("persisted", "cmd-policy", AckStatus::NOT_FOUND)]),
        AckStatus::NOT_FOUND
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_delivery_from_many_tasks() {
    let dispatcher = dispatcher();
    let labels = ["persisted", "indexed", "live-response", "audit", "billing", "search"];
    let commands = 50;

    let mut pendings = Vec::new();
    for n in 0..commands {
        let id = format!("cmd-conc-{n}");
        pendings.push(
            dispatcher
                .submit(&Command::new(ENTITY, id.as_str()), request_set(&labels))
                .unwrap(),
        );
    }

    let mut senders = Vec::new();
    for name in labels {
        let dispatcher = dispatcher.clone();
        senders.push(tokio::spawn(async move {
            for n in 0..commands {
                // each label reports twice; only the first one may count
                let id = format!("cmd-conc-{n}");
                dispatcher.route_acknowledgement(ack(name, &id, AckStatus::OK));
                dispatcher.route_acknowledgement(ack(name, &id, AckStatus::BAD_REQUEST));
            }
        }));
    }
    for sender in senders {
        sender.await.unwrap();
    }

    for pending in pendings {
        let result = pending.await.unwrap();
        assert_eq!(result.len(), labels.len());
        assert_eq!(result.overall_status(), AckStatus::OK);
    }
    let stats = dispatcher.stats();
    assert_eq!(stats.completed, commands as u64);
    assert_eq!(stats.open, 0);
}
