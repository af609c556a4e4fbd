//! End-to-end tests of the ingestion pipeline: publish, aggregate, flush,
//! alert and notify.

mod test_utils;

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
};
use tokio_util::sync::CancellationToken;

use periscope::alerting::{AlertingScheduler, DispatchOutcome};
use periscope::clock::system_clock;
use periscope::ingestion::{
    AggregatedEvent, Aggregator, GlobalEventKey, MAX_BATCH_PERSIST_ATTEMPTS, PersistenceFlusher,
    SdkEvent, extract, fingerprint,
};
use periscope::models::alert_destination_type::KEY_INTERNAL_LOGGER;
use periscope::models::{alert, alert_destination_notification, event};
use periscope::notification::ChannelRegistry;
use periscope::repositories::{
    AlertRepository, DestinationRepository, EventRepository, NotificationRepository,
    ProjectRepository,
};
use periscope::service::ServiceHandle;
use test_utils::{add_destination, create_project, sdk_event, setup_test_db};

const E2E_FINGERPRINT: [&str; 4] = ["test", "1", "2", "3"];
const E2E_AGGREGATION_KEY: &str =
    "db2f296ee4911637b28a15c52d6d861a38fdd8203296535a2fdb59e3abb7bbb9";

fn flusher(
    db: &DatabaseConnection,
    aggregator: Arc<Aggregator>,
    interval: Duration,
) -> PersistenceFlusher {
    flusher_with_timeout(db, aggregator, interval, Duration::from_secs(5))
}

fn flusher_with_timeout(
    db: &DatabaseConnection,
    aggregator: Arc<Aggregator>,
    interval: Duration,
    flush_timeout: Duration,
) -> PersistenceFlusher {
    PersistenceFlusher::new(
        aggregator,
        ProjectRepository::new(db.clone()),
        EventRepository::new(db.clone()),
        interval,
        flush_timeout,
    )
}

/// Makes every insert into `events` fail until [`unblock_event_inserts`] runs.
async fn block_event_inserts(db: &DatabaseConnection) {
    db.execute_unprepared(
        "CREATE TRIGGER block_events BEFORE INSERT ON events \
         BEGIN SELECT RAISE(ABORT, 'events blocked'); END;",
    )
    .await
    .expect("create trigger");
}

async fn unblock_event_inserts(db: &DatabaseConnection) {
    db.execute_unprepared("DROP TRIGGER block_events")
        .await
        .expect("drop trigger");
}

fn scheduler(db: &DatabaseConnection) -> AlertingScheduler {
    AlertingScheduler::new(
        AlertRepository::new(db.clone()),
        NotificationRepository::new(db.clone()),
        DestinationRepository::new(db.clone()),
        EventRepository::new(db.clone()),
        ChannelRegistry::with_defaults(Client::new(), system_clock()),
        Duration::from_secs(3600),
        Duration::from_secs(5),
    )
}

/// Publishes `events` and runs the consumer until the channel is drained.
async fn publish_and_consume(
    aggregator: &Aggregator,
    project_id: i32,
    events: Vec<SdkEvent>,
) {
    let subscription = aggregator.subscribe().expect("first subscription");
    for event in events {
        aggregator.publish(project_id, event).await.expect("publish");
    }

    let stopped = CancellationToken::new();
    stopped.cancel();
    aggregator.consume(subscription, stopped).await;
}

async fn event_count(db: &DatabaseConnection, project_id: i32) -> u64 {
    event::Entity::find()
        .filter(event::Column::ProjectId.eq(project_id))
        .count(db)
        .await
        .expect("count events")
}

#[tokio::test]
async fn ten_events_raise_one_alert_and_one_delivered_notification() {
    let _ = tracing_subscriber::fmt::try_init();
    let db = setup_test_db().await.expect("db");
    let project = create_project(&db, "e2e").await.expect("project");
    let project_id = project.project.id;
    add_destination(&db, project_id, KEY_INTERNAL_LOGGER, None)
        .await
        .expect("log destination");

    let aggregator = Arc::new(Aggregator::new(64));
    let events = (0..10)
        .map(|i| sdk_event(&format!("event-{i}"), &E2E_FINGERPRINT, "division by zero"))
        .collect();
    publish_and_consume(&aggregator, project_id, events).await;
    assert_eq!(aggregator.pending(), 10);

    let stats = flusher(&db, Arc::clone(&aggregator), Duration::from_secs(3600))
        .flush()
        .await;
    assert_eq!(stats.events_persisted, 10);
    assert_eq!(stats.groups_created, 1);
    assert_eq!(aggregator.pending(), 0);

    assert_eq!(fingerprint(&E2E_FINGERPRINT), E2E_AGGREGATION_KEY);
    let group = EventRepository::new(db.clone())
        .find_group(project_id, E2E_AGGREGATION_KEY)
        .await
        .expect("lookup")
        .expect("group exists");
    assert_eq!(group.total_count, 10);
    assert_eq!(event_count(&db, project_id).await, 10);

    let alerts = alert::Entity::find().all(&db).await.expect("alerts");
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].event_group_id, group.id);
    assert_eq!(alerts[0].title, "division by zero");
    assert!(alerts[0].notified_at.is_none());

    let report = scheduler(&db).tick().await;
    assert_eq!(report.advanced_alert_id, Some(alerts[0].id));
    assert_eq!(report.notifications_created, 1);
    assert!(matches!(
        report.dispatch,
        Some(DispatchOutcome::Delivered { .. })
    ));

    let notifications = alert_destination_notification::Entity::find()
        .all(&db)
        .await
        .expect("notifications");
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].total_attempts, 1);
    assert!(notifications[0].completed_at.is_some());
    assert!(notifications[0].failed_at.is_none());

    let alert = AlertRepository::new(db.clone())
        .find_by_id(alerts[0].id)
        .await
        .expect("lookup")
        .expect("alert exists");
    assert!(alert.notified_at.is_some());

    let idle = scheduler(&db).tick().await;
    assert_eq!(idle.advanced_alert_id, None);
    assert_eq!(idle.dispatch, None);
}

fn enqueue_direct(aggregator: &Aggregator, project_id: i32, event_id: &str, elements: &[&str]) {
    let project_event = extract(project_id, &sdk_event(event_id, elements, "timeout"))
        .expect("extract");
    aggregator.enqueue(AggregatedEvent {
        aggregation_key: GlobalEventKey {
            project_id,
            hash: project_event.fingerprint.clone(),
        },
        project_event,
    });
}

#[tokio::test]
async fn later_batches_extend_existing_group_without_new_alert() {
    let db = setup_test_db().await.expect("db");
    let project_id = create_project(&db, "repeat").await.expect("project").project.id;
    let aggregator = Arc::new(Aggregator::new(64));
    let flusher = flusher(&db, Arc::clone(&aggregator), Duration::from_secs(3600));

    for i in 0..6 {
        enqueue_direct(&aggregator, project_id, &format!("first-{i}"), &["checkout"]);
    }
    let first = flusher.flush().await;
    assert_eq!(first.groups_created, 1);
    assert_eq!(first.events_persisted, 6);

    for i in 0..4 {
        enqueue_direct(&aggregator, project_id, &format!("second-{i}"), &["checkout"]);
    }
    let second = flusher.flush().await;
    assert_eq!(second.groups_created, 0);
    assert_eq!(second.events_persisted, 4);

    let group = EventRepository::new(db.clone())
        .find_group(project_id, &fingerprint(&["checkout"]))
        .await
        .expect("lookup")
        .expect("group");
    assert_eq!(group.total_count, 10);
    assert_eq!(alert::Entity::find().count(&db).await.expect("count"), 1);
}

#[tokio::test]
async fn events_for_unknown_projects_are_discarded() {
    let db = setup_test_db().await.expect("db");
    let aggregator = Arc::new(Aggregator::new(8));
    publish_and_consume(&aggregator, 999, vec![sdk_event("ghost", &["x"], "boom")]).await;

    let stats = flusher(&db, Arc::clone(&aggregator), Duration::from_secs(3600))
        .flush()
        .await;
    assert_eq!(stats.batches_skipped, 1);
    assert_eq!(stats.events_persisted, 0);
    assert_eq!(aggregator.pending(), 0);
    assert_eq!(event_count(&db, 999).await, 0);
}

#[tokio::test]
async fn shutdown_drains_channel_and_buckets_into_storage() {
    let _ = tracing_subscriber::fmt::try_init();
    let db = setup_test_db().await.expect("db");
    let project_id = create_project(&db, "drain").await.expect("project").project.id;

    let aggregator = Arc::new(Aggregator::new(64));
    let subscription = aggregator.subscribe().expect("subscription");
    let root = CancellationToken::new();

    let consumer = {
        let aggregator = Arc::clone(&aggregator);
        ServiceHandle::spawn("aggregator-consumer", &root, move |token| async move {
            aggregator.consume(subscription, token).await;
        })
    };
    let flusher = flusher(&db, Arc::clone(&aggregator), Duration::from_secs(3600));
    let flusher = ServiceHandle::spawn("persistence-flusher", &root, move |token| {
        flusher.run(token)
    });

    for i in 0..5 {
        aggregator
            .publish(project_id, sdk_event(&format!("a-{i}"), &["alpha"], "alpha failed"))
            .await
            .expect("publish");
        aggregator
            .publish(project_id, sdk_event(&format!("b-{i}"), &["beta"], "beta failed"))
            .await
            .expect("publish");
    }

    consumer.stop_and_wait().await;
    assert_eq!(event_count(&db, project_id).await, 0);
    flusher.stop_and_wait().await;

    assert_eq!(aggregator.pending(), 0);
    assert_eq!(event_count(&db, project_id).await, 10);
    assert_eq!(alert::Entity::find().count(&db).await.expect("count"), 2);
}

#[tokio::test]
async fn batch_larger_than_bind_limit_is_persisted_in_one_flush() {
    let db = setup_test_db().await.expect("db");
    let project_id = create_project(&db, "hot").await.expect("project").project.id;
    let aggregator = Arc::new(Aggregator::new(8));

    for i in 0..3500 {
        enqueue_direct(&aggregator, project_id, &format!("hot-{i}"), &["hot"]);
    }

    let stats = flusher(&db, Arc::clone(&aggregator), Duration::from_secs(3600))
        .flush()
        .await;
    assert_eq!(stats.batches, 1);
    assert_eq!(stats.events_persisted, 3500);
    assert_eq!(stats.groups_created, 1);
    assert_eq!(stats.batches_requeued, 0);
    assert_eq!(aggregator.pending(), 0);

    let group = EventRepository::new(db.clone())
        .find_group(project_id, &fingerprint(&["hot"]))
        .await
        .expect("lookup")
        .expect("group");
    assert_eq!(group.total_count, 3500);
    assert_eq!(event_count(&db, project_id).await, 3500);
}

#[tokio::test]
async fn flush_deadline_requeues_current_and_remaining_batches() {
    let _ = tracing_subscriber::fmt::try_init();
    let db = setup_test_db().await.expect("db");
    let project_id = create_project(&db, "late").await.expect("project").project.id;
    let aggregator = Arc::new(Aggregator::new(8));

    for i in 0..3 {
        enqueue_direct(&aggregator, project_id, &format!("a-{i}"), &["alpha"]);
        enqueue_direct(&aggregator, project_id, &format!("b-{i}"), &["beta"]);
    }

    let stats = flusher_with_timeout(
        &db,
        Arc::clone(&aggregator),
        Duration::from_secs(3600),
        Duration::ZERO,
    )
    .flush()
    .await;
    assert_eq!(stats.batches_requeued, 2);
    assert_eq!(stats.events_persisted, 0);
    assert_eq!(stats.batches_dropped, 0);
    assert_eq!(aggregator.pending(), 6);
    assert_eq!(event_count(&db, project_id).await, 0);

    let retry = flusher(&db, Arc::clone(&aggregator), Duration::from_secs(3600))
        .flush()
        .await;
    assert_eq!(retry.events_persisted, 6);
    assert_eq!(retry.groups_created, 2);
    assert_eq!(aggregator.pending(), 0);
}

#[tokio::test]
async fn storage_error_requeues_batch_for_next_cycle() {
    let _ = tracing_subscriber::fmt::try_init();
    let db = setup_test_db().await.expect("db");
    let project_id = create_project(&db, "flaky").await.expect("project").project.id;
    let aggregator = Arc::new(Aggregator::new(8));
    let flusher = flusher(&db, Arc::clone(&aggregator), Duration::from_secs(3600));

    for i in 0..4 {
        enqueue_direct(&aggregator, project_id, &format!("e-{i}"), &["disk"]);
    }
    block_event_inserts(&db).await;

    let failed = flusher.flush().await;
    assert_eq!(failed.batches_requeued, 1);
    assert_eq!(failed.events_persisted, 0);
    assert_eq!(aggregator.pending(), 4);
    assert_eq!(event_count(&db, project_id).await, 0);
    assert_eq!(alert::Entity::find().count(&db).await.expect("count"), 0);

    unblock_event_inserts(&db).await;
    let recovered = flusher.flush().await;
    assert_eq!(recovered.events_persisted, 4);
    assert_eq!(recovered.groups_created, 1);
    assert_eq!(aggregator.pending(), 0);
    assert_eq!(event_count(&db, project_id).await, 4);
}

#[tokio::test]
async fn batch_is_dropped_after_repeated_storage_errors() {
    let _ = tracing_subscriber::fmt::try_init();
    let db = setup_test_db().await.expect("db");
    let project_id = create_project(&db, "doomed").await.expect("project").project.id;
    let aggregator = Arc::new(Aggregator::new(8));
    let flusher = flusher(&db, Arc::clone(&aggregator), Duration::from_secs(3600));

    for i in 0..3 {
        enqueue_direct(&aggregator, project_id, &format!("e-{i}"), &["poison"]);
    }
    block_event_inserts(&db).await;

    for _ in 1..MAX_BATCH_PERSIST_ATTEMPTS {
        let stats = flusher.flush().await;
        assert_eq!(stats.batches_requeued, 1);
        assert_eq!(stats.batches_dropped, 0);
        assert_eq!(aggregator.pending(), 3);
    }

    let last = flusher.flush().await;
    assert_eq!(last.batches_requeued, 0);
    assert_eq!(last.batches_dropped, 1);
    assert_eq!(aggregator.pending(), 0);

    // A new batch for the same fingerprint starts with a fresh attempt count.
    unblock_event_inserts(&db).await;
    enqueue_direct(&aggregator, project_id, "fresh", &["poison"]);
    let stats = flusher.flush().await;
    assert_eq!(stats.events_persisted, 1);
    assert_eq!(event_count(&db, project_id).await, 1);
}

#[tokio::test]
async fn unknown_project_batch_does_not_block_its_siblings() {
    let db = setup_test_db().await.expect("db");
    let project_id = create_project(&db, "sibling").await.expect("project").project.id;
    let aggregator = Arc::new(Aggregator::new(8));

    enqueue_direct(&aggregator, 999, "ghost", &["shared"]);
    for i in 0..3 {
        enqueue_direct(&aggregator, project_id, &format!("real-{i}"), &["shared"]);
    }

    let stats = flusher(&db, Arc::clone(&aggregator), Duration::from_secs(3600))
        .flush()
        .await;
    assert_eq!(stats.batches, 2);
    assert_eq!(stats.batches_skipped, 1);
    assert_eq!(stats.events_persisted, 3);
    assert_eq!(stats.groups_created, 1);
    assert_eq!(stats.batches_requeued, 0);
    assert_eq!(aggregator.pending(), 0);
    assert_eq!(event_count(&db, project_id).await, 3);
    assert_eq!(event_count(&db, 999).await, 0);
}

#[tokio::test]
async fn final_drain_reports_events_it_could_not_persist() {
    let _ = tracing_subscriber::fmt::try_init();
    let db = setup_test_db().await.expect("db");
    let project_id = create_project(&db, "lost").await.expect("project").project.id;
    let aggregator = Arc::new(Aggregator::new(8));
    let flusher = flusher(&db, Arc::clone(&aggregator), Duration::from_secs(3600));

    for i in 0..2 {
        enqueue_direct(&aggregator, project_id, &format!("e-{i}"), &["stuck"]);
    }
    block_event_inserts(&db).await;

    assert_eq!(flusher.drain().await, 2);
    assert_eq!(aggregator.pending(), 2);

    unblock_event_inserts(&db).await;
    assert_eq!(flusher.drain().await, 0);
    assert_eq!(event_count(&db, project_id).await, 2);
}
