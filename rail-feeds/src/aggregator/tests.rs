use chrono::{DateTime, Duration, TimeZone, Utc};

use super::*;
use crate::domain::{Crs, Stanox, TrainId};
use crate::fanout::Fanout;
use crate::reference::{LocationIndex, sample_table};
use crate::stores::{
    BerthGraph, Grade, InsightLevel, Severity, Trend, sample_movement, sample_restriction,
    sample_schedule, sample_smart,
};
use crate::transport::networkrail::{
    Activation, BerthStep, Cancellation, FeedKind, FeedRecord, MetricBlock, PunctualitySnapshot,
    RestrictionKind, ScheduleTransaction, StepKind,
};
use crate::transport::stomp::{ConnectionState, PushConfig};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap()
}

fn aggregator() -> Aggregator {
    Aggregator::new(AggregatorConfig::disabled(), LocationIndex::new(sample_table()))
}

fn train(id: &str) -> TrainId {
    TrainId::parse(id).unwrap()
}

fn movement(train: &str, stanox: &str, minute: i64) -> FeedRecord {
    FeedRecord::Movement(sample_movement(train, stanox, minute))
}

/// Time of minute zero in `sample_movement`.
fn movement_base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 15, 10, 0, 0).unwrap()
}

fn punctuality(national: f64, rolling: f64) -> FeedRecord {
    let mut snapshot = PunctualitySnapshot::new(
        now(),
        MetricBlock::new("National", national).with_rolling(rolling),
    );
    snapshot.operators = vec![MetricBlock::new("Great Western Railway", 88.0).with_code("25")];
    FeedRecord::Punctuality(snapshot)
}

#[tokio::test]
async fn latest_movement_sets_position() {
    let agg = aggregator();
    agg.ingest_at(movement("1A23", "73000", 0), now()).await;
    agg.ingest_at(movement("1A23", "74237", 25), now() + Duration::minutes(1))
        .await;

    let active = agg.active_trains_at(now() + Duration::minutes(2)).await;
    assert_eq!(active.len(), 1);
    let record = &active[0];
    assert_eq!(record.train_id, train("1A23"));
    assert_eq!(record.headcode.as_deref(), Some("1A23"));

    let position = record.position.as_ref().unwrap();
    assert_eq!(position.location, "Reading");
    assert_eq!(position.crs, Some(Crs::parse("RDG").unwrap()));
    assert_eq!(position.confidence, Confidence::Movement);
    assert_eq!(record.movements.len(), 2);
    assert!(record.quality.has_movement);
    assert!(!record.quality.is_stale);

    let at_reading = agg
        .trains_at_station_at(&Crs::parse("RDG").unwrap(), now())
        .await;
    assert_eq!(at_reading.len(), 1);
    assert!(agg
        .trains_at_station_at(&Crs::parse("PAD").unwrap(), now())
        .await
        .is_empty());
}

#[tokio::test]
async fn late_movement_is_kept_but_does_not_move_train() {
    let agg = aggregator();
    let mut at_reading = sample_movement("1A23", "74237", 25);
    at_reading.variation_minutes = 4;
    agg.ingest_at(FeedRecord::Movement(at_reading), now()).await;

    // The earlier Paddington departure turns up afterwards.
    let mut at_paddington = sample_movement("1A23", "73000", 0);
    at_paddington.variation_minutes = -1;
    at_paddington.terminated = true;
    let updates = agg
        .ingest_at(FeedRecord::Movement(at_paddington), now() + Duration::minutes(1))
        .await;
    assert!(updates.is_empty());

    let record = agg.train_by_id_at(&train("1A23"), now()).await.unwrap();
    assert_eq!(record.position.unwrap().location, "Reading");
    assert_eq!(record.delay_minutes, 4);
    assert!(!record.terminated);
    assert_eq!(record.movements.len(), 2);
    assert_eq!(agg.recent_movements(10).await.len(), 2);
}

#[tokio::test]
async fn movement_at_same_time_as_position_applies() {
    let agg = aggregator();
    agg.ingest_at(movement("1A23", "73000", 10), now()).await;
    let updates = agg.ingest_at(movement("1A23", "74237", 10), now()).await;
    assert_eq!(updates.len(), 1);

    let record = agg.train_by_id_at(&train("1A23"), now()).await.unwrap();
    assert_eq!(record.position.unwrap().location, "Reading");
}

#[tokio::test]
async fn active_trains_newest_first_and_fresh() {
    let agg = aggregator();
    agg.ingest_at(movement("1A23", "73000", 0), now()).await;
    agg.ingest_at(movement("2C46", "74237", 5), now() + Duration::minutes(10))
        .await;

    let ids: Vec<_> = agg
        .active_trains_at(now() + Duration::minutes(20))
        .await
        .into_iter()
        .map(|t| t.train_id)
        .collect();
    assert_eq!(ids, vec![train("2C46"), train("1A23")]);

    // 1A23 falls out of the 30 minute window first.
    let ids: Vec<_> = agg
        .active_trains_at(now() + Duration::minutes(35))
        .await
        .into_iter()
        .map(|t| t.train_id)
        .collect();
    assert_eq!(ids, vec![train("2C46")]);

    let stale = agg
        .train_by_id_at(&train("1A23"), now() + Duration::minutes(35))
        .await
        .unwrap();
    assert!(stale.quality.is_stale);
    assert!(agg.train_by_id_at(&train("9Z99"), now()).await.is_none());
}

#[tokio::test]
async fn stale_train_is_retained_for_a_day() {
    let agg = aggregator();
    agg.ingest_at(movement("1A23", "73000", 0), now()).await;
    agg.ingest_at(movement("2C46", "74237", 0), now() + Duration::hours(12))
        .await;

    let later = now() + Duration::hours(TRAIN_RETENTION_HOURS) - Duration::minutes(1);
    assert_eq!(agg.prune_at(later).await, 0);
    let record = agg.train_by_id_at(&train("1A23"), later).await.unwrap();
    assert!(record.quality.is_stale);

    let expired = now() + Duration::hours(TRAIN_RETENTION_HOURS) + Duration::minutes(1);
    assert_eq!(agg.prune_at(expired).await, 1);
    assert!(agg.train_by_id_at(&train("1A23"), expired).await.is_none());
    assert!(agg.train_by_id_at(&train("2C46"), expired).await.is_some());
}

#[tokio::test]
async fn restriction_at_location_attaches_to_train() {
    let agg = aggregator();
    agg.ingest_at(
        FeedRecord::Restriction(sample_restriction("T1", RestrictionKind::Temporary, 30, 1)),
        now(),
    )
    .await;
    agg.ingest_at(movement("1A23", "74237", 0), now()).await;
    agg.ingest_at(movement("2C46", "88701", 0), now()).await;

    let record = agg.train_by_id_at(&train("1A23"), now()).await.unwrap();
    assert_eq!(record.restrictions.len(), 1);
    assert_eq!(record.restrictions[0].severity, Severity::High);
    assert!(record.restrictions[0].impact_score > 50.0);
    assert!((record.restriction_delay_minutes - 3.5).abs() < 1e-9);

    let elsewhere = agg.train_by_id_at(&train("2C46"), now()).await.unwrap();
    assert!(elsewhere.restrictions.is_empty());
    assert_eq!(elsewhere.restriction_delay_minutes, 0.0);
}

#[tokio::test]
async fn new_restriction_refreshes_trains_already_there() {
    let agg = aggregator();
    agg.ingest_at(movement("1A23", "74237", 0), now()).await;
    assert!(agg
        .train_by_id_at(&train("1A23"), now())
        .await
        .unwrap()
        .restrictions
        .is_empty());

    agg.ingest_at(
        FeedRecord::Restriction(sample_restriction("E1", RestrictionKind::Emergency, 50, 2)),
        now(),
    )
    .await;
    let record = agg.train_by_id_at(&train("1A23"), now()).await.unwrap();
    assert_eq!(record.restrictions.len(), 1);
    assert_eq!(record.restrictions[0].severity, Severity::Critical);
}

#[tokio::test]
async fn declining_punctuality_rolls_up() {
    let agg = aggregator();
    agg.ingest_at(movement("1A23", "73000", 0), now()).await;
    agg.ingest_at(punctuality(70.0, 85.0), now()).await;

    let report = agg.punctuality().await.unwrap();
    assert_eq!(report.national.trend, Trend::Declining);
    assert_eq!(report.national.metric.grade, Grade::Poor);
    assert!(report
        .insights
        .iter()
        .any(|i| i.level == InsightLevel::Critical));

    let status = agg.network_status_at(now()).await;
    assert_eq!(status.health, NetworkHealth::Degraded);
    assert_eq!(status.trend, Some(Trend::Declining));
    assert_eq!(status.national_punctuality, Some(70.0));
    assert_eq!(status.active_trains, 1);

    // Sample movements carry TOC 25.
    let record = agg.train_by_id_at(&train("1A23"), now()).await.unwrap();
    let summary = record.punctuality.unwrap();
    assert_eq!(summary.operator, "Great Western Railway");
    assert_eq!(summary.grade, Grade::Fair);
}

#[test]
fn health_bands() {
    assert_eq!(NetworkHealth::from_percentage(95.0), NetworkHealth::Excellent);
    assert_eq!(NetworkHealth::from_percentage(94.9), NetworkHealth::Good);
    assert_eq!(NetworkHealth::from_percentage(85.0), NetworkHealth::Good);
    assert_eq!(NetworkHealth::from_percentage(70.0), NetworkHealth::Degraded);
    assert_eq!(NetworkHealth::from_percentage(69.9), NetworkHealth::Poor);
}

#[tokio::test]
async fn health_follows_feed_liveness() {
    let config = AggregatorConfig {
        network_rail: None,
        feeds: vec![FeedKind::Movements, FeedKind::Punctuality],
    };
    let agg = Aggregator::new(config, LocationIndex::new(sample_table()));

    let status = agg.network_status_at(now()).await;
    assert_eq!(status.health, NetworkHealth::Poor);
    assert_eq!(status.feeds.len(), 2);
    assert!(status.feeds.iter().all(|f| !f.live));

    agg.ingest_at(movement("1A23", "73000", 0), now()).await;
    let status = agg.network_status_at(now()).await;
    assert_eq!(status.health, NetworkHealth::Unknown);
    assert!(status.feeds[0].live);
    assert!(!status.feeds[1].live);

    agg.ingest_at(punctuality(96.0, 95.0), now()).await;
    let status = agg.network_status_at(now()).await;
    assert_eq!(status.health, NetworkHealth::Excellent);

    // Every feed quiet again: punctuality no longer counts.
    let status = agg.network_status_at(now() + Duration::hours(1)).await;
    assert_eq!(status.health, NetworkHealth::Poor);
}

#[tokio::test]
async fn activation_links_schedule_either_way_round() {
    let agg = aggregator();
    let activation = |train_id: &str, uid: &str| {
        FeedRecord::Activation(Activation {
            train_id: train(train_id),
            schedule_uid: uid.to_string(),
            origin_stanox: Stanox::parse("73000").ok(),
            origin_departure: None,
            toc_id: Some("25".into()),
        })
    };

    // Activation first, schedule later.
    agg.ingest_at(activation("1A23", "W12345"), now()).await;
    let record = agg.train_by_id_at(&train("1A23"), now()).await.unwrap();
    assert_eq!(record.schedule_uid.as_deref(), Some("W12345"));
    assert!(record.schedule.is_none());

    agg.ingest_at(
        FeedRecord::Schedule(sample_schedule("W12345", ScheduleTransaction::Create)),
        now(),
    )
    .await;
    let record = agg.train_by_id_at(&train("1A23"), now()).await.unwrap();
    let schedule = record.schedule.unwrap();
    assert_eq!(schedule.origin_name, "London Paddington");
    assert_eq!(schedule.destination_name, "Swindon");
    assert!(record.quality.has_schedule);

    // Schedule first, activation later.
    agg.ingest_at(
        FeedRecord::Schedule(sample_schedule("V99999", ScheduleTransaction::Create)),
        now(),
    )
    .await;
    agg.ingest_at(activation("2C46", "V99999"), now()).await;
    let record = agg.train_by_id_at(&train("2C46"), now()).await.unwrap();
    assert_eq!(record.schedule.unwrap().uid, "V99999");

    agg.ingest_at(
        FeedRecord::Schedule(sample_schedule("W12345", ScheduleTransaction::Delete)),
        now(),
    )
    .await;
    let record = agg.train_by_id_at(&train("1A23"), now()).await.unwrap();
    assert!(record.schedule.is_none());
    assert!(!record.quality.has_schedule);
}

#[tokio::test]
async fn cancellation_marks_record_and_publishes() {
    let fanout = Fanout::memory();
    let agg = aggregator().with_fanout(fanout.clone());
    agg.ingest_at(movement("1A23", "73000", 0), now()).await;

    let updates = agg
        .ingest_at(
            FeedRecord::Cancellation(Cancellation {
                train_id: train("1A23"),
                stanox: Stanox::parse("74237").ok(),
                reason_code: Some("YI".into()),
                cancelled_at: Some(now()),
            }),
            now(),
        )
        .await;
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].is_cancelled, Some(true));

    let record = agg.train_by_id_at(&train("1A23"), now()).await.unwrap();
    assert!(record.is_cancelled);
    assert_eq!(record.cancel_reason.as_deref(), Some("YI"));

    let published = fanout.snapshot(10).await.unwrap();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].service_id, "1A23");
    assert_eq!(published[0].is_cancelled, Some(true));
    // The earlier movement's time survives the merge.
    assert_eq!(published[0].actual.as_deref(), Some("10:00"));
}

fn berth_graph() -> BerthGraph {
    let mut arrive = sample_smart("D3", "0001", "0003");
    arrive.event = Some("A".into());
    arrive.stanox = Some("74237".into());
    arrive.platform = Some("7".into());
    BerthGraph::load(vec![arrive, sample_smart("D3", "0003", "0005")])
}

fn step(descr: &str, from: &str, to: &str, at: DateTime<Utc>) -> FeedRecord {
    FeedRecord::Berth(BerthStep {
        area_id: "D3".into(),
        kind: StepKind::Step,
        from: Some(from.into()),
        to: Some(to.into()),
        description: descr.into(),
        at,
    })
}

#[tokio::test]
async fn berth_step_moves_unique_headcode() {
    let agg = aggregator();
    assert_eq!(agg.load_berths(berth_graph()).await, 3);
    agg.ingest_at(movement("1A23", "73000", 0), now()).await;

    agg.ingest_at(step("1A23", "0001", "0003", now()), now()).await;
    let record = agg.train_by_id_at(&train("1A23"), now()).await.unwrap();
    let position = record.position.unwrap();
    assert_eq!(position.confidence, Confidence::Berth);
    assert_eq!(position.berth.as_deref(), Some("D3:0003"));
    assert_eq!(position.location, "Reading");
    assert_eq!(position.crs, Some(Crs::parse("RDG").unwrap()));
    assert_eq!(position.platform.as_deref(), Some("7"));
    assert!(record.quality.has_berth);

    // A step older than the current position is ignored.
    agg.ingest_at(step("1A23", "0003", "0005", now() - Duration::hours(3)), now())
        .await;
    let record = agg.train_by_id_at(&train("1A23"), now()).await.unwrap();
    assert_eq!(record.position.unwrap().berth.as_deref(), Some("D3:0003"));
}

#[tokio::test]
async fn berth_step_never_overrides_newer_movement() {
    let agg = aggregator();
    agg.load_berths(berth_graph()).await;
    // Departed Swindon at 10:40; the berth step at Reading is from 10:20.
    agg.ingest_at(movement("1A23", "88701", 40), now()).await;
    agg.ingest_at(
        step("1A23", "0001", "0003", movement_base() + Duration::minutes(20)),
        now(),
    )
    .await;

    let record = agg.train_by_id_at(&train("1A23"), now()).await.unwrap();
    let position = record.position.unwrap();
    assert_eq!(position.confidence, Confidence::Movement);
    assert_eq!(position.location, "Swindon");
    assert!(!record.quality.has_berth);

    // A later step does take over.
    agg.ingest_at(
        step("1A23", "0003", "0005", movement_base() + Duration::minutes(45)),
        now(),
    )
    .await;
    let record = agg.train_by_id_at(&train("1A23"), now()).await.unwrap();
    assert_eq!(record.position.unwrap().confidence, Confidence::Berth);
}

#[tokio::test]
async fn ambiguous_headcode_is_not_placed() {
    let agg = aggregator();
    agg.load_berths(berth_graph()).await;
    agg.ingest_at(movement("721A23MH15", "73000", 0), now()).await;
    agg.ingest_at(movement("891A23MX15", "88701", 0), now()).await;

    agg.ingest_at(step("1A23", "0001", "0003", now()), now()).await;
    for id in ["721A23MH15", "891A23MX15"] {
        let record = agg.train_by_id_at(&train(id), now()).await.unwrap();
        assert_eq!(record.position.unwrap().confidence, Confidence::Movement);
    }
}

#[tokio::test]
async fn movements_publish_updates() {
    let fanout = Fanout::memory();
    let agg = aggregator().with_fanout(fanout.clone());
    let updates = agg.ingest_at(movement("1A23", "74237", 5), now()).await;
    assert_eq!(updates[0].location.as_deref(), Some("RDG"));
    assert_eq!(updates[0].train_id.as_deref(), Some("1A23"));

    let recent = agg.recent_movements(5).await;
    assert_eq!(recent.len(), 1);
    assert_eq!(fanout.snapshot(5).await.unwrap().len(), 1);
}

#[tokio::test]
async fn disabled_lifecycle_is_a_no_op() {
    let agg = aggregator();
    assert!(!agg.is_enabled());
    agg.start().await;
    assert!(agg.connection_state().is_none());
    assert!(!agg.restart_failed().await);
    agg.stop().await;
    agg.stop().await;
}

#[tokio::test]
async fn stop_is_idempotent_and_restartable() {
    let push = PushConfig::new("network-rail", "127.0.0.1", 9, "user", "pass")
        .with_connect_timeout(std::time::Duration::from_millis(200));
    let config = AggregatorConfig::new(push, vec![FeedKind::Movements]);
    let agg = Aggregator::new(config, LocationIndex::new(sample_table()));

    agg.stop().await;
    agg.start().await;
    agg.stop().await;
    assert_eq!(agg.connection_state(), Some(ConnectionState::Stopped));
    agg.stop().await;

    // The receiver was handed back, so a second start consumes again.
    agg.start().await;
    agg.stop().await;
    assert_eq!(agg.connection_state(), Some(ConnectionState::Stopped));
}
