use crate::definitions::{DefinitionEvent, DefinitionService, Detached};
use crate::error::AlertError;
use crate::scheduler::{
    AlertSchedulerClient, InstanceStateChange, RegionChange, SkipReason, Transition,
};
use chrono::{DateTime, Duration, Utc};
use runwatch_common::types::{
    AlertDefinition, AlertStatus, DefinitionUpdate, InstanceState, MAX_THRESHOLD_MINUTES,
};
use runwatch_storage::{AlertStore, DefinitionCache};
use std::collections::BTreeSet;
use std::sync::Arc;
use tempfile::TempDir;

struct Ctx {
    _dir: TempDir,
    store: Arc<AlertStore>,
    defs: DefinitionService,
    client: AlertSchedulerClient,
}

fn setup() -> Ctx {
    runwatch_common::id::init(1, 1);
    let dir = TempDir::new().unwrap();
    let store = Arc::new(AlertStore::open(dir.path(), "runwatch.db").unwrap());
    let cache = Arc::new(DefinitionCache::new(Arc::clone(&store)));
    let defs = DefinitionService::new(Arc::clone(&store), Arc::clone(&cache));
    let client = AlertSchedulerClient::new(Arc::clone(&store), cache);
    Ctx {
        _dir: dir,
        store,
        defs,
        client,
    }
}

fn regions(list: &[&str]) -> BTreeSet<String> {
    list.iter().map(|r| r.to_string()).collect()
}

fn change(
    region: &str,
    instance: &str,
    state: InstanceState,
    launch: DateTime<Utc>,
) -> InstanceStateChange {
    InstanceStateChange {
        instance_id: instance.to_string(),
        instance_name: format!("{instance}-name"),
        region: region.to_string(),
        state,
        launch_time: Some(launch),
    }
}

/// Registers a token, reports `instance` running and enables `region`.
fn running_in_enabled_region(ctx: &Ctx, region: &str, instance: &str, launch: DateTime<Utc>) {
    ctx.client.register_delivery_token("device-1").unwrap();
    ctx.client
        .on_instance_state_changed(change(region, instance, InstanceState::Running, launch))
        .unwrap();
    ctx.client.set_region_enabled(region, true).unwrap();
}

#[test]
fn add_rejects_overlapping_duplicate_threshold() {
    let ctx = setup();
    ctx.defs.add(90, regions(&["us-east-1", "eu-west-1"]), true).unwrap();

    let err = ctx.defs.add(90, regions(&["eu-west-1"]), true).unwrap_err();
    assert!(matches!(err, AlertError::Validation(_)));
    let err = ctx.defs.add(90, BTreeSet::new(), true).unwrap_err();
    assert!(matches!(err, AlertError::Validation(_)));

    ctx.defs.add(90, regions(&["ap-south-1"]), true).unwrap();
    ctx.defs.add(60, regions(&["eu-west-1"]), true).unwrap();
    assert_eq!(ctx.defs.list().unwrap().len(), 3);
}

#[test]
fn add_validates_threshold_and_regions() {
    let ctx = setup();
    assert!(matches!(
        ctx.defs.add(0, BTreeSet::new(), true),
        Err(AlertError::Validation(_))
    ));
    assert!(matches!(
        ctx.defs.add(30, regions(&["US_EAST"]), true),
        Err(AlertError::Validation(_))
    ));
    assert!(matches!(
        ctx.defs.add(MAX_THRESHOLD_MINUTES + 1, BTreeSet::new(), true),
        Err(AlertError::Validation(_))
    ));
    assert!(matches!(
        ctx.defs.add(600_000_000_000, BTreeSet::new(), true),
        Err(AlertError::Validation(_))
    ));
    assert!(ctx.defs.list().unwrap().is_empty());

    let def = ctx.defs.add(MAX_THRESHOLD_MINUTES, BTreeSet::new(), true).unwrap();
    let update = DefinitionUpdate {
        threshold_minutes: Some(MAX_THRESHOLD_MINUTES + 1),
        ..DefinitionUpdate::default()
    };
    assert!(matches!(
        ctx.defs.update(&def.id, update),
        Err(AlertError::Validation(_))
    ));
}

#[test]
fn stored_out_of_range_threshold_is_skipped_not_fatal() {
    let ctx = setup();
    let now = Utc::now();
    // Written before thresholds were bounded.
    ctx.store
        .insert_definition(&AlertDefinition {
            id: "def-legacy".to_string(),
            enabled: true,
            threshold_minutes: 600_000_000_000,
            regions: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        })
        .unwrap();
    ctx.defs.add(30, BTreeSet::new(), true).unwrap();

    running_in_enabled_region(&ctx, "us-east-1", "i-1", now - Duration::minutes(5));
    let alerts = ctx.store.list_alerts_for_region("us-east-1").unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].threshold_minutes, 30);

    let report = ctx.client.reconcile_all().unwrap();
    assert!(report.written.is_empty());
    assert_eq!(report.unchanged, 1);
    assert_eq!(ctx.store.count_alerts().unwrap(), 1);
}

#[test]
fn scenario_b_stop_cancels_before_due() {
    let ctx = setup();
    let t0 = Utc::now() - Duration::minutes(30);
    ctx.defs.add(60, BTreeSet::new(), true).unwrap();
    running_in_enabled_region(&ctx, "r1", "i-1", t0);
    assert_eq!(ctx.store.list_alerts_for_instance("r1", "i-1").unwrap().len(), 1);

    let transition = ctx
        .client
        .on_instance_state_changed(change("r1", "i-1", InstanceState::Stopped, t0))
        .unwrap();
    let Transition::Cancelled(cancelled) = transition else {
        panic!("expected cancellation");
    };
    assert_eq!(cancelled.len(), 1);
    assert_eq!(cancelled[0].status, AlertStatus::Cancelled);

    assert!(ctx.store.due_alerts(t0 + Duration::minutes(60), 100).unwrap().is_empty());
    assert_eq!(ctx.store.count_alerts().unwrap(), 0);
}

#[test]
fn any_non_running_state_cancels() {
    let ctx = setup();
    let t0 = Utc::now();
    ctx.defs.add(60, BTreeSet::new(), true).unwrap();
    running_in_enabled_region(&ctx, "r1", "i-1", t0);

    ctx.client
        .on_instance_state_changed(change("r1", "i-1", InstanceState::ShuttingDown, t0))
        .unwrap();
    assert_eq!(ctx.store.count_alerts().unwrap(), 0);
}

#[test]
fn scenario_c_enable_without_running_instances_fails() {
    let ctx = setup();
    ctx.client
        .on_instance_state_changed(change("r2", "i-1", InstanceState::Stopped, Utc::now()))
        .unwrap();

    let err = ctx.client.set_region_enabled("r2", true).unwrap_err();
    assert!(matches!(err, AlertError::Precondition(_)));
    assert!(!ctx.store.is_region_enabled("r2").unwrap());
}

#[test]
fn scenario_d_shared_threshold_materializes_once() {
    let ctx = setup();
    ctx.defs.add(45, BTreeSet::new(), true).unwrap();
    // Overlap is only checked on creation, so arrive at 45m via update.
    let scoped = ctx.defs.add(30, regions(&["y"]), true).unwrap();
    ctx.defs
        .update(
            &scoped.id,
            DefinitionUpdate {
                threshold_minutes: Some(45),
                ..DefinitionUpdate::default()
            },
        )
        .unwrap();

    running_in_enabled_region(&ctx, "y", "x", Utc::now());

    let alerts = ctx.store.list_alerts_for_region("y").unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].id, "y_x_45");
}

#[test]
fn materialization_is_idempotent() {
    let ctx = setup();
    let t0 = Utc::now() - Duration::minutes(5);
    ctx.defs.add(30, BTreeSet::new(), true).unwrap();
    ctx.defs.add(120, regions(&["r1"]), true).unwrap();
    running_in_enabled_region(&ctx, "r1", "i-1", t0);
    let first = ctx.store.list_alerts_for_region("r1").unwrap();
    assert_eq!(first.len(), 2);

    let again = ctx
        .client
        .on_instance_state_changed(change("r1", "i-1", InstanceState::Running, t0))
        .unwrap();
    let Transition::Materialized(report) = again else {
        panic!("expected materialization");
    };
    assert!(report.written.is_empty());
    assert_eq!(report.unchanged, 2);
    assert_eq!(ctx.store.list_alerts_for_region("r1").unwrap(), first);
}

#[test]
fn past_due_alert_is_still_created() {
    let ctx = setup();
    let t0 = Utc::now() - Duration::hours(5);
    ctx.defs.add(60, BTreeSet::new(), true).unwrap();
    running_in_enabled_region(&ctx, "r1", "i-1", t0);

    let due = ctx.store.due_alerts(Utc::now(), 10).unwrap();
    assert_eq!(due.len(), 1);
    assert!(due[0].scheduled_time < Utc::now());
}

#[test]
fn disabled_region_and_missing_token_skip_materialization() {
    let ctx = setup();
    let t0 = Utc::now();
    ctx.defs.add(60, BTreeSet::new(), true).unwrap();

    let Transition::Materialized(report) = ctx
        .client
        .on_instance_state_changed(change("r1", "i-1", InstanceState::Running, t0))
        .unwrap()
    else {
        panic!("expected materialization");
    };
    assert_eq!(report.skipped, Some(SkipReason::RegionDisabled));

    let RegionChange::Enabled(report) = ctx.client.set_region_enabled("r1", true).unwrap() else {
        panic!("expected enable");
    };
    assert_eq!(report.written.len(), 0);
    assert_eq!(ctx.store.count_alerts().unwrap(), 0);

    let report = ctx.client.register_delivery_token("device-9").unwrap();
    assert_eq!(report.written, vec!["r1_i-1_60".to_string()]);
    let alert = ctx.store.get_alert("r1_i-1_60").unwrap().unwrap();
    assert_eq!(alert.delivery_token, "device-9");
}

#[test]
fn region_disable_only_touches_that_region() {
    let ctx = setup();
    let t0 = Utc::now();
    ctx.defs.add(60, regions(&["r1", "r2"]), true).unwrap();
    running_in_enabled_region(&ctx, "r1", "i-1", t0);
    running_in_enabled_region(&ctx, "r2", "i-2", t0);
    assert_eq!(ctx.store.count_alerts().unwrap(), 2);

    let RegionChange::Disabled(cancelled) = ctx.client.set_region_enabled("r1", false).unwrap()
    else {
        panic!("expected disable");
    };
    assert_eq!(cancelled.len(), 1);
    assert_eq!(ctx.store.list_alerts_for_region("r2").unwrap().len(), 1);
    assert_eq!(ctx.defs.list().unwrap()[0].regions, regions(&["r1", "r2"]));
}

#[test]
fn remove_cascades_only_uncovered_alerts() {
    let ctx = setup();
    let t0 = Utc::now();
    let wide = ctx.defs.add(60, regions(&["r1", "r2"]), true).unwrap();
    let narrow = ctx.defs.add(30, regions(&["r2"]), true).unwrap();
    ctx.defs
        .update(
            &narrow.id,
            DefinitionUpdate {
                threshold_minutes: Some(60),
                ..DefinitionUpdate::default()
            },
        )
        .unwrap();
    running_in_enabled_region(&ctx, "r1", "i-1", t0);
    running_in_enabled_region(&ctx, "r2", "i-2", t0);

    let cancelled = ctx.defs.remove(&wide.id).unwrap();
    assert_eq!(cancelled.len(), 1);
    assert_eq!(cancelled[0].alert.id, "r1_i-1_60");
    assert!(ctx.store.get_alert("r2_i-2_60").unwrap().is_some());
    assert!(matches!(
        ctx.defs.remove(&wide.id),
        Err(AlertError::NotFound { .. })
    ));
}

#[test]
fn definition_removed_under_a_stale_cache_writes_nothing() {
    let ctx = setup();
    let def = ctx.defs.add(60, BTreeSet::new(), true).unwrap();
    running_in_enabled_region(&ctx, "r1", "i-1", Utc::now());
    assert_eq!(ctx.store.count_alerts().unwrap(), 1);
    ctx.client
        .on_instance_state_changed(change("r1", "i-1", InstanceState::Stopped, Utc::now()))
        .unwrap();

    // Removed from the store while the cache still lists it.
    ctx.store.delete_definition(&def.id, None, Utc::now()).unwrap();
    let transition = ctx
        .client
        .on_instance_state_changed(change("r1", "i-1", InstanceState::Running, Utc::now()))
        .unwrap();
    match transition {
        Transition::Materialized(report) => {
            assert!(report.written.is_empty());
            assert_eq!(report.not_covered, 1);
        }
        other => panic!("expected materialization, got {other:?}"),
    }
    assert_eq!(ctx.store.count_alerts().unwrap(), 0);
}

#[tokio::test]
async fn update_event_reconciles_alerts() {
    let ctx = setup();
    let mut events = ctx.defs.subscribe();
    let t0 = Utc::now();
    let def = ctx.defs.add(60, BTreeSet::new(), true).unwrap();
    assert!(matches!(events.recv().await.unwrap(), DefinitionEvent::Added(_)));
    running_in_enabled_region(&ctx, "r1", "i-1", t0);

    ctx.defs
        .update(
            &def.id,
            DefinitionUpdate {
                threshold_minutes: Some(90),
                ..DefinitionUpdate::default()
            },
        )
        .unwrap();
    let event = events.recv().await.unwrap();
    ctx.client.handle_definition_event(&event).unwrap();
    let alerts = ctx.store.list_alerts_for_region("r1").unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].id, "r1_i-1_90");

    ctx.defs
        .update(
            &def.id,
            DefinitionUpdate {
                enabled: Some(false),
                ..DefinitionUpdate::default()
            },
        )
        .unwrap();
    let event = events.recv().await.unwrap();
    ctx.client.handle_definition_event(&event).unwrap();
    assert_eq!(ctx.store.count_alerts().unwrap(), 0);
}

#[test]
fn detach_region_narrows_or_removes() {
    let ctx = setup();
    let t0 = Utc::now();
    let multi = ctx.defs.add(60, regions(&["r1", "r2"]), true).unwrap();
    let single = ctx.defs.add(30, regions(&["r2"]), true).unwrap();
    running_in_enabled_region(&ctx, "r1", "i-1", t0);
    running_in_enabled_region(&ctx, "r2", "i-2", t0);
    assert_eq!(ctx.store.count_alerts().unwrap(), 3);

    let Detached::Narrowed {
        definition,
        cancelled,
    } = ctx.defs.detach_region(&multi.id, "r1").unwrap()
    else {
        panic!("expected narrowed definition");
    };
    assert_eq!(definition.regions, regions(&["r2"]));
    assert_eq!(cancelled.len(), 1);
    assert_eq!(cancelled[0].alert.id, "r1_i-1_60");

    let Detached::Removed { cancelled } = ctx.defs.detach_region(&single.id, "r2").unwrap() else {
        panic!("expected removal");
    };
    assert_eq!(cancelled.len(), 1);
    assert!(matches!(
        ctx.defs.get(&single.id),
        Err(AlertError::NotFound { .. })
    ));
    assert!(matches!(
        ctx.defs.detach_region(&multi.id, "r9"),
        Err(AlertError::Validation(_))
    ));
}

#[test]
fn delivered_launch_is_not_recreated_by_repeated_running_events() {
    let ctx = setup();
    let t0 = Utc::now() - Duration::hours(2);
    ctx.defs.add(60, BTreeSet::new(), true).unwrap();
    running_in_enabled_region(&ctx, "r1", "i-1", t0);

    let due = ctx.store.due_alerts(Utc::now(), 10).unwrap();
    let done = runwatch_common::types::HistoryRecord::retire(
        due[0].clone(),
        AlertStatus::Completed,
        None,
        Some("msg-1".into()),
        Utc::now(),
    );
    ctx.store.commit_retirements(&[done]).unwrap();

    let Transition::Materialized(report) = ctx
        .client
        .on_instance_state_changed(change("r1", "i-1", InstanceState::Running, t0))
        .unwrap()
    else {
        panic!("expected materialization");
    };
    assert_eq!(report.already_delivered, 1);
    assert_eq!(ctx.store.count_alerts().unwrap(), 0);
}

#[test]
fn region_overview_lists_applicable_definitions() {
    let ctx = setup();
    ctx.defs.add(60, BTreeSet::new(), true).unwrap();
    ctx.defs.add(30, regions(&["r1"]), true).unwrap();
    ctx.defs.add(30, regions(&["r2"]), true).unwrap();
    ctx.defs.add(90, regions(&["r1"]), false).unwrap();
    running_in_enabled_region(&ctx, "r1", "i-1", Utc::now());

    let overview = ctx.client.get_alerts_for_region("r1").unwrap();
    assert!(overview.enabled);
    let thresholds: Vec<i64> = overview.definitions.iter().map(|d| d.threshold_minutes).collect();
    assert_eq!(thresholds, vec![30, 60]);
    assert_eq!(overview.scheduled.len(), 2);
}

#[test]
fn running_without_launch_time_is_rejected() {
    let ctx = setup();
    let mut c = change("r1", "i-1", InstanceState::Running, Utc::now());
    c.launch_time = None;
    assert!(matches!(
        ctx.client.on_instance_state_changed(c),
        Err(AlertError::Validation(_))
    ));
}

#[test]
fn reconcile_all_cancels_orphans() {
    let ctx = setup();
    let def = ctx.defs.add(60, BTreeSet::new(), true).unwrap();
    running_in_enabled_region(&ctx, "r1", "i-1", Utc::now());
    // Disable behind the client's back: no event is handled.
    ctx.defs
        .update(
            &def.id,
            DefinitionUpdate {
                enabled: Some(false),
                ..DefinitionUpdate::default()
            },
        )
        .unwrap();
    assert_eq!(ctx.store.count_alerts().unwrap(), 1);

    ctx.client.reconcile_all().unwrap();
    assert_eq!(ctx.store.count_alerts().unwrap(), 0);
    assert_eq!(ctx.store.count_history(Some("r1")).unwrap(), 1);
}
