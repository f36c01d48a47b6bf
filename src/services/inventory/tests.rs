//! Tests for the inventory engine

use super::*;
use crate::domain::event::TagEvent;
use crate::domain::tag::STATS_SUMMARY_CSV_HDR;
use crate::domain::types::{ReaderContext, ReaderRoles, TagRead};
use crate::error::InventoryError;
use proptest::prelude::*;
use std::fs;
use tempfile::TempDir;

const HOUR_MS: u64 = 3_600_000;

/// Engine rooted in a temp dir that lives as long as the harness
struct TestEngine {
    engine: Arc<InventoryEngine>,
    _dir: TempDir,
}

impl std::ops::Deref for TestEngine {
    type Target = Arc<InventoryEngine>;
    fn deref(&self) -> &Self::Target {
        &self.engine
    }
}

fn create_test_engine() -> TestEngine {
    create_test_engine_with(|config| config)
}

fn create_test_engine_with(adjust: impl FnOnce(Config) -> Config) -> TestEngine {
    let dir = tempfile::tempdir().unwrap();
    let config = adjust(Config::default().with_data_root(dir.path()));
    let engine = InventoryEngine::new(config, Arc::new(Metrics::new()));
    TestEngine { engine, _dir: dir }
}

fn ordinary(device: &str, facility: &str) -> ReaderContext {
    ReaderContext::new(device, facility)
}

fn exit_reader(device: &str, facility: &str) -> ReaderContext {
    ReaderContext::new(device, facility).with_roles(ReaderRoles::EXIT)
}

fn pos_reader(device: &str, facility: &str) -> ReaderContext {
    ReaderContext::new(device, facility).with_roles(ReaderRoles::POS)
}

fn read(epc: &str, rssi: i32, at: u64) -> TagRead {
    TagRead::new(epc, 0, rssi, at)
}

/// Process a single read with the clock at the read time
fn read_one(engine: &InventoryEngine, reader: &ReaderContext, r: TagRead) -> EventBatch {
    let now = r.last_read_on;
    engine.process_at(reader, &[r], now).unwrap()
}

fn kinds(batch: &EventBatch) -> Vec<TagEvent> {
    batch.data.iter().map(|e| e.event_type).collect()
}

fn collecting_listener(engine: &InventoryEngine) -> (ListenerId, Arc<Mutex<Vec<EventBatch>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let id = engine.subscribe(Arc::new(move |batch: &EventBatch| sink.lock().push(batch.clone())));
    (id, seen)
}

// ============================================================================
// Read processing
// ============================================================================

#[test]
fn test_first_read_creates_present_tag_with_arrival() {
    let engine = create_test_engine();
    let batch = read_one(&engine, &ordinary("RSP-A", "F1"), read("E1", -550, 1_000));

    assert_eq!(kinds(&batch), vec![TagEvent::Arrival]);
    assert_eq!(batch.data[0].location, "RSP-A-0");
    assert_eq!(batch.data[0].facility_id, "F1");
    assert_eq!(batch.data[0].timestamp, 1_000);
    assert_eq!(batch.gateway_id.as_deref(), Some("gateway"));
    assert_eq!(engine.state_of("E1"), Some(TagState::Present));
    assert_eq!(engine.tag_count(), 1);
}

#[test]
fn test_strong_reads_in_same_facility_move_tag() {
    let engine = create_test_engine();
    read_one(&engine, &ordinary("RSP-A", "F1"), read("E1", -600, 1_000));

    let reader_b = ordinary("RSP-B", "F1");
    let reads: Vec<TagRead> = (0..4).map(|i| read("E1", -400, 2_000 + i)).collect();
    let batch = engine.process_at(&reader_b, &reads, 2_003).unwrap();

    assert_eq!(kinds(&batch), vec![TagEvent::Moved]);
    assert_eq!(batch.data[0].location, "RSP-B-0");
    let tag = engine.tag("E1").unwrap();
    assert_eq!(tag.location(), "RSP-B-0");
    assert_eq!(tag.state(), TagState::Present);
}

#[test]
fn test_burn_in_holds_location_for_two_reads() {
    let engine = create_test_engine();
    read_one(&engine, &ordinary("RSP-A", "F1"), read("E1", -600, 1_000));

    let reads = [read("E1", -300, 2_000), read("E1", -300, 2_001)];
    let batch = engine.process_at(&ordinary("RSP-B", "F1"), &reads, 2_001).unwrap();

    assert!(batch.is_empty());
    assert_eq!(engine.tag("E1").unwrap().location(), "RSP-A-0");
}

#[test]
fn test_strong_reads_in_other_facility_depart_then_arrive() {
    let engine = create_test_engine();
    read_one(&engine, &ordinary("RSP-A", "F1"), read("E1", -600, 1_000));

    let reads: Vec<TagRead> = (0..4).map(|i| read("E1", -400, 2_000 + i)).collect();
    let batch = engine.process_at(&ordinary("RSP-C", "F2"), &reads, 2_003).unwrap();

    assert_eq!(kinds(&batch), vec![TagEvent::Departed, TagEvent::Arrival]);
    assert_eq!(batch.data[0].location, "RSP-A-0");
    assert_eq!(batch.data[0].facility_id, "F1");
    assert_eq!(batch.data[0].timestamp, 1_000);
    assert_eq!(batch.data[1].location, "RSP-C-0");
    assert_eq!(batch.data[1].facility_id, "F2");
    assert_eq!(engine.tag("E1").unwrap().facility(), "F2");
}

#[test]
fn test_first_read_at_exit_reader_is_present_not_exiting() {
    let engine = create_test_engine();
    let batch = read_one(&engine, &exit_reader("DOOR-1", "F1"), read("E1", -500, 1_000));
    assert_eq!(kinds(&batch), vec![TagEvent::Arrival]);
    assert_eq!(engine.state_of("E1"), Some(TagState::Present));
    assert!(engine.exiting_tags().is_empty());

    // Nothing is waiting to be swept
    assert!(engine.aggregate_departed_at(1_000 + 30_001).is_empty());
    assert_eq!(engine.state_of("E1"), Some(TagState::Present));

    // The next read at the same exit reader promotes it
    read_one(&engine, &exit_reader("DOOR-1", "F1"), read("E1", -500, 2_000));
    assert_eq!(engine.state_of("E1"), Some(TagState::Exiting));
}

#[test]
fn test_exit_reader_promotes_then_sweep_departs() {
    let engine = create_test_engine();
    // Same device, configured without and then with the exit role
    read_one(&engine, &ordinary("DOOR-1", "F1"), read("E1", -500, 1_000));
    assert_eq!(engine.state_of("E1"), Some(TagState::Present));

    let batch = read_one(&engine, &exit_reader("DOOR-1", "F1"), read("E1", -500, 2_000));
    assert!(batch.is_empty());
    assert_eq!(engine.state_of("E1"), Some(TagState::Exiting));
    assert_eq!(engine.exiting_tags().get("F1"), Some(&vec!["E1".to_string()]));

    // Exactly at the threshold the tag is still exiting
    let batch = engine.aggregate_departed_at(2_000 + 30_000);
    assert!(batch.is_empty());
    assert_eq!(engine.state_of("E1"), Some(TagState::Exiting));

    let batch = engine.aggregate_departed_at(2_000 + 30_001);
    assert_eq!(kinds(&batch), vec![TagEvent::Departed]);
    assert_eq!(batch.data[0].timestamp, 2_000);
    assert_eq!(engine.state_of("E1"), Some(TagState::DepartedExit));
    assert!(engine.exiting_tags().is_empty());

    // A second sweep has nothing left to do
    assert!(engine.aggregate_departed_at(2_000 + 60_000).is_empty());
}

#[test]
fn test_departed_exit_returns_to_same_facility() {
    let engine = create_test_engine();
    read_one(&engine, &ordinary("DOOR-1", "F1"), read("E1", -500, 1_000));
    read_one(&engine, &exit_reader("DOOR-1", "F1"), read("E1", -500, 2_000));
    engine.aggregate_departed_at(40_000);

    let batch = read_one(&engine, &ordinary("DOOR-1", "F1"), read("E1", -500, 50_000));
    assert_eq!(kinds(&batch), vec![TagEvent::Returned]);
    let tag = engine.tag("E1").unwrap();
    assert_eq!(tag.state(), TagState::Present);
    assert_eq!(tag.last_arrived(), 50_000);
}

#[test]
fn test_exiting_tag_reverts_when_read_elsewhere_on_device() {
    let engine = create_test_engine();
    read_one(&engine, &ordinary("DOOR-1", "F1"), read("E1", -500, 1_000));
    read_one(&engine, &exit_reader("DOOR-1", "F1"), read("E1", -500, 2_000));

    read_one(&engine, &ordinary("DOOR-1", "F1"), read("E1", -500, 3_000));
    assert_eq!(engine.state_of("E1"), Some(TagState::Present));
    assert!(engine.registry.lock().exiting_consistent());
    assert!(engine.exiting_tags().is_empty());
}

#[test]
fn test_pos_departure_and_return_threshold() {
    let engine = create_test_engine();
    let pos = pos_reader("POS-1", "F1");
    read_one(&engine, &ordinary("RSP-A", "F1"), read("E1", -500, 1_000));

    // Not yet past the departed threshold
    let batch = read_one(&engine, &pos, read("E1", -500, 1_000 + HOUR_MS));
    assert!(batch.is_empty());
    assert_eq!(engine.state_of("E1"), Some(TagState::Present));

    let t_departed = 1_000 + HOUR_MS + 1;
    let batch = read_one(&engine, &pos, read("E1", -500, t_departed));
    assert_eq!(kinds(&batch), vec![TagEvent::Departed]);
    assert_eq!(batch.data[0].location, "RSP-A-0");
    assert_eq!(engine.state_of("E1"), Some(TagState::DepartedPos));

    // POS reads never bring it back
    let batch = read_one(&engine, &pos, read("E1", -500, t_departed + 60_000));
    assert!(batch.is_empty());
    assert_eq!(engine.state_of("E1"), Some(TagState::DepartedPos));

    // Ordinary reads before the return threshold are ignored
    let batch = read_one(&engine, &ordinary("RSP-A", "F1"), read("E1", -500, t_departed + HOUR_MS));
    assert!(batch.is_empty());
    assert_eq!(engine.state_of("E1"), Some(TagState::DepartedPos));

    let batch =
        read_one(&engine, &ordinary("RSP-A", "F1"), read("E1", -500, t_departed + 24 * HOUR_MS + 1));
    assert_eq!(kinds(&batch), vec![TagEvent::Returned]);
    assert_eq!(engine.state_of("E1"), Some(TagState::Present));
}

#[test]
fn test_pos_never_originates_presence() {
    let engine = create_test_engine();
    let batch = read_one(&engine, &pos_reader("POS-1", "F1"), read("E1", -500, 1_000));

    assert!(batch.is_empty());
    assert_ne!(engine.state_of("E1"), Some(TagState::Present));
}

#[test]
fn test_min_rssi_filters_weak_reads() {
    let engine = create_test_engine();
    let reader = ordinary("RSP-A", "F1").with_min_rssi(-700);
    let reads = [read("WEAK", -701, 1_000), read("EDGE", -700, 1_000)];
    let batch = engine.process_at(&reader, &reads, 1_000).unwrap();

    assert_eq!(batch.len(), 1);
    assert_eq!(batch.data[0].epc_code, "EDGE");
    assert!(engine.tag("WEAK").is_none());
}

#[test]
fn test_reader_without_device_id_is_rejected() {
    let engine = create_test_engine();
    let result = engine.process_at(&ordinary("", "F1"), &[read("E1", -500, 1_000)], 1_000);

    assert!(matches!(result, Err(InventoryError::InvalidArgument(_))));
    assert_eq!(engine.tag_count(), 0);
}

#[test]
fn test_empty_batch_is_not_an_error() {
    let engine = create_test_engine();
    let batch = engine.process_at(&ordinary("RSP-A", "F1"), &[], 1_000).unwrap();
    assert!(batch.is_empty());
    assert_eq!(engine.metrics().batches_total(), 1);
}

#[test]
fn test_tid_carried_into_events() {
    let engine = create_test_engine();
    let batch = read_one(
        &engine,
        &ordinary("RSP-A", "F1"),
        read("E1", -500, 1_000).with_tid("E2801160"),
    );
    assert_eq!(batch.data[0].tid.as_deref(), Some("E2801160"));
}

#[test]
fn test_clear_exiting_keeps_arrival_time() {
    let engine = create_test_engine();
    read_one(&engine, &ordinary("DOOR-1", "F1"), read("E1", -500, 1_000));
    read_one(&engine, &exit_reader("DOOR-1", "F1"), read("E1", -500, 2_000));

    assert_eq!(engine.clear_exiting(), 1);
    let tag = engine.tag("E1").unwrap();
    assert_eq!(tag.state(), TagState::Present);
    assert_eq!(tag.last_arrived(), 1_000);
    assert!(engine.aggregate_departed_at(1_000_000).is_empty());
}

// ============================================================================
// Age-out
// ============================================================================

#[test]
fn test_age_out_boundary_is_strict() {
    let engine = create_test_engine_with(|c| c.with_ageout_hours(336));
    let horizon = 336 * HOUR_MS;
    let now = horizon + 10_000_000;
    let reader = ordinary("RSP-A", "F1");
    read_one(&engine, &reader, read("KEEP", -500, now - horizon));
    read_one(&engine, &reader, read("DROP", -500, now - horizon - 1));

    assert_eq!(engine.age_out_at(now), 1);
    assert!(engine.tag("KEEP").is_some());
    assert!(engine.tag("DROP").is_none());
    assert_eq!(engine.metrics().aged_out_total(), 1);
}

#[test]
fn test_age_out_prunes_exiting_sets() {
    let engine = create_test_engine_with(|c| c.with_ageout_hours(1));
    read_one(&engine, &ordinary("DOOR-1", "F1"), read("E1", -500, 1_000));
    read_one(&engine, &exit_reader("DOOR-1", "F1"), read("E1", -500, 2_000));

    assert_eq!(engine.age_out_at(2_000 + HOUR_MS + 1), 1);
    assert!(engine.exiting_tags().is_empty());
    assert!(engine.registry.lock().exiting_consistent());
}

// ============================================================================
// Listeners
// ============================================================================

#[test]
fn test_listener_receives_batches_until_unsubscribed() {
    let engine = create_test_engine();
    let (id, seen) = collecting_listener(&engine);
    let reader = ordinary("RSP-A", "F1");

    read_one(&engine, &reader, read("E1", -500, 1_000));
    // No events, nothing published
    read_one(&engine, &reader, read("E1", -500, 1_001));
    assert_eq!(seen.lock().len(), 1);

    assert!(engine.unsubscribe(id));
    assert!(!engine.unsubscribe(id));
    read_one(&engine, &reader, read("E2", -500, 1_002));
    assert_eq!(seen.lock().len(), 1);
}

#[test]
fn test_panicking_listener_does_not_stop_others() {
    let engine = create_test_engine();
    engine.subscribe(Arc::new(|_: &EventBatch| panic!("listener failure")));
    let (_, seen) = collecting_listener(&engine);

    let batch = read_one(&engine, &ordinary("RSP-A", "F1"), read("E1", -500, 1_000));
    assert_eq!(batch.len(), 1);
    assert_eq!(seen.lock().len(), 1);
    assert_eq!(engine.metrics().listener_failures(), 1);
    assert_eq!(engine.state_of("E1"), Some(TagState::Present));
}

#[test]
fn test_listener_may_call_back_into_engine() {
    let engine = create_test_engine();
    let counts = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&counts);
    let weak = Arc::downgrade(&*engine);
    engine.subscribe(Arc::new(move |_: &EventBatch| {
        if let Some(engine) = weak.upgrade() {
            sink.lock().push(engine.summary_at(1_000).total_tags);
        }
    }));

    read_one(&engine, &ordinary("RSP-A", "F1"), read("E1", -500, 1_000));
    assert_eq!(*counts.lock(), vec![1]);
}

// ============================================================================
// Reporting
// ============================================================================

#[test]
fn test_summary_counts_states_and_buckets() {
    let engine = create_test_engine();
    let reader = ordinary("RSP-A", "F1");
    let now = 10 * HOUR_MS;
    read_one(&engine, &reader, read("E1", -500, now - 1_000));
    read_one(&engine, &reader, read("E2", -500, now - 2 * 60_000));
    read_one(&engine, &reader, read("E3", -500, now - 2 * HOUR_MS));
    read_one(&engine, &pos_reader("POS-1", "F1"), read("E4", -500, now - 10_000));

    let summary = engine.summary_at(now);
    assert_eq!(summary.total_tags, 4);
    assert_eq!(summary.state_count(TagState::Present), 3);
    assert_eq!(summary.state_count(TagState::Unknown), 1);
    assert_eq!(summary.state_count(TagState::DepartedPos), 0);
    assert_eq!(summary.bucket_count(TimeBucket::WithinLast01Min), 2);
    assert_eq!(summary.bucket_count(TimeBucket::From01To05Min), 1);
    assert_eq!(summary.bucket_count(TimeBucket::From60MinTo24Hr), 1);
    assert_eq!(summary.tag_state_summary.len(), TagState::ALL.len());
    assert_eq!(summary.tag_read_summary.len(), TimeBucket::ALL.len());
}

#[test]
fn test_summary_serializes_bucket_names() {
    let engine = create_test_engine();
    let json = serde_json::to_value(engine.summary_at(0)).unwrap();
    assert_eq!(json["tag_read_summary"]["within_last_01_min"], 0);
    assert_eq!(json["tag_state_summary"]["DEPARTED_EXIT"], 0);
}

#[test]
fn test_tags_matching_pattern() {
    let engine = create_test_engine();
    let reader = ordinary("RSP-A", "F1");
    for epc in ["3014AA", "3014BB", "E200CC"] {
        read_one(&engine, &reader, read(epc, -500, 1_000));
    }

    let matched: Vec<String> = engine
        .tags_matching(&EpcPattern::new(Some("3014*")).unwrap())
        .iter()
        .map(|t| t.epc().to_string())
        .collect();
    assert_eq!(matched, vec!["3014AA", "3014BB"]);
    assert_eq!(engine.tags_matching(&EpcPattern::new(None).unwrap()).len(), 3);
    assert_eq!(engine.tag_info(&EpcPattern::new(Some("*CC")).unwrap())[0].epc, "E200CC");
}

#[test]
fn test_stats_summary_csv_marks_current_location() {
    let engine = create_test_engine();
    let reader = ordinary("RSP-A", "F1");
    let reads = [TagRead::new("E1", 0, -500, 1_000), TagRead::new("E1", 1, -600, 1_001)];
    engine.process_at(&reader, &reads, 1_001).unwrap();
    read_one(&engine, &reader, read("E2", -500, 1_002));

    let lines = engine.stats_summary_csv(&EpcPattern::all(), 2_000);
    assert_eq!(lines[0], STATS_SUMMARY_CSV_HDR);
    assert_eq!(lines.len(), 1 + 3);
    assert!(lines[1].starts_with("E1, null, P, "));
    assert!(lines[1].contains(", @, RSP-A-0, "));
    assert!(lines[2].contains(",  , RSP-A-1, "));
    assert!(lines[3].starts_with("E2, "));

    let only_e2 = engine.stats_summary_csv(&EpcPattern::new(Some("E2")).unwrap(), 2_000);
    assert_eq!(only_e2.len(), 2);
}

#[test]
fn test_detail_lines_one_per_tag() {
    let engine = create_test_engine();
    let reader = ordinary("RSP-A", "F1");
    read_one(&engine, &reader, read("E1", -500, 1_000).with_tid("T-1"));
    read_one(&engine, &reader, read("E2", -500, 1_500));

    let lines = engine.detail_lines(&EpcPattern::all(), 2_000);
    assert_eq!(
        lines,
        vec![
            "E1, T-1, P, RSP-A-0, 00:00:01.000, F1".to_string(),
            "E2, null, P, RSP-A-0, 00:00:00.500, F1".to_string(),
        ]
    );
}

#[test]
fn test_stats_matching_reports_every_antenna() {
    let engine = create_test_engine();
    let reader = ordinary("RSP-A", "F1");
    let reads = [TagRead::new("E1", 0, -500, 1_000), TagRead::new("E1", 1, -600, 1_001)];
    engine.process_at(&reader, &reads, 1_001).unwrap();

    let report = engine.stats_matching(&EpcPattern::all());
    let per_location = &report.tags["E1"];
    assert_eq!(per_location.len(), 2);
    assert!(report.locations.contains("RSP-A-0"));
    assert!(report.locations.contains("RSP-A-1"));
    assert_eq!(per_location["RSP-A-0"].n, 1);
}

// ============================================================================
// Persistence
// ============================================================================

#[test]
fn test_persist_and_restore_coerces_exiting() {
    let engine = create_test_engine();
    read_one(&engine, &ordinary("DOOR-1", "F1"), read("E1", -500, 1_000));
    read_one(&engine, &exit_reader("DOOR-1", "F1"), read("E1", -500, 2_000));
    read_one(&engine, &ordinary("RSP-A", "F2"), read("E2", -500, 3_000));
    assert_eq!(engine.persist().unwrap(), 2);

    let restored = InventoryEngine::new(engine.config().clone(), Arc::new(Metrics::new()));
    assert_eq!(restored.restore().unwrap(), 2);

    let e1 = restored.tag("E1").unwrap();
    assert_eq!(e1.state(), TagState::Present);
    assert_eq!(e1.location(), "DOOR-1-0");
    assert_eq!(e1.facility(), "F1");
    assert_eq!(e1.last_read(), 2_000);
    assert!(e1.stats().is_empty());
    assert!(restored.exiting_tags().is_empty());
    assert_eq!(restored.state_of("E2"), Some(TagState::Present));
}

#[test]
fn test_restored_tag_readopts_location_on_next_read() {
    let engine = create_test_engine();
    read_one(&engine, &ordinary("RSP-A", "F1"), read("E1", -500, 1_000));
    engine.persist().unwrap();

    let restored = InventoryEngine::new(engine.config().clone(), Arc::new(Metrics::new()));
    restored.restore().unwrap();
    let batch = read_one(&restored, &ordinary("RSP-B", "F1"), read("E1", -700, 5_000));

    assert_eq!(kinds(&batch), vec![TagEvent::Moved]);
    let tag = restored.tag("E1").unwrap();
    assert_eq!(tag.location(), "RSP-B-0");
    assert!(tag.stats().contains_key(tag.location()));
}

#[test]
fn test_restore_without_cache_is_empty() {
    let engine = create_test_engine();
    assert_eq!(engine.restore().unwrap(), 0);
    assert_eq!(engine.tag_count(), 0);
}

#[test]
fn test_persist_empty_removes_cache() {
    let engine = create_test_engine();
    read_one(&engine, &ordinary("RSP-A", "F1"), read("E1", -500, 1_000));
    engine.persist().unwrap();
    assert!(engine.cache_path().exists());

    engine.age_out_at(u64::MAX);
    assert_eq!(engine.persist().unwrap(), 0);
    assert!(!engine.cache_path().exists());
}

#[test]
fn test_restore_legacy_cache_layout() {
    let engine = create_test_engine();
    let legacy = r#"{"inventory":{"BackStock":[
        {"epc":"E1","state":"DEPARTED_EXIT","location":"RSP-1-0","lastRead":5000}
    ]}}"#;
    fs::create_dir_all(engine.config().cache_dir()).unwrap();
    fs::write(engine.cache_path(), legacy).unwrap();

    assert_eq!(engine.restore().unwrap(), 1);
    let tag = engine.tag("E1").unwrap();
    assert_eq!(tag.facility(), "BackStock");
    assert_eq!(tag.state(), TagState::DepartedExit);
}

#[test]
fn test_corrupt_cache_is_an_error() {
    let engine = create_test_engine();
    fs::create_dir_all(engine.config().cache_dir()).unwrap();
    fs::write(engine.cache_path(), "{not json").unwrap();
    assert!(matches!(engine.restore(), Err(InventoryError::Json(_))));
}

#[test]
fn test_snapshot_without_inventory() {
    let engine = create_test_engine();
    assert_eq!(engine.snapshot_to_file().unwrap(), Snapshot::NoInventory);
}

#[test]
fn test_snapshot_writes_sorted_csv() {
    let engine = create_test_engine();
    read_one(&engine, &ordinary("RSP-B", "F2"), read("E2", -500, 2_000));
    read_one(&engine, &ordinary("RSP-A", "F1"), read("E1", -500, 1_000));

    let Snapshot::Written(path) = engine.snapshot_to_file().unwrap() else {
        panic!("expected a snapshot file");
    };
    let name = path.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("gw_inventory_") && name.ends_with(".csv"));

    let content = fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines[0], "Facility,Epc,State,Last Seen,Location");
    assert_eq!(lines[1], "F1,E1,PRESENT,1000,RSP-A-0");
    assert_eq!(lines[2], "F2,E2,PRESENT,2000,RSP-B-0");
}

#[test]
fn test_unload_all_snapshots_and_clears() {
    let engine = create_test_engine();
    read_one(&engine, &ordinary("RSP-A", "F1"), read("E1", -500, 1_000));
    engine.persist().unwrap();

    let snapshot = engine.unload_all().unwrap();
    assert!(matches!(snapshot, Snapshot::Written(ref p) if p.exists()));
    assert_eq!(engine.tag_count(), 0);
    assert!(!engine.cache_path().exists());
}

#[test]
fn test_stats_and_waypoint_snapshots() {
    let engine = create_test_engine();
    read_one(&engine, &ordinary("RSP-A", "F1"), read("E1", -500, 1_000));

    let stats = engine.snapshot_stats(&EpcPattern::all()).unwrap();
    let content = fs::read_to_string(stats).unwrap();
    assert_eq!(content.lines().count(), 2);

    let waypoints = engine.snapshot_waypoints(&EpcPattern::all()).unwrap();
    let content = fs::read_to_string(waypoints).unwrap();
    assert!(content.starts_with("E1"));
    assert!(content.contains("RSP-A-0"));
}

#[test]
fn test_back_to_back_snapshots_get_distinct_files() {
    let engine = create_test_engine();
    read_one(&engine, &ordinary("RSP-A", "F1"), read("E1", -500, 1_000));

    let first = engine.snapshot_stats(&EpcPattern::all()).unwrap();
    let second = engine.snapshot_stats(&EpcPattern::all()).unwrap();
    assert_ne!(first, second);
    assert!(first.exists() && second.exists());

    let Snapshot::Written(a) = engine.snapshot_to_file().unwrap() else { panic!("expected a file") };
    let Snapshot::Written(b) = engine.snapshot_to_file().unwrap() else { panic!("expected a file") };
    assert_ne!(a, b);
    assert_eq!(fs::read_to_string(&a).unwrap(), fs::read_to_string(&b).unwrap());
}

#[test]
fn test_activate_unknown_profile_reports_failure() {
    let engine = create_test_engine();
    let result = engine.activate_profile("NoSuchProfile");
    assert!(!result.success);
    assert!(!result.message.is_empty());
}

// ============================================================================
// Engine lifecycle
// ============================================================================

#[tokio::test]
async fn test_start_stop_persists_and_restores() {
    let engine = create_test_engine();
    engine.start();
    assert!(engine.is_running());

    let now = crate::domain::types::epoch_ms();
    engine.process_at(&ordinary("RSP-A", "F1"), &[read("E1", -500, now)], now).unwrap();
    engine.stop().await;
    assert!(!engine.is_running());
    assert!(engine.cache_path().exists());

    let restarted = InventoryEngine::new(engine.config().clone(), Arc::new(Metrics::new()));
    restarted.start();
    assert_eq!(restarted.state_of("E1"), Some(TagState::Present));
    restarted.stop().await;
}

#[tokio::test]
async fn test_stop_without_start_is_noop() {
    let engine = create_test_engine();
    engine.stop().await;
    assert!(!engine.cache_path().exists());
}

#[tokio::test]
async fn test_stats_recording_replaces_previous() {
    let engine = create_test_engine();
    let first = engine.start_recording_stats(EpcPattern::all()).unwrap();
    let header = fs::read_to_string(&first).unwrap();
    assert!(header.starts_with("epc,"));

    let second = engine.start_recording_stats(EpcPattern::new(Some("30*")).unwrap()).unwrap();
    assert_ne!(first, second);
    assert_eq!(engine.stop_recording_stats(), Some(second));
    assert_eq!(engine.stop_recording_stats(), None);
}

// ============================================================================
// Invariants
// ============================================================================

#[derive(Debug, Clone)]
enum Op {
    Read { epc: usize, reader: usize, antenna: u16, rssi: i32, dt: u64 },
    Sweep { dt: u64 },
}

fn readers() -> Vec<ReaderContext> {
    vec![
        ordinary("RSP-A", "F1"),
        ordinary("RSP-B", "F1"),
        ordinary("RSP-C", "F2"),
        exit_reader("DOOR-1", "F1"),
        ordinary("DOOR-1", "F1"),
        pos_reader("POS-1", "F1"),
    ]
}

const EPCS: [&str; 3] = ["E1", "E2", "E3"];

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        8 => (0..EPCS.len(), 0..6usize, 0..2u16, -800..-300i32, 0..120_000u64)
            .prop_map(|(epc, reader, antenna, rssi, dt)| Op::Read { epc, reader, antenna, rssi, dt }),
        1 => (0..120_000u64).prop_map(|dt| Op::Sweep { dt }),
    ]
}

proptest! {
    #[test]
    fn prop_registry_invariants_hold(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let engine = create_test_engine_with(|c| c.with_pos_thresholds(200_000, 400_000));
        let readers = readers();
        let mut now = 1_000u64;
        let mut last_reads = std::collections::HashMap::new();

        for op in ops {
            match op {
                Op::Read { epc, reader, antenna, rssi, dt } => {
                    now += dt;
                    let r = TagRead::new(EPCS[epc], antenna, rssi, now);
                    engine.process_at(&readers[reader], &[r], now).unwrap();
                }
                Op::Sweep { dt } => {
                    now += dt;
                    engine.aggregate_departed_at(now);
                }
            }

            let registry = engine.registry.lock();
            prop_assert!(registry.exiting_consistent());
            for tag in registry.tags.values() {
                prop_assert!(tag.stats().contains_key(tag.location()));
                let previous = last_reads.insert(tag.epc().to_string(), tag.last_read());
                prop_assert!(previous.unwrap_or(0) <= tag.last_read());
            }
        }
    }

    #[test]
    fn prop_replayed_read_is_idempotent(
        setup in prop::collection::vec((0..6usize, 0..2u16, -800..-300i32), 0..8),
        reader in 0..6usize,
        antenna in 0..2u16,
        rssi in -800..-300i32,
    ) {
        let engine = create_test_engine();
        let readers = readers();
        let mut now = 1_000u64;
        for (r, a, s) in setup {
            now += 10_000;
            engine.process_at(&readers[r], &[TagRead::new("E1", a, s, now)], now).unwrap();
        }

        now += 10_000;
        let r = TagRead::new("E1", antenna, rssi, now);
        let first = engine.process_at(&readers[reader], &[r.clone()], now).unwrap();
        let state = engine.state_of("E1");
        let second = engine.process_at(&readers[reader], &[r], now).unwrap();

        prop_assert_eq!(engine.state_of("E1"), state);
        for item in &second.data {
            prop_assert!(!first.data.contains(item));
        }
    }
}
