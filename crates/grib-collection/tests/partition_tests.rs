//! Time partition tests: union coordinates, lazy resolution and
//! cross-partition consistency.

mod common;

use common::{context, partition_for};
use grib_collection::index::read_partition;
use grib_collection::{
    BuildAction, CollectionError, GribConfig, PartitionBuilder, ProtoChoice, UpdateMode, VariableKey,
    MIN_INDEX_VERSION,
};
use grib_common::{HeaderRecord, TimeInterval};
use test_utils::{
    age_file, isobaric_temperature, runtime, surface_pressure, touch_future, write_inventory,
    CollectionFixture, RecordBuilder,
};

fn hash_of(record: HeaderRecord, config: &GribConfig) -> u32 {
    VariableKey::from_record(&record, config).cdm_hash()
}

/// day1: pressure at 0/6/12 and temperature at 0/6/12; day2: pressure at
/// 6/12/18 only.
fn two_day_fixture() -> CollectionFixture {
    let fixture = CollectionFixture::new();
    let day1 = fixture.subdir("day1");
    let mut records = surface_pressure(0, &[0, 6, 12]);
    records.extend(isobaric_temperature(0, &[0, 6, 12], &[50000.0]));
    write_inventory(&day1, "run00", &records);

    let day2 = fixture.subdir("day2");
    write_inventory(&day2, "run24", &surface_pressure(24, &[6, 12, 18]));
    fixture
}

// ============================================================================
// Union coordinates
// ============================================================================

#[test]
fn test_union_time_coordinate() {
    let fixture = two_day_fixture();
    let config = GribConfig::default();
    let ctx = context(&config);
    let spec = partition_for("gfs", fixture.path(), &["day1", "day2"]);
    let built = PartitionBuilder::new(spec, &ctx, &ProtoChoice::First)
        .read_or_create(UpdateMode::IfStale)
        .unwrap();
    assert_eq!(built.report.action, BuildAction::Created);
    assert_eq!(built.report.canonical.as_deref(), Some("day1"));
    let tp = built.value;

    let group = &tp.groups[0];
    let pressure = group
        .variable_index(hash_of(RecordBuilder::new().param(0, 3, 0).build(), &config))
        .unwrap();
    let union = tp.union_coordinate(0, pressure).unwrap();
    let offsets: Vec<i32> = union.values().iter().map(|v| v.end).collect();
    assert_eq!(offsets, vec![0, 6, 12, 18]);
    let owners: Vec<u32> = union.entries.iter().map(|e| e.partition).collect();
    assert_eq!(owners, vec![0, 0, 0, 1]);
    let canonical = tp.canonical_time(0, pressure).unwrap().unwrap();
    assert_eq!(canonical.offsets(), vec![0, 6, 12]);

    // 6 and 12 come from day1, the earlier partition
    let six = tp.resolve(0, pressure, 1, 0, 0).unwrap().unwrap();
    assert_eq!(six.partition, 0);
    assert_eq!(six.runtime, runtime(0));
    assert_eq!(six.location.pos, 1500);

    let eighteen = tp.resolve(0, pressure, 3, 0, 0).unwrap().unwrap();
    assert_eq!(eighteen.partition, 1);
    assert_eq!(eighteen.runtime, runtime(24));
    assert_eq!(eighteen.location.pos, 2500);
    assert_eq!(eighteen.file, fixture.path().join("day2").join("run24.grib2.json"));

    assert!(tp
        .resolve_value(0, pressure, TimeInterval::point(24), 0, 0)
        .unwrap()
        .is_none());
    assert!(tp.resolve(0, pressure, 4, 0, 0).unwrap().is_none());
}

#[test]
fn test_variable_only_in_one_partition() {
    let fixture = two_day_fixture();
    let config = GribConfig::default();
    let ctx = context(&config);
    let spec = partition_for("gfs", fixture.path(), &["day1", "day2"]);
    let built = PartitionBuilder::new(spec, &ctx, &ProtoChoice::First)
        .read_or_create(UpdateMode::IfStale)
        .unwrap();
    assert!(built
        .report
        .missing
        .iter()
        .any(|m| m.contains("VAR_0-0-0_L100") && m.contains("day2")));
    let tp = built.value;

    let temperature = tp.groups[0]
        .variable_index(hash_of(RecordBuilder::new().isobaric(50000.0).build(), &config))
        .unwrap();
    let var = &tp.groups[0].variables[temperature];
    assert_eq!(var.partitions.len(), 1);

    let union = tp.union_coordinate(0, temperature).unwrap();
    assert_eq!(union.len(), 3);
    for (t, entry) in union.entries.iter().enumerate() {
        assert_eq!(entry.partition, 0);
        assert_eq!(entry.local as usize, t);
        assert!(tp.resolve(0, temperature, t, 0, 0).unwrap().is_some());
    }
    assert!(tp
        .resolve_value(0, temperature, TimeInterval::point(18), 0, 0)
        .unwrap()
        .is_none());
}

// ============================================================================
// Reloading and staleness
// ============================================================================

#[test]
fn test_reload_opens_partitions_lazily() {
    let fixture = two_day_fixture();
    let config = GribConfig::default();
    let ctx = context(&config);
    let spec = partition_for("gfs", fixture.path(), &["day1", "day2"]);
    let builder = PartitionBuilder::new(spec, &ctx, &ProtoChoice::First);
    builder.read_or_create(UpdateMode::IfStale).unwrap();
    assert!(!builder.needs_update().unwrap());

    let loaded = builder.read_or_create(UpdateMode::IfStale).unwrap();
    assert_eq!(loaded.report.action, BuildAction::Loaded);
    let tp = loaded.value;
    assert!(tp.partitions.iter().all(|p| !p.is_open()));

    let pressure = tp.groups[0]
        .variable_index(hash_of(RecordBuilder::new().param(0, 3, 0).build(), &config))
        .unwrap();
    let found = tp.resolve(0, pressure, 3, 0, 0).unwrap().unwrap();
    assert_eq!(found.partition, 1);
    assert!(!tp.partitions[0].is_open());
    assert!(tp.partitions[1].is_open());

    tp.close();
    assert!(tp.resolve(0, pressure, 0, 0, 0).unwrap().is_some());

    let same = read_partition(builder.spec().index_path().as_path(), MIN_INDEX_VERSION).unwrap();
    assert_eq!(same.unions, tp.unions);
    assert_eq!(same.canonical, 0);
}

#[test]
fn test_stale_partition_is_rebuilt() {
    let fixture = two_day_fixture();
    let config = GribConfig::default();
    let ctx = context(&config);
    let spec = partition_for("gfs", fixture.path(), &["day1", "day2"]);
    let builder = PartitionBuilder::new(spec, &ctx, &ProtoChoice::First);
    builder.read_or_create(UpdateMode::IfStale).unwrap();

    let source = fixture.path().join("day2").join("run24.grib2.json");
    touch_future(&source, 600);
    assert!(builder.needs_update().unwrap());

    let rebuilt = builder.read_or_create(UpdateMode::IfStale).unwrap();
    assert!(matches!(rebuilt.report.action, BuildAction::Rebuilt { .. }));
    let day2 = rebuilt.report.children.iter().find(|c| c.name == "day2").unwrap();
    assert!(day2.was_built());

    age_file(&source, 3600);
    let again = builder.read_or_create(UpdateMode::Always).unwrap();
    assert!(matches!(again.report.action, BuildAction::Rebuilt { .. }));
    assert!(!builder.needs_update().unwrap());
}

// ============================================================================
// Cross-partition consistency
// ============================================================================

#[test]
fn test_vertical_values_differ_is_flagged() {
    let fixture = CollectionFixture::new();
    write_inventory(
        &fixture.subdir("day1"),
        "run00",
        &isobaric_temperature(0, &[0], &[50000.0, 85000.0]),
    );
    write_inventory(
        &fixture.subdir("day2"),
        "run24",
        &isobaric_temperature(24, &[6], &[50000.0, 70000.0, 85000.0]),
    );

    let config = GribConfig::default();
    let ctx = context(&config);
    let spec = partition_for("levels", fixture.path(), &["day1", "day2"]);
    let built = PartitionBuilder::new(spec, &ctx, &ProtoChoice::First)
        .read_or_create(UpdateMode::Always)
        .unwrap();
    assert_eq!(built.report.flagged.len(), 1);
    let tp = built.value;

    let var = &tp.groups[0].variables[0];
    assert!(var.slot(1).unwrap().vert_differs());
    assert!(!var.slot(0).unwrap().vert_differs());

    // canonical level 1 is 85000 Pa, the third level of day2
    let found = tp.resolve(0, 0, 1, 0, 1).unwrap().unwrap();
    assert_eq!(found.partition, 1);
    assert_eq!(found.location.pos, 3000);
    let found = tp.resolve(0, 0, 0, 0, 1).unwrap().unwrap();
    assert_eq!(found.partition, 0);
    assert_eq!(found.location.pos, 2000);
}

#[test]
fn test_ensemble_presence_mismatch_is_fatal() {
    let fixture = CollectionFixture::new();
    let members: Vec<HeaderRecord> = (1..=3)
        .map(|m| RecordBuilder::new().ensemble(3, m).at(100 * m as u64).build())
        .collect();
    write_inventory(&fixture.subdir("day1"), "run00", &members);
    write_inventory(
        &fixture.subdir("day2"),
        "run24",
        &[RecordBuilder::new().runtime_hours(24).build()],
    );

    let config = GribConfig::default();
    let ctx = context(&config);
    let spec = partition_for("ens", fixture.path(), &["day1", "day2"]);
    let index = spec.index_path();
    let err = PartitionBuilder::new(spec, &ctx, &ProtoChoice::First)
        .read_or_create(UpdateMode::Always)
        .unwrap_err();

    match err {
        CollectionError::PartitionInconsistent { mismatches, .. } => {
            assert_eq!(mismatches.len(), 1);
            assert_eq!(mismatches[0].axis, "ensemble");
            assert_eq!(mismatches[0].partition, "day2");
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(!index.exists());
}

#[test]
fn test_broken_partition_is_dropped() {
    let fixture = two_day_fixture();
    // day3 has nothing usable
    write_inventory(&fixture.subdir("day3"), "run48", &[RecordBuilder::new().interval(0, 0).build()]);

    let config = GribConfig::default();
    let ctx = context(&config);
    let spec = partition_for("gfs", fixture.path(), &["day1", "day2", "day3"]);
    let built = PartitionBuilder::new(spec, &ctx, &ProtoChoice::Latest)
        .read_or_create(UpdateMode::Always)
        .unwrap();
    assert_eq!(built.report.dropped.len(), 1);
    assert_eq!(built.report.dropped[0].name, "day3");
    assert_eq!(built.report.canonical.as_deref(), Some("day2"));
    assert_eq!(built.value.partitions.len(), 2);
}

#[test]
fn test_no_usable_partitions() {
    let fixture = CollectionFixture::new();
    fixture.subdir("empty");
    let config = GribConfig::default();
    let ctx = context(&config);
    let spec = partition_for("none", fixture.path(), &["empty"]);
    let err = PartitionBuilder::new(spec, &ctx, &ProtoChoice::default())
        .read_or_create(UpdateMode::Always)
        .unwrap_err();
    assert!(matches!(err, CollectionError::NoPartitions(_)));
}
