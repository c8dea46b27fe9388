//! Collection build, index round-trip and staleness tests.

mod common;

use common::{context, spec_for};
use grib_collection::index::{probe, read_collection};
use grib_collection::{
    BuildAction, CellIndex, CollectionBuilder, CollectionError, GribConfig, IndexKind, UpdateMode,
    VariableKey, INDEX_VERSION, MIN_INDEX_VERSION,
};
use grib_common::TimeInterval;
use std::fs;
use test_utils::{
    age_file, isobaric_temperature, runtime, surface_pressure, touch_future, CollectionFixture,
    RecordBuilder,
};

fn two_run_fixture() -> CollectionFixture {
    let mut fixture = CollectionFixture::new();
    let mut run00 = isobaric_temperature(0, &[0, 6], &[50000.0, 85000.0]);
    run00.extend(surface_pressure(0, &[0, 6, 12]));
    fixture.add_file("run00", &run00);
    fixture.add_file("run12", &isobaric_temperature(12, &[0, 6], &[50000.0, 85000.0]));
    fixture
}

// ============================================================================
// Round-trip and determinism
// ============================================================================

#[test]
fn test_index_round_trip() {
    let fixture = two_run_fixture();
    let config = GribConfig::default();
    let ctx = context(&config);
    let builder = CollectionBuilder::new(spec_for("gfs", fixture.path()), &ctx);

    let built = builder.read_or_create(UpdateMode::Always).unwrap().value;
    let loaded = read_collection(&builder.spec().index_path(), MIN_INDEX_VERSION).unwrap();

    assert_eq!(loaded.name, "gfs");
    assert_eq!(loaded.files, built.files);
    assert_eq!(loaded.center, built.center);
    assert_eq!(loaded.groups.len(), built.groups.len());
    for (gi, (a, b)) in built.groups.iter().zip(&loaded.groups).enumerate() {
        assert_eq!(a.id, b.id);
        assert_eq!(a.gds, b.gds);
        assert_eq!(a.coordinates, b.coordinates);
        assert_eq!(a.files, b.files);
        assert_eq!(a.variables.len(), b.variables.len());
        for (vi, (va, vb)) in a.variables.iter().zip(&b.variables).enumerate() {
            assert_eq!(va.name(), vb.name());
            assert_eq!(va.cdm_hash, vb.cdm_hash);
            assert_eq!(va.shape, vb.shape);
            assert_eq!(va.record_count, vb.record_count);
            assert!(!vb.is_loaded());
            assert_eq!(built.records(gi, vi).unwrap(), loaded.records(gi, vi).unwrap());
            assert!(vb.is_loaded());
        }
    }
}

#[test]
fn test_builds_are_deterministic() {
    let fixture = two_run_fixture();
    let config = GribConfig::default();
    let ctx = context(&config);

    let first = fixture.path().join("first.gcx");
    let second = fixture.path().join("second.gcx");
    let a = CollectionBuilder::new(spec_for("gfs", fixture.path()).with_index_path(&first), &ctx)
        .read_or_create(UpdateMode::Always)
        .unwrap()
        .value;
    let b = CollectionBuilder::new(spec_for("gfs", fixture.path()).with_index_path(&second), &ctx)
        .read_or_create(UpdateMode::Always)
        .unwrap()
        .value;

    for (ga, gb) in a.groups.iter().zip(&b.groups) {
        assert_eq!(ga.coordinates, gb.coordinates);
    }
    assert_eq!(fs::read(&first).unwrap(), fs::read(&second).unwrap());
}

// ============================================================================
// Rectilinearization through the public entry point
// ============================================================================

#[test]
fn test_runtimes_sorted_regardless_of_file_order() {
    let mut fixture = CollectionFixture::new();
    // file names sort as a, b, c; runtimes arrive as 0, 24, 12
    fixture.add_file("a", &surface_pressure(0, &[0]));
    fixture.add_file("b", &surface_pressure(24, &[0]));
    fixture.add_file("c", &surface_pressure(12, &[0]));

    let config = GribConfig::default();
    let ctx = context(&config);
    let coll = CollectionBuilder::new(spec_for("sorted", fixture.path()), &ctx)
        .read_or_create(UpdateMode::Always)
        .unwrap()
        .value;

    let group = &coll.groups[0];
    let var = &group.variables[0];
    let runtimes = &group.runtime_coord(var).unwrap().values;
    assert_eq!(runtimes, &vec![runtime(0), runtime(12), runtime(24)]);

    let middle = coll.resolve(0, 0, CellIndex::new(1, 0)).unwrap().unwrap();
    assert_eq!(coll.file_path(middle.file_index).unwrap(), fixture.path().join("c.grib2.json"));
}

#[test]
fn test_records_resolve_to_their_cells() {
    let fixture = two_run_fixture();
    let config = GribConfig::default();
    let ctx = context(&config);
    let coll = CollectionBuilder::new(spec_for("gfs", fixture.path()), &ctx)
        .read_or_create(UpdateMode::Always)
        .unwrap()
        .value;

    let temperature = VariableKey::from_record(&RecordBuilder::new().isobaric(50000.0).build(), &config);
    let group = &coll.groups[0];
    let vi = group.variable_index(temperature.cdm_hash()).unwrap();
    let var = &group.variables[vi];
    assert_eq!(group.vertical_coord(var).unwrap().values.len(), 2);
    assert_eq!(group.time_coord(var).unwrap().offsets(), vec![0, 6]);
    assert_eq!(var.record_count, 8);
    assert_eq!(coll.group_files(group).len(), 2);

    // run12, offset 6, 85000 Pa is the fourth record of run12
    let loc = coll
        .resolve(0, vi, CellIndex::new(1, 1).with_vertical(1))
        .unwrap()
        .unwrap();
    assert_eq!(loc.file_index, 1);
    assert_eq!(loc.pos, 4000);

    let pressure = group.variable_index(
        VariableKey::from_record(&RecordBuilder::new().param(0, 3, 0).build(), &config).cdm_hash(),
    );
    let pvar = &group.variables[pressure.unwrap()];
    assert!(pvar.coords.vertical.is_none());
    // pressure exists only in run00
    assert!(coll.resolve(0, pressure.unwrap(), CellIndex::new(1, 0)).unwrap().is_none());
    assert_eq!(pvar.shape.len(), 3);
}

#[test]
fn test_interval_filter_from_yaml() {
    let mut fixture = CollectionFixture::new();
    fixture.add_file(
        "precip",
        &[
            RecordBuilder::new().param(0, 1, 8).interval(0, 0).at(100).build(),
            RecordBuilder::new().param(0, 1, 8).interval(0, 3).at(200).build(),
            RecordBuilder::new().param(0, 1, 8).interval(0, 6).at(300).build(),
        ],
    );

    let config: GribConfig = serde_yaml::from_str(
        "interval_filter:\n  rules:\n    - variable: \"0-1-8\"\n      interval_length: 3\n",
    )
    .unwrap();
    let ctx = context(&config);
    let built = CollectionBuilder::new(spec_for("precip", fixture.path()), &ctx)
        .read_or_create(UpdateMode::Always)
        .unwrap();

    assert_eq!(built.report.records_total, 3);
    assert_eq!(built.report.records_filtered, 2);
    let group = &built.value.groups[0];
    let time = group.time_coord(&group.variables[0]).unwrap();
    assert!(time.is_interval);
    assert_eq!(time.values, vec![TimeInterval::new(0, 3)]);
}

#[test]
fn test_remapped_grids_share_a_group() {
    let mut fixture = CollectionFixture::new();
    fixture.add_file(
        "grids",
        &[
            RecordBuilder::new().grid(1).build(),
            RecordBuilder::new().grid(2).offset(6).build(),
        ],
    );

    let plain = GribConfig::default();
    let ctx = context(&plain);
    let coll = CollectionBuilder::new(spec_for("plain", fixture.path()), &ctx)
        .read_or_create(UpdateMode::Always)
        .unwrap()
        .value;
    assert_eq!(coll.groups.len(), 2);

    let from = grib_common::GridHash::of(&test_utils::grid_bytes(2)).0;
    let to = grib_common::GridHash::of(&test_utils::grid_bytes(1)).0;
    let mut remapped = GribConfig::default();
    remapped.grid_hash_remap.insert(from, to);
    remapped.group_names.insert(to, "conus".to_string());
    let ctx = context(&remapped);
    let coll = CollectionBuilder::new(spec_for("remapped", fixture.path()), &ctx)
        .read_or_create(UpdateMode::Always)
        .unwrap()
        .value;
    assert_eq!(coll.groups.len(), 1);
    assert_eq!(coll.groups[0].id, "conus");
    assert_eq!(coll.groups[0].variables[0].record_count, 2);
}

// ============================================================================
// Staleness
// ============================================================================

#[test]
fn test_needs_update_follows_modification_times() {
    let mut fixture = two_run_fixture();
    let config = GribConfig::default();
    let ctx = context(&config);
    let builder = CollectionBuilder::new(spec_for("gfs", fixture.path()), &ctx);

    assert!(builder.needs_update().unwrap());
    for file in fixture.files() {
        age_file(file, 3600);
    }
    builder.read_or_create(UpdateMode::IfStale).unwrap();
    assert!(!builder.needs_update().unwrap());

    touch_future(&fixture.files()[1], 600);
    assert!(builder.needs_update().unwrap());

    age_file(&fixture.files()[1], 3600);
    builder.read_or_create(UpdateMode::Always).unwrap();
    assert!(!builder.needs_update().unwrap());

    let extra = fixture.add_file("run18", &surface_pressure(18, &[0]));
    age_file(&extra, 3600);
    assert!(builder.needs_update().unwrap());
}

#[test]
fn test_if_stale_reuses_current_index() {
    let fixture = two_run_fixture();
    for file in fixture.files() {
        age_file(file, 3600);
    }
    let config = GribConfig::default();
    let ctx = context(&config);
    let builder = CollectionBuilder::new(spec_for("gfs", fixture.path()), &ctx);

    assert_eq!(
        builder.read_or_create(UpdateMode::IfStale).unwrap().report.action,
        BuildAction::Created
    );
    let again = builder.read_or_create(UpdateMode::IfStale).unwrap();
    assert_eq!(again.report.action, BuildAction::Loaded);
    assert!(again.value.index_path().is_some());
}

// ============================================================================
// Version gate and corruption
// ============================================================================

#[test]
fn test_newer_minimum_version_is_incompatible() {
    let fixture = two_run_fixture();
    let config = GribConfig::default();
    let ctx = context(&config);
    let builder = CollectionBuilder::new(spec_for("gfs", fixture.path()), &ctx);
    builder.read_or_create(UpdateMode::Always).unwrap();
    let index = builder.spec().index_path();

    assert_eq!(probe(&index, IndexKind::Collection, MIN_INDEX_VERSION).unwrap(), INDEX_VERSION);
    let err = read_collection(&index, INDEX_VERSION + 1).unwrap_err();
    assert!(matches!(err, CollectionError::Incompatible { found, .. } if found == INDEX_VERSION));
    assert!(err.is_unusable_index());

    // treated as absent: the builder rebuilds instead of failing
    let strict = context(&config).with_min_version(INDEX_VERSION + 1);
    let rebuilt = CollectionBuilder::new(spec_for("gfs", fixture.path()), &strict)
        .read_or_create(UpdateMode::Nocheck)
        .unwrap();
    assert!(matches!(rebuilt.report.action, BuildAction::Rebuilt { .. }));
}

#[test]
fn test_future_version_is_incompatible() {
    let fixture = two_run_fixture();
    let config = GribConfig::default();
    let ctx = context(&config);
    let builder = CollectionBuilder::new(spec_for("gfs", fixture.path()), &ctx);
    builder.read_or_create(UpdateMode::Always).unwrap();
    let index = builder.spec().index_path();

    let mut bytes = fs::read(&index).unwrap();
    let at = IndexKind::Collection.magic().len();
    bytes[at..at + 4].copy_from_slice(&(INDEX_VERSION + 1).to_be_bytes());
    fs::write(&index, bytes).unwrap();

    let err = read_collection(&index, MIN_INDEX_VERSION).unwrap_err();
    assert!(matches!(err, CollectionError::Incompatible { .. }));
}

#[test]
fn test_truncated_index_is_invalid() {
    let fixture = two_run_fixture();
    let config = GribConfig::default();
    let ctx = context(&config);
    let builder = CollectionBuilder::new(spec_for("gfs", fixture.path()), &ctx);
    builder.read_or_create(UpdateMode::Always).unwrap();
    let index = builder.spec().index_path();

    let bytes = fs::read(&index).unwrap();
    fs::write(&index, &bytes[..bytes.len() - 10]).unwrap();
    let err = read_collection(&index, MIN_INDEX_VERSION).unwrap_err();
    assert!(matches!(err, CollectionError::IndexInvalid { .. }));

    fs::write(&index, b"not an index at all").unwrap();
    let err = read_collection(&index, MIN_INDEX_VERSION).unwrap_err();
    assert!(matches!(err, CollectionError::IndexInvalid { .. }));
}

#[test]
fn test_closed_collection_reopens_on_demand() {
    let fixture = two_run_fixture();
    let config = GribConfig::default();
    let ctx = context(&config);
    let builder = CollectionBuilder::new(spec_for("gfs", fixture.path()), &ctx);
    builder.read_or_create(UpdateMode::Always).unwrap();

    let coll = read_collection(&builder.spec().index_path(), MIN_INDEX_VERSION).unwrap();
    coll.close();
    let last = coll.groups[0].variables.len() - 1;
    assert!(coll.records(0, last).unwrap().iter().any(Option::is_some));
    assert!(matches!(
        coll.records(0, last + 1),
        Err(CollectionError::UnknownVariable { .. })
    ));
}
