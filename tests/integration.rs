//! Black-box integration tests for the pieces of `blockdev` that don't
//! require a real block device or kernel ioctl access: size parsing, the
//! dependency cache, and VDO statistics derivation.

use blockdev::deps::{AvailabilityCache, DepSpec};
use blockdev::sizes::{size_from_spec, size_human_readable};
use blockdev::vdo_stats::{add_computed_stats, ingest_dm_yaml, VdoStats};

#[test]
fn size_spec_round_trips_through_human_readable() {
    let bytes = size_from_spec("10 GiB").unwrap();
    assert_eq!(bytes, 10 * 1024 * 1024 * 1024);
    assert_eq!(size_human_readable(bytes), "10 GiB");
}

#[test]
fn size_spec_zero_parses_regardless_of_unit() {
    assert_eq!(size_from_spec("0").unwrap(), 0);
    assert_eq!(size_from_spec("0 KiB").unwrap(), 0);
}

#[test]
fn size_spec_rejects_garbage() {
    assert!(size_from_spec("not a size").is_err());
}

#[test]
fn dependency_cache_reports_missing_utility_by_name() {
    let specs = [DepSpec::Util {
        name: "definitely-not-a-real-binary-xyz",
        min_version: None,
        version_arg: None,
        version_regexp: None,
    }];
    let cache = AvailabilityCache::new();
    let err = cache.check(0b1, &specs).unwrap_err();
    assert!(err.contains("definitely-not-a-real-binary-xyz"));
}

#[test]
fn dependency_cache_is_shareable_across_overlapping_masks() {
    let specs = [
        DepSpec::Feature {
            util: "printf",
            feature_string: "always-on-a",
            feature_arg: Some("always-on-a"),
            feature_regexp: None,
        },
        DepSpec::Feature {
            util: "printf",
            feature_string: "always-on-b",
            feature_arg: Some("always-on-b"),
            feature_regexp: None,
        },
    ];
    let cache = AvailabilityCache::new();
    assert!(cache.check(0b01, &specs).is_ok());
    assert!(cache.check(0b11, &specs).is_ok());
    assert!(cache.is_cached(0b01));
    assert!(cache.is_cached(0b10));
}

#[test]
fn vdo_stats_from_dm_yaml_include_derived_usage() {
    let yaml = "\
blockSize: 4096
physicalBlocks: 1024
dataBlocksUsed: 100
overheadBlocksUsed: 24
logicalBlocksUsed: 200
biosInProgress:
  read: 3
  write: 7
";
    let stats: VdoStats = ingest_dm_yaml(yaml).unwrap();
    assert_eq!(stats["biosInProgressRead"], "3");
    assert_eq!(stats["biosInProgressWrite"], "7");
    assert_eq!(stats["oneKBlocks"], "4096");
    assert_eq!(stats["usedPercent"], "12");
}

#[test]
fn vdo_stats_add_computed_stats_is_idempotent_on_empty_input() {
    let mut stats = VdoStats::new();
    add_computed_stats(&mut stats);
    let snapshot = stats.clone();
    add_computed_stats(&mut stats);
    assert_eq!(stats, snapshot);
}
