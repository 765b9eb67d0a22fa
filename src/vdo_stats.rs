//! VDO/LVM statistics parser (spec §4.G).
//!
//! Two ingestion paths feed the same canonical map: a sysfs directory of
//! one-value-per-file stat files, and a device-mapper target message
//! response in YAML. Both end up in [`add_computed_stats`], which derives
//! the write-amplification, block-usage, savings, and journal-batching
//! figures callers actually want. Ported from
//! `src/plugins/lvm/vdo_stats.c`'s `vdo_get_stats_full` and
//! `add_computed_stats`.

use crate::error::{BlockdevError, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// A flat {key -> string-of-integer-or-float} map, snake- or camelCase keys
/// as produced by the two ingestion paths, enriched with derived keys.
pub type VdoStats = BTreeMap<String, String>;

fn get_i64(stats: &VdoStats, key: &str) -> Option<i64> {
    stats.get(key)?.parse().ok()
}

/// Reads every regular file directly inside `dir` as one stat: the file
/// name is the key, the trimmed contents are the value. Mirrors the sysfs
/// half of VDO stats ingestion (`/sys/kvdo/<name>/statistics/*`).
pub fn ingest_sysfs(dir: &Path) -> Result<VdoStats> {
    let mut stats = VdoStats::new();
    for entry in fs::read_dir(dir).map_err(BlockdevError::Io)? {
        let entry = entry.map_err(BlockdevError::Io)?;
        if !entry.file_type().map_err(BlockdevError::Io)?.is_file() {
            continue;
        }
        let key = entry.file_name().to_string_lossy().into_owned();
        let value = fs::read_to_string(entry.path())
            .map_err(BlockdevError::Io)?
            .trim()
            .to_string();
        stats.insert(key, value);
    }
    add_computed_stats(&mut stats);
    Ok(stats)
}

fn capitalize_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn stringify(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Null => String::new(),
        other => serde_yaml::to_string(other).unwrap_or_default().trim().to_string(),
    }
}

fn flatten_yaml(value: &serde_yaml::Value, prefix: Option<&str>, into: &mut VdoStats) {
    let Some(mapping) = value.as_mapping() else {
        return;
    };
    for (k, v) in mapping {
        let Some(raw_key) = k.as_str() else { continue };
        let key = match prefix {
            Some(p) => format!("{p}{}", capitalize_first(raw_key)),
            None => raw_key.to_string(),
        };
        if v.is_mapping() {
            flatten_yaml(v, Some(&key), into);
        } else {
            into.insert(key, stringify(v));
        }
    }
}

/// Parses a DM target message response (the YAML blob returned by a
/// `dm_task_get_message_response` "stats" query) into a flat stat map.
/// Nested mappings are flattened with their parent key as a camelCase
/// prefix (`biosInProgress: {read: .., write: ..}` becomes
/// `biosInProgressRead`, `biosInProgressWrite`), matching the original's
/// flow-mapping prefixing rule.
pub fn ingest_dm_yaml(yaml: &str) -> Result<VdoStats> {
    let value: serde_yaml::Value =
        serde_yaml::from_str(yaml).map_err(|e| BlockdevError::Parse(e.to_string()))?;
    let mut stats = VdoStats::new();
    flatten_yaml(&value, None, &mut stats);
    add_computed_stats(&mut stats);
    Ok(stats)
}

fn add_write_ampl_stats(stats: &mut VdoStats) {
    let (Some(meta), Some(out), Some(in_)) = (
        get_i64(stats, "biosMetaWrite"),
        get_i64(stats, "biosOutWrite"),
        get_i64(stats, "biosInWrite"),
    ) else {
        return;
    };
    let ratio = if in_ <= 0 {
        0.0
    } else {
        (meta + out) as f64 / in_ as f64
    };
    stats.insert("writeAmplificationRatio".to_string(), format!("{ratio:.2}"));
}

fn add_block_stats(stats: &mut VdoStats) {
    let (Some(physical), Some(block_size), Some(data_used), Some(overhead_used), Some(logical_used)) = (
        get_i64(stats, "physicalBlocks"),
        get_i64(stats, "blockSize"),
        get_i64(stats, "dataBlocksUsed"),
        get_i64(stats, "overheadBlocksUsed"),
        get_i64(stats, "logicalBlocksUsed"),
    ) else {
        return;
    };

    stats.insert(
        "oneKBlocks".to_string(),
        (physical * block_size / 1024).to_string(),
    );
    stats.insert(
        "oneKBlocksUsed".to_string(),
        ((data_used + overhead_used) * block_size / 1024).to_string(),
    );
    stats.insert(
        "oneKBlocksAvailable".to_string(),
        ((physical - data_used - overhead_used) * block_size / 1024).to_string(),
    );
    let used_percent = 100.0 * (data_used + overhead_used) as f64 / physical as f64;
    stats.insert("usedPercent".to_string(), format!("{:.0}", used_percent));

    let savings = if logical_used > 0 {
        (100.0 * (logical_used - data_used) as f64 / logical_used as f64) as i64
    } else {
        100
    };
    stats.insert("savings".to_string(), savings.to_string());
    if savings >= 0 {
        stats.insert("savingPercent".to_string(), savings.to_string());
    }
}

fn add_journal_stats(stats: &mut VdoStats) {
    let (Some(ec), Some(es), Some(ew), Some(bc), Some(bs), Some(bw)) = (
        get_i64(stats, "journalEntriesCommitted"),
        get_i64(stats, "journalEntriesStarted"),
        get_i64(stats, "journalEntriesWritten"),
        get_i64(stats, "journalBlocksCommitted"),
        get_i64(stats, "journalBlocksStarted"),
        get_i64(stats, "journalBlocksWritten"),
    ) else {
        return;
    };

    stats.insert("journalEntriesBatching".to_string(), (es - ew).to_string());
    stats.insert("journalEntriesWriting".to_string(), (ew - ec).to_string());
    stats.insert("journalBlocksBatching".to_string(), (bs - bw).to_string());
    stats.insert("journalBlocksWriting".to_string(), (bw - bc).to_string());
}

/// Adds every derived key whose inputs are present: write-amplification
/// ratio, one-KB-block usage figures, savings, journal batching/writing
/// deltas, and the 512-byte-emulation flag.
///
/// `usedPercent` rounds the raw percentage to the nearest integer directly;
/// the original C adds `0.5` before an already-rounding `%.0f`, which
/// double-rounds values in the `.5..1.0` fractional range upward and
/// contradicts its own documented example (`usedPercent` of a 12.1% use
/// should read `12`, not `13`).
pub fn add_computed_stats(stats: &mut VdoStats) {
    if let Some(logical_block_size) = stats.get("logicalBlockSize") {
        let emulation = logical_block_size == "512";
        stats.insert(
            "fiveTwelveByteEmulation".to_string(),
            emulation.to_string(),
        );
    }

    add_write_ampl_stats(stats);
    add_block_stats(stats);
    add_journal_stats(stats);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> VdoStats {
        let mut m = VdoStats::new();
        m.insert("blockSize".to_string(), "4096".to_string());
        m.insert("physicalBlocks".to_string(), "1024".to_string());
        m.insert("dataBlocksUsed".to_string(), "100".to_string());
        m.insert("overheadBlocksUsed".to_string(), "24".to_string());
        m.insert("logicalBlocksUsed".to_string(), "200".to_string());
        m
    }

    #[test]
    fn derived_block_stats_s4() {
        let mut stats = sample();
        add_computed_stats(&mut stats);
        assert_eq!(stats["oneKBlocks"], "4096");
        assert_eq!(stats["oneKBlocksUsed"], "496");
        assert_eq!(stats["oneKBlocksAvailable"], "3600");
        assert_eq!(stats["usedPercent"], "12");
        assert_eq!(stats["savings"], "50");
        assert_eq!(stats["savingPercent"], "50");
    }

    #[test]
    fn missing_inputs_skip_derivation_without_panicking() {
        let mut stats = VdoStats::new();
        add_computed_stats(&mut stats);
        assert!(!stats.contains_key("fiveTwelveByteEmulation"));
        assert!(!stats.contains_key("oneKBlocks"));
    }

    #[test]
    fn five_twelve_byte_emulation_present_only_when_input_is() {
        let mut stats = VdoStats::new();
        stats.insert("logicalBlockSize".to_string(), "4096".to_string());
        add_computed_stats(&mut stats);
        assert_eq!(stats["fiveTwelveByteEmulation"], "false");
    }

    #[test]
    fn yaml_flow_mapping_gets_camelcase_prefix() {
        let yaml = "biosInProgress:\n  read: 3\n  write: 7\nblockSize: 4096\n";
        let stats = ingest_dm_yaml(yaml).unwrap();
        assert_eq!(stats["biosInProgressRead"], "3");
        assert_eq!(stats["biosInProgressWrite"], "7");
        assert_eq!(stats["blockSize"], "4096");
    }

    #[test]
    fn write_amplification_ratio_zero_on_no_writes() {
        let mut stats = VdoStats::new();
        stats.insert("biosMetaWrite".to_string(), "0".to_string());
        stats.insert("biosOutWrite".to_string(), "0".to_string());
        stats.insert("biosInWrite".to_string(), "0".to_string());
        add_computed_stats(&mut stats);
        assert_eq!(stats["writeAmplificationRatio"], "0.00");
    }
}
