//! `smartctl --json` backend (spec §4.H). Ported from
//! `parse_smartctl_error`/`parse_ata_smart`/`parse_ata_smart_attributes` in
//! `src/plugins/smart.c`.

use super::{
    AttributeFlags, AttributeUnit, OfflineDataCollectionCapabilities, OfflineDataCollectionStatus,
    SelfTestStatus, SmartAtaReport, SmartAttribute, SmartCapabilities,
};
use crate::error::{BlockdevError, Result};
use crate::exec;
use serde_json::Value;

const STANDBY_RET_CODE: i32 = 255;
const MIN_JSON_FORMAT_VERSION: i64 = 1;

fn run_smartctl(args: &[String]) -> (i32, String, String) {
    let mut full = vec!["smartctl".to_string()];
    full.extend(args.iter().cloned());
    match exec::exec_capture_output(&full, &[]) {
        Ok(stdout) => (0, stdout, String::new()),
        Err(BlockdevError::ProcessFailed { status, message }) => (status, String::new(), message),
        Err(BlockdevError::NoOutput { stderr }) => (0, String::new(), stderr),
        Err(e) => (-1, String::new(), e.to_string()),
    }
}

fn error_message_from_exit_code(status: i32) -> String {
    match status & 0x07 {
        0 => "Empty response".to_string(),
        s if s & 0x01 != 0 => "Command line did not parse".to_string(),
        s if s & 0x02 != 0 => "Device open failed, or device did not return an IDENTIFY".to_string(),
        _ => "SMART or ATA command failed, or checksum error".to_string(),
    }
}

fn first_error_message(root: &Value) -> Option<String> {
    root.get("smartctl")?
        .get("messages")?
        .as_array()?
        .iter()
        .find(|m| m.get("severity").and_then(Value::as_str) == Some("error"))
        .and_then(|m| m.get("string"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Applies spec §4.H's exit-code bitmask/JSON-format-gating rules to a
/// smartctl invocation's raw exit status and stdout/stderr, returning the
/// parsed root JSON value on success.
fn parse_smartctl_response(
    status: i32,
    stdout: &str,
    stderr: &str,
    nowakeup: bool,
) -> Result<Value> {
    if nowakeup && status == STANDBY_RET_CODE {
        return Err(BlockdevError::DriveSleeping);
    }
    if stdout.is_empty() && stderr.is_empty() {
        let msg = if status & 0x07 != 0 {
            error_message_from_exit_code(status)
        } else {
            "Empty response".to_string()
        };
        return Err(BlockdevError::Parse(msg));
    }
    if stdout.is_empty() {
        return Err(BlockdevError::Parse(stderr.to_string()));
    }

    let root: Value =
        serde_json::from_str(stdout).map_err(|e| BlockdevError::Parse(e.to_string()))?;

    let major = root
        .get("json_format_version")
        .and_then(Value::as_array)
        .and_then(|a| a.first())
        .and_then(Value::as_i64)
        .ok_or_else(|| BlockdevError::Parse("missing json_format_version".to_string()))?;
    if major < MIN_JSON_FORMAT_VERSION {
        return Err(BlockdevError::Parse(format!(
            "Reported smartctl JSON format version too low: {major} (required: {MIN_JSON_FORMAT_VERSION})"
        )));
    }
    if major > MIN_JSON_FORMAT_VERSION {
        tracing::warn!(major, "smartctl JSON format major version higher than expected, expect parse issues");
    }

    if status & 0x07 != 0 {
        let msg = first_error_message(&root).unwrap_or_else(|| error_message_from_exit_code(status));
        return Err(BlockdevError::Parse(msg));
    }

    Ok(root)
}

fn parse_attributes(table: &[Value]) -> Vec<SmartAttribute> {
    table
        .iter()
        .filter_map(|entry| {
            let id = entry.get("id")?.as_i64()? as u8;
            let raw_label = entry.get("name")?.as_str()?.to_string();
            let value = entry.get("value").and_then(Value::as_i64);
            let worst = entry.get("worst").and_then(Value::as_i64);
            let threshold = entry.get("thresh").and_then(Value::as_i64);
            let when_failed = entry.get("when_failed").and_then(Value::as_str);
            let raw = entry.get("raw")?;
            let value_raw = raw.get("value").and_then(Value::as_i64).unwrap_or(0);
            let value_raw_string = raw
                .get("string")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let flags_value = entry
                .get("flags")
                .and_then(|f| f.get("value"))
                .and_then(Value::as_i64)
                .unwrap_or(0);

            let mut attr = SmartAttribute {
                id,
                raw_label,
                well_known_name: None,
                value,
                worst,
                threshold,
                failed_past: when_failed == Some("past"),
                failing_now: when_failed == Some("now"),
                value_raw,
                value_raw_string,
                unit: AttributeUnit::Unknown,
                flags: AttributeFlags::from_smartctl_value(flags_value),
            };
            attr.resolve_naming(None);
            Some(attr)
        })
        .collect()
}

fn parse_capabilities(section: &Value) -> (OfflineDataCollectionCapabilities, SmartCapabilities) {
    let mut offline_caps = OfflineDataCollectionCapabilities::empty();
    let mut smart_caps = SmartCapabilities::empty();

    if let Some(values) = section.get("values").and_then(Value::as_array) {
        if let (Some(v0), Some(v1)) = (
            values.first().and_then(Value::as_i64),
            values.get(1).and_then(Value::as_i64),
        ) {
            if v0 != 0x00 {
                if v0 & 0x01 != 0 {
                    offline_caps |= OfflineDataCollectionCapabilities::EXEC_OFFLINE_IMMEDIATE;
                }
                if v0 & 0x04 != 0 {
                    offline_caps |= OfflineDataCollectionCapabilities::OFFLINE_ABORT;
                }
                if v0 & 0x08 != 0 {
                    offline_caps |= OfflineDataCollectionCapabilities::OFFLINE_SURFACE_SCAN;
                }
                if v0 & 0x10 != 0 {
                    offline_caps |= OfflineDataCollectionCapabilities::SELF_TEST;
                }
                if v0 & 0x20 != 0 {
                    offline_caps |= OfflineDataCollectionCapabilities::CONVEYANCE_SELF_TEST;
                }
                if v0 & 0x40 != 0 {
                    offline_caps |= OfflineDataCollectionCapabilities::SELECTIVE_SELF_TEST;
                }
            }
            if v1 & 0x01 != 0 {
                smart_caps |= SmartCapabilities::ATTRIBUTE_AUTOSAVE;
            }
            if v1 & 0x02 != 0 {
                smart_caps |= SmartCapabilities::AUTOSAVE_TIMER;
            }
        }
    }
    if section.get("error_logging_supported").and_then(Value::as_bool) == Some(true) {
        smart_caps |= SmartCapabilities::ERROR_LOGGING;
    }
    if section.get("gp_logging_supported").and_then(Value::as_bool) == Some(true) {
        smart_caps |= SmartCapabilities::GP_LOGGING;
    }
    (offline_caps, smart_caps)
}

fn parse_ata_smart(root: &Value) -> Result<SmartAtaReport> {
    let mut report = SmartAtaReport::default();

    if let Some(support) = root.get("smart_support") {
        report.smart_supported = support.get("available").and_then(Value::as_bool).unwrap_or(false);
        report.smart_enabled = support.get("enabled").and_then(Value::as_bool).unwrap_or(false);
    }
    if let Some(status) = root.get("smart_status") {
        report.overall_status_passed = status.get("passed").and_then(Value::as_bool).unwrap_or(false);
    }

    let data = root
        .get("ata_smart_data")
        .ok_or_else(|| BlockdevError::Parse("missing 'ata_smart_data' section".to_string()))?;

    if let Some(odc) = data.get("offline_data_collection") {
        if let Some(val) = odc.get("status").and_then(|s| s.get("value")).and_then(Value::as_i64) {
            report.offline_data_collection_status = Some(OfflineDataCollectionStatus::from_smartctl_value(val));
            report.auto_offline_data_collection_enabled = val & 0x80 != 0;
        }
        report.offline_data_collection_completion_seconds = odc
            .get("completion_seconds")
            .and_then(Value::as_i64)
            .unwrap_or(0);
    }

    if let Some(st) = data.get("self_test") {
        if let Some(val) = st.get("status").and_then(|s| s.get("value")).and_then(Value::as_i64) {
            let (status, percent) = SelfTestStatus::from_smartctl_value(val);
            report.self_test_status = Some(status);
            report.self_test_percent_remaining = percent;
        }
        if let Some(polling) = st.get("polling_minutes") {
            report.self_test_polling_short_minutes =
                polling.get("short").and_then(Value::as_i64).unwrap_or(0);
            report.self_test_polling_extended_minutes =
                polling.get("extended").and_then(Value::as_i64).unwrap_or(0);
            report.self_test_polling_conveyance_minutes =
                polling.get("conveyance").and_then(Value::as_i64).unwrap_or(0);
        }
    }

    if let Some(caps) = data.get("capabilities") {
        let (offline_caps, smart_caps) = parse_capabilities(caps);
        report.offline_data_collection_capabilities = offline_caps;
        report.smart_capabilities = smart_caps;
    }

    if let Some(table) = root
        .get("ata_smart_attributes")
        .and_then(|a| a.get("table"))
        .and_then(Value::as_array)
    {
        report.attributes = parse_attributes(table);
    }

    if let Some(pot) = root.get("power_on_time") {
        let hours = pot.get("hours").and_then(Value::as_i64).unwrap_or(0);
        let minutes = pot.get("minutes").and_then(Value::as_i64).unwrap_or(0);
        report.power_on_minutes = hours * 60 + minutes;
    }
    report.power_cycle_count = root.get("power_cycle_count").and_then(Value::as_i64).unwrap_or(0);
    if let Some(temp) = root.get("temperature").and_then(|t| t.get("current")).and_then(Value::as_i64) {
        report.temperature_kelvin = Some(temp + 273);
    }

    Ok(report)
}

/// Runs `smartctl --info --health --capabilities --attributes --json
/// --nocheck=... --device=ata --badsum=ignore <device>` and decodes the
/// result into a [`SmartAtaReport`]. With `nowakeup` set, a device found in
/// standby is reported as [`BlockdevError::DriveSleeping`] instead of being
/// spun up.
pub fn get_ata_info(device: &str, nowakeup: bool) -> Result<SmartAtaReport> {
    let nocheck = if nowakeup {
        format!("--nocheck=standby,{STANDBY_RET_CODE}")
    } else {
        "--nocheck=never".to_string()
    };
    let args = vec![
        "--info".to_string(),
        "--health".to_string(),
        "--capabilities".to_string(),
        "--attributes".to_string(),
        "--json".to_string(),
        nocheck,
        "--device=ata".to_string(),
        "--badsum=ignore".to_string(),
        device.to_string(),
    ];
    let (status, stdout, stderr) = run_smartctl(&args);
    let root = parse_smartctl_response(status, &stdout, &stderr, nowakeup)?;
    parse_ata_smart(&root)
}

/// Enables or disables SMART functionality on `device`.
pub fn set_enabled(device: &str, enabled: bool) -> Result<()> {
    let args = vec![
        "--json".to_string(),
        if enabled { "--smart=on" } else { "--smart=off" }.to_string(),
        device.to_string(),
    ];
    let (status, stdout, stderr) = run_smartctl(&args);
    parse_smartctl_response(status, &stdout, &stderr, false)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
        r#"{
            "json_format_version": [1, 0],
            "smart_support": {"available": true, "enabled": true},
            "smart_status": {"passed": true},
            "ata_smart_data": {
                "offline_data_collection": {"status": {"value": 2}, "completion_seconds": 120},
                "self_test": {"status": {"value": 242}, "polling_minutes": {"short": 2, "extended": 180, "conveyance": 5}},
                "capabilities": {"values": [63, 3], "error_logging_supported": true, "gp_logging_supported": true}
            },
            "ata_smart_attributes": {
                "table": [
                    {"id": 9, "name": "Power_On_Hours", "value": 95, "worst": 95, "thresh": 0,
                     "when_failed": "", "raw": {"value": 12345, "string": "12345"},
                     "flags": {"value": 50}}
                ]
            },
            "power_on_time": {"hours": 200, "minutes": 30},
            "power_cycle_count": 42,
            "temperature": {"current": 35}
        }"#
    }

    #[test]
    fn parses_full_report() {
        let root: Value = serde_json::from_str(sample_json()).unwrap();
        let report = parse_ata_smart(&root).unwrap();
        assert!(report.smart_supported);
        assert!(report.overall_status_passed);
        assert_eq!(report.offline_data_collection_status, Some(OfflineDataCollectionStatus::NoError));
        assert_eq!(report.power_on_minutes, 200 * 60 + 30);
        assert_eq!(report.power_cycle_count, 42);
        assert_eq!(report.temperature_kelvin, Some(308));
        assert_eq!(report.attributes.len(), 1);
        assert_eq!(report.attributes[0].well_known_name.as_deref(), Some("power-on-hours"));
    }

    #[test]
    fn standby_exit_code_short_circuits_before_parsing() {
        let err = parse_smartctl_response(STANDBY_RET_CODE, "", "", true).unwrap_err();
        assert!(matches!(err, BlockdevError::DriveSleeping));
    }

    #[test]
    fn low_json_format_version_is_rejected() {
        let json = r#"{"json_format_version": [0, 9]}"#;
        let err = parse_smartctl_response(0, json, "", false).unwrap_err();
        assert!(matches!(err, BlockdevError::Parse(_)));
    }

    #[test]
    fn error_bit_scans_messages_for_first_error() {
        let json = r#"{
            "json_format_version": [1, 0],
            "smartctl": {"messages": [{"severity": "error", "string": "device not found"}]}
        }"#;
        let err = parse_smartctl_response(0x02, json, "", false).unwrap_err();
        match err {
            BlockdevError::Parse(msg) => assert_eq!(msg, "device not found"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
