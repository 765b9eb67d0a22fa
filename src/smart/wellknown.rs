//! Well-known attribute name/unit resolution table (spec §4.H).
//!
//! Ported (a representative subset -- the full upstream table runs to
//! 50-odd entries inherited originally from `libatasmart`, in turn "stolen
//! from smartmontools") from `smart-private.h`'s `well_known_attrs`. Each
//! entry maps an attribute id to a canonical libatasmart-style name, a
//! preferred unit, and the list of raw labels smartctl/smartmontools are
//! known to use for that id; a raw label not in the list leaves the
//! attribute "untrusted" (no well-known name attached).

use super::AttributeUnit;

pub struct WellKnownAttrInfo {
    pub libatasmart_name: &'static str,
    pub unit: AttributeUnit,
    pub smartmontools_names: &'static [&'static str],
}

macro_rules! entry {
    ($name:expr, $unit:expr, [$($label:expr),* $(,)?]) => {
        WellKnownAttrInfo {
            libatasmart_name: $name,
            unit: $unit,
            smartmontools_names: &[$($label),*],
        }
    };
}

const TABLE: &[(u8, WellKnownAttrInfo)] = &[
    (1, entry!("raw-read-error-rate", AttributeUnit::None, ["Raw_Read_Error_Count", "Raw_Read_Error_Rate"])),
    (2, entry!("throughput-performance", AttributeUnit::Unknown, ["Throughput_Performance"])),
    (3, entry!("spin-up-time", AttributeUnit::Ms, ["Spin_Up_Time"])),
    (4, entry!("start-stop-count", AttributeUnit::None, ["Start_Stop_Count"])),
    (5, entry!("reallocated-sector-count", AttributeUnit::Sectors, ["Reallocated_Block_Count", "Reallocated_Sector_Ct"])),
    (7, entry!("seek-error-rate", AttributeUnit::None, ["Seek_Error_Rate"])),
    (9, entry!("power-on-hours", AttributeUnit::Ms, ["Power_On_Hours", "Power_On_Hours_and_Msec"])),
    (10, entry!("spin-retry-count", AttributeUnit::None, ["Spin_Retry_Count"])),
    (12, entry!("power-cycle-count", AttributeUnit::None, ["Power_Cycle_Count", "Device_Power_Cycle_Cnt"])),
    (170, entry!("available-reserved-space", AttributeUnit::Percent, ["Available_Reservd_Space", "Reserved_Block_Pct"])),
    (171, entry!("program-fail-count", AttributeUnit::None, ["Program_Fail_Cnt", "Program_Fail_Count", "Program_Fail_Ct"])),
    (172, entry!("erase-fail-count", AttributeUnit::None, ["Erase_Fail_Cnt", "Erase_Fail_Ct", "Erase_Fail_Count", "Block_Erase_Failure"])),
    (177, entry!("wear-leveling-count", AttributeUnit::None, ["Wear_Leveling_Count"])),
    (184, entry!("end-to-end-error", AttributeUnit::None, ["End-to-End_Error", "End-to-End_Error_Count"])),
    (187, entry!("reported-uncorrect", AttributeUnit::Sectors, ["Reported_Uncorrect", "Reported_UE_Counts"])),
    (188, entry!("command-timeout", AttributeUnit::None, ["Command_Timeout", "Command_Timeouts"])),
    (190, entry!("airflow-temperature-celsius", AttributeUnit::MKelvin, ["Airflow_Temperature_Cel", "Case_Temperature", "Drive_Temperature", "Temperature_Case", "Drive_Temp_Warning", "Temperature_Celsius"])),
    (192, entry!("power-off-retract-count", AttributeUnit::None, ["Power-Off_Retract_Count", "Power-off_Retract_Count"])),
    (193, entry!("load-cycle-count", AttributeUnit::None, ["Load_Cycle_Count"])),
    (194, entry!("temperature-celsius-2", AttributeUnit::MKelvin, ["Temperature_Celsius", "Device_Temperature", "Drive_Temperature", "Temperature_Internal"])),
    (196, entry!("reallocated-event-count", AttributeUnit::None, ["Reallocated_Event_Count"])),
    (197, entry!("current-pending-sector", AttributeUnit::Sectors, ["Current_Pending_Sector", "Pending_Sector_Count"])),
    (198, entry!("offline-uncorrectable", AttributeUnit::Sectors, ["Offline_Uncorrectable", "Uncor_Read_Error_Ct", "Uncorrectable_Sector_Ct"])),
    (199, entry!("udma-crc-error-count", AttributeUnit::None, ["CRC_Error_Count", "SATA_CRC_Error", "SATA_CRC_Error_Count", "UDMA_CRC_Error_Count"])),
    (231, entry!("temperature-celsius", AttributeUnit::MKelvin, ["Temperature_Celsius", "Controller_Temperature"])),
    (232, entry!("endurance-remaining", AttributeUnit::Percent, ["Spares_Remaining_Perc", "Perc_Avail_Resrvd_Space", "Available_Reservd_Space"])),
    (241, entry!("total-lbas-written", AttributeUnit::Mb, [])),
    (242, entry!("total-lbas-read", AttributeUnit::Mb, [])),
    (250, entry!("read-error-retry-rate", AttributeUnit::None, ["Read_Error_Retry_Rate", "Read_Retry_Count"])),
];

/// Looks up `id` in the table and, if `raw_label` matches one of its
/// accepted smartmontools names, returns the well-known entry.
pub fn resolve_well_known(id: u8, raw_label: &str) -> Option<&'static WellKnownAttrInfo> {
    let (_, info) = TABLE.iter().find(|(table_id, _)| *table_id == id)?;
    if info.smartmontools_names.iter().any(|n| *n == raw_label) {
        Some(info)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_label_resolves() {
        let info = resolve_well_known(9, "Power_On_Hours").unwrap();
        assert_eq!(info.libatasmart_name, "power-on-hours");
        assert_eq!(info.unit, AttributeUnit::Ms);
    }

    #[test]
    fn unrecognized_label_is_untrusted() {
        assert!(resolve_well_known(9, "Some_Vendor_Specific_Name").is_none());
    }

    #[test]
    fn unknown_id_is_untrusted() {
        assert!(resolve_well_known(254, "Anything").is_none());
    }
}
