//! SMART/Health Information Log and Error Information Log decode
//! (spec §4.I). Ported from `bd_nvme_get_smart_log` and
//! `bd_nvme_get_error_log_entries` in `nvme-info.c`.

use super::ioctl;
use super::{u128_field_to_u64, ErrorLogEntry, SmartCriticalWarning, SmartLog, TransportType};
use crate::error::Result;

const NVME_SMART_CRIT_SPARE: u8 = 1 << 0;
const NVME_SMART_CRIT_TEMPERATURE: u8 = 1 << 1;
const NVME_SMART_CRIT_DEGRADED: u8 = 1 << 2;
const NVME_SMART_CRIT_MEDIA: u8 = 1 << 3;
const NVME_SMART_CRIT_VOLATILE_MEMORY: u8 = 1 << 4;
const NVME_SMART_CRIT_PMR_RO: u8 = 1 << 5;

/// Retrieves the SMART / Health Information Log (Log Identifier 02h) for
/// `device` (e.g. `/dev/nvme0`), combined with the Identify Controller's
/// warning/critical temperature thresholds.
pub fn get_smart_log(device: &str) -> Result<SmartLog> {
    let fd = ioctl::open_device(device)?;
    let ctrl = ioctl::identify_ctrl(&fd)?;
    let raw = ioctl::get_smart_log(&fd)?;

    let mut critical_warning = SmartCriticalWarning::empty();
    if raw.critical_warning & NVME_SMART_CRIT_SPARE != 0 {
        critical_warning |= SmartCriticalWarning::SPARE;
    }
    if raw.critical_warning & NVME_SMART_CRIT_TEMPERATURE != 0 {
        critical_warning |= SmartCriticalWarning::TEMPERATURE;
    }
    if raw.critical_warning & NVME_SMART_CRIT_DEGRADED != 0 {
        critical_warning |= SmartCriticalWarning::DEGRADED;
    }
    if raw.critical_warning & NVME_SMART_CRIT_MEDIA != 0 {
        critical_warning |= SmartCriticalWarning::READONLY;
    }
    if raw.critical_warning & NVME_SMART_CRIT_VOLATILE_MEMORY != 0 {
        critical_warning |= SmartCriticalWarning::VOLATILE_MEM;
    }
    if raw.critical_warning & NVME_SMART_CRIT_PMR_RO != 0 {
        critical_warning |= SmartCriticalWarning::PMR_READONLY;
    }

    let composite_temp = u16::from_le_bytes(raw.temperature);
    let mut temp_sensors_kelvin = [0u16; 8];
    for (dst, src) in temp_sensors_kelvin.iter_mut().zip(raw.temp_sensor.iter()) {
        *dst = *src;
    }

    Ok(SmartLog {
        critical_warning,
        avail_spare: raw.avail_spare,
        spare_thresh: raw.spare_thresh,
        percent_used: raw.percent_used,
        total_data_read: u128_field_to_u64(&raw.data_units_read) * 1000 * 512,
        total_data_written: u128_field_to_u64(&raw.data_units_written) * 1000 * 512,
        ctrl_busy_time: u128_field_to_u64(&raw.ctrl_busy_time),
        power_cycles: u128_field_to_u64(&raw.power_cycles),
        power_on_hours: u128_field_to_u64(&raw.power_on_hours),
        unsafe_shutdowns: u128_field_to_u64(&raw.unsafe_shutdowns),
        media_errors: u128_field_to_u64(&raw.media_errors),
        num_err_log_entries: u128_field_to_u64(&raw.num_err_log_entries),
        temperature_kelvin: composite_temp,
        temp_sensors_kelvin,
        wctemp: ctrl.wctemp,
        cctemp: ctrl.cctemp,
        warning_temp_time_minutes: raw.warning_temp_time,
        critical_temp_time_minutes: raw.critical_comp_time,
    })
}

fn transport_type_from_raw(raw: u8) -> TransportType {
    match raw {
        1 => TransportType::Rdma,
        2 => TransportType::Fc,
        3 => TransportType::Tcp,
        254 => TransportType::Loop,
        _ => TransportType::Unspecified,
    }
}

/// Retrieves the Error Information Log (Log Identifier 01h): `elpe = id.elpe
/// + 1` entries are requested, zero-count entries are dropped, and the
/// controller already orders the remaining entries newest-first.
pub fn get_error_log_entries(device: &str) -> Result<Vec<ErrorLogEntry>> {
    let fd = ioctl::open_device(device)?;
    let ctrl = ioctl::identify_ctrl(&fd)?;
    let elpe = ctrl.elpe as u32 + 1;
    let raw_entries = ioctl::get_error_log(&fd, elpe)?;

    Ok(raw_entries
        .into_iter()
        .filter(|e| e.error_count > 0)
        .map(|e| ErrorLogEntry {
            error_count: e.error_count,
            command_id: e.cmdid,
            command_specific: e.cs,
            command_status: e.status_field >> 1,
            lba: e.lba,
            nsid: e.nsid,
            transport_type: transport_type_from_raw(e.trtype),
        })
        .collect())
}
