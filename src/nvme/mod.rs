//! NVMe decoder (spec §4.I): Identify Controller/Namespace, the SMART/Health
//! Information Log, the Error Information Log, and NVMe-over-Fabrics
//! connect/disconnect orchestration.
//!
//! Identify and log data is read the same way the teacher's own SMART-log
//! collector does it: build an `nvme_admin_cmd`, point it at a local
//! buffer, and send it through `linux_nvme_sys::nvme_ioctl_admin_cmd`. This
//! module generalizes that one hand-rolled SMART-log call into every admin
//! command spec.md's decoder needs (Identify Controller, Identify
//! Namespace, Identify Namespace ID Descriptor list, SMART log, Error log).

mod fabrics;
mod identify;
mod ioctl;
mod log;

pub use fabrics::{
    connect, disconnect, disconnect_by_path, generate_host_nqn, get_host_id, get_host_nqn,
    set_host_id, set_host_nqn, ConnectConfig,
};
pub use identify::{get_controller_info, get_namespace_info};
pub use log::{get_error_log_entries, get_smart_log};

use bitflags::bitflags;
use std::fs;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ControllerFeatures: u64 {
        const MULTIPORT            = 1 << 0;
        const MULTICTRL            = 1 << 1;
        const SRIOV                = 1 << 2;
        const ANA_REPORTING        = 1 << 3;
        const FORMAT               = 1 << 4;
        const FORMAT_ALL_NS        = 1 << 5;
        const NS_MGMT              = 1 << 6;
        const SELFTEST             = 1 << 7;
        const SELFTEST_SINGLE      = 1 << 8;
        const SANITIZE_CRYPTO      = 1 << 9;
        const SANITIZE_BLOCK       = 1 << 10;
        const SANITIZE_OVERWRITE   = 1 << 11;
        const SECURE_ERASE_ALL_NS  = 1 << 12;
        const SECURE_ERASE_CRYPTO  = 1 << 13;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct NamespaceFeatures: u64 {
        const THIN             = 1 << 0;
        const MULTIPATH_SHARED = 1 << 1;
        const FORMAT_PROGRESS  = 1 << 2;
        const ROTATIONAL       = 1 << 3;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SmartCriticalWarning: u32 {
        const SPARE        = 1 << 0;
        const TEMPERATURE  = 1 << 1;
        const DEGRADED     = 1 << 2;
        const READONLY     = 1 << 3;
        const VOLATILE_MEM = 1 << 4;
        const PMR_READONLY = 1 << 5;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControllerType {
    #[default]
    Unknown,
    Io,
    Discovery,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LbaRelativePerformance {
    #[default]
    Unknown,
    Best,
    Better,
    Good,
    Degraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LbaFormat {
    pub data_size: u16,
    pub metadata_size: u16,
    pub relative_performance: LbaRelativePerformance,
}

#[derive(Debug, Clone, Default)]
pub struct ControllerInfo {
    pub pci_vendor_id: u16,
    pub pci_subsys_vendor_id: u16,
    pub ctrl_id: u16,
    pub fguid: String,
    pub model_number: String,
    pub serial_number: String,
    pub firmware_ver: String,
    pub nvme_ver: Option<String>,
    pub features: ControllerFeatures,
    pub controller_type: ControllerType,
    pub selftest_ext_time: i32,
    pub hmb_pref_size: u64,
    pub hmb_min_size: u64,
    pub size_total: u64,
    pub size_unalloc: u64,
    pub num_namespaces: u32,
    pub subsysnqn: String,
}

#[derive(Debug, Clone, Default)]
pub struct NamespaceInfo {
    pub nsid: u32,
    pub eui64: String,
    pub nguid: String,
    pub uuid: Option<String>,
    pub nsize: u64,
    pub ncap: u64,
    pub nuse: u64,
    pub features: NamespaceFeatures,
    pub format_progress_remaining: u8,
    pub write_protected: bool,
    pub lba_formats: Vec<LbaFormat>,
    pub current_lba_format: LbaFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportType {
    #[default]
    Unspecified,
    Rdma,
    Fc,
    Tcp,
    Loop,
}

#[derive(Debug, Clone)]
pub struct SmartLog {
    pub critical_warning: SmartCriticalWarning,
    pub avail_spare: u8,
    pub spare_thresh: u8,
    pub percent_used: u8,
    pub total_data_read: u64,
    pub total_data_written: u64,
    pub ctrl_busy_time: u64,
    pub power_cycles: u64,
    pub power_on_hours: u64,
    pub unsafe_shutdowns: u64,
    pub media_errors: u64,
    pub num_err_log_entries: u64,
    pub temperature_kelvin: u16,
    pub temp_sensors_kelvin: [u16; 8],
    pub wctemp: u16,
    pub cctemp: u16,
    pub warning_temp_time_minutes: u32,
    pub critical_temp_time_minutes: u32,
}

#[derive(Debug, Clone)]
pub struct ErrorLogEntry {
    pub error_count: u64,
    pub command_id: u16,
    pub command_specific: u64,
    pub command_status: u16,
    pub lba: u64,
    pub nsid: u32,
    pub transport_type: TransportType,
}

/// Reads the low 8 bytes of a little-endian 128-bit field as a `u64`,
/// discarding any value that doesn't fit. The C original computes this by
/// repeated `result = result * 256 + byte` over all 16 bytes in an unsigned
/// 64-bit accumulator, which silently wraps modulo 2^64 -- equivalent to
/// just taking the low 8 bytes, which is what this does directly.
pub(crate) fn u128_field_to_u64(data: &[u8; 16]) -> u64 {
    let mut low = [0u8; 8];
    low.copy_from_slice(&data[0..8]);
    u64::from_le_bytes(low)
}

/// Lists NVMe controller device names found under `/sys/class/nvme`
/// (e.g. `["nvme0", "nvme1"]`), the same enumeration the teacher's
/// collector uses before fetching a SMART log from each.
pub fn list_controllers() -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir("/sys/class/nvme")
        .into_iter()
        .flatten()
        .flatten()
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
