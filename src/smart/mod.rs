//! SMART decoder (spec §4.H): a single output model fed by one of two
//! backends. This crate ships the `smartctl --json` backend in full;
//! `libatasmart` support is declared in the type model (so callers can
//! match on [`SmartBackend`]) but not implemented, since it requires
//! linking a C library this crate's dependency stack deliberately excludes
//! (see DESIGN.md).

mod drivedb;
mod smartctl;
mod wellknown;

pub use drivedb::{drivedb_lookup, DriveDbAttr};
pub use smartctl::{get_ata_info, set_enabled};
pub use wellknown::{resolve_well_known, WellKnownAttrInfo};

use bitflags::bitflags;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmartBackend {
    Smartctl,
    Libatasmart,
}

/// Semantic unit tag for an attribute's raw/pretty value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeUnit {
    Unknown,
    None,
    Ms,
    Sectors,
    MKelvin,
    SmallPercent,
    Percent,
    Mb,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AttributeFlags: u16 {
        const PREFAILURE       = 0x01;
        const ONLINE           = 0x02;
        const PERFORMANCE      = 0x04;
        const ERROR_RATE       = 0x08;
        const EVENT_COUNT      = 0x10;
        const SELF_PRESERVING  = 0x20;
        const OTHER            = 0x40;
    }
}

impl AttributeFlags {
    /// Maps a raw smartctl `flags.value` bitfield onto the unified flag set
    /// (bits 0x01..0x20 map 1:1; any of the remaining bits 0x40..0xffc0
    /// collapse into `OTHER`).
    pub fn from_smartctl_value(raw: i64) -> Self {
        let mut flags = AttributeFlags::empty();
        if raw & 0x01 != 0 {
            flags |= AttributeFlags::PREFAILURE;
        }
        if raw & 0x02 != 0 {
            flags |= AttributeFlags::ONLINE;
        }
        if raw & 0x04 != 0 {
            flags |= AttributeFlags::PERFORMANCE;
        }
        if raw & 0x08 != 0 {
            flags |= AttributeFlags::ERROR_RATE;
        }
        if raw & 0x10 != 0 {
            flags |= AttributeFlags::EVENT_COUNT;
        }
        if raw & 0x20 != 0 {
            flags |= AttributeFlags::SELF_PRESERVING;
        }
        if raw & 0xffc0 != 0 {
            flags |= AttributeFlags::OTHER;
        }
        flags
    }
}

#[derive(Debug, Clone)]
pub struct SmartAttribute {
    pub id: u8,
    pub raw_label: String,
    pub well_known_name: Option<String>,
    pub value: Option<i64>,
    pub worst: Option<i64>,
    pub threshold: Option<i64>,
    pub failed_past: bool,
    pub failing_now: bool,
    pub value_raw: i64,
    pub value_raw_string: String,
    pub unit: AttributeUnit,
    pub flags: AttributeFlags,
}

impl SmartAttribute {
    /// Resolves `well_known_name`/`unit` from the well-known table (and any
    /// drive-database override), leaving them at their "untrusted" defaults
    /// if the raw label doesn't match a known alias for this id.
    pub fn resolve_naming(&mut self, drivedb_override: Option<&str>) {
        if let Some(name) = drivedb_override {
            self.well_known_name = Some(name.to_string());
            return;
        }
        if let Some(info) = resolve_well_known(self.id, &self.raw_label) {
            self.well_known_name = Some(info.libatasmart_name.to_string());
            self.unit = info.unit;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfflineDataCollectionStatus {
    NeverStarted,
    NoError,
    InProgress,
    Suspended,
    AbortedByHost,
    AbortedByError,
    VendorSpecific,
    Reserved,
}

impl OfflineDataCollectionStatus {
    pub fn from_smartctl_value(val: i64) -> Self {
        match val & 0x7f {
            0x00 => Self::NeverStarted,
            0x02 => Self::NoError,
            0x03 if val == 0x03 => Self::InProgress,
            0x03 => Self::Reserved,
            0x04 => Self::Suspended,
            0x05 => Self::AbortedByHost,
            0x06 => Self::AbortedByError,
            other if other >= 0x40 => Self::VendorSpecific,
            _ => Self::Reserved,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelfTestStatus {
    CompletedNoError,
    AbortedHost,
    InterruptedHostReset,
    ErrorFatal,
    ErrorUnknown,
    ErrorElectrical,
    ErrorServo,
    ErrorRead,
    ErrorHandling,
    InProgress,
    Reserved,
}

impl SelfTestStatus {
    /// High nibble selects the status; for `InProgress` (0x0f high nibble
    /// value `0xf`... actually `val >> 4 == 0xf`? no -- smartctl reports the
    /// percentage-remaining info in the low nibble when in progress), the
    /// low nibble times ten is the percent remaining.
    pub fn from_smartctl_value(val: i64) -> (Self, Option<u8>) {
        match (val >> 4) & 0x0f {
            0x0 => (Self::CompletedNoError, None),
            0x1 => (Self::AbortedHost, None),
            0x2 => (Self::InterruptedHostReset, None),
            0x3 => (Self::ErrorFatal, None),
            0x4 => (Self::ErrorUnknown, None),
            0x5 => (Self::ErrorElectrical, None),
            0x6 => (Self::ErrorServo, None),
            0x7 => (Self::ErrorRead, None),
            0x8 => (Self::ErrorHandling, None),
            0xf => (Self::InProgress, Some(((val & 0x0f) * 10) as u8)),
            _ => (Self::Reserved, None),
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OfflineDataCollectionCapabilities: u8 {
        const NOT_SUPPORTED         = 0;
        const EXEC_OFFLINE_IMMEDIATE = 0x01;
        const OFFLINE_ABORT          = 0x04;
        const OFFLINE_SURFACE_SCAN   = 0x08;
        const SELF_TEST              = 0x10;
        const CONVEYANCE_SELF_TEST   = 0x20;
        const SELECTIVE_SELF_TEST    = 0x40;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SmartCapabilities: u8 {
        const ATTRIBUTE_AUTOSAVE = 0x01;
        const AUTOSAVE_TIMER     = 0x02;
        const ERROR_LOGGING      = 0x04;
        const GP_LOGGING         = 0x08;
    }
}

#[derive(Debug, Clone, Default)]
pub struct SmartAtaReport {
    pub smart_supported: bool,
    pub smart_enabled: bool,
    pub overall_status_passed: bool,
    pub offline_data_collection_status: Option<OfflineDataCollectionStatus>,
    pub auto_offline_data_collection_enabled: bool,
    pub offline_data_collection_completion_seconds: i64,
    pub self_test_status: Option<SelfTestStatus>,
    pub self_test_percent_remaining: Option<u8>,
    pub self_test_polling_short_minutes: i64,
    pub self_test_polling_extended_minutes: i64,
    pub self_test_polling_conveyance_minutes: i64,
    pub offline_data_collection_capabilities: OfflineDataCollectionCapabilities,
    pub smart_capabilities: SmartCapabilities,
    pub attributes: Vec<SmartAttribute>,
    pub power_on_minutes: i64,
    pub power_cycle_count: i64,
    pub temperature_kelvin: Option<i64>,
}
