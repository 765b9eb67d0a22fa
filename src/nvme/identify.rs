//! Identify Controller / Identify Namespace decode (spec §4.I).
//!
//! Bit-field interpretation is ported from `bd_nvme_get_controller_info`
//! and `bd_nvme_get_namespace_info` in `nvme-info.c`.

use super::ioctl;
use super::{
    u128_field_to_u64, ControllerFeatures, ControllerInfo, ControllerType, LbaFormat,
    LbaRelativePerformance, NamespaceFeatures, NamespaceInfo,
};
use crate::error::Result;

const NVME_CTRL_CMIC_MULTI_PORT: u8 = 1 << 0;
const NVME_CTRL_CMIC_MULTI_CTRL: u8 = 1 << 1;
const NVME_CTRL_CMIC_MULTI_SRIOV: u8 = 1 << 2;
const NVME_CTRL_CMIC_MULTI_ANA_REPORTING: u8 = 1 << 3;

const NVME_CTRL_OACS_FORMAT: u16 = 1 << 1;
const NVME_CTRL_OACS_NS_MGMT: u16 = 1 << 3;
const NVME_CTRL_OACS_SELF_TEST: u16 = 1 << 4;

const NVME_CTRL_FNA_FMT_ALL_NAMESPACES: u8 = 1 << 0;
const NVME_CTRL_FNA_SEC_ALL_NAMESPACES: u8 = 1 << 1;
const NVME_CTRL_FNA_CRYPTO_ERASE: u8 = 1 << 2;

const NVME_CTRL_DSTO_ONE_DST: u8 = 1 << 0;

const NVME_CTRL_SANICAP_CES: u32 = 1 << 0;
const NVME_CTRL_SANICAP_BES: u32 = 1 << 1;
const NVME_CTRL_SANICAP_OWS: u32 = 1 << 2;

const NVME_NS_FEAT_THIN: u8 = 1 << 0;
const NVME_NS_NMIC_SHARED: u8 = 1 << 0;
const NVME_NS_FPI_SUPPORTED: u8 = 1 << 7;
const NVME_NS_FPI_REMAINING: u8 = 0x7f;
const NVME_NS_NSATTR_WRITE_PROTECTED: u8 = 1 << 0;
const NVME_NS_FLBAS_LBA_MASK: u8 = 0x0f;

const NVME_NIDT_UUID: u8 = 0x03;

fn c_string(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).trim_end().to_string()
}

/// Retrieves the Identify Controller data structure for `device` (e.g.
/// `/dev/nvme0`) and decodes it into the crate's unified model.
pub fn get_controller_info(device: &str) -> Result<ControllerInfo> {
    let fd = ioctl::open_device(device)?;
    let ctrl = ioctl::identify_ctrl(&fd)?;

    let mut features = ControllerFeatures::empty();
    if ctrl.cmic & NVME_CTRL_CMIC_MULTI_PORT != 0 {
        features |= ControllerFeatures::MULTIPORT;
    }
    if ctrl.cmic & NVME_CTRL_CMIC_MULTI_CTRL != 0 {
        features |= ControllerFeatures::MULTICTRL;
    }
    if ctrl.cmic & NVME_CTRL_CMIC_MULTI_SRIOV != 0 {
        features |= ControllerFeatures::SRIOV;
    }
    if ctrl.cmic & NVME_CTRL_CMIC_MULTI_ANA_REPORTING != 0 {
        features |= ControllerFeatures::ANA_REPORTING;
    }
    if ctrl.oacs & NVME_CTRL_OACS_FORMAT != 0 {
        features |= ControllerFeatures::FORMAT;
    }
    if ctrl.oacs & NVME_CTRL_OACS_NS_MGMT != 0 {
        features |= ControllerFeatures::NS_MGMT;
    }
    if ctrl.oacs & NVME_CTRL_OACS_SELF_TEST != 0 {
        features |= ControllerFeatures::SELFTEST;
    }
    if ctrl.dsto & NVME_CTRL_DSTO_ONE_DST != 0 {
        features |= ControllerFeatures::SELFTEST_SINGLE;
    }
    if ctrl.sanicap & NVME_CTRL_SANICAP_CES != 0 {
        features |= ControllerFeatures::SANITIZE_CRYPTO;
    }
    if ctrl.sanicap & NVME_CTRL_SANICAP_BES != 0 {
        features |= ControllerFeatures::SANITIZE_BLOCK;
    }
    if ctrl.sanicap & NVME_CTRL_SANICAP_OWS != 0 {
        features |= ControllerFeatures::SANITIZE_OVERWRITE;
    }
    if ctrl.fna & NVME_CTRL_FNA_FMT_ALL_NAMESPACES != 0 {
        features |= ControllerFeatures::FORMAT_ALL_NS;
    }
    if ctrl.fna & NVME_CTRL_FNA_SEC_ALL_NAMESPACES != 0 {
        features |= ControllerFeatures::SECURE_ERASE_ALL_NS;
    }
    if ctrl.fna & NVME_CTRL_FNA_CRYPTO_ERASE != 0 {
        features |= ControllerFeatures::SECURE_ERASE_CRYPTO;
    }

    // If the Maximum Number of Allowed Namespaces (mnan) field is cleared,
    // nn also reports the subsystem-wide namespace limit.
    let num_namespaces = if ctrl.mnan == 0 { ctrl.nn } else { ctrl.mnan };

    Ok(ControllerInfo {
        pci_vendor_id: ctrl.vid,
        pci_subsys_vendor_id: ctrl.ssvid,
        ctrl_id: ctrl.cntlid,
        fguid: c_string(&ctrl.fguid),
        model_number: c_string(&ctrl.mn),
        serial_number: c_string(&ctrl.sn),
        firmware_ver: c_string(&ctrl.fr),
        nvme_ver: if ctrl.ver == 0 {
            None
        } else {
            Some(format!(
                "{}.{}.{}",
                ctrl.ver >> 16,
                (ctrl.ver >> 8) & 0xff,
                ctrl.ver & 0xff
            ))
        },
        features,
        // cntrltype was added in NVMe 1.4; the kernel uapi struct this crate
        // binds against predates it, so older-device semantics (unreported)
        // apply unconditionally.
        controller_type: ControllerType::Unknown,
        selftest_ext_time: ctrl.edstt as i32,
        hmb_pref_size: ctrl.hmpre as u64 * 4096,
        hmb_min_size: ctrl.hmmin as u64 * 4096,
        size_total: u128_field_to_u64(&ctrl.tnvmcap),
        size_unalloc: u128_field_to_u64(&ctrl.unvmcap),
        num_namespaces,
        subsysnqn: c_string(&ctrl.subnqn),
    })
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn uuid_canonical(bytes: &[u8]) -> String {
    format!(
        "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        bytes[0], bytes[1], bytes[2], bytes[3],
        bytes[4], bytes[5],
        bytes[6], bytes[7],
        bytes[8], bytes[9],
        bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15],
    )
}

/// Walks the raw Namespace Identification Descriptor list page looking for
/// a type-3 (UUID) descriptor, returning its canonical string form.
fn find_uuid_descriptor(desc: &[u8]) -> Option<String> {
    let mut offset = 0usize;
    while offset + ioctl::NS_ID_DESC_HEADER_LEN <= desc.len() {
        let nidt = desc[offset];
        let nidl = desc[offset + 1] as usize;
        if nidl == 0 {
            break;
        }
        let value_start = offset + ioctl::NS_ID_DESC_HEADER_LEN;
        if nidt == NVME_NIDT_UUID && value_start + 16 <= desc.len() {
            return Some(uuid_canonical(&desc[value_start..value_start + 16]));
        }
        offset = value_start + nidl;
    }
    None
}

/// Retrieves the Identify Namespace data structure for `device` (e.g.
/// `/dev/nvme0n1`).
pub fn get_namespace_info(device: &str) -> Result<NamespaceInfo> {
    let fd = ioctl::open_device(device)?;
    let nsid = ioctl::get_nsid(&fd)?;
    let ns = ioctl::identify_ns(&fd, nsid)?;
    let desc = ioctl::identify_ns_desc_list(&fd, nsid).ok();

    let mut features = NamespaceFeatures::empty();
    if ns.nsfeat & NVME_NS_FEAT_THIN != 0 {
        features |= NamespaceFeatures::THIN;
    }
    if ns.nmic & NVME_NS_NMIC_SHARED != 0 {
        features |= NamespaceFeatures::MULTIPATH_SHARED;
    }
    if ns.fpi & NVME_NS_FPI_SUPPORTED != 0 {
        features |= NamespaceFeatures::FORMAT_PROGRESS;
    }

    let lbaf_count = (ns.nlbaf as usize).min(ns.lbaf.len());
    let lba_formats: Vec<LbaFormat> = ns.lbaf[..lbaf_count]
        .iter()
        .map(|lbaf| LbaFormat {
            data_size: 1u16 << lbaf.ds,
            metadata_size: lbaf.ms,
            relative_performance: match lbaf.rp & 0x3 {
                0 => LbaRelativePerformance::Best,
                1 => LbaRelativePerformance::Better,
                2 => LbaRelativePerformance::Good,
                _ => LbaRelativePerformance::Degraded,
            },
        })
        .collect();

    // nlbaf is a zero-based "number of formats minus one": nlbaf == 0 means
    // exactly zero populated entries here (not one). current_lba_format is
    // only set when flbas indexes one of them; otherwise it stays zeroed.
    let flbas = (ns.flbas & NVME_NS_FLBAS_LBA_MASK) as usize;
    let current_lba_format = if flbas < lbaf_count {
        lba_formats[flbas]
    } else {
        LbaFormat::default()
    };

    Ok(NamespaceInfo {
        nsid,
        eui64: hex_encode(&ns.eui64),
        nguid: hex_encode(&ns.nguid),
        uuid: desc.as_deref().and_then(find_uuid_descriptor),
        nsize: ns.nsze,
        ncap: ns.ncap,
        nuse: ns.nuse,
        features,
        format_progress_remaining: ns.fpi & NVME_NS_FPI_REMAINING,
        write_protected: ns.nsattr & NVME_NS_NSATTR_WRITE_PROTECTED != 0,
        lba_formats,
        current_lba_format,
    })
}
