//! Raw NVMe admin-command plumbing, generalized from the teacher's
//! `get_nvme_smart_log_raw`: open the device, zero a response buffer, point
//! an `nvme_admin_cmd` at it, and send it through
//! `linux_nvme_sys::nvme_ioctl_admin_cmd`.

use crate::error::{BlockdevError, Result};
use linux_nvme_sys::{
    nvme_admin_cmd, nvme_admin_opcode, nvme_error_log_page, nvme_id_ctrl, nvme_id_ns,
    nvme_ns_id_desc, nvme_smart_log,
};
use std::fs::OpenOptions;
use std::mem::{size_of, zeroed};
use std::os::unix::io::AsRawFd;

const NVME_IDENTIFY_CNS_NS: u32 = 0x00;
const NVME_IDENTIFY_CNS_CTRL: u32 = 0x01;
const NVME_IDENTIFY_CNS_NS_DESC_LIST: u32 = 0x03;
const NVME_LOG_LID_ERROR: u8 = 0x01;
const NVME_LOG_LID_SMART: u8 = 0x02;

pub(crate) fn open_device(device: &str) -> Result<std::fs::File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .open(device)
        .map_err(BlockdevError::Io)
}

fn send_admin_cmd(fd: i32, opcode: u8, nsid: u32, cdw10: u32, addr: u64, data_len: u32) -> Result<()> {
    let mut cmd: nvme_admin_cmd = unsafe { zeroed() };
    cmd.opcode = opcode;
    cmd.nsid = nsid;
    cmd.addr = addr;
    cmd.data_len = data_len;
    cmd.cdw10 = cdw10;
    cmd.timeout_ms = 1000;

    let ret = unsafe { linux_nvme_sys::nvme_ioctl_admin_cmd(fd, &mut cmd) };
    match ret {
        Ok(0) => Ok(()),
        Ok(status) => Err(BlockdevError::Parse(format!(
            "NVMe admin command failed, status={status:#x}"
        ))),
        Err(e) => Err(BlockdevError::Io(std::io::Error::other(e.to_string()))),
    }
}

pub(crate) fn identify_ctrl(device: &std::fs::File) -> Result<nvme_id_ctrl> {
    let mut ctrl: nvme_id_ctrl = unsafe { zeroed() };
    send_admin_cmd(
        device.as_raw_fd(),
        nvme_admin_opcode::nvme_admin_identify as u8,
        0,
        NVME_IDENTIFY_CNS_CTRL,
        &mut ctrl as *mut nvme_id_ctrl as u64,
        size_of::<nvme_id_ctrl>() as u32,
    )?;
    Ok(ctrl)
}

pub(crate) fn identify_ns(device: &std::fs::File, nsid: u32) -> Result<nvme_id_ns> {
    let mut ns: nvme_id_ns = unsafe { zeroed() };
    send_admin_cmd(
        device.as_raw_fd(),
        nvme_admin_opcode::nvme_admin_identify as u8,
        nsid,
        NVME_IDENTIFY_CNS_NS,
        &mut ns as *mut nvme_id_ns as u64,
        size_of::<nvme_id_ns>() as u32,
    )?;
    Ok(ns)
}

/// Returns the raw Namespace Identification Descriptor list page (4096
/// bytes, a sequence of `nvme_ns_id_desc` TLV records).
pub(crate) fn identify_ns_desc_list(device: &std::fs::File, nsid: u32) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; 4096];
    send_admin_cmd(
        device.as_raw_fd(),
        nvme_admin_opcode::nvme_admin_identify as u8,
        nsid,
        NVME_IDENTIFY_CNS_NS_DESC_LIST,
        buf.as_mut_ptr() as u64,
        buf.len() as u32,
    )?;
    Ok(buf)
}

pub(crate) const NS_ID_DESC_HEADER_LEN: usize = size_of::<nvme_ns_id_desc>();

pub(crate) fn get_smart_log(device: &std::fs::File) -> Result<nvme_smart_log> {
    let mut log: nvme_smart_log = unsafe { zeroed() };
    let len = size_of::<nvme_smart_log>() as u32;
    let numd = len / 4 - 1;
    let cdw10 = (NVME_LOG_LID_SMART as u32) | (numd << 16);
    send_admin_cmd(
        device.as_raw_fd(),
        nvme_admin_opcode::nvme_admin_get_log_page as u8,
        0xFFFF_FFFF,
        cdw10,
        &mut log as *mut nvme_smart_log as u64,
        len,
    )?;
    Ok(log)
}

/// Fetches the Namespace Identifier for an already-open namespace device
/// (e.g. `/dev/nvme0n1`) via `NVME_IOCTL_ID`.
pub(crate) fn get_nsid(device: &std::fs::File) -> Result<u32> {
    const NVME_IOCTL_ID: libc::c_ulong = 0x4E40;
    let ret = unsafe { libc::ioctl(device.as_raw_fd(), NVME_IOCTL_ID, 0) };
    if ret < 0 {
        return Err(BlockdevError::Io(std::io::Error::last_os_error()));
    }
    Ok(ret as u32)
}

/// Fetches `elpe` Error Information Log entries in one admin command, the
/// same buffer-of-structs shape `nvme_get_log_error` uses in the original.
pub(crate) fn get_error_log(device: &std::fs::File, elpe: u32) -> Result<Vec<nvme_error_log_page>> {
    let mut entries: Vec<nvme_error_log_page> = (0..elpe).map(|_| unsafe { zeroed() }).collect();
    let len = (elpe as usize * size_of::<nvme_error_log_page>()) as u32;
    let numd = len / 4 - 1;
    let cdw10 = (NVME_LOG_LID_ERROR as u32) | (numd << 16);
    send_admin_cmd(
        device.as_raw_fd(),
        nvme_admin_opcode::nvme_admin_get_log_page as u8,
        0xFFFF_FFFF,
        cdw10,
        entries.as_mut_ptr() as u64,
        len,
    )?;
    Ok(entries)
}
