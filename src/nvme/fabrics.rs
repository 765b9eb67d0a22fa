//! NVMe-over-Fabrics connect/disconnect orchestration and host NQN/ID
//! persistence (spec §4.I). The kernel's fabrics transport is driven the
//! way `nvme-cli`/`libnvme` itself drives it at the lowest level: a
//! comma-separated `key=value` connect string written to
//! `/dev/nvme-fabrics`, and `/sys/class/nvme/<ctrl>/delete_controller` for
//! teardown. Grounded in `nvme-fabrics.c`'s `bd_nvme_connect`/`_disconnect`
//! and in `nvmf_discovery.rs`'s `build_connect_args`/`remove_controller`.

use crate::error::{BlockdevError, Result};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

const NVME_FABRICS_PATH: &str = "/dev/nvme-fabrics";
const SYSFS_NVME_CLASS: &str = "/sys/class/nvme";
const CONFIG_DIR_NAME: &str = "nvme";

fn config_dir() -> PathBuf {
    PathBuf::from("/etc").join(CONFIG_DIR_NAME)
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

/// Reads the persisted Host NQN from `/etc/nvme/hostnqn`, or `None` if
/// unset.
pub fn get_host_nqn() -> Option<String> {
    read_trimmed(&config_dir().join("hostnqn")).filter(|s| !s.is_empty())
}

/// Reads the persisted Host ID from `/etc/nvme/hostid`, or `None` if unset.
pub fn get_host_id() -> Option<String> {
    read_trimmed(&config_dir().join("hostid")).filter(|s| !s.is_empty())
}

/// Derives a stable Host NQN for this system from `/etc/machine-id` (the
/// same spirit as the original's DMI/device-tree based generation, minus
/// the platform-specific probes this crate's dependency stack can't link).
pub fn generate_host_nqn() -> Result<String> {
    let machine_id = read_trimmed(Path::new("/etc/machine-id"))
        .ok_or_else(|| BlockdevError::InvalidArgument("unable to generate Host NQN".to_string()))?;
    Ok(format!("nqn.2014-08.org.nvmexpress:uuid:{machine_id}"))
}

fn write_config_file(name: &str, value: &str) -> Result<()> {
    let dir = config_dir();
    fs::create_dir_all(&dir).map_err(BlockdevError::Io)?;
    fs::set_permissions(&dir, std::os::unix::fs::PermissionsExt::from_mode(0o755))
        .map_err(BlockdevError::Io)?;
    let path = dir.join(name);
    let contents = if value.ends_with('\n') {
        value.to_string()
    } else {
        format!("{value}\n")
    };
    fs::write(&path, contents).map_err(BlockdevError::Io)?;
    fs::set_permissions(&path, std::os::unix::fs::PermissionsExt::from_mode(0o644))
        .map_err(BlockdevError::Io)?;
    Ok(())
}

/// Writes the Host NQN value to `/etc/nvme/hostnqn`, creating the
/// directory (mode `0755`) if needed and normalizing the trailing newline.
pub fn set_host_nqn(host_nqn: &str) -> Result<()> {
    write_config_file("hostnqn", host_nqn)
}

/// Writes the Host ID value to `/etc/nvme/hostid`.
pub fn set_host_id(host_id: &str) -> Result<()> {
    write_config_file("hostid", host_id)
}

fn parse_bool(val: &str) -> Option<bool> {
    if val.eq_ignore_ascii_case("on") || val == "1" || val.eq_ignore_ascii_case("true") {
        Some(true)
    } else if val.eq_ignore_ascii_case("off") || val == "0" || val.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

#[derive(Debug, Clone, Default)]
struct FabricsExtra {
    config_file: Option<Option<String>>,
    dhchap_key: Option<String>,
    dhchap_ctrl_key: Option<String>,
    hostsymname: Option<String>,
    nr_io_queues: Option<i64>,
    nr_write_queues: Option<i64>,
    nr_poll_queues: Option<i64>,
    queue_size: Option<i64>,
    keep_alive_tmo: Option<i64>,
    reconnect_delay: Option<i64>,
    ctrl_loss_tmo: Option<i64>,
    fast_io_fail_tmo: Option<i64>,
    tos: Option<i64>,
    duplicate_connect: Option<bool>,
    disable_sqflow: Option<bool>,
    hdr_digest: Option<bool>,
    data_digest: Option<bool>,
    tls: Option<bool>,
    keyring: Option<String>,
    tls_key: Option<String>,
}

/// Scans `extra`'s recognized keys into a [`FabricsExtra`]; unrecognized
/// keys and unparseable numeric/boolean values are silently ignored,
/// matching the original's "failed conversions ignore the option" rule.
fn parse_extra(extra: &HashMap<String, String>) -> FabricsExtra {
    let mut cfg = FabricsExtra::default();
    for (key, val) in extra {
        match key.as_str() {
            "config" if val.eq_ignore_ascii_case("none") => cfg.config_file = Some(None),
            "config" => cfg.config_file = Some(Some(val.clone())),
            "dhchap_key" => cfg.dhchap_key = Some(val.clone()),
            "dhchap_ctrl_key" => cfg.dhchap_ctrl_key = Some(val.clone()),
            "hostsymname" => cfg.hostsymname = Some(val.clone()),
            "keyring" => cfg.keyring = Some(val.clone()),
            "tls_key" => cfg.tls_key = Some(val.clone()),
            "nr_io_queues" => cfg.nr_io_queues = val.parse().ok(),
            "nr_write_queues" => cfg.nr_write_queues = val.parse().ok(),
            "nr_poll_queues" => cfg.nr_poll_queues = val.parse().ok(),
            "queue_size" => cfg.queue_size = val.parse().ok(),
            "keep_alive_tmo" => cfg.keep_alive_tmo = val.parse().ok(),
            "reconnect_delay" => cfg.reconnect_delay = val.parse().ok(),
            "ctrl_loss_tmo" => cfg.ctrl_loss_tmo = val.parse().ok(),
            "fast_io_fail_tmo" => cfg.fast_io_fail_tmo = val.parse().ok(),
            "tos" => cfg.tos = val.parse().ok(),
            "duplicate_connect" => cfg.duplicate_connect = parse_bool(val),
            "disable_sqflow" => cfg.disable_sqflow = parse_bool(val),
            "hdr_digest" => cfg.hdr_digest = parse_bool(val),
            "data_digest" => cfg.data_digest = parse_bool(val),
            "tls" => cfg.tls = parse_bool(val),
            _ => {}
        }
    }
    cfg
}

/// Parameters for [`connect`], mirroring `bd_nvme_connect`'s argument list.
#[derive(Debug, Clone, Default)]
pub struct ConnectConfig {
    pub subsysnqn: String,
    pub transport: String,
    pub transport_addr: Option<String>,
    pub transport_svcid: Option<String>,
    pub host_traddr: Option<String>,
    pub host_iface: Option<String>,
    pub host_nqn: Option<String>,
    pub host_id: Option<String>,
    pub extra: HashMap<String, String>,
}

fn resolve_host_nqn_id(cfg: &ConnectConfig) -> Result<(String, String)> {
    let host_nqn = cfg
        .host_nqn
        .clone()
        .or_else(get_host_nqn)
        .map(Ok)
        .unwrap_or_else(generate_host_nqn)?;

    let host_id = cfg.host_id.clone().or_else(get_host_id).or_else(|| {
        host_nqn
            .rsplit_once("uuid:")
            .map(|(_, suffix)| suffix.to_string())
    });
    let host_id = host_id.ok_or_else(|| {
        BlockdevError::InvalidArgument(format!(
            "could not determine HostID value from HostNQN '{host_nqn}'"
        ))
    })?;

    Ok((host_nqn, host_id))
}

fn build_connect_string(cfg: &ConnectConfig, host_nqn: &str, host_id: &str, extra: &FabricsExtra) -> String {
    let mut parts = vec![
        format!("nqn={}", cfg.subsysnqn),
        format!("transport={}", cfg.transport),
        format!("hostnqn={host_nqn}"),
        format!("hostid={host_id}"),
    ];
    if let Some(addr) = &cfg.transport_addr {
        parts.push(format!("traddr={addr}"));
    }
    if let Some(svcid) = &cfg.transport_svcid {
        parts.push(format!("trsvcid={svcid}"));
    }
    if let Some(host_traddr) = &cfg.host_traddr {
        parts.push(format!("host_traddr={host_traddr}"));
    }
    if let Some(host_iface) = &cfg.host_iface {
        parts.push(format!("host_iface={host_iface}"));
    }
    if let Some(key) = &extra.dhchap_key {
        parts.push(format!("dhchap_secret={key}"));
    }
    if let Some(key) = &extra.dhchap_ctrl_key {
        parts.push(format!("dhchap_ctrl_secret={key}"));
    }
    if let Some(name) = &extra.hostsymname {
        parts.push(format!("hostsymname={name}"));
    }
    macro_rules! push_int {
        ($field:ident, $name:literal) => {
            if let Some(v) = extra.$field {
                parts.push(format!(concat!($name, "={}"), v));
            }
        };
    }
    push_int!(nr_io_queues, "nr_io_queues");
    push_int!(nr_write_queues, "nr_write_queues");
    push_int!(nr_poll_queues, "nr_poll_queues");
    push_int!(queue_size, "queue_size");
    push_int!(keep_alive_tmo, "keep_alive_tmo");
    push_int!(reconnect_delay, "reconnect_delay");
    push_int!(ctrl_loss_tmo, "ctrl_loss_tmo");
    push_int!(fast_io_fail_tmo, "fast_io_fail_tmo");
    push_int!(tos, "tos");
    macro_rules! push_flag {
        ($field:ident, $name:literal) => {
            if extra.$field == Some(true) {
                parts.push($name.to_string());
            }
        };
    }
    push_flag!(duplicate_connect, "duplicate_connect");
    push_flag!(disable_sqflow, "disable_sqflow");
    push_flag!(hdr_digest, "hdr_digest");
    push_flag!(data_digest, "data_digest");
    push_flag!(tls, "tls");
    parts.join(",")
}

/// Creates a transport connection and a fabrics controller for
/// `cfg.subsysnqn`. Validates arguments, resolves the Host NQN/ID, parses
/// `cfg.extra`, then writes the connect string to `/dev/nvme-fabrics`.
pub fn connect(cfg: &ConnectConfig) -> Result<()> {
    if cfg.subsysnqn.is_empty() {
        return Err(BlockdevError::InvalidArgument(
            "invalid value specified for the subsysnqn argument".to_string(),
        ));
    }
    if cfg.transport.is_empty() {
        return Err(BlockdevError::InvalidArgument(
            "invalid value specified for the transport argument".to_string(),
        ));
    }
    if cfg.transport_addr.is_none() && cfg.transport != "loop" && cfg.transport != "pcie" {
        return Err(BlockdevError::InvalidArgument(
            "invalid value specified for the transport address argument".to_string(),
        ));
    }

    let (host_nqn, host_id) = resolve_host_nqn_id(cfg)?;
    let extra = parse_extra(&cfg.extra);
    let connect_string = build_connect_string(cfg, &host_nqn, &host_id, &extra);

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(NVME_FABRICS_PATH)
        .map_err(BlockdevError::Io)?;
    if let Err(e) = file.write_all(connect_string.as_bytes()) {
        let errno = e.raw_os_error().unwrap_or(0);
        return Err(crate::error::connect_error_from_errno(errno));
    }
    let mut response = String::new();
    let _ = file.read_to_string(&mut response);
    Ok(())
}

fn sysfs_controllers() -> Vec<PathBuf> {
    fs::read_dir(SYSFS_NVME_CLASS)
        .into_iter()
        .flatten()
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("nvme"))
        })
        .collect()
}

fn delete_controller(ctrl_path: &Path) -> Result<()> {
    let target = ctrl_path.join("delete_controller");
    fs::write(&target, b"1").map_err(BlockdevError::Io)
}

fn disconnect_matching(predicate: impl Fn(&Path) -> bool) -> Result<bool> {
    let mut found = false;
    for ctrl in sysfs_controllers() {
        if !predicate(&ctrl) {
            continue;
        }
        delete_controller(&ctrl)?;
        found = true;
    }
    Ok(found)
}

/// Disconnects every controller whose `subsysnqn` sysfs attribute matches
/// `subsysnqn` (after chomping trailing whitespace, the same way sysfs
/// values are stored).
pub fn disconnect(subsysnqn: &str) -> Result<()> {
    let found = disconnect_matching(|ctrl| {
        read_trimmed(&ctrl.join("subsysnqn")).as_deref() == Some(subsysnqn)
    })?;
    if !found {
        return Err(BlockdevError::NoMatch);
    }
    Ok(())
}

/// Disconnects the controller represented by `path` (e.g. `/dev/nvme0` or
/// bare `nvme0`).
pub fn disconnect_by_path(path: &str) -> Result<()> {
    let name = path.strip_prefix("/dev/").unwrap_or(path);
    let found = disconnect_matching(|ctrl| {
        ctrl.file_name().and_then(|n| n.to_str()) == Some(name)
    })?;
    if !found {
        return Err(BlockdevError::NoMatch);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_subsysnqn_is_rejected_before_any_io() {
        let cfg = ConnectConfig {
            subsysnqn: String::new(),
            transport: "tcp".to_string(),
            ..Default::default()
        };
        let err = connect(&cfg).unwrap_err();
        assert!(matches!(err, BlockdevError::InvalidArgument(_)));
    }

    #[test]
    fn missing_transport_addr_is_rejected_for_tcp() {
        let cfg = ConnectConfig {
            subsysnqn: "nqn.2014-08.org.nvmexpress:uuid:test".to_string(),
            transport: "tcp".to_string(),
            ..Default::default()
        };
        let err = connect(&cfg).unwrap_err();
        assert!(matches!(err, BlockdevError::InvalidArgument(_)));
    }

    #[test]
    fn loop_transport_does_not_require_an_address() {
        let cfg = ConnectConfig {
            subsysnqn: "nqn.2014-08.org.nvmexpress:uuid:test".to_string(),
            transport: "loop".to_string(),
            ..Default::default()
        };
        // Passes argument validation; fails later trying to open
        // /dev/nvme-fabrics (not present in a test sandbox), which is a
        // distinct failure mode from InvalidArgument.
        let err = connect(&cfg).unwrap_err();
        assert!(!matches!(err, BlockdevError::InvalidArgument(_)));
    }

    #[test]
    fn bool_extra_parsing_is_case_insensitive() {
        assert_eq!(parse_bool("On"), Some(true));
        assert_eq!(parse_bool("FALSE"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn unknown_extra_keys_are_ignored() {
        let mut extra = HashMap::new();
        extra.insert("bogus".to_string(), "1".to_string());
        extra.insert("tls".to_string(), "on".to_string());
        let cfg = parse_extra(&extra);
        assert_eq!(cfg.tls, Some(true));
    }

    #[test]
    fn host_id_derives_from_host_nqn_uuid_suffix() {
        let cfg = ConnectConfig {
            subsysnqn: "nqn.test".to_string(),
            transport: "loop".to_string(),
            host_nqn: Some("nqn.2014-08.org.nvmexpress:uuid:abcd-1234".to_string()),
            ..Default::default()
        };
        let (host_nqn, host_id) = resolve_host_nqn_id(&cfg).unwrap();
        assert_eq!(host_nqn, "nqn.2014-08.org.nvmexpress:uuid:abcd-1234");
        assert_eq!(host_id, "abcd-1234");
    }
}
