//! Global config / extra-argument model (spec §4.B / §3 `ExtraArg`).

use std::sync::RwLock;

/// An opaque `(option, value)` pair appended verbatim to an external
/// utility's argv, e.g. `ExtraArg::new("--foo", "bar")` becomes `--foo bar`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraArg {
    pub option: String,
    pub value: String,
}

impl ExtraArg {
    pub fn new(option: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            option: option.into(),
            value: value.into(),
        }
    }

    /// Appends this arg (and its value, if non-empty) onto an argv vector.
    pub fn append_to(&self, argv: &mut Vec<String>) {
        argv.push(self.option.clone());
        if !self.value.is_empty() {
            argv.push(self.value.clone());
        }
    }
}

/// Process-wide, lock-protected LVM configuration strings (spec §4.B).
///
/// Both fields are consulted by every LVM argv builder under the same lock,
/// so a concurrent setter can never be observed mid-call: the lock is held
/// for the entire duration of the read that builds one command's argv.
#[derive(Debug, Default)]
pub struct GlobalConfig {
    inner: RwLock<GlobalConfigInner>,
}

#[derive(Debug, Default, Clone)]
struct GlobalConfigInner {
    lvm_config_string: Option<String>,
    lvm_devices_string: Option<String>,
}

impl GlobalConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets (or, on empty/`None`, clears) the `--config=<s>` string appended
    /// to every LVM call.
    pub fn set_lvm_config_string(&self, s: Option<&str>) {
        let mut inner = self.inner.write().expect("global config lock poisoned");
        inner.lvm_config_string = match s {
            Some(s) if !s.is_empty() => Some(s.to_string()),
            _ => None,
        };
    }

    /// Sets the `--devices=<s>` string from a comma-joined device list.
    pub fn set_lvm_devices_filter(&self, devices: &[String]) {
        let mut inner = self.inner.write().expect("global config lock poisoned");
        inner.lvm_devices_string = if devices.is_empty() {
            None
        } else {
            Some(devices.join(","))
        };
    }

    /// Builds the final argv for an LVM command: `binary`, `base_args`, then
    /// `--config=<...>`/`--devices=<...>` if configured. Held under the read
    /// lock for the whole call so config can't change mid-build.
    pub fn build_lvm_argv(&self, binary: &str, base_args: &[String]) -> Vec<String> {
        let inner = self.inner.read().expect("global config lock poisoned");
        let mut argv = Vec::with_capacity(base_args.len() + 3);
        argv.push(binary.to_string());
        argv.extend(base_args.iter().cloned());
        if let Some(cfg) = &inner.lvm_config_string {
            argv.push(format!("--config={cfg}"));
        }
        if let Some(devices) = &inner.lvm_devices_string {
            argv.push(format!("--devices={devices}"));
        }
        argv
    }
}

/// Process-wide tunables consulted once at plugin `init` (new, §2 of
/// SPEC_FULL.md): plugin search paths and soname overrides.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    pub plugin_search_paths: Vec<String>,
    pub soname_overrides: std::collections::HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lvm_argv_includes_config_and_devices() {
        let cfg = GlobalConfig::new();
        cfg.set_lvm_config_string(Some("devices { filter=[\"a|.*|\"] }"));
        cfg.set_lvm_devices_filter(&["/dev/sda".to_string(), "/dev/sdb".to_string()]);
        let argv = cfg.build_lvm_argv("vgs", &["-o".into(), "vg_name".into()]);
        assert_eq!(argv[0], "vgs");
        assert!(argv.iter().any(|a| a.starts_with("--config=")));
        assert!(argv.iter().any(|a| a == "--devices=/dev/sda,/dev/sdb"));
    }

    #[test]
    fn clearing_config_string_removes_it() {
        let cfg = GlobalConfig::new();
        cfg.set_lvm_config_string(Some("x"));
        cfg.set_lvm_config_string(None);
        let argv = cfg.build_lvm_argv("vgs", &[]);
        assert!(!argv.iter().any(|a| a.starts_with("--config=")));
    }
}
