//! Dependency availability cache (spec §4.D).
//!
//! A plugin declares a fixed, small list of dependencies (external
//! utilities, kernel modules, D-Bus services, or advertised CLI features)
//! and asks once whether they're all present. The first caller pays the
//! cost of probing each not-yet-known dependency; every later caller with
//! the same or a subset requirement bitmask is answered straight from an
//! atomic bitmask with no locking at all. Grounded in `check_deps.c`'s
//! `check_deps`/`check_module_deps`/`check_dbus_deps`, which use the same
//! double-checked-locking shape around a `volatile guint` bitmask.

use crate::exec::{check_util_version, exec_capture_status, which};
use std::fs;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

/// One checkable dependency. The order of a plugin's `DepSpec` slice defines
/// the bit each one occupies in the cache (dep at index *i* owns bit *i*),
/// so slices must stay stable across calls sharing one [`AvailabilityCache`].
#[derive(Debug, Clone)]
pub enum DepSpec {
    /// An external utility reachable via `PATH`, with an optional minimum
    /// version and a way to ask for its version string.
    Util {
        name: &'static str,
        min_version: Option<&'static str>,
        version_arg: Option<&'static str>,
        version_regexp: Option<&'static str>,
    },
    /// A kernel module that must be loadable (already loaded, or present in
    /// `/proc/modules` / loadable via `modprobe -n`).
    Module(&'static str),
    /// A D-Bus service that must be owned or activatable on the given bus,
    /// whose `object_prefix` must introspect successfully, with an optional
    /// minimum version read from the `Version` property of
    /// `min_iface_version`'s interface.
    DBusService {
        bus_name: &'static str,
        object_prefix: &'static str,
        system_bus: bool,
        min_iface_version: Option<(&'static str, &'static str)>,
    },
    /// A capability advertised in a CLI's own output: running `util` with
    /// `feature_arg` must produce text containing `feature_string`.
    Feature {
        util: &'static str,
        feature_string: &'static str,
        feature_arg: Option<&'static str>,
        feature_regexp: Option<&'static str>,
    },
}

impl DepSpec {
    fn describe(&self) -> String {
        match self {
            DepSpec::Util { name, .. } => format!("utility '{name}'"),
            DepSpec::Module(m) => format!("kernel module '{m}'"),
            DepSpec::DBusService { bus_name, .. } => format!("D-Bus service '{bus_name}'"),
            DepSpec::Feature {
                util,
                feature_string,
                ..
            } => format!("feature '{feature_string}' of '{util}'"),
        }
    }

    fn probe(&self) -> Result<(), String> {
        match self {
            DepSpec::Util {
                name,
                min_version,
                version_arg,
                version_regexp,
            } => {
                let re = version_regexp
                    .map(|r| regex::Regex::new(r).map_err(|e| e.to_string()))
                    .transpose()?;
                check_util_version(name, *min_version, *version_arg, re.as_ref())
                    .map_err(|e| e.to_string())
            }
            DepSpec::Module(name) => {
                if module_loaded(name) || module_loadable(name) {
                    Ok(())
                } else {
                    Err(format!("Kernel module '{name}' not available"))
                }
            }
            DepSpec::DBusService {
                bus_name,
                object_prefix,
                system_bus,
                min_iface_version,
            } => dbus_service_available(bus_name, object_prefix, *system_bus, *min_iface_version),
            DepSpec::Feature {
                util,
                feature_string,
                feature_arg,
                feature_regexp,
            } => feature_available(util, feature_string, *feature_arg, *feature_regexp),
        }
    }
}

fn module_loaded(name: &str) -> bool {
    fs::read_to_string("/proc/modules")
        .map(|contents| {
            contents
                .lines()
                .any(|line| line.split_whitespace().next() == Some(name))
        })
        .unwrap_or(false)
}

/// Falls back to asking `modprobe` whether the module could be loaded
/// without actually loading it (`-n -q`, i.e. dry-run, quiet).
fn module_loadable(name: &str) -> bool {
    which("modprobe").is_some()
        && crate::exec::exec_report_error(
            &[
                "modprobe".to_string(),
                "-n".to_string(),
                "-q".to_string(),
                name.to_string(),
            ],
            &[],
        )
        .is_ok()
}

/// Runs `util feature_arg` (default `--help`) and requires the candidate
/// string to contain `feature_string`. The candidate is stdout on a zero
/// exit, stderr on a non-zero one (mirroring the exec engine's general
/// stderr-over-stdout preference for failure diagnostics); it is then
/// narrowed to the first capture group of `feature_regexp` if given, else
/// simply trimmed.
fn feature_available(
    util: &str,
    feature_string: &str,
    feature_arg: Option<&str>,
    feature_regexp: Option<&str>,
) -> Result<(), String> {
    let arg = feature_arg.unwrap_or("--help");
    let argv = vec![util.to_string(), arg.to_string()];
    let (success, stdout, stderr) = exec_capture_status(&argv).map_err(|e| e.to_string())?;
    let candidate = if success { stdout } else { stderr };

    let extracted = match feature_regexp {
        Some(pattern) => {
            let re = regex::Regex::new(pattern).map_err(|e| e.to_string())?;
            re.captures(&candidate)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| candidate.trim().to_string())
        }
        None => candidate.trim().to_string(),
    };

    if extracted.contains(feature_string) {
        Ok(())
    } else {
        Err(format!(
            "Feature '{feature_string}' not found in '{util}'s output"
        ))
    }
}

/// Verifies a D-Bus service is usable: the well-known name must be either
/// currently owned or activatable, `object_prefix` must introspect
/// successfully (which may trigger autostart), and if `min_iface_version`
/// is set its interface's `Version` property must meet the minimum.
fn dbus_service_available(
    bus_name: &str,
    object_prefix: &str,
    system_bus: bool,
    min_iface_version: Option<(&str, &str)>,
) -> Result<(), String> {
    #[cfg(target_os = "linux")]
    {
        use zbus::blocking::{Connection, Proxy};

        let conn = if system_bus {
            Connection::system()
        } else {
            Connection::session()
        }
        .map_err(|e| e.to_string())?;

        let bus_proxy = Proxy::new(
            &conn,
            "org.freedesktop.DBus",
            "/org/freedesktop/DBus",
            "org.freedesktop.DBus",
        )
        .map_err(|e| e.to_string())?;

        let owned: Vec<String> = bus_proxy
            .call("ListNames", &())
            .map_err(|e| e.to_string())?;
        let activatable: Vec<String> = bus_proxy
            .call("ListActivatableNames", &())
            .map_err(|e| e.to_string())?;
        if !owned.iter().any(|n| n == bus_name) && !activatable.iter().any(|n| n == bus_name) {
            return Err(format!(
                "D-Bus service '{bus_name}' is neither owned nor activatable"
            ));
        }

        let introspectable = Proxy::new(
            &conn,
            bus_name,
            object_prefix,
            "org.freedesktop.DBus.Introspectable",
        )
        .map_err(|e| e.to_string())?;
        introspectable
            .call::<_, _, String>("Introspect", &())
            .map_err(|e| format!("failed to introspect '{object_prefix}' on '{bus_name}': {e}"))?;

        if let Some((iface, min_version)) = min_iface_version {
            let iface_proxy = Proxy::new(&conn, bus_name, object_prefix, iface)
                .map_err(|e| e.to_string())?;
            let version: String = iface_proxy
                .get_property("Version")
                .map_err(|e| format!("failed to read '{iface}' Version property: {e}"))?;
            match crate::exec::version_cmp(&version, min_version) {
                Ok(std::cmp::Ordering::Less) | Err(_) => {
                    return Err(format!(
                        "Too low version of interface '{iface}': {version}. At least {min_version} required."
                    ));
                }
                Ok(_) => {}
            }
        }

        Ok(())
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = (bus_name, object_prefix, system_bus, min_iface_version);
        Err("D-Bus is only available on this platform's Linux build".to_string())
    }
}

/// A plugin-owned, thread-safe cache of which dependencies (by bit index
/// into a fixed `DepSpec` slice) have been confirmed available.
///
/// Uses the double-checked-locking shape from `check_deps.c`: an atomic
/// bitmask is consulted lock-free first; only a miss takes the mutex, and
/// the bitmask is re-checked once the lock is held in case another thread
/// won the race. Bits are only ever set, never cleared, so the cache is
/// monotonically increasing and `check` is safe to call repeatedly and
/// concurrently.
#[derive(Debug, Default)]
pub struct AvailabilityCache {
    avail: AtomicU32,
    check_lock: Mutex<()>,
}

impl AvailabilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks whether every dependency named by `required` (a bitmask over
    /// `specs`' indices, e.g. `0b101` = specs[0] and specs[2]) is available,
    /// probing any not-yet-confirmed bit. Returns the combined error message
    /// (one line per still-missing dependency, in spec order) on failure.
    pub fn check(&self, required: u32, specs: &[DepSpec]) -> Result<(), String> {
        debug_assert!(specs.len() <= 32, "bitmask cache supports at most 32 deps");

        let val = self.avail.load(Ordering::SeqCst);
        if val & required == required {
            return Ok(());
        }

        let _guard = self.check_lock.lock().expect("deps check lock poisoned");

        let val = self.avail.load(Ordering::SeqCst);
        if val & required == required {
            return Ok(());
        }

        let mut errors = Vec::new();
        for (i, spec) in specs.iter().enumerate() {
            let bit = 1u32 << i;
            if bit & required != 0 && bit & val == 0 {
                match spec.probe() {
                    Ok(()) => {
                        self.avail.fetch_or(bit, Ordering::SeqCst);
                    }
                    Err(msg) => errors.push(msg),
                }
            }
        }

        let val = self.avail.load(Ordering::SeqCst);
        if val & required == required {
            Ok(())
        } else {
            Err(errors.join("\n"))
        }
    }

    /// True iff every dependency in `required` is already confirmed, without
    /// performing any new probes.
    pub fn is_cached(&self, required: u32) -> bool {
        self.avail.load(Ordering::SeqCst) & required == required
    }

    /// Human description of the dependencies selected by `mask`, for error
    /// messages and `is_tech_avail`-style diagnostics.
    pub fn describe(mask: u32, specs: &[DepSpec]) -> Vec<String> {
        specs
            .iter()
            .enumerate()
            .filter(|(i, _)| mask & (1 << i) != 0)
            .map(|(_, s)| s.describe())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_present_utils_report_available() {
        let specs = [
            DepSpec::Util {
                name: "sh",
                min_version: None,
                version_arg: None,
                version_regexp: None,
            },
            DepSpec::Util {
                name: "definitely-not-a-real-binary-xyz",
                min_version: None,
                version_arg: None,
                version_regexp: None,
            },
        ];
        let cache = AvailabilityCache::new();
        assert!(cache.check(0b01, &specs).is_ok());
        let err = cache.check(0b11, &specs).unwrap_err();
        assert!(err.contains("definitely-not-a-real-binary-xyz"));
    }

    #[test]
    fn cache_is_idempotent_across_repeated_checks() {
        let counter_path = std::env::temp_dir().join(format!(
            "blockdev-deps-test-counter-{}-{}",
            std::process::id(),
            line!()
        ));
        std::fs::write(&counter_path, "").unwrap();
        let script_path = std::env::temp_dir().join(format!(
            "blockdev-deps-test-script-{}-{}.sh",
            std::process::id(),
            line!()
        ));
        std::fs::write(
            &script_path,
            format!("echo x >> {}\necho always-on\n", counter_path.display()),
        )
        .unwrap();

        let util: &'static str =
            Box::leak(script_path.to_string_lossy().into_owned().into_boxed_str());
        let specs = [DepSpec::Feature {
            util: "sh",
            feature_string: "always-on",
            feature_arg: Some(util),
            feature_regexp: None,
        }];
        let cache = AvailabilityCache::new();
        for _ in 0..10 {
            assert!(cache.check(0b1, &specs).is_ok());
        }
        let calls = std::fs::read_to_string(&counter_path).unwrap().lines().count();
        assert_eq!(calls, 1);

        std::fs::remove_file(&counter_path).ok();
        std::fs::remove_file(&script_path).ok();
    }

    #[test]
    fn failed_probe_does_not_set_the_bit() {
        let specs = [DepSpec::Feature {
            util: "printf",
            feature_string: "never-on",
            feature_arg: Some("nothing-advertised-here"),
            feature_regexp: None,
        }];
        let cache = AvailabilityCache::new();
        assert!(cache.check(0b1, &specs).is_err());
        assert!(!cache.is_cached(0b1));
        assert!(cache.check(0b1, &specs).is_err());
    }

    #[test]
    fn feature_probe_matches_advertised_string() {
        let specs = [DepSpec::Feature {
            util: "printf",
            feature_string: "frobnicate",
            feature_arg: Some("supports-frobnicate"),
            feature_regexp: None,
        }];
        let cache = AvailabilityCache::new();
        assert!(cache.check(0b1, &specs).is_ok());
    }

    #[test]
    fn feature_probe_applies_capture_group() {
        let specs = [DepSpec::Feature {
            util: "printf",
            feature_string: "2.5",
            feature_arg: Some("version=2.5.0"),
            feature_regexp: Some(r"version=(\S+)"),
        }];
        let cache = AvailabilityCache::new();
        assert!(cache.check(0b1, &specs).is_ok());
    }
}
