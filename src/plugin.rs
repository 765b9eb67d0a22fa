//! Plugin runtime: discovery, load/unload, capability query (spec §4.E).
//!
//! The real library dlopen's a per-domain shared object per [`PluginName`]
//! and looks up its function table; this crate only ships the core engine,
//! so "loading" a plugin means looking up (or accepting an override for)
//! its soname and registering an in-process [`TechCatalog`] that answers
//! capability queries for it. Built-in catalogs are provided for the
//! domains this crate actually decodes (SMART, NVMe); every other
//! [`PluginName`] still participates fully in soname resolution, the s390
//! exclusion rule, and init/reinit/close bookkeeping, it just has no
//! capabilities to query until a caller registers one.

use crate::deps::{AvailabilityCache, DepSpec};
use crate::error::{BlockdevError, Result};
use bitflags::bitflags;
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginName {
    Lvm,
    Btrfs,
    Swap,
    Loop,
    Crypto,
    Mpath,
    Dm,
    Mdraid,
    Kbd,
    S390,
    Nvdimm,
    Nvme,
    Smart,
    Vdo,
    Part,
}

impl PluginName {
    /// Platform-default soname basename (plus SONAME major version), mirroring
    /// the original's per-plugin basename table.
    pub fn default_soname(self) -> &'static str {
        match self {
            PluginName::Lvm => "libbd_lvm.so.3",
            PluginName::Btrfs => "libbd_btrfs.so.3",
            PluginName::Swap => "libbd_swap.so.3",
            PluginName::Loop => "libbd_loop.so.3",
            PluginName::Crypto => "libbd_crypto.so.3",
            PluginName::Mpath => "libbd_mpath.so.3",
            PluginName::Dm => "libbd_dm.so.3",
            PluginName::Mdraid => "libbd_mdraid.so.3",
            PluginName::Kbd => "libbd_kbd.so.3",
            PluginName::S390 => "libbd_s390.so.3",
            PluginName::Nvdimm => "libbd_nvdimm.so.3",
            PluginName::Nvme => "libbd_nvme.so.3",
            PluginName::Smart => "libbd_smart.so.3",
            PluginName::Vdo => "libbd_vdo.so.3",
            PluginName::Part => "libbd_part.so.3",
        }
    }

    /// True on every host except s390x, where it is excluded (spec §4.E).
    fn excluded_on_this_host(self) -> bool {
        matches!(self, PluginName::S390) && !cfg!(target_arch = "s390x")
    }
}

bitflags! {
    /// Operation-kind bitmask used by capability queries.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OperationMode: u32 {
        const CREATE               = 0b0000_0001;
        const REMOVE               = 0b0000_0010;
        const MODIFY               = 0b0000_0100;
        const QUERY                = 0b0000_1000;
        const ACTIVATE_DEACTIVATE  = 0b0001_0000;
    }
}

/// An ordered list of these drives [`init`]; an entry with `soname_override`
/// set wins over the platform default.
#[derive(Debug, Clone)]
pub struct PluginSpec {
    pub name: PluginName,
    pub soname_override: Option<String>,
}

impl PluginSpec {
    pub fn new(name: PluginName) -> Self {
        Self {
            name,
            soname_override: None,
        }
    }

    pub fn with_soname(name: PluginName, soname: impl Into<String>) -> Self {
        Self {
            name,
            soname_override: Some(soname.into()),
        }
    }
}

/// Per-plugin load state. Invariant: either fully loaded (`soname` set) or
/// entirely absent -- there is no partially-initialized state.
#[derive(Debug, Clone, Default)]
pub struct PluginState {
    pub loaded: bool,
    pub soname: Option<String>,
}

/// A plugin's declared capability graph: maps a tech tag to the dependency
/// bits it needs and the modes it can decline outright (e.g. a read-only
/// tech that only ever supports `QUERY`).
pub trait TechCatalog: Send + Sync {
    fn deps(&self) -> &[DepSpec];

    /// Returns the subset of `deps()` (as a bitmask) required for `tech_tag`
    /// under `requested_modes`, or `None` if the tech doesn't support one of
    /// the requested modes at all.
    fn tech_deps(&self, tech_tag: &str, requested_modes: OperationMode) -> Option<u32>;
}

struct LoadedPlugin {
    state: PluginState,
    catalog: Option<Box<dyn TechCatalog>>,
    cache: AvailabilityCache,
}

/// Owns the process-wide plugin table: which plugins are loaded, under
/// which soname, and (for the plugins this crate actually decodes) their
/// capability catalogs.
#[derive(Default)]
pub struct PluginRuntime {
    init_lock: Mutex<()>,
    initialized: std::sync::atomic::AtomicBool,
    plugins: RwLock<HashMap<PluginName, LoadedPlugin>>,
}

impl PluginRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a catalog for `name`. Intended to be called once, before
    /// or during `init`, by whichever code owns that domain's decoder (this
    /// crate's SMART/NVMe modules call it with their own catalogs).
    pub fn register_catalog(&self, name: PluginName, catalog: Box<dyn TechCatalog>) {
        let mut plugins = self.plugins.write().expect("plugin table lock poisoned");
        plugins
            .entry(name)
            .or_insert_with(|| LoadedPlugin {
                state: PluginState::default(),
                catalog: None,
                cache: AvailabilityCache::new(),
            })
            .catalog = Some(catalog);
    }

    fn load_one(&self, spec: &PluginSpec) -> PluginState {
        let soname = spec
            .soname_override
            .clone()
            .unwrap_or_else(|| spec.name.default_soname().to_string());
        PluginState {
            loaded: true,
            soname: Some(soname),
        }
    }

    /// Loads every spec not excluded for this host. Rejects a second call
    /// with `AlreadyInitialized`; use [`Self::reinit`] or [`Self::try_init`]
    /// instead.
    pub fn init(&self, specs: &[PluginSpec]) -> Result<()> {
        let _guard = self.init_lock.lock().expect("plugin init lock poisoned");
        if self.initialized.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(BlockdevError::AlreadyInitialized);
        }
        self.load_all(specs);
        self.initialized
            .store(true, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    fn load_all(&self, specs: &[PluginSpec]) {
        let mut plugins = self.plugins.write().expect("plugin table lock poisoned");
        for spec in specs {
            if spec.name.excluded_on_this_host() {
                continue;
            }
            let state = self.load_one(spec);
            plugins
                .entry(spec.name)
                .or_insert_with(|| LoadedPlugin {
                    state: PluginState::default(),
                    catalog: None,
                    cache: AvailabilityCache::new(),
                })
                .state = state;
        }
    }

    /// Closes every loaded plugin (reverse load order is not observable
    /// here since plugins are keyed, not ordered) then, if `reload` is set,
    /// loads `specs` again as a fresh `init`.
    pub fn reinit(&self, specs: &[PluginSpec], reload: bool) -> Result<()> {
        let _guard = self.init_lock.lock().expect("plugin init lock poisoned");
        self.close_locked();
        if reload {
            self.load_all(specs);
        }
        self.initialized
            .store(reload, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    /// Initializes only if not already initialized. Returns `true` if this
    /// call performed the init, `false` if it was a no-op.
    pub fn try_init(&self, specs: &[PluginSpec]) -> Result<bool> {
        let _guard = self.init_lock.lock().expect("plugin init lock poisoned");
        if self.initialized.load(std::sync::atomic::Ordering::SeqCst) {
            return Ok(false);
        }
        self.load_all(specs);
        self.initialized
            .store(true, std::sync::atomic::Ordering::SeqCst);
        Ok(true)
    }

    fn close_locked(&self) {
        let mut plugins = self.plugins.write().expect("plugin table lock poisoned");
        for plugin in plugins.values_mut() {
            plugin.state = PluginState::default();
        }
    }

    /// Unloads every plugin. Idempotent.
    pub fn close(&self) -> Result<()> {
        let _guard = self.init_lock.lock().expect("plugin init lock poisoned");
        self.close_locked();
        self.initialized
            .store(false, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    pub fn is_loaded(&self, name: PluginName) -> bool {
        self.plugins
            .read()
            .expect("plugin table lock poisoned")
            .get(&name)
            .map(|p| p.state.loaded)
            .unwrap_or(false)
    }

    /// Dispatches a capability query for `tech_tag` under `modes` to the
    /// named plugin's registered catalog, consulting (and populating) its
    /// own dependency cache. Returns `Ok(false)` (not an error) if the tech
    /// declines one of the requested modes outright.
    pub fn is_tech_avail(
        &self,
        name: PluginName,
        tech_tag: &str,
        modes: OperationMode,
    ) -> Result<bool> {
        let plugins = self.plugins.read().expect("plugin table lock poisoned");
        let Some(plugin) = plugins.get(&name) else {
            return Err(BlockdevError::TechUnavail(format!(
                "plugin {name:?} is not loaded"
            )));
        };
        let Some(catalog) = &plugin.catalog else {
            return Err(BlockdevError::TechUnavail(format!(
                "plugin {name:?} has no registered capability catalog"
            )));
        };
        let Some(required) = catalog.tech_deps(tech_tag, modes) else {
            return Ok(false);
        };
        match plugin.cache.check(required, catalog.deps()) {
            Ok(()) => Ok(true),
            Err(msg) => Err(BlockdevError::DepsFailed(msg)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysQueryCatalog;
    impl TechCatalog for AlwaysQueryCatalog {
        fn deps(&self) -> &[DepSpec] {
            &[]
        }
        fn tech_deps(&self, tech_tag: &str, modes: OperationMode) -> Option<u32> {
            if tech_tag == "THIN_CALCS" && modes != OperationMode::QUERY {
                None
            } else {
                Some(0)
            }
        }
    }

    #[test]
    fn second_init_is_rejected() {
        let rt = PluginRuntime::new();
        rt.init(&[PluginSpec::new(PluginName::Lvm)]).unwrap();
        assert!(matches!(
            rt.init(&[]),
            Err(BlockdevError::AlreadyInitialized)
        ));
    }

    #[test]
    fn try_init_is_idempotent() {
        let rt = PluginRuntime::new();
        assert!(rt.try_init(&[PluginSpec::new(PluginName::Smart)]).unwrap());
        assert!(!rt.try_init(&[]).unwrap());
        assert!(rt.is_loaded(PluginName::Smart));
    }

    #[test]
    fn s390_plugin_is_excluded_off_s390() {
        let rt = PluginRuntime::new();
        rt.init(&[PluginSpec::new(PluginName::S390)]).unwrap();
        assert_eq!(rt.is_loaded(PluginName::S390), cfg!(target_arch = "s390x"));
    }

    #[test]
    fn close_clears_loaded_state() {
        let rt = PluginRuntime::new();
        rt.init(&[PluginSpec::new(PluginName::Lvm)]).unwrap();
        assert!(rt.is_loaded(PluginName::Lvm));
        rt.close().unwrap();
        assert!(!rt.is_loaded(PluginName::Lvm));
    }

    #[test]
    fn tech_declining_a_mode_returns_false_not_error() {
        let rt = PluginRuntime::new();
        rt.init(&[PluginSpec::new(PluginName::Lvm)]).unwrap();
        rt.register_catalog(PluginName::Lvm, Box::new(AlwaysQueryCatalog));
        assert!(rt
            .is_tech_avail(PluginName::Lvm, "THIN_CALCS", OperationMode::QUERY)
            .unwrap());
        assert!(!rt
            .is_tech_avail(PluginName::Lvm, "THIN_CALCS", OperationMode::CREATE)
            .unwrap());
    }
}
