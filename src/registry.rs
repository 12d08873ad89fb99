//! Process-wide plugin description cache and search paths.
//!
//! Probing a module is expensive (and usually done in a subprocess), so
//! probe results are cached per path behind a read-write lock and can be
//! persisted as JSON. The cache is populated lazily and cleared only on
//! explicit request.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use crate::error::Result;
use crate::info::PluginInfo;

type InfoCache = RwLock<HashMap<PathBuf, Arc<PluginInfo>>>;

fn cache() -> &'static InfoCache {
    static CACHE: OnceLock<InfoCache> = OnceLock::new();
    CACHE.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Look up a cached description.
pub fn cached_info(path: &Path) -> Option<Arc<PluginInfo>> {
    cache().read().get(path).cloned()
}

/// Store a description for a path.
pub fn cache_info(path: impl Into<PathBuf>, info: PluginInfo) -> Arc<PluginInfo> {
    let info = Arc::new(info);
    cache().write().insert(path.into(), Arc::clone(&info));
    info
}

/// Number of cached descriptions.
pub fn cache_len() -> usize {
    cache().read().len()
}

/// Drop every cached description.
pub fn clear_cache() {
    cache().write().clear();
}

/// Serialize the cache to a JSON file.
pub fn write_cache_file(path: &Path) -> Result<()> {
    let guard = cache().read();
    let entries: Vec<&PluginInfo> = guard.values().map(|arc| arc.as_ref()).collect();
    let json = serde_json::to_string_pretty(&entries)
        .map_err(|e| crate::error::HostError::BadPreset(e.to_string()))?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Merge descriptions from a JSON file into the cache.
pub fn read_cache_file(path: &Path) -> Result<usize> {
    let json = std::fs::read_to_string(path)?;
    let entries: Vec<PluginInfo> = serde_json::from_str(&json)
        .map_err(|e| crate::error::HostError::BadPreset(e.to_string()))?;
    let count = entries.len();
    let mut guard = cache().write();
    for info in entries {
        guard.insert(PathBuf::from(&info.path), Arc::new(info));
    }
    tracing::info!("restored {} plugin descriptions from {}", count, path.display());
    Ok(count)
}

/// Whether a path looks like a loadable plugin module.
pub fn is_plugin_file(path: &Path) -> bool {
    match path.extension().and_then(|s| s.to_str()) {
        Some(ext) => matches!(ext, "vst" | "vst3" | "dll" | "so" | "dylib"),
        None => false,
    }
}

/// Standard plugin directories for the current platform, V2 then V3.
pub fn default_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    let home = std::env::var("HOME").unwrap_or_default();

    #[cfg(target_os = "macos")]
    {
        paths.push(PathBuf::from("/Library/Audio/Plug-Ins/VST"));
        paths.push(PathBuf::from(format!("{home}/Library/Audio/Plug-Ins/VST")));
        paths.push(PathBuf::from("/Library/Audio/Plug-Ins/VST3"));
        paths.push(PathBuf::from(format!("{home}/Library/Audio/Plug-Ins/VST3")));
    }

    #[cfg(target_os = "windows")]
    {
        let _ = &home;
        paths.push(PathBuf::from("C:\\Program Files\\VstPlugins"));
        paths.push(PathBuf::from("C:\\Program Files\\Steinberg\\VstPlugins"));
        paths.push(PathBuf::from("C:\\Program Files\\Common Files\\VST2"));
        paths.push(PathBuf::from("C:\\Program Files\\Common Files\\VST3"));
    }

    #[cfg(target_os = "linux")]
    {
        paths.push(PathBuf::from("/usr/lib/vst"));
        paths.push(PathBuf::from("/usr/local/lib/vst"));
        paths.push(PathBuf::from(format!("{home}/.vst")));
        paths.push(PathBuf::from("/usr/lib/vst3"));
        paths.push(PathBuf::from("/usr/local/lib/vst3"));
        paths.push(PathBuf::from(format!("{home}/.vst3")));
    }

    paths
}

/// Recursively search a directory for plugin modules.
pub fn search(dir: &Path, found: &mut impl FnMut(&Path)) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!("couldn't read {}: {}", dir.display(), e);
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            // A .vst3 bundle is itself a directory.
            if path.extension().and_then(|s| s.to_str()) == Some("vst3") {
                found(&path);
            } else {
                search(&path, found);
            }
        } else if is_plugin_file(&path) {
            found(&path);
        }
    }
}
