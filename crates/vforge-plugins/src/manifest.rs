//! Plugin manifest parsing and directory discovery.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{PluginError, PluginResult};

/// Capability a plugin provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginType {
    Auth,
    Storage,
    Encoder,
    Live,
    Publisher,
}

impl PluginType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginType::Auth => "auth",
            PluginType::Storage => "storage",
            PluginType::Encoder => "encoder",
            PluginType::Live => "live",
            PluginType::Publisher => "publisher",
        }
    }
}

/// Contents of a `plugin.toml` manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct PluginManifest {
    pub plugin: PluginSection,
}

/// The `[plugin]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct PluginSection {
    /// Plugin id; overrides the filesystem-derived id when present
    #[serde(default)]
    pub id: Option<String>,
    /// Capability
    #[serde(rename = "type")]
    pub plugin_type: PluginType,
    /// Human-readable name
    pub name: String,
}

impl PluginManifest {
    /// Parse a manifest file.
    pub fn load(path: &Path) -> PluginResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents)
            .map_err(|e| PluginError::invalid_manifest(path, e.to_string()))
    }
}

/// One plugin found on disk, ready to launch.
#[derive(Debug, Clone)]
pub struct DiscoveredPlugin {
    /// Effective id (manifest id, or the filesystem id)
    pub id: String,
    pub plugin_type: PluginType,
    pub name: String,
    /// Executable to launch
    pub binary: PathBuf,
}

/// Scan a plugin directory.
///
/// Two layouts are recognised:
/// - a sub-directory containing `plugin.toml` and an executable named after
///   the directory;
/// - a flat `<id>.bin` binary with a sibling `<id>.toml` manifest.
///
/// Entries with unreadable manifests are skipped with a warning; a plugin
/// that fails to parse must not take the host down.
pub fn discover_plugins(dir: &Path) -> PluginResult<Vec<DiscoveredPlugin>> {
    if !dir.is_dir() {
        return Err(PluginError::DirectoryNotFound(dir.to_path_buf()));
    }

    let mut plugins = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        let discovered = if path.is_dir() {
            discover_subdir(&path)
        } else if path.extension().is_some_and(|e| e == "bin") {
            discover_flat(&path)
        } else {
            continue;
        };

        match discovered {
            Ok(Some(plugin)) => {
                debug!(
                    id = %plugin.id,
                    plugin_type = plugin.plugin_type.as_str(),
                    "Discovered plugin"
                );
                plugins.push(plugin);
            }
            Ok(None) => {}
            Err(e) => warn!("Skipping plugin at {}: {}", path.display(), e),
        }
    }

    // Launch order independent of directory iteration order.
    plugins.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(plugins)
}

/// Layout (a): `<dir>/plugin.toml` + `<dir>/<dirname>`.
fn discover_subdir(dir: &Path) -> PluginResult<Option<DiscoveredPlugin>> {
    let manifest_path = dir.join("plugin.toml");
    if !manifest_path.is_file() {
        return Ok(None);
    }

    let fs_id = dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let manifest = PluginManifest::load(&manifest_path)?;
    let binary = dir.join(&fs_id);
    if !binary.is_file() {
        return Err(PluginError::BinaryMissing {
            id: fs_id,
            path: binary,
        });
    }

    Ok(Some(DiscoveredPlugin {
        id: manifest.plugin.id.unwrap_or(fs_id),
        plugin_type: manifest.plugin.plugin_type,
        name: manifest.plugin.name,
        binary,
    }))
}

/// Layout (b): `<id>.bin` + `<id>.toml`.
fn discover_flat(binary: &Path) -> PluginResult<Option<DiscoveredPlugin>> {
    let fs_id = binary
        .file_stem()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let manifest_path = binary.with_extension("toml");
    if !manifest_path.is_file() {
        return Ok(None);
    }

    let manifest = PluginManifest::load(&manifest_path)?;

    Ok(Some(DiscoveredPlugin {
        id: manifest.plugin.id.unwrap_or(fs_id),
        plugin_type: manifest.plugin.plugin_type,
        name: manifest.plugin.name,
        binary: binary.to_path_buf(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_manifest(path: &Path, id: Option<&str>, plugin_type: &str, name: &str) {
        let id_line = id.map(|i| format!("id = \"{i}\"\n")).unwrap_or_default();
        fs::write(
            path,
            format!("[plugin]\n{id_line}type = \"{plugin_type}\"\nname = \"{name}\"\n"),
        )
        .unwrap();
    }

    #[test]
    fn test_manifest_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugin.toml");
        write_manifest(&path, Some("s3"), "storage", "S3 storage");

        let manifest = PluginManifest::load(&path).unwrap();
        assert_eq!(manifest.plugin.id.as_deref(), Some("s3"));
        assert_eq!(manifest.plugin.plugin_type, PluginType::Storage);
        assert_eq!(manifest.plugin.name, "S3 storage");
    }

    #[test]
    fn test_manifest_rejects_unknown_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugin.toml");
        write_manifest(&path, None, "telepathy", "Nope");

        assert!(PluginManifest::load(&path).is_err());
    }

    #[test]
    fn test_discover_subdir_layout() {
        let root = tempfile::tempdir().unwrap();
        let plugin_dir = root.path().join("minio");
        fs::create_dir(&plugin_dir).unwrap();
        write_manifest(&plugin_dir.join("plugin.toml"), None, "storage", "MinIO");
        fs::write(plugin_dir.join("minio"), b"#!/bin/sh\n").unwrap();

        let plugins = discover_plugins(root.path()).unwrap();
        assert_eq!(plugins.len(), 1);
        assert_eq!(plugins[0].id, "minio");
        assert_eq!(plugins[0].plugin_type, PluginType::Storage);
        assert_eq!(plugins[0].binary, plugin_dir.join("minio"));
    }

    #[test]
    fn test_discover_flat_layout() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("rtmp.bin"), b"").unwrap();
        write_manifest(&root.path().join("rtmp.toml"), None, "live", "RTMP monitor");

        let plugins = discover_plugins(root.path()).unwrap();
        assert_eq!(plugins.len(), 1);
        assert_eq!(plugins[0].id, "rtmp");
        assert_eq!(plugins[0].plugin_type, PluginType::Live);
    }

    #[test]
    fn test_manifest_id_overrides_filesystem_id() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("pub01.bin"), b"").unwrap();
        write_manifest(
            &root.path().join("pub01.toml"),
            Some("youtube"),
            "publisher",
            "YouTube publisher",
        );

        let plugins = discover_plugins(root.path()).unwrap();
        assert_eq!(plugins[0].id, "youtube");
    }

    #[test]
    fn test_broken_manifest_is_skipped() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("bad.bin"), b"").unwrap();
        fs::write(root.path().join("bad.toml"), b"not toml [[[").unwrap();
        fs::write(root.path().join("ok.bin"), b"").unwrap();
        write_manifest(&root.path().join("ok.toml"), None, "auth", "Auth");

        let plugins = discover_plugins(root.path()).unwrap();
        assert_eq!(plugins.len(), 1);
        assert_eq!(plugins[0].id, "ok");
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        assert!(discover_plugins(Path::new("/nonexistent/plugins")).is_err());
    }
}
