//! Live-bound configuration: `collector_binary_path` and
//! `debug_bundle_storage_dir`, observed via a `tokio::sync::watch`
//! channel the way `harmonia-daemon::config::Config` exposes its
//! reload-on-SIGHUP values.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// On-disk/user-facing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugBundleConfig {
    pub collector_binary_path: PathBuf,
    pub data_dir: PathBuf,
    pub debug_bundle_storage_dir: Option<PathBuf>,
}

impl Default for DebugBundleConfig {
    fn default() -> Self {
        Self {
            collector_binary_path: PathBuf::from("/opt/redpanda/bin/rpk"),
            data_dir: PathBuf::from("/var/lib/redpanda/data"),
            debug_bundle_storage_dir: None,
        }
    }
}

impl DebugBundleConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub async fn from_file(path: &Path) -> std::io::Result<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        Self::from_toml_str(&text)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Resolve the effective storage directory: the explicit override,
    /// or `<data_dir>/debug-bundle`.
    pub fn effective_storage_dir(&self) -> PathBuf {
        self.debug_bundle_storage_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("debug-bundle"))
    }
}

/// A `watch`-backed handle to the live configuration, snapshotted once
/// per operation to protect against mid-operation drift (per the
/// design notes on live-bound configuration).
#[derive(Clone)]
pub struct ConfigHandle {
    rx: watch::Receiver<DebugBundleConfig>,
}

impl ConfigHandle {
    pub fn snapshot(&self) -> DebugBundleConfig {
        self.rx.borrow().clone()
    }
}

/// The writer side, held by whoever owns reload (e.g. a SIGHUP handler
/// or config-file watcher in the binary crate).
pub struct ConfigWriter {
    tx: watch::Sender<DebugBundleConfig>,
}

impl ConfigWriter {
    pub fn update(&self, config: DebugBundleConfig) {
        let _ = self.tx.send(config);
    }
}

/// Create a linked (handle, writer) pair seeded with `initial`.
pub fn observable(initial: DebugBundleConfig) -> (ConfigHandle, ConfigWriter) {
    let (tx, rx) = watch::channel(initial);
    (ConfigHandle { rx }, ConfigWriter { tx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_storage_dir_falls_back_to_data_dir_subdir() {
        let config = DebugBundleConfig {
            collector_binary_path: PathBuf::from("/bin/rpk"),
            data_dir: PathBuf::from("/var/lib/redpanda/data"),
            debug_bundle_storage_dir: None,
        };
        assert_eq!(
            config.effective_storage_dir(),
            PathBuf::from("/var/lib/redpanda/data/debug-bundle")
        );
    }

    #[test]
    fn effective_storage_dir_honors_explicit_override() {
        let config = DebugBundleConfig {
            collector_binary_path: PathBuf::from("/bin/rpk"),
            data_dir: PathBuf::from("/var/lib/redpanda/data"),
            debug_bundle_storage_dir: Some(PathBuf::from("/mnt/bundles")),
        };
        assert_eq!(config.effective_storage_dir(), PathBuf::from("/mnt/bundles"));
    }

    #[tokio::test]
    async fn observable_config_reflects_updates() {
        let (handle, writer) = observable(DebugBundleConfig::default());
        assert_eq!(
            handle.snapshot().collector_binary_path,
            PathBuf::from("/opt/redpanda/bin/rpk")
        );

        writer.update(DebugBundleConfig {
            collector_binary_path: PathBuf::from("/usr/bin/rpk"),
            ..DebugBundleConfig::default()
        });
        assert_eq!(
            handle.snapshot().collector_binary_path,
            PathBuf::from("/usr/bin/rpk")
        );
    }

    #[test]
    fn parses_from_toml() {
        let config = DebugBundleConfig::from_toml_str(
            r#"
            collector_binary_path = "/opt/redpanda/bin/rpk"
            data_dir = "/var/lib/redpanda/data"
            debug_bundle_storage_dir = "/mnt/bundles"
            "#,
        )
        .unwrap();
        assert_eq!(config.debug_bundle_storage_dir, Some(PathBuf::from("/mnt/bundles")));
    }
}
