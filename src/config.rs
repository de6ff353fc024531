//! Paths and binary names the enforcer depends on. Kept out of the enforcer's own logic so
//! tests can redirect them at a tempdir instead of the real system.

use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory AppArmor profiles are written to and loaded from.
    pub apparmor_dir: PathBuf,
    /// Root used to enumerate running processes' current profile (normally /proc).
    pub proc_dir: PathBuf,
    /// Name or path of the apparmor_parser executable.
    pub parser_bin: String,
    /// Informational only; resolved from the OS at construction if absent.
    pub host_name: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            apparmor_dir: PathBuf::from("/etc/apparmor.d"),
            proc_dir: PathBuf::from("/proc"),
            parser_bin: "apparmor_parser".to_string(),
            host_name: None,
        }
    }
}

/// Load a config.toml, falling back to defaults for any field it doesn't set.
pub fn load(path: &Path) -> anyhow::Result<Config> {
    let s = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {}", path.display(), e))?;
    let config: Config = toml::from_str(&s)
        .map_err(|e| anyhow::anyhow!("invalid config at {}: {}", path.display(), e))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_production_shaped() {
        let cfg = Config::default();
        assert_eq!(cfg.apparmor_dir, PathBuf::from("/etc/apparmor.d"));
        assert_eq!(cfg.proc_dir, PathBuf::from("/proc"));
        assert_eq!(cfg.parser_bin, "apparmor_parser");
        assert!(cfg.host_name.is_none());
    }

    #[test]
    fn load_partial_overrides_keep_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("confine.toml");
        std::fs::write(&path, r#"parser_bin = "/usr/sbin/apparmor_parser""#).unwrap();
        let cfg = load(&path).unwrap();
        assert_eq!(cfg.parser_bin, "/usr/sbin/apparmor_parser");
        assert_eq!(cfg.apparmor_dir, PathBuf::from("/etc/apparmor.d"));
    }

    #[test]
    fn load_missing_file_is_err() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(&dir.path().join("missing.toml")).unwrap_err();
        assert!(err.to_string().contains("missing.toml"));
    }

    #[test]
    fn load_invalid_toml_is_err() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("confine.toml");
        std::fs::write(&path, "parser_bin = [[[").unwrap();
        let err = load(&path).unwrap_err();
        assert!(err.to_string().to_lowercase().contains("invalid"));
    }
}
