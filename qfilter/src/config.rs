//! Configuration for qfilter.
//!
//! QFILTER_ROOT resolution order:
//! 1. Explicit path passed to Config::with_root() or Config::load_from()
//! 2. QFILTER_ROOT environment variable
//! 3. Platform data directory (via the directories crate)
//! 4. Fallback: ~/.local/share/qfilter
//!
//! ```toml
//! [polling]
//! min = "00:00:30"
//! max = "24:00:00"
//!
//! [defaults]
//! pollingTime = "00:05:00"
//! pollingOverdueTime = "00:05:00"
//!
//! [tenants.acme]
//! pollingTime = "00:01:00~20%, updatestatus==pending -> 00:00:30"
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::duration::parse_duration;
use crate::polling::{DEFAULT_MAX_POLLING, DEFAULT_MIN_POLLING};
use crate::{Error, Result};

/// Tenant key holding the polling specification.
pub const POLLING_TIME_KEY: &str = "pollingTime";

/// Tenant key holding the grace period before a device counts as overdue.
pub const POLLING_OVERDUE_TIME_KEY: &str = "pollingOverdueTime";

pub const DEFAULT_POLLING_TIME: &str = "00:05:00";
pub const DEFAULT_POLLING_OVERDUE_TIME: &str = "00:05:00";

/// Read access to tenant-scoped configuration values.
pub trait TenantConfig {
    fn get_string(&self, key: &str) -> Option<String>;
}

impl<F> TenantConfig for F
where
    F: Fn(&str) -> Option<String>,
{
    fn get_string(&self, key: &str) -> Option<String> {
        self(key)
    }
}

impl TenantConfig for HashMap<String, String> {
    fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

impl TenantConfig for BTreeMap<String, String> {
    fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Clamp bounds for effective polling intervals.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollingBounds {
    /// Minimum interval (HH:mm:ss or ISO-8601). Default: 0s.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<String>,
    /// Maximum interval (HH:mm:ss or ISO-8601). Default: 100 years.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<String>,
}

/// qfilter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root directory for configuration and schema files.
    #[serde(skip)]
    pub root: PathBuf,

    #[serde(default)]
    pub polling: PollingBounds,

    /// Values shared by every tenant.
    #[serde(default)]
    pub defaults: BTreeMap<String, String>,

    /// Per-tenant values, overriding `defaults`.
    #[serde(default)]
    pub tenants: BTreeMap<String, BTreeMap<String, String>>,
}

impl Config {
    /// Create a new config with the given root.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            polling: PollingBounds::default(),
            defaults: BTreeMap::new(),
            tenants: BTreeMap::new(),
        }
    }

    /// Create a config using default root resolution.
    pub fn default_location() -> Result<Self> {
        let root = resolve_root()?;
        Ok(Self::with_root(root))
    }

    /// Load config from QFILTER_ROOT/config.toml, or create default.
    pub fn load() -> Result<Self> {
        let root = resolve_root()?;
        Self::load_from(&root)
    }

    /// Load config from a specific root.
    pub fn load_from(root: &Path) -> Result<Self> {
        let config_path = root.join("config.toml");

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)?;
            let mut config: Config = toml::from_str(&contents)
                .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
            config.root = root.to_path_buf();
            Ok(config)
        } else {
            Ok(Self::with_root(root))
        }
    }

    /// Save config to QFILTER_ROOT/config.toml.
    pub fn save(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(self.config_path(), contents)?;
        Ok(())
    }

    /// Path to the config file.
    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    /// Path to the field schema file.
    pub fn schema_path(&self) -> PathBuf {
        self.root.join("schema.toml")
    }

    /// Configuration as seen by one tenant.
    pub fn tenant(&self, name: &str) -> TenantView<'_> {
        TenantView {
            config: self,
            tenant: name.to_string(),
        }
    }

    /// Set a value for one tenant, or for all tenants when `tenant` is None.
    pub fn set(&mut self, tenant: Option<&str>, key: impl Into<String>, value: impl Into<String>) {
        let table = match tenant {
            Some(name) => self.tenants.entry(name.to_string()).or_default(),
            None => &mut self.defaults,
        };
        table.insert(key.into(), value.into());
    }

    /// Lower clamp for effective polling intervals.
    pub fn min_polling(&self) -> Result<Duration> {
        bound(self.polling.min.as_deref(), DEFAULT_MIN_POLLING)
    }

    /// Upper clamp for effective polling intervals.
    pub fn max_polling(&self) -> Result<Duration> {
        bound(self.polling.max.as_deref(), DEFAULT_MAX_POLLING)
    }
}

fn bound(value: Option<&str>, default: Duration) -> Result<Duration> {
    match value {
        Some(text) => Ok(parse_duration(text)?),
        None => Ok(default),
    }
}

/// One tenant's view: tenant value, then shared default, then builtin default.
#[derive(Debug, Clone)]
pub struct TenantView<'a> {
    config: &'a Config,
    tenant: String,
}

impl TenantView<'_> {
    pub fn name(&self) -> &str {
        &self.tenant
    }
}

impl TenantConfig for TenantView<'_> {
    fn get_string(&self, key: &str) -> Option<String> {
        self.config
            .tenants
            .get(&self.tenant)
            .and_then(|t| t.get(key))
            .or_else(|| self.config.defaults.get(key))
            .cloned()
            .or_else(|| builtin_default(key).map(str::to_string))
    }
}

fn builtin_default(key: &str) -> Option<&'static str> {
    match key {
        POLLING_TIME_KEY => Some(DEFAULT_POLLING_TIME),
        POLLING_OVERDUE_TIME_KEY => Some(DEFAULT_POLLING_OVERDUE_TIME),
        _ => None,
    }
}

/// Resolve QFILTER_ROOT using the standard resolution order.
fn resolve_root() -> Result<PathBuf> {
    // 1. Environment variable
    if let Ok(path) = std::env::var("QFILTER_ROOT") {
        return Ok(PathBuf::from(path));
    }

    // 2. XDG data directory (via directories crate)
    if let Some(proj_dirs) = ProjectDirs::from("", "", "qfilter") {
        return Ok(proj_dirs.data_dir().to_path_buf());
    }

    // 3. Fallback to ~/.local/share/qfilter
    let home = std::env::var("HOME")
        .map_err(|_| Error::Config("Could not determine home directory".to_string()))?;
    Ok(PathBuf::from(home).join(".local/share/qfilter"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_with_root() {
        let config = Config::with_root("/tmp/test-qfilter");
        assert_eq!(config.root, PathBuf::from("/tmp/test-qfilter"));
        assert_eq!(config.schema_path(), PathBuf::from("/tmp/test-qfilter/schema.toml"));
        assert_eq!(config.min_polling().unwrap(), DEFAULT_MIN_POLLING);
        assert_eq!(config.max_polling().unwrap(), DEFAULT_MAX_POLLING);
    }

    #[test]
    fn test_tenant_lookup_order() {
        let mut config = Config::with_root("/tmp/test-qfilter");
        config.set(None, POLLING_TIME_KEY, "00:10:00");
        config.set(Some("acme"), POLLING_TIME_KEY, "00:01:00");

        assert_eq!(config.tenant("acme").get_string(POLLING_TIME_KEY).as_deref(), Some("00:01:00"));
        assert_eq!(config.tenant("other").get_string(POLLING_TIME_KEY).as_deref(), Some("00:10:00"));
        assert_eq!(
            config.tenant("acme").get_string(POLLING_OVERDUE_TIME_KEY).as_deref(),
            Some(DEFAULT_POLLING_OVERDUE_TIME)
        );
        assert_eq!(config.tenant("acme").get_string("unknownKey"), None);
    }

    #[test]
    fn test_closure_as_tenant_config() {
        let lookup = |key: &str| (key == POLLING_TIME_KEY).then(|| "00:00:30".to_string());
        assert_eq!(lookup.get_string(POLLING_TIME_KEY).as_deref(), Some("00:00:30"));
        assert_eq!(lookup.get_string(POLLING_OVERDUE_TIME_KEY), None);
    }

    #[test]
    fn test_invalid_bounds() {
        let mut config = Config::with_root("/tmp/test-qfilter");
        config.polling.max = Some("soon".to_string());
        assert!(matches!(config.max_polling(), Err(Error::Interval(_))));
    }

    #[test]
    fn test_config_save_load() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("qf");

        let mut config = Config::with_root(&root);
        config.polling.min = Some("00:00:30".to_string());
        config.set(Some("acme"), POLLING_TIME_KEY, "00:01:00~20%");
        config.save().unwrap();

        let loaded = Config::load_from(&root).unwrap();
        assert_eq!(loaded.root, root);
        assert_eq!(loaded.polling, config.polling);
        assert_eq!(loaded.tenants, config.tenants);
        assert_eq!(loaded.min_polling().unwrap(), Duration::from_secs(30));
    }

    #[test]
    fn test_load_missing_is_default() {
        let tmp = TempDir::new().unwrap();
        let loaded = Config::load_from(tmp.path()).unwrap();
        assert!(loaded.tenants.is_empty());
    }

    #[test]
    fn test_load_rejects_bad_toml() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("config.toml"), "[polling\nmin = 1").unwrap();
        assert!(matches!(Config::load_from(tmp.path()), Err(Error::Config(_))));
    }
}
