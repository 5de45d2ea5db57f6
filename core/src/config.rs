use crate::vault::{FileVault, KeyringVault, SecretVault};
use directories::BaseDirs;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use std::{env, fs};
use tracing::warn;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

const KEYRING_SERVICE: &str = "cinefluent";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("configuration invalid: {0}")]
    Invalid(String),
}

/// Which secret vault backs the token store.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    #[default]
    Keyring,
    File,
}

impl StorageKind {
    pub fn open_vault(self) -> Arc<dyn SecretVault> {
        match self {
            Self::Keyring => Arc::new(KeyringVault::new(KEYRING_SERVICE)),
            Self::File => Arc::new(FileVault::new(data_dir().join("vault.json"))),
        }
    }
}

impl std::str::FromStr for StorageKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "keyring" => Ok(Self::Keyring),
            "file" => Ok(Self::File),
            other => Err(ConfigError::Invalid(format!(
                "unknown storage backend `{other}`, expected `keyring` or `file`"
            ))),
        }
    }
}

/// Pre-network password checks for registration. Deployments disagree on
/// whether strength is validated client-side, so the rules are
/// configuration rather than code; `Server` defers everything to the
/// backend.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PasswordPolicy {
    #[default]
    Server,
    Local(LocalPasswordRules),
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct LocalPasswordRules {
    #[serde(default = "LocalPasswordRules::default_min_length")]
    pub min_length: usize,
    #[serde(default = "LocalPasswordRules::default_flag")]
    pub require_uppercase: bool,
    #[serde(default = "LocalPasswordRules::default_flag")]
    pub require_lowercase: bool,
    #[serde(default = "LocalPasswordRules::default_flag")]
    pub require_digit: bool,
}

impl LocalPasswordRules {
    fn default_min_length() -> usize {
        8
    }

    fn default_flag() -> bool {
        true
    }
}

impl Default for LocalPasswordRules {
    fn default() -> Self {
        Self {
            min_length: Self::default_min_length(),
            require_uppercase: true,
            require_lowercase: true,
            require_digit: true,
        }
    }
}

impl PasswordPolicy {
    pub fn validate(&self, password: &str) -> Result<(), String> {
        let PasswordPolicy::Local(rules) = self else {
            return Ok(());
        };
        if password.chars().count() < rules.min_length {
            return Err(format!(
                "Password must be at least {} characters long",
                rules.min_length
            ));
        }
        if rules.require_uppercase && !password.chars().any(|c| c.is_ascii_uppercase()) {
            return Err("Password must contain at least one uppercase letter".to_string());
        }
        if rules.require_lowercase && !password.chars().any(|c| c.is_ascii_lowercase()) {
            return Err("Password must contain at least one lowercase letter".to_string());
        }
        if rules.require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
            return Err("Password must contain at least one digit".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: Url,
    pub timeout: Duration,
    pub storage: StorageKind,
    pub password_policy: PasswordPolicy,
}

impl ClientConfig {
    /// Resolve configuration from the YAML file (when present) and
    /// environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let file = match locate_config_file() {
            Some(path) => read_config_file(&path)?,
            None => ConfigFile::default(),
        };
        Self::resolve(file)
    }

    pub fn for_base_url(raw: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: normalize_base_url(raw)?,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            storage: StorageKind::default(),
            password_policy: PasswordPolicy::default(),
        })
    }

    pub fn with_base_url(mut self, raw: &str) -> Result<Self, ConfigError> {
        self.base_url = normalize_base_url(raw)?;
        Ok(self)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn resolve(file: ConfigFile) -> Result<Self, ConfigError> {
        let api = file.api.unwrap_or_default();
        let raw_url = env::var("CINEFLUENT_API_URL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .or(api.base_url)
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let base_url = normalize_base_url(&raw_url)?;
        let timeout = Duration::from_secs(api.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS));

        let storage = match env::var("CINEFLUENT_STORAGE") {
            Ok(value) => match value.parse() {
                Ok(kind) => kind,
                Err(err) => {
                    warn!(%err, "ignoring CINEFLUENT_STORAGE");
                    file.storage.unwrap_or_default()
                }
            },
            Err(_) => file.storage.unwrap_or_default(),
        };

        Ok(Self {
            base_url,
            timeout,
            storage,
            password_policy: file.password_policy.unwrap_or_default(),
        })
    }
}

/// Directory holding mutable client state; the file vault lives here.
pub fn data_dir() -> PathBuf {
    if let Ok(home) = env::var("CINEFLUENT_HOME") {
        return PathBuf::from(home);
    }
    BaseDirs::new()
        .map(|base| base.config_dir().join("cinefluent"))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn normalize_base_url(raw: &str) -> Result<Url, ConfigError> {
    let mut value = raw.trim().to_string();
    // A trailing slash keeps Url::join from eating the last path segment.
    if !value.ends_with('/') {
        value.push('/');
    }
    Url::parse(&value).map_err(|err| ConfigError::Invalid(format!("invalid base url {raw}: {err}")))
}

fn read_config_file(path: &PathBuf) -> Result<ConfigFile, ConfigError> {
    let contents = fs::read_to_string(path)
        .map_err(|err| ConfigError::Invalid(format!("failed to read {}: {err}", path.display())))?;
    serde_yaml::from_str(&contents)
        .map_err(|err| ConfigError::Invalid(format!("invalid cinefluent.yaml: {err}")))
}

fn locate_config_file() -> Option<PathBuf> {
    config_candidates().into_iter().find(|path| path.exists())
}

fn config_candidates() -> Vec<PathBuf> {
    if let Ok(home) = env::var("CINEFLUENT_HOME") {
        return vec![PathBuf::from(home).join("cinefluent.yaml")];
    }
    let mut paths = Vec::new();
    if let Some(base) = BaseDirs::new() {
        let config_dir = base.config_dir().join("cinefluent");
        paths.push(config_dir.join("cinefluent.yaml"));
        paths.push(config_dir.join("cinefluent.yml"));
        let home_dir = base.home_dir();
        paths.push(home_dir.join(".cinefluent").join("cinefluent.yaml"));
        paths.push(home_dir.join(".cinefluent").join("cinefluent.yml"));
    } else {
        paths.push(PathBuf::from("cinefluent.yaml"));
        paths.push(PathBuf::from("cinefluent.yml"));
    }
    paths
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    api: Option<ApiSection>,
    storage: Option<StorageKind>,
    password_policy: Option<PasswordPolicy>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiSection {
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    timeout_secs: Option<u64>,
}
