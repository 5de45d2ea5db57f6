use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("secure storage unavailable: {0}")]
    Unavailable(String),
}

/// Opaque secure-storage capability. Implementations other than
/// [`MemoryVault`] must survive process restarts.
pub trait SecretVault: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, VaultError>;
    fn set(&self, key: &str, value: &str) -> Result<(), VaultError>;
    fn delete(&self, key: &str) -> Result<(), VaultError>;
}

/// OS keychain vault backed by the `keyring` crate.
pub struct KeyringVault {
    service: String,
}

impl KeyringVault {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry, VaultError> {
        keyring::Entry::new(&self.service, key)
            .map_err(|err| VaultError::Unavailable(err.to_string()))
    }
}

impl SecretVault for KeyringVault {
    fn get(&self, key: &str) -> Result<Option<String>, VaultError> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(VaultError::Unavailable(err.to_string())),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), VaultError> {
        self.entry(key)?
            .set_password(value)
            .map_err(|err| VaultError::Unavailable(err.to_string()))
    }

    fn delete(&self, key: &str) -> Result<(), VaultError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(VaultError::Unavailable(err.to_string())),
        }
    }
}

/// File-backed vault for hosts without a usable keychain. Secrets are kept
/// in a single JSON object written with owner-only permissions.
pub struct FileVault {
    path: PathBuf,
}

impl FileVault {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn read_map(&self) -> Result<HashMap<String, String>, VaultError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|err| VaultError::Unavailable(format!("corrupt vault file: {err}"))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(err) => Err(VaultError::Unavailable(err.to_string())),
        }
    }

    fn write_map(&self, map: &HashMap<String, String>) -> Result<(), VaultError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|err| VaultError::Unavailable(err.to_string()))?;
        }
        let serialized = serde_json::to_vec_pretty(map)
            .map_err(|err| VaultError::Unavailable(err.to_string()))?;
        fs::write(&self.path, serialized).map_err(|err| VaultError::Unavailable(err.to_string()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))
                .map_err(|err| VaultError::Unavailable(err.to_string()))?;
        }
        Ok(())
    }
}

impl SecretVault for FileVault {
    fn get(&self, key: &str) -> Result<Option<String>, VaultError> {
        Ok(self.read_map()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), VaultError> {
        let mut map = self.read_map()?;
        map.insert(key.to_string(), value.to_string());
        self.write_map(&map)
    }

    fn delete(&self, key: &str) -> Result<(), VaultError> {
        let mut map = self.read_map()?;
        if map.remove(key).is_some() {
            self.write_map(&map)?;
        }
        Ok(())
    }
}

/// In-memory vault for unit tests and the smoke harness.
#[derive(Default)]
pub struct MemoryVault {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretVault for MemoryVault {
    fn get(&self, key: &str) -> Result<Option<String>, VaultError> {
        Ok(self.values.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), VaultError> {
        self.values.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), VaultError> {
        self.values.write().remove(key);
        Ok(())
    }
}

/// Persisted token pair, present only while a session exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTokens {
    pub access: String,
    pub refresh: String,
}

/// Sole owner of the persisted token pair. Both keys are written and
/// deleted together; a lone token observed on read is treated as absent
/// and cleaned up.
#[derive(Clone)]
pub struct TokenStore {
    vault: Arc<dyn SecretVault>,
}

impl TokenStore {
    pub fn new(vault: Arc<dyn SecretVault>) -> Self {
        Self { vault }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryVault::default()))
    }

    pub fn access_token(&self) -> Result<Option<String>, VaultError> {
        Ok(self.load()?.map(|tokens| tokens.access))
    }

    pub fn refresh_token(&self) -> Result<Option<String>, VaultError> {
        Ok(self.load()?.map(|tokens| tokens.refresh))
    }

    pub fn load(&self) -> Result<Option<StoredTokens>, VaultError> {
        let access = self.vault.get(ACCESS_TOKEN_KEY)?;
        let refresh = self.vault.get(REFRESH_TOKEN_KEY)?;
        match (access, refresh) {
            (Some(access), Some(refresh)) => Ok(Some(StoredTokens { access, refresh })),
            (None, None) => Ok(None),
            _ => {
                warn!("token store held a lone token, clearing");
                self.clear()?;
                Ok(None)
            }
        }
    }

    pub fn store(&self, access: &str, refresh: &str) -> Result<(), VaultError> {
        let written = self
            .vault
            .set(ACCESS_TOKEN_KEY, access)
            .and_then(|()| self.vault.set(REFRESH_TOKEN_KEY, refresh));
        if let Err(err) = written {
            // A half-written pair is worse than no pair.
            let _ = self.clear();
            return Err(err);
        }
        Ok(())
    }

    pub fn clear(&self) -> Result<(), VaultError> {
        self.vault.delete(ACCESS_TOKEN_KEY)?;
        self.vault.delete(REFRESH_TOKEN_KEY)?;
        Ok(())
    }
}
