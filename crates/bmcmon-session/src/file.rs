//! A credentials retriever backed by a local YAML file, mapping each BMC
//! address to a username/password pair:
//!
//! ```yaml
//! 10.0.0.1:
//!   username: monitoring
//!   password: hunter2
//! ```
//!
//! The file is decoded strictly (unknown keys fail) and loaded once at
//! startup; adding a BMC means restarting the exporter.

use crate::error::ProviderError;
use crate::provider::{Credentials, CredentialsRetriever};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCredentials {
    username: String,
    password: String,
}

/// A static, in-memory address → credentials map.
pub struct FileRetriever {
    credentials: HashMap<String, Credentials>,
}

impl FileRetriever {
    /// Loads and validates the secrets file. Any invalid entry fails the
    /// whole load; a half-usable credentials map would only surface as
    /// confusing scrape failures much later.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("failed to read secrets file '{}': {}", path.display(), e)
        })?;
        let raw: HashMap<String, RawCredentials> = serde_yaml::from_str(&content).map_err(|e| {
            anyhow::anyhow!("failed to parse secrets file '{}': {}", path.display(), e)
        })?;

        let mut credentials = HashMap::with_capacity(raw.len());
        for (addr, entry) in raw {
            let parsed = Credentials::new(&entry.username, entry.password.as_bytes())
                .map_err(|e| anyhow::anyhow!("invalid credentials for '{addr}': {e}"))?;
            credentials.insert(addr, parsed);
        }
        Ok(Self { credentials })
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}

#[async_trait]
impl CredentialsRetriever for FileRetriever {
    async fn credentials(&self, addr: &str) -> Result<Credentials, ProviderError> {
        self.credentials
            .get(addr)
            .cloned()
            .ok_or_else(|| ProviderError::CredentialNotFound {
                addr: addr.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_secrets(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn loads_and_looks_up_credentials() {
        let file = write_secrets(
            "10.0.0.1:\n  username: admin\n  password: hunter2\n\
             10.0.0.2:\n  username: ro\n  password: \"01234567890123456789\"\n",
        );
        let retriever = FileRetriever::load(file.path()).unwrap();
        assert_eq!(retriever.len(), 2);

        let credentials = retriever.credentials("10.0.0.1").await.unwrap();
        assert_eq!(credentials.username, "admin");
        assert_eq!(credentials.password.len(), 16);

        let credentials = retriever.credentials("10.0.0.2").await.unwrap();
        assert_eq!(credentials.password.len(), 20);
    }

    #[tokio::test]
    async fn unknown_addr_is_credential_not_found() {
        let file = write_secrets("10.0.0.1:\n  username: admin\n  password: pw\n");
        let retriever = FileRetriever::load(file.path()).unwrap();
        let err = retriever.credentials("10.0.0.99").await.unwrap_err();
        assert!(matches!(
            err,
            ProviderError::CredentialNotFound { addr } if addr == "10.0.0.99"
        ));
    }

    #[test]
    fn unknown_keys_fail_strict_decoding() {
        let file = write_secrets(
            "10.0.0.1:\n  username: admin\n  password: pw\n  privilege: operator\n",
        );
        assert!(FileRetriever::load(file.path()).is_err());
    }

    #[test]
    fn invalid_username_fails_load() {
        let file = write_secrets("10.0.0.1:\n  username: ädmin\n  password: pw\n");
        assert!(FileRetriever::load(file.path()).is_err());
    }

    #[test]
    fn missing_file_fails_load() {
        assert!(FileRetriever::load(Path::new("/nonexistent/secrets.yml")).is_err());
    }
}
