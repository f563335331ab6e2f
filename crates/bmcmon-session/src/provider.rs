use crate::error::{ProviderError, SessionError};
use crate::session::Session;
use async_trait::async_trait;
use lazy_static::lazy_static;
use prometheus::{register_int_counter, IntCounter, Opts};

lazy_static! {
    static ref CREDENTIAL_FAILURES: IntCounter = register_int_counter!(Opts::new(
        "credential_failures_total",
        "The number of times a credentials provider failed to produce the \
         requested credential, for any reason.",
    )
    .namespace("bmc")
    .subsystem("provider"))
    .expect("credential_failures_total registration");
    static ref CREDENTIALS_MISSING: IntCounter = register_int_counter!(Opts::new(
        "credentials_missing_total",
        "The number of times a credentials provider has indicated the \
         credential for the target is unknown. Less than or equal to the \
         total number of credential provider failures.",
    )
    .namespace("bmc")
    .subsystem("provider"))
    .expect("credentials_missing_total registration");
}

/// A username and password pair giving access to a BMC.
///
/// Validated and padded at construction, then never mutated.
#[derive(Clone, Debug)]
pub struct Credentials {
    /// ASCII, at most 16 bytes, no NUL.
    pub username: String,

    /// The key for the user, stored on the managed system as either 16 bytes
    /// (preserving v1.5 log-in compatibility) or 20 bytes of uninterpreted
    /// data. Shorter passwords are padded with 0x00 at load.
    pub password: Vec<u8>,
}

impl Credentials {
    pub fn new(username: &str, password: &[u8]) -> anyhow::Result<Self> {
        if !username.is_ascii() || username.contains('\0') {
            anyhow::bail!("username must be ASCII without NUL bytes");
        }
        if username.len() > 16 {
            anyhow::bail!("username exceeds 16 bytes");
        }
        if password.len() > 20 {
            anyhow::bail!("password exceeds 20 bytes");
        }
        let mut padded = password.to_vec();
        let target = if padded.len() <= 16 { 16 } else { 20 };
        padded.resize(target, 0x00);
        Ok(Self {
            username: username.to_string(),
            password: padded,
        })
    }
}

/// Finds the username and password for a BMC. This is usually all that is
/// needed to establish a session, and is simpler to implement than
/// [`Provider`]; compose one with a [`Connector`] via [`CredentialsProvider`].
#[async_trait]
pub trait CredentialsRetriever: Send + Sync {
    /// Returns the credentials for the BMC at the supplied address. This
    /// could be as simple as a map lookup, or it could query a remote
    /// service.
    async fn credentials(&self, addr: &str) -> Result<Credentials, ProviderError>;
}

/// Tears down the transport backing a session. Invoked after the session's
/// own close attempt, regardless of whether that attempt succeeded, so a
/// stray response from a dead session can never be read by a new one.
pub trait Closer: Send {
    fn close(&mut self);
}

/// A session plus the closer for its underlying transport. Both halves are
/// handed to the collector together and released together.
pub struct SessionHandle {
    pub session: Box<dyn Session>,
    pub closer: Box<dyn Closer>,
}

/// The dial-and-authenticate step: given an address and credentials, open a
/// transport and establish an authenticated session over it.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        addr: &str,
        credentials: &Credentials,
    ) -> Result<SessionHandle, SessionError>;
}

/// Establishes sessions with BMCs. This exists to abstract the rest of the
/// exporter away from IPMI versions, secrets and algorithms.
///
/// Implementations must be safe for unbounded concurrent use across distinct
/// addresses; the caller guarantees a single address is never requested
/// concurrently, and endeavours to close an address's previous session
/// before asking for a new one. Callers do not retry: a provider that wants
/// retries does them itself, where it can reuse work between attempts.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Opens a new session with the BMC at `addr` — the raw `target` string
    /// from the scraper, by convention a bare IP address with an optional
    /// port. Errors are logged by the caller together with the address.
    async fn session(&self, addr: &str) -> Result<SessionHandle, ProviderError>;
}

/// A [`Provider`] composed from a [`CredentialsRetriever`] and a
/// [`Connector`]. The retriever and the connector are separate values rather
/// than a cyclic pair so either can be swapped independently.
pub struct CredentialsProvider<R, C> {
    retriever: R,
    connector: C,
}

impl<R, C> CredentialsProvider<R, C> {
    pub fn new(retriever: R, connector: C) -> Self {
        Self {
            retriever,
            connector,
        }
    }
}

#[async_trait]
impl<R, C> Provider for CredentialsProvider<R, C>
where
    R: CredentialsRetriever,
    C: Connector,
{
    async fn session(&self, addr: &str) -> Result<SessionHandle, ProviderError> {
        let credentials = match self.retriever.credentials(addr).await {
            Ok(credentials) => credentials,
            Err(e) => {
                CREDENTIAL_FAILURES.inc();
                if matches!(e, ProviderError::CredentialNotFound { .. }) {
                    CREDENTIALS_MISSING.inc();
                }
                return Err(e);
            }
        };
        self.connector
            .connect(addr, &credentials)
            .await
            .map_err(|source| ProviderError::Connect {
                addr: addr.to_string(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_password_pads_to_16() {
        let credentials = Credentials::new("admin", b"hunter2").unwrap();
        assert_eq!(credentials.password.len(), 16);
        assert_eq!(&credentials.password[..7], b"hunter2");
        assert!(credentials.password[7..].iter().all(|&b| b == 0x00));
    }

    #[test]
    fn long_password_pads_to_20() {
        let credentials = Credentials::new("admin", b"0123456789abcdefg").unwrap();
        assert_eq!(credentials.password.len(), 20);
    }

    #[test]
    fn oversized_password_rejected() {
        assert!(Credentials::new("admin", &[0x41; 21]).is_err());
    }

    #[test]
    fn non_ascii_username_rejected() {
        assert!(Credentials::new("ädmin", b"pw").is_err());
    }

    #[test]
    fn oversized_username_rejected() {
        assert!(Credentials::new("a-very-long-username", b"pw").is_err());
    }
}
