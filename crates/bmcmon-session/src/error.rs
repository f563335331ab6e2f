/// Errors produced by a live session.
///
/// Subcollectors treat `Timeout` as "the scrape is out of time" and everything
/// else as "the session or the BMC misbehaved"; the distinction drives the
/// power-draw capability probe (a BMC that silently drops an unknown command
/// looks like a timeout, not like an unsupported command).
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The deadline expired before a valid response arrived.
    #[error("command timed out")]
    Timeout,

    /// The BMC answered with a non-zero completion code.
    #[error("{command} failed with completion code {code:#04x}")]
    CompletionCode { command: &'static str, code: u8 },

    /// The response arrived but could not be decoded.
    #[error("malformed {command} response: {reason}")]
    Malformed {
        command: &'static str,
        reason: &'static str,
    },

    /// The sensor exists but its reading is flagged unavailable, typically
    /// because the machine is powered off.
    #[error("sensor reading unavailable")]
    ReadingUnavailable,

    /// A socket-level failure on the underlying UDP flow.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SessionError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, SessionError::Timeout)
    }
}

/// Errors produced by a session provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The provider can confidently say it has no credentials for the
    /// address. Callers do not branch on this, but metrics do.
    #[error("no credential found for {addr}")]
    CredentialNotFound { addr: String },

    /// Credential retrieval failed for any other reason.
    #[error("credential retrieval for {addr} failed: {reason}")]
    Retrieval { addr: String, reason: String },

    /// Credentials were found but the dial-and-authenticate step failed.
    #[error("session establishment with {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: SessionError,
    },
}
