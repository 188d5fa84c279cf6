use parley_llm::ProviderError;
use snafu::Snafu;

use super::ids::SessionId;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SessionError {
    #[snafu(display("session '{session_id}' was not found"))]
    SessionNotFound {
        stage: &'static str,
        session_id: SessionId,
    },
    #[snafu(display("session '{session_id}' already has a generation request in flight"))]
    SessionBusy {
        stage: &'static str,
        session_id: SessionId,
    },
    #[snafu(display("provider '{provider_id}' failed for session '{session_id}': {source}"))]
    Provider {
        stage: &'static str,
        session_id: SessionId,
        provider_id: String,
        source: ProviderError,
    },
    #[snafu(display("id '{raw}' is invalid for {id_type}"))]
    InvalidId {
        stage: &'static str,
        id_type: &'static str,
        raw: String,
        source: uuid::Error,
    },
}

impl SessionError {
    /// Returns the provider failure when this error wraps one.
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            Self::Provider { source, .. } => Some(source),
            _ => None,
        }
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
