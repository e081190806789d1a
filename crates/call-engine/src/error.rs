use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to bind socket on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn child process {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to initialize the store's tokio runtime: {0}")]
    RuntimeInit(#[source] std::io::Error),

    #[error("shared-memory channel setup failed: {0}")]
    Media(#[from] whisper_media_core::MediaError),

    #[error("external store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("registration rendezvous timed out after {0:?}")]
    RegistrationTimeout(std::time::Duration),

    #[error("no active call with id {0}")]
    UnknownCall(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
