use thiserror::Error;

/// Error kinds surfaced by the pipeline and its collaborators.
///
/// Recovery policy lives with the caller: stages record recoverable kinds in
/// `Context.errors` and keep going, while `FloodWait` always stops the run.
#[derive(Debug, Error)]
pub enum Error {
    #[error("source fetch failed: {0}")]
    SourceFetch(String),

    #[error("ai provider error: {0}")]
    AiProvider(String),

    #[error("media exceeds size limit: {filename} ({size_mb}MB)")]
    MediaOversize { filename: String, size_mb: f64 },

    #[error("invalid regex: {0}")]
    Regex(String),

    #[error("target send failed: {0}")]
    TargetSend(String),

    #[error("flood wait: retry in {seconds}s")]
    FloodWait { seconds: u64 },

    #[error("push notifier error: {0}")]
    PushNotifier(String),

    #[error("rule validation error: {0}")]
    RuleValidation(String),

    #[error("entry store i/o error: {0}")]
    EntryStoreIo(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("operation not supported by this client: {0}")]
    Unsupported(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Recoverable errors are recorded in the pipeline context and the run
    /// continues; everything else aborts the remaining stages.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Error::FloodWait { .. } | Error::Database(_))
    }
}
