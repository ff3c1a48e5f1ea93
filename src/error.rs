//! Crate-wide error type.
//!
//! Per spec §7, almost nothing in this crate is a fatal error: source load
//! failures, transient activation aborts, not-ready seeks, and duplicate
//! playlist inserts are all recoverable and surface as data (`PlaybackState`
//! fields, log lines, typed events) rather than `Result::Err`. [`Error`] exists
//! for the small set of conditions that genuinely cannot be worked around —
//! chiefly a transport or output capability that cannot be constructed.

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level crate error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The transport could not be opened or is permanently unavailable.
    #[error("transport unavailable: {0}")]
    Transport(String),

    /// The output capability could not be initialized.
    #[error("output capability unavailable: {0}")]
    OutputInit(String),

    /// An envelope could not be decoded; per spec §6 unknown `type` values are
    /// ignored rather than erroring, so this is reserved for malformed wire
    /// bytes (not simply an unrecognized `type`).
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Generic error with added context.
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn output_init(message: impl Into<String>) -> Self {
        Self::OutputInit(message.into())
    }

    pub fn context(self, ctx: impl Into<String>) -> Self {
        Self::WithContext {
            context: ctx.into(),
            source: Box::new(self),
        }
    }
}

/// Extension trait for adding context to `Result`s.
pub trait ResultExt<T> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(ctx))
    }
}
