use std::{fmt, path::PathBuf};

pub type Result<T> = std::result::Result<T, Error>;

/// The step of a pooled write that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    DedupCheck,
    Persist,
    ReplaceAttr,
    Delete,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::DedupCheck => "dedup check",
            Phase::Persist => "persist",
            Phase::ReplaceAttr => "replace attr",
            Phase::Delete => "delete",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("{phase} failed for entry {entry}: {source}")]
    Store {
        phase: Phase,
        entry: String,
        #[source]
        source: Box<Error>,
    },

    #[error("plugin {plugin} failed for entry {entry}: {source}")]
    Plugin {
        plugin: &'static str,
        entry: String,
        #[source]
        source: Box<Error>,
    },

    #[error("markup error: {0}")]
    Markup(String),

    #[error("context timeout")]
    Timeout,

    #[error("admission pool is closed")]
    PoolClosed,

    #[error("worker task failed: {0}")]
    Worker(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),
}

impl Error {
    /// Wrap a store failure with the phase and entry it happened in.
    pub fn in_phase(self, phase: Phase, entry: impl Into<String>) -> Self {
        Error::Store {
            phase,
            entry: entry.into(),
            source: Box::new(self),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}
