use std::path::PathBuf;

use tape_api::LinkError;

#[derive(Debug, thiserror::Error)]
pub enum TapeError {
    #[error("config error: {0}")]
    Config(String),

    #[error("already recording")]
    AlreadyRecording,

    #[error("not recording")]
    NotRecording,

    #[error("log file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed log row {row}: {detail}")]
    Parse { row: u64, detail: String },

    #[error("payload codec: {0}")]
    Codec(String),

    #[error("broker link: {0}")]
    Link(#[from] LinkError),
}

impl TapeError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TapeError::Io { path: path.into(), source }
    }

    pub(crate) fn parse(row: u64, detail: impl Into<String>) -> Self {
        TapeError::Parse { row, detail: detail.into() }
    }

    /// State errors (`start`/`stop` called at the wrong time) leave the
    /// recorder usable.
    pub fn is_state_error(&self) -> bool {
        matches!(self, TapeError::AlreadyRecording | TapeError::NotRecording)
    }
}
