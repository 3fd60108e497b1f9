use tape_api::LinkError;
use tape_engine::TapeError;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("{0}")]
    Tape(#[from] TapeError),

    #[error("broker: {0}")]
    Link(#[from] LinkError),

    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),
}

impl CliError {
    pub fn config(context: &'static str, detail: impl Into<String>) -> Self {
        CliError::Config { context, detail: detail.into() }
    }
}
