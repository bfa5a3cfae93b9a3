use thiserror::Error;

#[derive(Error, Debug)]
pub enum TreeForgeError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV Error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON Parsing Error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Invalid Tree: {0}")]
    Topology(String),

    #[error("Newick Parse Error at byte {pos}: {msg}")]
    Newick { pos: usize, msg: String },

    #[error("Alignment Error: {0}")]
    Alignment(String),

    #[error("Resource Exhausted: {0}")]
    Resource(String),
}

pub type TfResult<T> = Result<T, TreeForgeError>;
