use thiserror::Error;

#[derive(Error, Debug)]
pub enum TapError {
    #[error("SHA256 mismatch for {name}\nExpected: {expected}\n  Actual: {actual}")]
    ChecksumMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("No available formula with the name \"{name}\"{}", suggestion_suffix(.suggestion))]
    FormulaNotFound {
        name: String,
        suggestion: Option<String>,
    },

    #[error("Invalid formula {0}: {1}")]
    InvalidFormula(String, String),

    #[error("{0}")]
    UnsupportedPlatform(String),

    #[error("Test failed for {name}: `{invocation}` {status}")]
    SmokeTestFailed {
        name: String,
        invocation: String,
        status: String,
    },

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Failed to parse formula: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Error: {0}")]
    Other(#[from] anyhow::Error),
}

fn suggestion_suffix(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(name) => format!(". Did you mean {}?", name),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, TapError>;
