use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncodingError {
    #[error("Invalid base64 input: {0}")]
    InvalidBase64(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Decoded bytes are not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Invalid identifier input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, EncodingError>;
