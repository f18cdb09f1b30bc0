// src/error.rs
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FieldError {
    #[error("HTTP request failed: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("URL parsing failed: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("JSON processing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Base64 decoding failed: {0}")]
    Base64Error(#[from] base64::DecodeError),

    #[error("Image processing failed: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    #[error("Selector did not match any elements: {0}")]
    NoMatch(String),

    #[error("Element is not hosted by a form: {0}")]
    MissingForm(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid data URL: {0}")]
    InvalidDataUrl(String),

    #[error("Invalid crop region: {0}")]
    InvalidCrop(String),

    #[error("An upload is already in progress")]
    AlreadyUploading,

    #[error("Unknown field: {0}")]
    UnknownField(usize),

    #[error("Upload transport failed: {0}")]
    TransportError(String),
}
