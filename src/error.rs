// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Error types for STIGQter

use thiserror::Error;

/// Result type alias for STIGQter operations
pub type Result<T> = std::result::Result<T, StigqterError>;

/// STIGQter error types
#[derive(Error, Debug)]
pub enum StigqterError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("Download error: {0}")]
    Download(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Malformed document: {0}")]
    Document(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Spreadsheet error: {0}")]
    Spreadsheet(String),

    #[error("Invalid control: {0}")]
    InvalidControl(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("{0} was not found")]
    NotFound(String),

    #[error("{0}")]
    InUse(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{0} lock poisoned")]
    Poisoned(String),

    #[error("Worker failed: {0}")]
    Worker(String),
}
