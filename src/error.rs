//! Error types for mailwrench

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config source error: {0}")]
    ConfigSource(String),

    #[error("No credential matched the query")]
    CredentialNotFound,

    #[error("Ambiguous credential query: {0} distinct matches")]
    AmbiguousCredential(usize),

    #[error("Login failed: {0}")]
    Login(String),

    #[error("Select failed: {0}")]
    Select(String),

    #[error("Search failed: {0}")]
    Search(String),

    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Store failed: {0}")]
    Store(String),

    #[error("List failed: {0}")]
    List(String),

    #[error("Folder discovery failed: {0}")]
    FolderDiscovery(String),

    #[error("IMAP error: {0}")]
    Imap(String),

    #[error("Email parsing error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Outgoing mail has no recipients")]
    NoRecipients,

    #[error("Address error: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("Message build error: {0}")]
    Compose(#[from] lettre::error::Error),

    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(String),
}

pub type Result<T> = std::result::Result<T, Error>;
