//! IMAP and SMTP connection configuration

use crate::error::{Error, Result};
use crate::fetchmail::Credential;
use std::env;

/// IMAP connection configuration
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Skip TLS certificate verification. Only for servers with
    /// self-signed certificates, such as test fixtures.
    pub danger_accept_invalid_certs: bool,
}

impl ImapConfig {
    /// Load IMAP configuration from environment variables
    ///
    /// Reads from `.env` file if present. Required variables:
    /// - `MAIL_IMAP_USERNAME`
    /// - `MAIL_IMAP_PASSWORD`
    ///
    /// Optional (with defaults):
    /// - `MAIL_IMAP_HOST` (default: `imap.gmail.com`)
    /// - `MAIL_IMAP_PORT` (default: `993`)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when a required variable is missing or
    /// the port does not parse.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            host: env::var("MAIL_IMAP_HOST").unwrap_or_else(|_| "imap.gmail.com".to_string()),
            port: env::var("MAIL_IMAP_PORT")
                .unwrap_or_else(|_| "993".to_string())
                .parse()
                .map_err(|e| Error::Config(format!("Invalid MAIL_IMAP_PORT: {e}")))?,
            username: env::var("MAIL_IMAP_USERNAME")
                .map_err(|_| Error::Config("MAIL_IMAP_USERNAME not set".into()))?,
            password: env::var("MAIL_IMAP_PASSWORD")
                .map_err(|_| Error::Config("MAIL_IMAP_PASSWORD not set".into()))?,
            danger_accept_invalid_certs: false,
        })
    }
}

impl TryFrom<&Credential> for ImapConfig {
    type Error = Error;

    /// A resolved credential carries no port when its protocol is not in
    /// the port table; such a credential cannot open a session.
    fn try_from(credential: &Credential) -> Result<Self> {
        let port = credential.port.ok_or_else(|| {
            Error::Config(format!(
                "No port resolved for {} on {}",
                credential.user, credential.host
            ))
        })?;
        Ok(Self {
            host: credential.host.clone(),
            port,
            username: credential.user.clone(),
            password: credential.password.clone(),
            danger_accept_invalid_certs: false,
        })
    }
}

/// SMTP submission configuration
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Wrap the connection in TLS from the first byte. Disable only for
    /// plaintext test servers.
    pub tls: bool,
    /// Skip TLS certificate verification. Only for servers with
    /// self-signed certificates, such as test fixtures.
    pub danger_accept_invalid_certs: bool,
}

impl SmtpConfig {
    /// Configuration for GMail's submission endpoint.
    #[must_use]
    pub fn gmail(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            host: "smtp.gmail.com".to_string(),
            port: 465,
            username: username.into(),
            password: password.into(),
            tls: true,
            danger_accept_invalid_certs: false,
        }
    }

    /// Load SMTP configuration from environment variables
    ///
    /// Reads from `.env` file if present. Required variables:
    /// - `MAIL_SMTP_USERNAME`
    /// - `MAIL_SMTP_PASSWORD`
    ///
    /// Optional (with defaults):
    /// - `MAIL_SMTP_HOST` (default: `smtp.gmail.com`)
    /// - `MAIL_SMTP_PORT` (default: `465`)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when a required variable is missing or
    /// the port does not parse.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            host: env::var("MAIL_SMTP_HOST").unwrap_or_else(|_| "smtp.gmail.com".to_string()),
            port: env::var("MAIL_SMTP_PORT")
                .unwrap_or_else(|_| "465".to_string())
                .parse()
                .map_err(|e| Error::Config(format!("Invalid MAIL_SMTP_PORT: {e}")))?,
            username: env::var("MAIL_SMTP_USERNAME")
                .map_err(|_| Error::Config("MAIL_SMTP_USERNAME not set".into()))?,
            password: env::var("MAIL_SMTP_PASSWORD")
                .map_err(|_| Error::Config("MAIL_SMTP_PASSWORD not set".into()))?,
            tls: true,
            danger_accept_invalid_certs: false,
        })
    }
}
