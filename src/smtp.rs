//! SMTP submission
//!
//! Builds an authenticated [`AsyncSmtpTransport`] from an
//! [`SmtpConfig`] and pushes [`OutgoingMail`] through it. The
//! envelope is built here rather than taken from the rendered
//! headers, so hidden recipients receive the mail without ever
//! appearing in it.

use crate::config::SmtpConfig;
use crate::error::{Error, Result};
use crate::outgoing::OutgoingMail;
use lettre::address::Envelope;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

/// An authenticated SMTP submission client.
///
/// The connection itself is opened lazily, on the first send.
pub struct Smtp {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    username: String,
}

impl Smtp {
    /// Build a client for the configured server.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Smtp`] when the TLS parameters cannot be
    /// built.
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
            .port(config.port);
        if config.tls {
            let _ = rustls::crypto::ring::default_provider().install_default();
            let mut tls = TlsParameters::builder(config.host.clone());
            if config.danger_accept_invalid_certs {
                tls = tls
                    .dangerous_accept_invalid_certs(true)
                    .dangerous_accept_invalid_hostnames(true);
            }
            builder = builder.tls(Tls::Wrapper(tls.build()?));
        }
        let transport = builder
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .build();

        Ok(Self {
            transport,
            username: config.username.clone(),
        })
    }

    /// Build a client for Gmail's submission endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Smtp`] when the TLS parameters cannot be
    /// built.
    pub fn gmail(username: &str, password: &str) -> Result<Self> {
        Self::new(&SmtpConfig::gmail(username, password))
    }

    /// Send a composed mail.
    ///
    /// The envelope covers every recipient, hidden ones included. A
    /// mail without an explicit sender goes out from the session
    /// user.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoRecipients`] when nobody would receive the
    /// mail, [`Error::Address`] or [`Error::Compose`] when it cannot
    /// be rendered, and [`Error::Smtp`] when the server refuses it.
    pub async fn send(&self, mail: &OutgoingMail) -> Result<()> {
        let recipients = mail.envelope_recipients();
        if recipients.is_empty() {
            return Err(Error::NoRecipients);
        }

        let message = mail.message_with_fallback_sender(Some(&self.username))?;
        let from = mail
            .from
            .as_deref()
            .unwrap_or(&self.username)
            .parse::<Address>()?;
        let mut to = Vec::with_capacity(recipients.len());
        for recipient in &recipients {
            to.push(recipient.parse::<Address>()?);
        }
        let envelope = Envelope::new(Some(from), to)?;

        self.transport
            .send_raw(&envelope, &message.formatted())
            .await?;
        info!("Sent mail to {} recipients", recipients.len());
        Ok(())
    }

    /// Send a prebuilt [`Message`], with the envelope derived from
    /// its headers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Smtp`] when the server refuses it.
    pub async fn send_message(&self, message: Message) -> Result<()> {
        self.transport.send(message).await?;
        Ok(())
    }
}
