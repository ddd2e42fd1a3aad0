//! Mail account automation over IMAP and SMTP
//!
//! Resolves account credentials from fetchmail's configuration dump,
//! drives authenticated IMAP sessions over implicit TLS, and submits
//! composed mail over SMTP. [`GMail`] specializes the generic
//! session for Gmail: searches in Gmail's own query syntax, All Mail
//! discovery, and label-based deletion.
//!
//! Fetched messages decode into a body and typed attachments via
//! [`Mail`]; searches run eagerly but decode lazily, one fetch per
//! consumed match.

mod config;
mod configdump;
mod connection;
mod error;
mod fetchmail;
mod flag;
mod folder;
mod gmail;
mod message;
mod outgoing;
mod session;
mod smtp;

pub use config::{ImapConfig, SmtpConfig};
pub use configdump::{ConfigDump, ServerGroup, ServiceSpec, UserEntry};
pub use error::{Error, Result};
pub use fetchmail::{Account, Credential, FetchMail};
pub use flag::Flag;
pub use folder::Folder;
pub use gmail::GMail;
pub use message::{Attachment, Content, Mail};
pub use outgoing::{OutgoingMail, Recipients};
pub use session::{FolderListing, Imap, SearchResults};
pub use smtp::Smtp;
