//! Outgoing mail assembly
//!
//! A structured description of a message to send: recipient sets,
//! headers, a plain-text body, and attachments drawn from inline JSON
//! values or from files on disk. Serialization produces a
//! [`lettre::Message`] ready for submission.

use crate::error::Result;
use chrono::{DateTime, Local};
use lettre::Message;
use lettre::message::header::ContentType;
use lettre::message::{Attachment as AttachmentPart, Mailbox, MultiPart, SinglePart};
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::SystemTime;

static ADDRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}").expect("address pattern compiles")
});

static JSON_TYPE: LazyLock<ContentType> =
    LazyLock::new(|| ContentType::parse("application/json").expect("static content type"));

static OCTET_STREAM: LazyLock<ContentType> =
    LazyLock::new(|| ContentType::parse("application/octet-stream").expect("static content type"));

/// A recipient address set.
///
/// Explicit lists pass through verbatim. Free text is scanned for
/// address-shaped substrings, which are lowercased, deduplicated, and
/// sorted so the same text always yields the same set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recipients(Vec<String>);

impl Recipients {
    /// Extract every address-shaped substring from free text.
    #[must_use]
    pub fn scan(text: &str) -> Self {
        let found: BTreeSet<String> = ADDRESS_RE
            .find_iter(text)
            .map(|m| m.as_str().to_ascii_lowercase())
            .collect();
        Self(found.into_iter().collect())
    }

    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.0.iter()
    }
}

impl<'a> IntoIterator for &'a Recipients {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl From<&str> for Recipients {
    fn from(text: &str) -> Self {
        Self::scan(text)
    }
}

impl From<String> for Recipients {
    fn from(text: String) -> Self {
        Self::scan(&text)
    }
}

impl From<Vec<String>> for Recipients {
    fn from(addresses: Vec<String>) -> Self {
        Self(addresses)
    }
}

impl From<Vec<&str>> for Recipients {
    fn from(addresses: Vec<&str>) -> Self {
        Self(addresses.into_iter().map(str::to_string).collect())
    }
}

impl From<&[&str]> for Recipients {
    fn from(addresses: &[&str]) -> Self {
        Self(addresses.iter().map(|a| (*a).to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Recipients {
    fn from(addresses: [&str; N]) -> Self {
        Self(addresses.into_iter().map(str::to_string).collect())
    }
}

/// A structured outgoing message.
///
/// Construct with a struct literal over [`OutgoingMail::default`];
/// every field is optional except that submission requires at least
/// one recipient across to, cc, and bcc.
#[derive(Debug, Clone, Default)]
pub struct OutgoingMail {
    pub to: Recipients,
    pub cc: Recipients,
    pub bcc: Recipients,
    pub from: Option<String>,
    /// Header date; the compose time when unset.
    pub date: Option<DateTime<Local>>,
    pub subject: Option<String>,
    pub body: Option<String>,
    /// Each `(name, value)` becomes an attachment `<name>.json` holding
    /// the JSON serialization of the value.
    pub json_attachments: Vec<(String, Value)>,
    /// Each existing path is attached under its base name; paths that
    /// do not exist are skipped.
    pub file_attachments: Vec<PathBuf>,
}

impl OutgoingMail {
    /// Union of to, cc, and bcc, deduplicated and sorted: the envelope
    /// recipient set for submission.
    #[must_use]
    pub fn envelope_recipients(&self) -> Vec<String> {
        let union: BTreeSet<&String> = self
            .to
            .iter()
            .chain(self.cc.iter())
            .chain(self.bcc.iter())
            .collect();
        union.into_iter().cloned().collect()
    }

    /// Serialize into a transmittable message: From, To, CC, Date, and
    /// Subject headers, the plain-text body part, and one part per
    /// attachment. Bcc recipients never appear in the headers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Address`](crate::Error::Address) for recipient
    /// strings that are not single addresses,
    /// [`Error::Compose`](crate::Error::Compose) when the header set is
    /// incomplete (a sender and at least one recipient are required),
    /// and [`Error::Io`](crate::Error::Io) when reading a file
    /// attachment fails.
    pub fn to_message(&self) -> Result<Message> {
        self.message_with_fallback_sender(None)
    }

    /// Serialization used by submission: a session fills in its own
    /// username when the mail has no From of its own.
    pub(crate) fn message_with_fallback_sender(&self, fallback: Option<&str>) -> Result<Message> {
        let mut builder = Message::builder();
        if let Some(from) = self.from.as_deref().or(fallback) {
            builder = builder.from(from.parse::<Mailbox>()?);
        }
        for address in &self.to {
            builder = builder.to(address.parse::<Mailbox>()?);
        }
        for address in &self.cc {
            builder = builder.cc(address.parse::<Mailbox>()?);
        }
        builder = builder.date(SystemTime::from(self.date.unwrap_or_else(Local::now)));
        if let Some(subject) = &self.subject {
            builder = builder.subject(subject);
        }

        let mut multipart = MultiPart::mixed().build();
        if let Some(body) = &self.body {
            multipart = multipart.singlepart(SinglePart::plain(body.clone()));
        }
        for (name, value) in &self.json_attachments {
            multipart = multipart.singlepart(
                AttachmentPart::new(format!("{name}.json"))
                    .body(serde_json::to_vec(value)?, JSON_TYPE.clone()),
            );
        }
        for path in &self.file_attachments {
            if !path.is_file() {
                continue;
            }
            let name = path
                .file_name()
                .map_or_else(String::new, |n| n.to_string_lossy().into_owned());
            multipart = multipart
                .singlepart(AttachmentPart::new(name).body(std::fs::read(path)?, OCTET_STREAM.clone()));
        }

        Ok(builder.multipart(multipart)?)
    }
}
