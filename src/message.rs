//! Decoded mail messages
//!
//! Turns a raw retrieved message into a plain-text body and its
//! attachments. The body is the first plain-text part that is not an
//! attachment; attachments are the leaf parts that declare a
//! disposition and a filename. Attachment payloads stay raw bytes
//! until [`Attachment::content`] types them by file extension.

use crate::error::{Error, Result};
use mailparse::{DispositionType, MailHeaderMap, ParsedMail};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// A message retrieved from a server, decoded into body and
/// attachments.
///
/// The id is the server-assigned message identifier; freshly composed
/// mail that never came from a session has none.
#[derive(Debug, Clone)]
pub struct Mail {
    pub id: Option<u32>,
    pub body: Option<String>,
    pub attachments: Vec<Attachment>,
}

impl Mail {
    /// Decode a raw RFC 822 message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if the raw bytes do not parse as a
    /// message or a matched part's payload does not decode.
    pub fn parse(raw: &[u8], id: Option<u32>) -> Result<Self> {
        let parsed = mailparse::parse_mail(raw).map_err(|e| Error::Parse(e.to_string()))?;
        Ok(Self {
            id,
            body: extract_body(&parsed)?,
            attachments: extract_attachments(&parsed)?,
        })
    }
}

/// The body is the first qualifying plain-text part. A single-part
/// message qualifies on content type alone; inside a multipart
/// message, parts marked as attachments are skipped.
fn extract_body(root: &ParsedMail<'_>) -> Result<Option<String>> {
    if root.subparts.is_empty() {
        if is_plain_text(root) {
            return decode_text(root).map(Some);
        }
        return Ok(None);
    }
    walk_for_body(root)
}

fn walk_for_body(part: &ParsedMail<'_>) -> Result<Option<String>> {
    for sub in &part.subparts {
        if sub.subparts.is_empty() {
            if is_plain_text(sub)
                && sub.get_content_disposition().disposition != DispositionType::Attachment
            {
                return decode_text(sub).map(Some);
            }
        } else if let Some(found) = walk_for_body(sub)? {
            return Ok(Some(found));
        }
    }
    Ok(None)
}

fn is_plain_text(part: &ParsedMail<'_>) -> bool {
    part.ctype.mimetype.eq_ignore_ascii_case("text/plain")
}

fn decode_text(part: &ParsedMail<'_>) -> Result<String> {
    let body = part.get_body().map_err(|e| Error::Parse(e.to_string()))?;
    Ok(body.trim_end().to_string())
}

/// A leaf part is an attachment when it declares a disposition header
/// and carries a filename, either as a disposition parameter or as a
/// content-type `name`. Order of appearance is preserved; duplicate
/// filenames are kept.
fn extract_attachments(root: &ParsedMail<'_>) -> Result<Vec<Attachment>> {
    fn collect(part: &ParsedMail<'_>, found: &mut Vec<Attachment>) -> Result<()> {
        if !part.subparts.is_empty() {
            for sub in &part.subparts {
                collect(sub, found)?;
            }
            return Ok(());
        }
        if part
            .headers
            .get_first_value("Content-Disposition")
            .is_none()
        {
            return Ok(());
        }
        let disposition = part.get_content_disposition();
        let name = disposition
            .params
            .get("filename")
            .or_else(|| part.ctype.params.get("name"));
        if let Some(name) = name {
            let bytes = part.get_body_raw().map_err(|e| Error::Parse(e.to_string()))?;
            found.push(Attachment::new(decode_filename(name), bytes));
        }
        Ok(())
    }

    let mut found = Vec::new();
    collect(root, &mut found)?;
    Ok(found)
}

/// Filenames may arrive as RFC 2047 encoded words. Decode any that
/// slipped through header parsing; plain names pass unchanged.
fn decode_filename(raw: &str) -> String {
    if raw.contains("=?")
        && let Ok((header, _)) = mailparse::parse_header(format!("Name: {raw}").as_bytes())
    {
        return header.get_value();
    }
    raw.to_string()
}

/// One decoded attachment: a filename and its raw payload.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub name: String,
    pub bytes: Vec<u8>,
    json: OnceLock<Value>,
}

impl Attachment {
    #[must_use]
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
            json: OnceLock::new(),
        }
    }

    /// Typed view of the payload, decided by the filename extension.
    /// `.json` attachments parse into a structured value, computed once
    /// per instance; everything else stays raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if a `.json` payload does not parse.
    pub fn content(&self) -> Result<Content<'_>> {
        if !self.is_json() {
            return Ok(Content::Bytes(&self.bytes));
        }
        if let Some(value) = self.json.get() {
            return Ok(Content::Json(value));
        }
        let parsed: Value = serde_json::from_slice(&self.bytes)?;
        Ok(Content::Json(self.json.get_or_init(|| parsed)))
    }

    /// Write the payload to `target` and return the path written.
    ///
    /// A target that is an existing directory, or ends in a path
    /// separator, receives the file under the attachment's own name;
    /// any other target is written exactly. Missing parent directories
    /// are created.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] on filesystem failures.
    pub fn save(&self, target: impl AsRef<Path>) -> Result<PathBuf> {
        let target = target.as_ref();
        let path = if is_dir_target(target) {
            target.join(&self.name)
        } else {
            target.to_path_buf()
        };
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, &self.bytes)?;
        Ok(path)
    }

    fn is_json(&self) -> bool {
        Path::new(&self.name)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
    }
}

fn is_dir_target(path: &Path) -> bool {
    path.is_dir() || path.to_string_lossy().ends_with(std::path::MAIN_SEPARATOR)
}

/// Attachment payload, typed by file extension.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Content<'a> {
    Json(&'a Value),
    Bytes(&'a [u8]),
}
