//! Decoding of `fetchmail --configdump` output
//!
//! fetchmail dumps its account configuration as a Python module that
//! assigns one big dict literal to a `fetchmailrc` variable. This module
//! runs the dump subprocess, rewrites the Python literal into strict
//! JSON, and decodes the parts of the schema the credential engine
//! needs. Unknown keys are ignored.

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer};
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

/// Decoded `--configdump` output.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigDump {
    pub servers: Vec<ServerGroup>,
}

/// One `poll` block: a server plus the users fetched from it.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerGroup {
    pub pollname: String,
    pub protocol: String,
    #[serde(default)]
    pub service: Option<ServiceSpec>,
    pub users: Vec<UserEntry>,
}

/// The `service` value of a server group: a port number, or a named
/// service such as `"imaps"`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ServiceSpec {
    Port(u16),
    Name(String),
}

impl ServiceSpec {
    /// The numeric port, if the service is a number or an all-digit
    /// string.
    #[must_use]
    pub fn as_port(&self) -> Option<u16> {
        match self {
            Self::Port(port) => Some(*port),
            Self::Name(name) => {
                if !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit()) {
                    name.parse().ok()
                } else {
                    None
                }
            }
        }
    }
}

/// One user entry inside a server group.
#[derive(Debug, Clone, Deserialize)]
pub struct UserEntry {
    pub remote: String,
    pub password: String,
    #[serde(default, deserialize_with = "bool_from_any")]
    pub ssl: bool,
    #[serde(default)]
    pub localnames: Vec<String>,
    #[serde(default)]
    pub mailboxes: Vec<String>,
}

/// fetchmail historically emitted ssl as 0/1.
fn bool_from_any<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum AnyBool {
        Bool(bool),
        Int(i64),
    }

    Ok(match AnyBool::deserialize(deserializer)? {
        AnyBool::Bool(b) => b,
        AnyBool::Int(n) => n != 0,
    })
}

/// Run `fetchmail --configdump` and decode its output.
///
/// When `rcfile` is `None`, fetchmail uses its own default rc lookup.
///
/// # Errors
///
/// Returns [`Error::ConfigSource`] if fetchmail cannot be run, exits
/// with a failure status, or emits a dump that does not decode.
pub async fn load(rcfile: Option<&Path>) -> Result<ConfigDump> {
    let mut cmd = Command::new("fetchmail");
    cmd.arg("--configdump");
    if let Some(path) = rcfile {
        cmd.arg("--fetchmailrc").arg(path);
    }
    debug!("Running fetchmail --configdump");

    let output = cmd
        .output()
        .await
        .map_err(|e| Error::ConfigSource(format!("Failed to run fetchmail: {e}")))?;
    if !output.status.success() {
        return Err(Error::ConfigSource(format!(
            "fetchmail exited with {}",
            output.status
        )));
    }

    parse_dump(&String::from_utf8_lossy(&output.stdout))
}

/// Decode the text of a `--configdump` run.
///
/// # Errors
///
/// Returns [`Error::ConfigSource`] if the dump has no `fetchmailrc`
/// assignment or does not normalize into the expected schema.
pub fn parse_dump(dump: &str) -> Result<ConfigDump> {
    let json = dump_to_json(dump)?;
    let mut de = serde_json::Deserializer::from_str(&json);
    ConfigDump::deserialize(&mut de)
        .map_err(|e| Error::ConfigSource(format!("Malformed config dump: {e}")))
}

/// Extract the `fetchmailrc = {...}` right-hand side and rewrite it as
/// JSON.
fn dump_to_json(dump: &str) -> Result<String> {
    let cleaned = strip_comments(dump);
    let missing = || Error::ConfigSource("No fetchmailrc assignment in config dump".into());
    let start = cleaned.find("fetchmailrc").ok_or_else(missing)?;
    let rest = cleaned[start + "fetchmailrc".len()..].trim_start();
    let value = rest.strip_prefix('=').ok_or_else(missing)?;
    pythonish_to_json(value)
}

/// Drop `#` comments outside string literals.
fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    let mut quote: Option<char> = None;
    let mut escaped = false;

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
        } else if c == '#' {
            for skipped in chars.by_ref() {
                if skipped == '\n' {
                    out.push('\n');
                    break;
                }
            }
        } else {
            out.push(c);
            if c == '\'' || c == '"' {
                quote = Some(c);
            }
        }
    }
    out
}

/// Rewrite a Python literal expression as JSON: single-quoted strings,
/// `True`/`False`/`None`, tuple parentheses, and trailing commas before
/// a closer.
fn pythonish_to_json(src: &str) -> Result<String> {
    let mut out = String::with_capacity(src.len());
    let mut chars = src.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' => {
                out.push('"');
                let mut escaped = false;
                loop {
                    let Some(next) = chars.next() else {
                        return Err(Error::ConfigSource(
                            "Unterminated string in config dump".into(),
                        ));
                    };
                    if escaped {
                        escaped = false;
                        if next == '\'' {
                            out.push('\'');
                        } else {
                            out.push('\\');
                            out.push(next);
                        }
                    } else if next == '\\' {
                        escaped = true;
                    } else if next == c {
                        out.push('"');
                        break;
                    } else if next == '"' {
                        out.push_str("\\\"");
                    } else {
                        out.push(next);
                    }
                }
            }
            '(' => out.push('['),
            ')' => {
                trim_trailing_comma(&mut out);
                out.push(']');
            }
            ']' | '}' => {
                trim_trailing_comma(&mut out);
                out.push(c);
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut word = String::new();
                word.push(c);
                while let Some(&next) = chars.peek() {
                    if next.is_alphanumeric() || next == '_' {
                        word.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match word.as_str() {
                    "True" => out.push_str("true"),
                    "False" => out.push_str("false"),
                    "None" => out.push_str("null"),
                    other => {
                        return Err(Error::ConfigSource(format!(
                            "Unsupported token `{other}` in config dump"
                        )));
                    }
                }
            }
            _ => out.push(c),
        }
    }
    Ok(out)
}

fn trim_trailing_comma(out: &mut String) {
    out.truncate(out.trim_end().len());
    if out.ends_with(',') {
        out.pop();
    }
}
