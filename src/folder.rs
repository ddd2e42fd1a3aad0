//! Typed folder names for SELECT and EXAMINE.
//!
//! Session methods take a [`Folder`] instead of a raw mailbox name so
//! the well-known folders read as code and the all-mail sentinel has
//! somewhere to live. Anything the account invented stays a
//! [`Folder::Custom`].

use std::fmt;

/// A mailbox to select before searching.
///
/// [`Folder::All`] is special on Gmail-backed sessions: the account's
/// real All Mail folder is discovered at selection time, since its
/// display name depends on the account locale. Every other variant
/// selects its literal name.
///
/// # Examples
///
/// ```
/// use mailwrench::Folder;
///
/// assert_eq!(Folder::from("inbox"), Folder::Inbox);
/// assert_eq!(Folder::All.as_str(), "ALL");
/// assert_eq!(Folder::custom("Receipts/2026").as_str(), "Receipts/2026");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Folder {
    /// Every message in the account. On [`crate::GMail`] sessions this
    /// resolves to the folder advertising the `\All` attribute; plain
    /// [`crate::Imap`] sessions select the literal name `ALL`.
    All,
    /// The required INBOX mailbox.
    Inbox,
    /// Sent messages.
    Sent,
    /// Draft messages.
    Drafts,
    /// Deleted messages.
    Trash,
    /// Spam.
    Spam,
    /// Archived messages.
    Archive,
    /// Any folder the account defines itself.
    Custom(String),
}

impl Folder {
    /// Wrap a server-specific mailbox name.
    #[must_use]
    pub fn custom(name: impl Into<String>) -> Self {
        Self::Custom(name.into())
    }

    /// The name handed to SELECT or EXAMINE.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::All => "ALL",
            Self::Inbox => "INBOX",
            Self::Sent => "Sent",
            Self::Drafts => "Drafts",
            Self::Trash => "Trash",
            Self::Spam => "Spam",
            Self::Archive => "Archive",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for Folder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Well-known names parse case-insensitively, with `JUNK` accepted as
/// an alias for [`Folder::Spam`]. Everything else becomes
/// [`Folder::Custom`] with the original spelling preserved.
impl From<&str> for Folder {
    fn from(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "ALL" => Self::All,
            "INBOX" => Self::Inbox,
            "SENT" => Self::Sent,
            "DRAFTS" => Self::Drafts,
            "TRASH" => Self::Trash,
            "SPAM" | "JUNK" => Self::Spam,
            "ARCHIVE" => Self::Archive,
            _ => Self::Custom(name.to_string()),
        }
    }
}

impl From<String> for Folder {
    fn from(name: String) -> Self {
        Self::from(name.as_str())
    }
}
