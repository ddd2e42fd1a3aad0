//! Typed message flags for the store operations.
//!
//! A [`Flag`] renders as its wire form and knows how to phrase the
//! STORE data items that add or remove it, which is all
//! [`crate::Imap::store`] needs.

use std::fmt;

/// An IMAP message flag.
///
/// The RFC 3501 system flags carry their leading backslash; anything
/// the server or user defines rides in [`Flag::Keyword`] verbatim.
///
/// # Examples
///
/// ```
/// use mailwrench::Flag;
///
/// assert_eq!(Flag::Seen.to_string(), "\\Seen");
/// assert_eq!(Flag::Seen.store_add(), "+FLAGS (\\Seen)");
/// assert_eq!(
///     Flag::Keyword("$Receipt".into()).store_remove(),
///     "-FLAGS ($Receipt)"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Flag {
    /// Read.
    Seen,
    /// Replied to.
    Answered,
    /// Flagged for attention.
    Flagged,
    /// Marked for deletion.
    Deleted,
    /// Unfinished draft.
    Draft,
    /// A keyword flag, sent without a backslash prefix.
    Keyword(String),
}

impl Flag {
    /// The STORE data item that sets this flag on a message.
    #[must_use]
    pub fn store_add(&self) -> String {
        format!("+FLAGS ({self})")
    }

    /// The STORE data item that clears this flag from a message.
    #[must_use]
    pub fn store_remove(&self) -> String {
        format!("-FLAGS ({self})")
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Seen => f.write_str("\\Seen"),
            Self::Answered => f.write_str("\\Answered"),
            Self::Flagged => f.write_str("\\Flagged"),
            Self::Deleted => f.write_str("\\Deleted"),
            Self::Draft => f.write_str("\\Draft"),
            Self::Keyword(word) => f.write_str(word),
        }
    }
}
