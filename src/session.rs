//! Generic IMAP session
//!
//! Wraps an authenticated connection and the operation set it speaks:
//! select, search, fetch, store, list, close. Every server exchange
//! goes through one error-translation point, so each operation fails
//! with its own error kind regardless of whether the server answered
//! with a failure status or the transport broke. Searches yield
//! decoded messages lazily, one fetch per consumed element.

use crate::config::ImapConfig;
use crate::connection::{self, RawSession};
use crate::error::{Error, Result};
use crate::flag::Flag;
use crate::folder::Folder;
use crate::message::Mail;
use async_imap::types::{Name, NameAttribute};
use chrono::{Local, NaiveDate};
use futures::StreamExt;
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::fmt;
use tracing::{debug, info, warn};

/// The operation set whose failures get their own error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Login,
    Select,
    Search,
    Fetch,
    Store,
    List,
}

impl Op {
    /// The single translation point from a protocol-level failure to
    /// the operation's error kind.
    fn error(self, source: impl fmt::Display) -> Error {
        let detail = source.to_string();
        match self {
            Self::Login => Error::Login(detail),
            Self::Select => Error::Select(detail),
            Self::Search => Error::Search(detail),
            Self::Fetch => Error::Fetch(detail),
            Self::Store => Error::Store(detail),
            Self::List => Error::List(detail),
        }
    }
}

/// An authenticated IMAP session.
///
/// Construction connects and logs in. A session serves one logical
/// task at a time; operations take it exclusively. Release it with
/// [`Imap::close`], or run the whole task under
/// [`Imap::with_session`] to get release on every exit path.
#[derive(Debug)]
pub struct Imap {
    session: RawSession,
    selected: bool,
    closed: bool,
}

impl Imap {
    /// Connect and log in.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Login`] when the server rejects the
    /// credentials; connection and TLS failures keep their own kinds.
    pub async fn connect(config: &ImapConfig) -> Result<Self> {
        let client = connection::connect(config).await?;
        let session = client
            .login(&config.username, &config.password)
            .await
            .map_err(|(e, _)| Op::Login.error(e))?;
        info!("Logged in as {}", config.username);

        Ok(Self {
            session,
            selected: false,
            closed: false,
        })
    }

    /// Connect, log in, run `op`, and always try to close afterwards.
    ///
    /// # Errors
    ///
    /// The operation's error wins; a close failure after a failed
    /// operation is only logged. A close failure after a successful
    /// operation is returned.
    pub async fn with_session<T, F>(config: &ImapConfig, op: F) -> Result<T>
    where
        F: for<'a> FnOnce(&'a mut Self) -> BoxFuture<'a, Result<T>>,
    {
        let mut session = Self::connect(config).await?;
        let outcome = op(&mut session).await;
        let closed = session.close().await;
        settle(outcome, closed)
    }

    /// Select a folder. Readonly selection uses EXAMINE, so fetching a
    /// message does not mark it seen.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Select`] if the folder does not exist or the
    /// server refuses the selection.
    pub async fn select(&mut self, folder: impl Into<Folder>, readonly: bool) -> Result<()> {
        let folder = folder.into();
        if readonly {
            self.session
                .examine(folder.as_str())
                .await
                .map_err(|e| Op::Select.error(e))?;
        } else {
            self.session
                .select(folder.as_str())
                .await
                .map_err(|e| Op::Select.error(e))?;
        }
        self.selected = true;
        debug!("Selected folder {}", folder);
        Ok(())
    }

    /// Matching message identifiers, sorted ascending, without
    /// fetching anything.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Search`] on a failed or refused search.
    pub async fn search_ids(&mut self, query: &str) -> Result<Vec<u32>> {
        let ids = self
            .session
            .uid_search(query)
            .await
            .map_err(|e| Op::Search.error(e))?;
        let mut ids: Vec<u32> = ids.into_iter().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    /// Search and decode the matches lazily.
    ///
    /// The search itself runs now; each matching message is fetched
    /// only when the returned cursor is advanced onto it, with
    /// `BODY[]`, so consuming a match marks it seen unless the folder
    /// was selected readonly.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Search`] on a failed or refused search. Fetch
    /// failures surface per element from the cursor.
    pub async fn search(&mut self, query: &str) -> Result<SearchResults<'_>> {
        self.search_with(query, "BODY[]").await
    }

    /// [`Imap::search`] with an explicit fetch data item in place of
    /// `BODY[]`, e.g. `BODY.PEEK[]`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Search`] on a failed or refused search.
    pub async fn search_with(&mut self, query: &str, fetch: &str) -> Result<SearchResults<'_>> {
        let ids = self.search_ids(query).await?;
        info!("Found {} messages matching '{}'", ids.len(), query);
        Ok(SearchResults {
            session: &mut self.session,
            ids: ids.into(),
            fetch: fetch.to_string(),
        })
    }

    /// Apply a raw STORE data item to one message, e.g.
    /// `+FLAGS (\Seen)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] on a failed or refused store.
    pub async fn store(&mut self, id: u32, query: &str) -> Result<()> {
        let mut responses = self
            .session
            .uid_store(id.to_string(), query)
            .await
            .map_err(|e| Op::Store.error(e))?;
        while let Some(response) = responses.next().await {
            response.map_err(|e| Op::Store.error(e))?;
        }
        Ok(())
    }

    /// Mark messages seen, one store per identifier. Identifiers
    /// already stored stay stored if a later one fails.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] for the identifier that failed.
    pub async fn mark_seen(&mut self, ids: &[u32]) -> Result<()> {
        for &id in ids {
            self.store(id, &Flag::Seen.store_add()).await?;
        }
        Ok(())
    }

    /// Remove the seen flag, one store per identifier.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] for the identifier that failed.
    pub async fn mark_unseen(&mut self, ids: &[u32]) -> Result<()> {
        for &id in ids {
            self.store(id, &Flag::Seen.store_remove()).await?;
        }
        Ok(())
    }

    /// List every folder visible to the account.
    ///
    /// # Errors
    ///
    /// Returns [`Error::List`] on a failed or refused listing.
    pub async fn list_folders(&mut self) -> Result<Vec<FolderListing>> {
        let mut stream = self
            .session
            .list(Some(""), Some("*"))
            .await
            .map_err(|e| Op::List.error(e))?;

        let mut listings = Vec::new();
        while let Some(item) = stream.next().await {
            let name = item.map_err(|e| Op::List.error(e))?;
            listings.push(FolderListing::from(&name));
        }
        drop(stream);
        Ok(listings)
    }

    /// Close the session: CLOSE when a folder is selected, then
    /// LOGOUT. Nothing happens once the session is closed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Imap`] if either teardown command fails.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if self.selected {
            self.session
                .close()
                .await
                .map_err(|e| Error::Imap(format!("Close failed: {e}")))?;
            self.selected = false;
        }
        self.session
            .logout()
            .await
            .map_err(|e| Error::Imap(format!("Logout failed: {e}")))?;
        self.closed = true;
        debug!("Session closed");
        Ok(())
    }

    /// Render a date for search criteria such as `ON`, `SINCE`, and
    /// `BEFORE`; today when unset.
    #[must_use]
    pub fn search_date(date: Option<NaiveDate>) -> String {
        date.unwrap_or_else(|| Local::now().date_naive())
            .format("%-d-%b-%Y")
            .to_string()
    }
}

/// Which error wins when both the operation and the teardown fail:
/// the operation's, with the teardown failure logged.
pub fn settle<T>(outcome: Result<T>, closed: Result<()>) -> Result<T> {
    match (outcome, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(close_err)) => Err(close_err),
        (Err(op_err), Ok(())) => Err(op_err),
        (Err(op_err), Err(close_err)) => {
            warn!("Session teardown failed after an error: {}", close_err);
            Err(op_err)
        }
    }
}

/// Lazy, single-pass search results.
///
/// Each [`SearchResults::next`] call fetches and decodes one message;
/// a fetch failure belongs to that element alone. Dropping the cursor
/// early leaves the session usable, with no outstanding command.
pub struct SearchResults<'a> {
    session: &'a mut RawSession,
    ids: VecDeque<u32>,
    fetch: String,
}

impl SearchResults<'_> {
    /// Fetch and decode the next match.
    pub async fn next(&mut self) -> Option<Result<Mail>> {
        let id = self.ids.pop_front()?;
        Some(self.fetch_one(id).await)
    }

    /// Identifiers not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.ids.len()
    }

    /// Drain every remaining match into a vector.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Fetch`] for the first element that fails.
    pub async fn try_collect(mut self) -> Result<Vec<Mail>> {
        let mut mails = Vec::with_capacity(self.ids.len());
        while let Some(mail) = self.next().await {
            mails.push(mail?);
        }
        Ok(mails)
    }

    async fn fetch_one(&mut self, id: u32) -> Result<Mail> {
        let query = self.fetch.clone();
        let mut stream = self
            .session
            .uid_fetch(id.to_string(), &query)
            .await
            .map_err(|e| Op::Fetch.error(e))?;

        let mut raw: Option<Vec<u8>> = None;
        while let Some(item) = stream.next().await {
            let fetched = item.map_err(|e| Op::Fetch.error(e))?;
            if raw.is_none()
                && let Some(body) = fetched.body()
            {
                raw = Some(body.to_vec());
            }
        }
        drop(stream);

        let raw = raw.ok_or_else(|| Op::Fetch.error(format!("No body returned for {id}")))?;
        Mail::parse(&raw, Some(id))
    }
}

/// One entry of a folder listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderListing {
    pub attributes: Vec<String>,
    pub delimiter: Option<String>,
    pub name: String,
}

impl FolderListing {
    /// Whether the entry carries the given attribute, e.g. `\All`.
    #[must_use]
    pub fn has_attribute(&self, attribute: &str) -> bool {
        self.attributes.iter().any(|a| a == attribute)
    }
}

impl From<&Name> for FolderListing {
    fn from(name: &Name) -> Self {
        Self {
            attributes: name.attributes().iter().map(attribute_str).collect(),
            delimiter: name.delimiter().map(ToString::to_string),
            name: name.name().to_string(),
        }
    }
}

impl fmt::Display for FolderListing {
    /// Renders the canonical LIST response line.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.delimiter {
            Some(delimiter) => write!(
                f,
                "({}) \"{}\" \"{}\"",
                self.attributes.join(" "),
                delimiter,
                self.name
            ),
            None => write!(f, "({}) NIL \"{}\"", self.attributes.join(" "), self.name),
        }
    }
}

fn attribute_str(attribute: &NameAttribute<'_>) -> String {
    let text = match attribute {
        NameAttribute::NoInferiors => "\\Noinferiors",
        NameAttribute::NoSelect => "\\Noselect",
        NameAttribute::Marked => "\\Marked",
        NameAttribute::Unmarked => "\\Unmarked",
        NameAttribute::All => "\\All",
        NameAttribute::Archive => "\\Archive",
        NameAttribute::Drafts => "\\Drafts",
        NameAttribute::Flagged => "\\Flagged",
        NameAttribute::Junk => "\\Junk",
        NameAttribute::Sent => "\\Sent",
        NameAttribute::Trash => "\\Trash",
        NameAttribute::Extension(raw) => return raw.to_string(),
        // `NameAttribute` is non-exhaustive; no variant beyond the
        // twelve above exists in the pinned imap-proto version.
        other => return format!("{other:?}"),
    };
    text.to_string()
}
