//! Gmail session
//!
//! A thin specialization of [`Imap`] for Gmail-flavoured servers.
//! Searches are written in Gmail's own query syntax and shipped over
//! IMAP inside `X-GM-RAW`, the All Mail folder is discovered from its
//! `\All` listing attribute, and deletion works the way the web
//! interface does: by putting the `\Trash` label on a message.

use crate::config::ImapConfig;
use crate::error::{Error, Result};
use crate::folder::Folder;
use crate::session::{FolderListing, Imap, SearchResults, settle};
use futures::future::BoxFuture;
use tracing::{debug, info};

/// A session against a server that speaks Gmail's IMAP extensions.
pub struct GMail {
    imap: Imap,
    all_mail: Option<String>,
}

impl GMail {
    /// Gmail's public IMAP endpoint.
    pub const HOST: &'static str = "imap.gmail.com";
    /// Gmail's implicit-TLS IMAP port.
    pub const PORT: u16 = 993;

    /// Connect to Gmail and log in.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Login`] when Gmail rejects the credentials.
    pub async fn connect(username: &str, password: &str) -> Result<Self> {
        let config = ImapConfig {
            host: Self::HOST.to_string(),
            port: Self::PORT,
            username: username.to_string(),
            password: password.to_string(),
            danger_accept_invalid_certs: false,
        };
        Self::connect_with(&config).await
    }

    /// Connect to an arbitrary endpoint that speaks Gmail's
    /// extensions, e.g. a local test server.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Login`] when the server rejects the
    /// credentials.
    pub async fn connect_with(config: &ImapConfig) -> Result<Self> {
        Ok(Self {
            imap: Imap::connect(config).await?,
            all_mail: None,
        })
    }

    /// Connect, log in, run `op`, and always try to close afterwards.
    ///
    /// # Errors
    ///
    /// The operation's error wins; a close failure after a failed
    /// operation is only logged.
    pub async fn with_session<T, F>(username: &str, password: &str, op: F) -> Result<T>
    where
        F: for<'a> FnOnce(&'a mut Self) -> BoxFuture<'a, Result<T>>,
    {
        let mut gmail = Self::connect(username, password).await?;
        let outcome = op(&mut gmail).await;
        let closed = gmail.close().await;
        settle(outcome, closed)
    }

    /// A Gmail query wrapped for the IMAP SEARCH command. Embedded
    /// double quotes are escaped so quoted phrases survive the trip.
    #[must_use]
    pub fn raw_query(query: &str) -> String {
        format!("X-GM-RAW \"{}\"", query.replace('"', "\\\""))
    }

    /// Select a folder. [`Folder::All`] resolves to the account's All
    /// Mail folder, whatever the display language calls it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FolderDiscovery`] when no listing, or more
    /// than one, advertises `\All`; otherwise as [`Imap::select`].
    pub async fn select(&mut self, folder: impl Into<Folder>, readonly: bool) -> Result<()> {
        let folder = folder.into();
        if folder == Folder::All {
            let name = self.all_mail_folder().await?;
            self.imap.select(Folder::Custom(name), readonly).await
        } else {
            self.imap.select(folder, readonly).await
        }
    }

    /// Search with a Gmail query and decode the matches lazily.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Search`] on a failed or refused search.
    pub async fn search(&mut self, query: &str) -> Result<SearchResults<'_>> {
        self.imap.search(&Self::raw_query(query)).await
    }

    /// Identifiers matching a Gmail query, sorted ascending.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Search`] on a failed or refused search.
    pub async fn get_ids(&mut self, query: &str) -> Result<Vec<u32>> {
        self.imap.search_ids(&Self::raw_query(query)).await
    }

    /// Move every message matching a Gmail query to the trash by
    /// storing the `\Trash` label, one store per message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Search`] if the query fails, or
    /// [`Error::Store`] for the first message that cannot be
    /// labelled; earlier messages stay trashed.
    pub async fn delete(&mut self, query: &str) -> Result<Vec<u32>> {
        let ids = self.get_ids(query).await?;
        for &id in &ids {
            self.imap.store(id, "+X-GM-LABELS (\\Trash)").await?;
        }
        info!("Moved {} messages to the trash", ids.len());
        Ok(ids)
    }

    /// As [`Imap::store`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] on a failed or refused store.
    pub async fn store(&mut self, id: u32, query: &str) -> Result<()> {
        self.imap.store(id, query).await
    }

    /// As [`Imap::mark_seen`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] for the identifier that failed.
    pub async fn mark_seen(&mut self, ids: &[u32]) -> Result<()> {
        self.imap.mark_seen(ids).await
    }

    /// As [`Imap::mark_unseen`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] for the identifier that failed.
    pub async fn mark_unseen(&mut self, ids: &[u32]) -> Result<()> {
        self.imap.mark_unseen(ids).await
    }

    /// As [`Imap::list_folders`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::List`] on a failed or refused listing.
    pub async fn list_folders(&mut self) -> Result<Vec<FolderListing>> {
        self.imap.list_folders().await
    }

    /// As [`Imap::close`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Imap`] if either teardown command fails.
    pub async fn close(&mut self) -> Result<()> {
        self.imap.close().await
    }

    /// The name of the folder advertising `\All`, taken from the
    /// first listing and cached for the rest of the session.
    async fn all_mail_folder(&mut self) -> Result<String> {
        if let Some(name) = &self.all_mail {
            return Ok(name.clone());
        }
        let mut names: Vec<String> = self
            .imap
            .list_folders()
            .await?
            .into_iter()
            .filter(|listing| listing.has_attribute("\\All"))
            .map(|listing| listing.name)
            .collect();
        names.sort_unstable();
        names.dedup();
        match names.len() {
            1 => {
                let name = names.remove(0);
                debug!("All Mail resolved to {}", name);
                self.all_mail = Some(name.clone());
                Ok(name)
            }
            0 => Err(Error::FolderDiscovery(
                "No folder advertises \\All".to_string(),
            )),
            n => Err(Error::FolderDiscovery(format!(
                "{n} folders advertise \\All"
            ))),
        }
    }
}
