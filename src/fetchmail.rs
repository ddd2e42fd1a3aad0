//! Credential resolution from fetchmail configuration
//!
//! fetchmail's `--configdump` describes every polled account. This
//! module expands that dump into one descriptor per (server, user,
//! localname, mailbox) combination and resolves sparse queries against
//! the expanded set. A query constrains only the fields it fills;
//! resolution either finds exactly one credential or fails, never
//! silently picks one of several.

use crate::configdump::{self, ConfigDump, ServiceSpec};
use crate::error::{Error, Result};
use std::path::PathBuf;
use tokio::sync::OnceCell;

/// A partial account descriptor.
///
/// Doubles as a fully expanded configuration entry and as a query
/// pattern: any field left `None` is unconstrained when matching.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Account {
    pub localname: Option<String>,
    pub mailbox: Option<String>,
    pub protocol: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl Account {
    /// True when every field the query fills equals this account's
    /// value. Fields absent from the query never constrain the match.
    #[must_use]
    pub fn matches(&self, query: &Self) -> bool {
        field_matches(&self.localname, &query.localname)
            && field_matches(&self.mailbox, &query.mailbox)
            && field_matches(&self.protocol, &query.protocol)
            && field_matches(&self.host, &query.host)
            && field_matches(&self.port, &query.port)
            && field_matches(&self.user, &query.user)
            && field_matches(&self.password, &query.password)
    }

    /// Project onto the credential fields. `None` if any of protocol,
    /// host, user, or password is unset; the port may legitimately stay
    /// unset (unknown protocol).
    #[must_use]
    pub fn credential(&self) -> Option<Credential> {
        Some(Credential {
            protocol: self.protocol.clone()?,
            host: self.host.clone()?,
            port: self.port,
            user: self.user.clone()?,
            password: self.password.clone()?,
        })
    }
}

fn field_matches<T: PartialEq>(value: &Option<T>, query: &Option<T>) -> bool {
    query.as_ref().is_none_or(|wanted| value.as_ref() == Some(wanted))
}

/// A fully resolved login credential.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Credential {
    pub protocol: String,
    pub host: String,
    pub port: Option<u16>,
    pub user: String,
    pub password: String,
}

/// Credential resolution engine over one fetchmail configuration.
///
/// The configuration dump and its expansion are fetched once per engine
/// instance and cached; construct a new engine to re-read the rc file.
#[derive(Debug, Default)]
pub struct FetchMail {
    rcfile: Option<PathBuf>,
    config: OnceCell<ConfigDump>,
    accounts: OnceCell<Vec<Account>>,
}

impl FetchMail {
    /// Engine over fetchmail's default rc file lookup.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine over an explicit rc file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigSource`] if `rcfile` is not an existing
    /// file.
    pub fn with_rcfile(rcfile: impl Into<PathBuf>) -> Result<Self> {
        let rcfile = rcfile.into();
        if !rcfile.is_file() {
            return Err(Error::ConfigSource(format!(
                "{} is not a file",
                rcfile.display()
            )));
        }
        Ok(Self {
            rcfile: Some(rcfile),
            ..Self::default()
        })
    }

    /// Engine over an already decoded configuration dump.
    #[must_use]
    pub fn from_config(config: ConfigDump) -> Self {
        Self {
            rcfile: None,
            config: OnceCell::new_with(Some(config)),
            accounts: OnceCell::new(),
        }
    }

    /// The decoded configuration dump, fetched on first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigSource`] if the dump subprocess fails or
    /// its output does not decode.
    pub async fn config(&self) -> Result<&ConfigDump> {
        self.config
            .get_or_try_init(|| configdump::load(self.rcfile.as_deref()))
            .await
    }

    /// The expanded account descriptors, computed on first use.
    ///
    /// # Errors
    ///
    /// Propagates configuration loading failures.
    pub async fn accounts(&self) -> Result<&[Account]> {
        let accounts = self
            .accounts
            .get_or_try_init(|| async { Ok::<_, Error>(expand(self.config().await?)) })
            .await?;
        Ok(accounts)
    }

    /// All distinct credentials whose accounts match the query, in
    /// first-seen configuration order.
    ///
    /// # Errors
    ///
    /// Propagates configuration loading failures.
    pub async fn search_credentials(&self, query: &Account) -> Result<Vec<Credential>> {
        let mut found: Vec<Credential> = Vec::new();
        for account in self.accounts().await? {
            if account.matches(query)
                && let Some(credential) = account.credential()
                && !found.contains(&credential)
            {
                found.push(credential);
            }
        }
        Ok(found)
    }

    /// The single credential matching the query.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CredentialNotFound`] when nothing matches and
    /// [`Error::AmbiguousCredential`] when several distinct credentials
    /// do; configuration loading failures propagate.
    pub async fn credential(&self, query: &Account) -> Result<Credential> {
        let mut found = self.search_credentials(query).await?;
        match found.len() {
            0 => Err(Error::CredentialNotFound),
            1 => Ok(found.remove(0)),
            n => Err(Error::AmbiguousCredential(n)),
        }
    }
}

/// Expand a configuration dump into one descriptor per (server, user,
/// localname, mailbox) combination. Empty localname or mailbox lists
/// contribute a single unset placeholder; duplicates are dropped,
/// keeping first-seen order.
#[must_use]
pub fn expand(config: &ConfigDump) -> Vec<Account> {
    let mut items: Vec<Account> = Vec::new();
    for server in &config.servers {
        for user in &server.users {
            let port = derive_port(server.service.as_ref(), &server.protocol, user.ssl);
            let localnames = expanded_or_placeholder(&user.localnames);
            let mailboxes = expanded_or_placeholder(&user.mailboxes);
            for localname in &localnames {
                for mailbox in &mailboxes {
                    let account = Account {
                        localname: localname.clone(),
                        mailbox: mailbox.clone(),
                        protocol: Some(server.protocol.clone()),
                        host: Some(server.pollname.clone()),
                        port,
                        user: Some(user.remote.clone()),
                        password: Some(user.password.clone()),
                    };
                    if !items.contains(&account) {
                        items.push(account);
                    }
                }
            }
        }
    }
    items
}

fn expanded_or_placeholder(values: &[String]) -> Vec<Option<String>> {
    if values.is_empty() {
        vec![None]
    } else {
        values.iter().cloned().map(Some).collect()
    }
}

/// A numeric service value wins; otherwise the well-known IMAP/POP3
/// port by TLS flag; unknown protocols resolve to no port.
fn derive_port(service: Option<&ServiceSpec>, protocol: &str, ssl: bool) -> Option<u16> {
    if let Some(port) = service.and_then(ServiceSpec::as_port) {
        return Some(port);
    }
    let (plain, tls) = match protocol.to_ascii_uppercase().as_str() {
        "IMAP" => (143, 993),
        "POP3" => (110, 995),
        _ => return None,
    };
    Some(if ssl { tls } else { plain })
}
