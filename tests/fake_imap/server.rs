//! In-process fake IMAP server for integration testing
//!
//! Speaks just enough IMAP (RFC 3501 plus Gmail's `X-GM-RAW` search
//! key and `X-GM-LABELS` store item) to exercise the full session
//! lifecycle against real TLS:
//!
//! ```text
//!   Client connects via TCP
//!       |
//!   TLS handshake (implicit TLS, encrypted from the first byte)
//!       |
//!   Server sends greeting: "* OK IMAP4rev1 ready\r\n"
//!       |
//!   Client sends LOGIN with username and password
//!       |
//!   Client issues commands: LIST, SELECT, SEARCH, FETCH, STORE, ...
//!       |
//!   Client sends LOGOUT
//! ```
//!
//! Commands are parsed by hand rather than through an IMAP grammar,
//! because the grammar has no room for Gmail's nonstandard search
//! key and the tests need to observe it verbatim. Every command
//! starts with a client-chosen **tag** (`A0001`, `A0002`, ...) that
//! the server echoes in its completion response; `*` lines are
//! untagged data sent before the final tagged OK/NO/BAD.
//!
//! Message bodies travel as **counted literals**: `{bytecount}\r\n`
//! followed by exactly that many raw bytes. That is how the client
//! knows where a body ends:
//!
//! ```text
//!   * 1 FETCH (UID 42 BODY[] {1234}
//!   <exactly 1234 bytes of raw RFC 2822 message>
//!   )
//! ```

use super::mailbox::{Mailbox, TestEmail};
use mailwrench::ImapConfig;
use rcgen::generate_simple_self_signed;
use rustls::pki_types::PrivatePkcs8KeyDer;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

/// A fake IMAP server on localhost with an OS-assigned port.
///
/// The server generates a self-signed TLS certificate at startup
/// using `rcgen`, so no cert files are needed; clients connect with
/// certificate checks disabled. It runs until dropped.
pub struct FakeImapServer {
    port: u16,
    state: Arc<Mutex<Mailbox>>,
    /// Handle to the background task so it lives as long as the server.
    _handle: tokio::task::JoinHandle<()>,
}

impl FakeImapServer {
    /// Start a new fake IMAP server with the given mailbox state.
    ///
    /// Binds to `127.0.0.1:0` (the OS picks a free port), then spawns
    /// a tokio task that accepts TLS connections and speaks IMAP.
    pub async fn start(mailbox: Mailbox) -> Self {
        // Multiple tests may race to install the process-wide crypto
        // provider; losing the race is fine.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind to ephemeral port");
        let port = listener.local_addr().unwrap().port();

        let cert = generate_simple_self_signed(vec!["127.0.0.1".to_string()])
            .expect("generate self-signed cert");
        let cert_der = cert.cert.der().clone();
        let key_der = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());

        let tls_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der], key_der.into())
            .expect("build server TLS config");

        let acceptor = TlsAcceptor::from(Arc::new(tls_config));
        let state = Arc::new(Mutex::new(mailbox));
        let shared = state.clone();

        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _addr)) = listener.accept().await else {
                    break;
                };
                let acceptor = acceptor.clone();
                let shared = shared.clone();
                tokio::spawn(async move {
                    let Ok(tls_stream) = acceptor.accept(stream).await else {
                        return;
                    };
                    let mut reader = BufReader::new(tls_stream);
                    if write_line(&mut reader, "* OK IMAP4rev1 Fake server ready\r\n")
                        .await
                        .is_err()
                    {
                        return;
                    }
                    run_session(&mut reader, &shared).await;
                });
            }
        });

        Self {
            port,
            state,
            _handle: handle,
        }
    }

    /// The port the server is listening on.
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Shared handle to the server state, for asserting on the wire
    /// logs and flag changes after the client has run.
    pub fn state(&self) -> Arc<Mutex<Mailbox>> {
        self.state.clone()
    }

    /// A client config pointed at this server, with its credentials
    /// and certificate checks disabled for the self-signed cert.
    pub fn config(&self) -> ImapConfig {
        let state = self.state.lock().unwrap();
        ImapConfig {
            host: "127.0.0.1".to_string(),
            port: self.port,
            username: state.username.clone(),
            password: state.password.clone(),
            danger_accept_invalid_certs: true,
        }
    }
}

/// The folder a session has open, and how it was opened.
struct Selection {
    folder: String,
    readonly: bool,
}

/// Run the authenticated IMAP command loop over an established
/// stream. Read handlers clone a snapshot under the lock; write
/// handlers lock briefly to mutate, never across an await.
#[allow(clippy::too_many_lines)]
async fn run_session<S: AsyncRead + AsyncWrite + Unpin>(
    reader: &mut BufReader<S>,
    mailbox: &Mutex<Mailbox>,
) {
    let mut selected: Option<Selection> = None;

    loop {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }

        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            continue;
        }
        let Some((tag, rest)) = trimmed.split_once(' ') else {
            let resp = format!("{trimmed} BAD Missing command\r\n");
            if write_line(reader, &resp).await.is_err() {
                break;
            }
            continue;
        };
        let (verb, args) = rest.split_once(' ').map_or((rest, ""), |(v, a)| (v, a));

        let outcome = match verb.to_ascii_uppercase().as_str() {
            "CAPABILITY" => {
                let _ = write_line(reader, "* CAPABILITY IMAP4rev1\r\n").await;
                write_line(reader, &format!("{tag} OK CAPABILITY completed\r\n")).await
            }
            "NOOP" => write_line(reader, &format!("{tag} OK NOOP completed\r\n")).await,
            "LOGIN" => handle_login(tag, args, mailbox, reader).await,
            "LIST" => handle_list(tag, mailbox, reader).await,
            "SELECT" => {
                let (result, selection) = handle_select(tag, args, false, mailbox, reader).await;
                selected = selection;
                result
            }
            "EXAMINE" => {
                let (result, selection) = handle_select(tag, args, true, mailbox, reader).await;
                selected = selection;
                result
            }
            "UID" => {
                let (sub, subargs) = args.split_once(' ').map_or((args, ""), |(s, a)| (s, a));
                match sub.to_ascii_uppercase().as_str() {
                    "SEARCH" => {
                        handle_uid_search(tag, subargs, selected.as_ref(), mailbox, reader).await
                    }
                    "FETCH" => {
                        handle_uid_fetch(tag, subargs, selected.as_ref(), mailbox, reader).await
                    }
                    "STORE" => {
                        handle_uid_store(tag, subargs, selected.as_ref(), mailbox, reader).await
                    }
                    _ => write_line(reader, &format!("{tag} BAD Unknown UID command\r\n")).await,
                }
            }
            "CLOSE" => {
                if selected.take().is_some() {
                    mailbox.lock().unwrap().closes += 1;
                    write_line(reader, &format!("{tag} OK CLOSE completed\r\n")).await
                } else {
                    write_line(reader, &format!("{tag} BAD No folder selected\r\n")).await
                }
            }
            "LOGOUT" => {
                mailbox.lock().unwrap().logouts += 1;
                let _ = write_line(reader, "* BYE\r\n").await;
                let _ = write_line(reader, &format!("{tag} OK LOGOUT completed\r\n")).await;
                break;
            }
            _ => write_line(reader, &format!("{tag} BAD Unknown command\r\n")).await,
        };

        if outcome.is_err() {
            break;
        }
    }
}

/// LOGIN: check the quoted credentials against the configured
/// account.
async fn handle_login<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    args: &str,
    mailbox: &Mutex<Mailbox>,
    reader: &mut BufReader<S>,
) -> std::io::Result<()> {
    let parts = split_args(args);
    let accepted = {
        let state = mailbox.lock().unwrap();
        parts.first().is_some_and(|u| *u == state.username)
            && parts.get(1).is_some_and(|p| *p == state.password)
    };
    if accepted {
        write_line(reader, &format!("{tag} OK LOGIN completed\r\n")).await
    } else {
        write_line(
            reader,
            &format!("{tag} NO [AUTHENTICATIONFAILED] Invalid credentials\r\n"),
        )
        .await
    }
}

/// LIST: one `* LIST` line per folder with its attributes.
async fn handle_list<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    mailbox: &Mutex<Mailbox>,
    reader: &mut BufReader<S>,
) -> std::io::Result<()> {
    let snapshot = {
        let mut state = mailbox.lock().unwrap();
        state.lists += 1;
        state.clone()
    };
    for folder in &snapshot.folders {
        let line = format!(
            "* LIST ({}) \"/\" \"{}\"\r\n",
            folder.attributes.join(" "),
            folder.name
        );
        write_line(reader, &line).await?;
    }
    write_line(reader, &format!("{tag} OK LIST completed\r\n")).await
}

/// SELECT / EXAMINE: open a folder and send the required metadata.
async fn handle_select<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    args: &str,
    readonly: bool,
    mailbox: &Mutex<Mailbox>,
    reader: &mut BufReader<S>,
) -> (std::io::Result<()>, Option<Selection>) {
    let name = split_args(args).into_iter().next().unwrap_or_default();
    let snapshot = mailbox.lock().unwrap().clone();
    let Some(folder) = snapshot.get_folder(&name) else {
        let result = write_line(reader, &format!("{tag} NO Folder not found\r\n")).await;
        return (result, None);
    };

    let result = async {
        write_line(
            reader,
            "* FLAGS (\\Seen \\Answered \\Flagged \\Deleted \\Draft)\r\n",
        )
        .await?;
        write_line(reader, &format!("* {} EXISTS\r\n", folder.emails.len())).await?;
        write_line(reader, "* 0 RECENT\r\n").await?;
        write_line(reader, "* OK [UIDVALIDITY 1]\r\n").await?;
        let uidnext = folder.emails.iter().map(|e| e.uid).max().map_or(1, |m| m + 1);
        write_line(reader, &format!("* OK [UIDNEXT {uidnext}]\r\n")).await?;
        let access = if readonly { "READ-ONLY" } else { "READ-WRITE" };
        write_line(reader, &format!("{tag} OK [{access}] SELECT completed\r\n")).await
    }
    .await;

    (
        result,
        Some(Selection {
            folder: name,
            readonly,
        }),
    )
}

/// UID SEARCH: record the raw criteria, then match against the
/// selected folder. Supports ALL, SEEN, UNSEEN, and `X-GM-RAW`.
async fn handle_uid_search<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    criteria: &str,
    selected: Option<&Selection>,
    mailbox: &Mutex<Mailbox>,
    reader: &mut BufReader<S>,
) -> std::io::Result<()> {
    mailbox.lock().unwrap().searches.push(criteria.to_string());

    let Some(selection) = selected else {
        return write_line(reader, &format!("{tag} BAD No folder selected\r\n")).await;
    };
    let snapshot = mailbox.lock().unwrap().clone();
    let Some(folder) = snapshot.get_folder(&selection.folder) else {
        return write_line(reader, &format!("{tag} BAD Folder not found\r\n")).await;
    };

    let key = criteria
        .split_whitespace()
        .next()
        .map(str::to_ascii_uppercase)
        .unwrap_or_default();
    let uids: Vec<u32> = match key.as_str() {
        "X-GM-RAW" => {
            let query = split_args(criteria).into_iter().nth(1).unwrap_or_default();
            folder
                .emails
                .iter()
                .filter(|e| matches_gmail(e, &query))
                .map(|e| e.uid)
                .collect()
        }
        "ALL" => folder.emails.iter().map(|e| e.uid).collect(),
        "SEEN" => folder.emails.iter().filter(|e| e.seen).map(|e| e.uid).collect(),
        "UNSEEN" => folder
            .emails
            .iter()
            .filter(|e| !e.seen)
            .map(|e| e.uid)
            .collect(),
        _ => {
            return write_line(reader, &format!("{tag} BAD Unknown search key\r\n")).await;
        }
    };

    let rendered: Vec<String> = uids.iter().map(ToString::to_string).collect();
    write_line(reader, &format!("* SEARCH {}\r\n", rendered.join(" "))).await?;
    write_line(reader, &format!("{tag} OK SEARCH completed\r\n")).await
}

/// UID FETCH: return the message body as a counted literal, or NO
/// for messages marked to fail. Non-peek fetches of a read-write
/// selection set `\Seen`, like a real server.
async fn handle_uid_fetch<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    args: &str,
    selected: Option<&Selection>,
    mailbox: &Mutex<Mailbox>,
    reader: &mut BufReader<S>,
) -> std::io::Result<()> {
    let Some(selection) = selected else {
        return write_line(reader, &format!("{tag} BAD No folder selected\r\n")).await;
    };
    let (uid_str, item) = args.split_once(' ').map_or((args, "BODY[]"), |(u, i)| (u, i));
    let Ok(uid) = uid_str.parse::<u32>() else {
        return write_line(reader, &format!("{tag} BAD Bad sequence set\r\n")).await;
    };
    let peek = item.to_ascii_uppercase().contains("PEEK");

    let found = {
        let mut state = mailbox.lock().unwrap();
        state.fetches.push(uid);
        let readonly = selection.readonly;
        state.get_folder_mut(&selection.folder).and_then(|folder| {
            folder
                .emails
                .iter_mut()
                .enumerate()
                .find(|(_, e)| e.uid == uid)
                .map(|(idx, email)| {
                    if !email.fail_fetch && !readonly && !peek {
                        email.seen = true;
                    }
                    (idx + 1, email.raw.clone(), email.fail_fetch)
                })
        })
    };

    match found {
        Some((_, _, true)) => write_line(reader, &format!("{tag} NO FETCH failed\r\n")).await,
        Some((seq, raw, false)) => {
            let header = format!("* {seq} FETCH (UID {uid} BODY[] {{{}}}\r\n", raw.len());
            write_line(reader, &header).await?;
            write_bytes(reader, &raw).await?;
            write_line(reader, ")\r\n").await?;
            write_line(reader, &format!("{tag} OK FETCH completed\r\n")).await
        }
        None => write_line(reader, &format!("{tag} OK FETCH completed\r\n")).await,
    }
}

/// UID STORE: record the data item and apply flag and label changes.
/// Read-only selections refuse the store.
async fn handle_uid_store<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    args: &str,
    selected: Option<&Selection>,
    mailbox: &Mutex<Mailbox>,
    reader: &mut BufReader<S>,
) -> std::io::Result<()> {
    let Some(selection) = selected else {
        return write_line(reader, &format!("{tag} BAD No folder selected\r\n")).await;
    };
    let Some((uid_str, item)) = args.split_once(' ') else {
        return write_line(reader, &format!("{tag} BAD Missing data item\r\n")).await;
    };
    let Ok(uid) = uid_str.parse::<u32>() else {
        return write_line(reader, &format!("{tag} BAD Bad sequence set\r\n")).await;
    };

    mailbox.lock().unwrap().stores.push((uid, item.to_string()));
    if selection.readonly {
        return write_line(
            reader,
            &format!("{tag} NO STORE attempted on read-only folder\r\n"),
        )
        .await;
    }

    let updated = {
        let mut state = mailbox.lock().unwrap();
        state.get_folder_mut(&selection.folder).and_then(|folder| {
            folder
                .emails
                .iter_mut()
                .enumerate()
                .find(|(_, e)| e.uid == uid)
                .map(|(idx, email)| {
                    apply_store(item, email);
                    (idx + 1, email.seen)
                })
        })
    };

    if let Some((seq, seen)) = updated {
        let flags = if seen { "\\Seen" } else { "" };
        write_line(reader, &format!("* {seq} FETCH (UID {uid} FLAGS ({flags}))\r\n")).await?;
    }
    write_line(reader, &format!("{tag} OK STORE completed\r\n")).await
}

/// Apply a STORE data item to a message.
fn apply_store(item: &str, email: &mut TestEmail) {
    let upper = item.to_ascii_uppercase();
    if upper.starts_with("+FLAGS") && upper.contains("\\SEEN") {
        email.seen = true;
    } else if upper.starts_with("-FLAGS") && upper.contains("\\SEEN") {
        email.seen = false;
    } else if upper.starts_with("+X-GM-LABELS") && upper.contains("\\TRASH") {
        email.trashed = true;
    }
}

/// Whether a message matches an `X-GM-RAW` query. A trailing
/// ` -in:trash` excludes trashed messages and matches on the rest.
fn matches_gmail(email: &TestEmail, query: &str) -> bool {
    let (base, exclude_trash) = query
        .strip_suffix(" -in:trash")
        .map_or((query, false), |b| (b, true));
    email.gmail_queries.iter().any(|q| q == base) && !(exclude_trash && email.trashed)
}

/// Split command arguments on spaces, honouring IMAP quoted strings
/// and their `\"` / `\\` escapes. Quoted parts come back unquoted
/// and unescaped.
fn split_args(args: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;
    for c in args.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ' ' if !in_quotes => {
                if !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

/// Write a string to the stream and flush. Real servers batch
/// writes; flushing eagerly keeps the test server deterministic.
async fn write_line<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut BufReader<S>,
    line: &str,
) -> std::io::Result<()> {
    stream.get_mut().write_all(line.as_bytes()).await?;
    stream.get_mut().flush().await
}

/// Write raw bytes to the stream and flush.
async fn write_bytes<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut BufReader<S>,
    data: &[u8],
) -> std::io::Result<()> {
    stream.get_mut().write_all(data).await?;
    stream.get_mut().flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email() -> TestEmail {
        TestEmail {
            uid: 1,
            seen: false,
            trashed: false,
            gmail_queries: vec!["from:a@b.com".to_string()],
            fail_fetch: false,
            raw: Vec::new(),
        }
    }

    #[test]
    fn split_args_handles_quotes_and_escapes() {
        assert_eq!(
            split_args(r#""user@example.com" "pa ss""#),
            vec!["user@example.com", "pa ss"]
        );
        assert_eq!(
            split_args(r#"X-GM-RAW "subject:\"hello world\"""#),
            vec!["X-GM-RAW", r#"subject:"hello world""#]
        );
        assert_eq!(split_args("3 BODY[]"), vec!["3", "BODY[]"]);
    }

    #[test]
    fn gmail_matching_honours_trash_exclusion() {
        let mut mail = email();
        assert!(matches_gmail(&mail, "from:a@b.com"));
        assert!(matches_gmail(&mail, "from:a@b.com -in:trash"));
        assert!(!matches_gmail(&mail, "from:other@b.com"));

        mail.trashed = true;
        assert!(matches_gmail(&mail, "from:a@b.com"));
        assert!(!matches_gmail(&mail, "from:a@b.com -in:trash"));
    }

    #[test]
    fn stores_apply_flags_and_labels() {
        let mut mail = email();
        apply_store("+FLAGS (\\Seen)", &mut mail);
        assert!(mail.seen);
        apply_store("-FLAGS (\\Seen)", &mut mail);
        assert!(!mail.seen);
        apply_store("+X-GM-LABELS (\\Trash)", &mut mail);
        assert!(mail.trashed);
    }
}
