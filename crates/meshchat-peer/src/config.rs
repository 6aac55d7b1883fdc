//! CLI flags and the per-peer data directory layout.
//!
//! Each peer keeps its state under `<data-dir>/<host>-<port>/` with
//! `history.db`, `files.db`, and `files/` inside. Explicitly passed
//! database paths are honored as-is; only the defaults are relocated
//! into the peer directory.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use meshchat_types::{MeshError, Result};

const DEFAULT_HISTORY_DB: &str = "meshchat-history.db";
const DEFAULT_FILES_DB: &str = "meshchat-files.db";
const DEFAULT_FILES_DIR: &str = "meshchat-files";

/// Meshchat — decentralized peer-to-peer chat.
#[derive(Parser, Debug)]
#[command(name = "meshchat-peer", version, about)]
pub struct Config {
    /// Bootstrap registry base URL.
    #[arg(long, default_value = "http://127.0.0.1:8000")]
    pub bootstrap: String,

    /// Address to listen on (host:port); overrides --port.
    #[arg(long, default_value = "")]
    pub listen: String,

    /// Port to listen on when --listen is empty.
    #[arg(long, default_value_t = 9001)]
    pub port: u16,

    /// Nickname displayed in chat.
    #[arg(long, default_value = "")]
    pub nick: String,

    /// Authenticated username (overrides --nick).
    #[arg(long, default_value = "")]
    pub username: String,

    /// Bearer token for the authenticated username.
    #[arg(long, default_value = "")]
    pub token: String,

    /// Shared secret enabling frame encryption.
    #[arg(long, default_value = "")]
    pub secret: String,

    /// Registry poll interval in seconds.
    #[arg(long, default_value_t = 5)]
    pub poll: u64,

    /// Number of messages kept in the in-memory window.
    #[arg(long, default_value_t = 200)]
    pub history: usize,

    /// Disable ANSI colors in CLI output.
    #[arg(long = "no-color", default_value_t = false)]
    pub no_color: bool,

    /// Run the full-screen terminal UI instead of the line CLI.
    #[arg(long, default_value_t = false)]
    pub tui: bool,

    /// Serve the local web UI.
    #[arg(long, default_value_t = false)]
    pub web: bool,

    /// Address for the embedded web UI server.
    #[arg(long = "web-addr", default_value = "127.0.0.1:8081")]
    pub web_addr: String,

    /// Path to the persisted chat history database.
    #[arg(long = "history-db", default_value = DEFAULT_HISTORY_DB)]
    pub history_db: PathBuf,

    /// Path to the persisted file metadata database.
    #[arg(long = "files-db", default_value = DEFAULT_FILES_DB)]
    pub files_db: PathBuf,

    /// Directory for uploaded files.
    #[arg(long = "files-dir", default_value = DEFAULT_FILES_DIR)]
    pub files_dir: PathBuf,

    /// Base directory for auto-generated peer data.
    #[arg(long = "data-dir", default_value = "meshchat-data")]
    pub data_dir: PathBuf,

    /// Authentication service base URL.
    #[arg(long = "auth-api", default_value = "http://127.0.0.1:8089")]
    pub auth_api: String,
}

impl Config {
    /// Final listen address.
    pub fn listen_addr(&self) -> String {
        if self.listen.is_empty() {
            format!("127.0.0.1:{}", self.port)
        } else {
            self.listen.clone()
        }
    }

    /// Registry poll interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll)
    }

    /// Whether the line-oriented CLI surface is active.
    pub fn use_cli(&self) -> bool {
        !self.tui
    }

    /// Creates the data directories and relocates default store paths
    /// into the per-peer directory.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::ConfigError`] when a directory cannot be
    /// created; fatal at startup.
    pub fn ensure_dirs(&mut self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir).map_err(|e| MeshError::ConfigError {
            reason: format!("data dir {}: {e}", self.data_dir.display()),
        })?;
        let peer_dir = self.data_dir.join(derive_peer_dir(&self.listen_addr()));
        std::fs::create_dir_all(&peer_dir).map_err(|e| MeshError::ConfigError {
            reason: format!("peer dir {}: {e}", peer_dir.display()),
        })?;

        if self.history_db == PathBuf::from(DEFAULT_HISTORY_DB) {
            self.history_db = peer_dir.join("history.db");
        }
        if self.files_db == PathBuf::from(DEFAULT_FILES_DB) {
            self.files_db = peer_dir.join("files.db");
        }
        if self.files_dir == PathBuf::from(DEFAULT_FILES_DIR) {
            self.files_dir = peer_dir.join("files");
        }
        Ok(())
    }
}

/// Folder name for one peer, derived from its listen address.
fn derive_peer_dir(addr: &str) -> String {
    match addr.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && !port.is_empty() => {
            format!("{}-{}", sanitize_path_token(host), sanitize_path_token(port))
        }
        _ => format!("{}-peer", sanitize_path_token(addr)),
    }
}

/// Keeps alphanumerics, `-`, and `_`; maps `.` and `:` to `-`; drops
/// everything else.
fn sanitize_path_token(value: &str) -> String {
    let out: String = value
        .trim()
        .chars()
        .filter_map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => Some(c),
            '.' | ':' => Some('-'),
            _ => None,
        })
        .collect();
    if out.is_empty() {
        "peer".to_string()
    } else {
        out
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
