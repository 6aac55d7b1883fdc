//! Local command language.
//!
//! Lines beginning with `/` are commands; everything else floods as
//! chat. Shared by the CLI reader, the TUI input field, and web
//! socket clients.

use meshchat_proto::Record;
use meshchat_types::{MeshError, Result};

use crate::runtime::Runtime;

const HELP_LINE: &str =
    "commands: /peers /history /save /load /msg /file /nick /stats /block /unblock /blocked /quit";

/// Default number of records replayed by `/load` without an argument.
const DEFAULT_LOAD_LIMIT: usize = 20;

impl Runtime {
    /// Processes one line of local input.
    pub async fn process_line(&self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        if line.starts_with('/') {
            self.handle_command(line).await;
            return;
        }
        self.send_chat_message(line).await;
    }

    async fn handle_command(&self, line: &str) {
        let mut parts = line.split_whitespace();
        let Some(command) = parts.next() else {
            return;
        };
        match command {
            "/peers" => {
                let connected = self.inner.cm.conns_list();
                let desired = self.inner.dialer.desired();
                self.inner.sink.show_system(&format!(
                    "connected: {connected:?} | desired: {desired:?}"
                ));
            }
            "/history" => {
                for record in self.inner.history.all() {
                    self.inner.sink.show_message(&record);
                }
            }
            "/save" => {
                let Some(path) = parts.next() else {
                    self.inner.sink.show_system("usage: /save <path>");
                    return;
                };
                match save_history_to_file(&self.inner.history.all(), path) {
                    Ok(()) => self.inner.sink.show_system("history saved"),
                    Err(e) => self.inner.sink.show_system(&format!("save failed: {e}")),
                }
            }
            "/load" => {
                let limit = parts
                    .next()
                    .and_then(|raw| raw.parse::<usize>().ok())
                    .unwrap_or(DEFAULT_LOAD_LIMIT);
                let Some(store) = &self.inner.store else {
                    self.inner.sink.show_system("history persistence disabled");
                    return;
                };
                match store.recent(limit) {
                    Ok(records) => {
                        // recent() is newest-first; replay oldest-first.
                        for record in records.iter().rev() {
                            self.inner.sink.show_message(record);
                        }
                    }
                    Err(e) => self.inner.sink.show_system(&format!("load failed: {e}")),
                }
            }
            "/msg" => {
                let Some(target) = parts.next() else {
                    self.inner.sink.show_system("usage: /msg <target> <message>");
                    return;
                };
                let content = remainder_after(line, target);
                if content.is_empty() {
                    self.inner.sink.show_system("message required");
                    return;
                }
                self.send_direct_message(target, &content).await;
            }
            "/file" => {
                let Some(path) = parts.next() else {
                    self.inner.sink.show_system("usage: /file <path> [target]");
                    return;
                };
                let target = parts.next().unwrap_or_default();
                if let Err(e) = self.send_file_from_path(path, target).await {
                    self.inner
                        .sink
                        .show_system(&format!("file send failed: {e}"));
                }
            }
            "/nick" => {
                let Some(name) = parts.next() else {
                    self.inner.sink.show_system("usage: /nick <name>");
                    return;
                };
                if self.inner.identity.set_display(name) {
                    self.inner
                        .sink
                        .show_system(&format!("nickname set to {name}"));
                    self.broadcast_handshake().await;
                }
            }
            "/stats" => {
                let snapshot = self.inner.metrics.snapshot();
                self.inner.sink.show_system(&snapshot.to_string());
            }
            "/block" => {
                let Some(token) = parts.next() else {
                    self.inner.sink.show_system("usage: /block <name|addr>");
                    return;
                };
                self.inner.blocklist.add(token);
                self.inner.sink.show_system(&format!("blocked {token}"));
            }
            "/unblock" => {
                let Some(token) = parts.next() else {
                    self.inner.sink.show_system("usage: /unblock <name|addr>");
                    return;
                };
                self.inner.blocklist.remove(token);
                self.inner.sink.show_system(&format!("unblocked {token}"));
            }
            "/blocked" => {
                self.inner
                    .sink
                    .show_system(&format!("blocked: {:?}", self.inner.blocklist.list()));
            }
            "/quit" => {
                self.inner.sink.show_system("bye");
                self.request_shutdown();
            }
            _ => self.inner.sink.show_system(HELP_LINE),
        }
    }
}

/// Everything after the first occurrence of `token` in `line`.
fn remainder_after(line: &str, token: &str) -> String {
    match line.find(token) {
        Some(idx) => line[idx + token.len()..].trim().to_string(),
        None => String::new(),
    }
}

fn save_history_to_file(records: &[Record], path: &str) -> Result<()> {
    let data = serde_json::to_vec_pretty(records).map_err(MeshError::storage)?;
    std::fs::write(path, data).map_err(MeshError::storage)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::recording_runtime;

    #[tokio::test]
    async fn bare_line_floods_as_chat() {
        let (rt, sink) = recording_runtime("alice").await;
        rt.process_line("hello everyone").await;
        assert_eq!(sink.messages(), 1);
        assert_eq!(rt.inner.metrics.snapshot().sent, 1);
    }

    #[tokio::test]
    async fn empty_line_is_ignored() {
        let (rt, sink) = recording_runtime("alice").await;
        rt.process_line("   ").await;
        assert_eq!(sink.messages(), 0);
    }

    #[tokio::test]
    async fn msg_command_sends_dm_with_full_text() {
        let (rt, sink) = recording_runtime("alice").await;
        rt.process_line("/msg bob hello there bob").await;
        let dm = sink.last_message().expect("dm");
        assert_eq!(dm.kind, "dm");
        assert_eq!(dm.content, "hello there bob");
    }

    #[tokio::test]
    async fn msg_without_text_prints_usage() {
        let (rt, sink) = recording_runtime("alice").await;
        rt.process_line("/msg bob").await;
        assert!(sink
            .system_lines()
            .iter()
            .any(|l| l.contains("message required") || l.contains("usage")));
        assert_eq!(sink.messages(), 0);
    }

    #[tokio::test]
    async fn nick_change_announces_once() {
        let (rt, sink) = recording_runtime("alice").await;
        rt.process_line("/nick alicia").await;
        assert_eq!(rt.inner.identity.get(), "alicia");
        assert!(sink
            .system_lines()
            .iter()
            .any(|l| l.contains("nickname set to alicia")));

        // Same nick again: no change, no announcement.
        rt.process_line("/nick alicia").await;
        let announcements = sink
            .system_lines()
            .iter()
            .filter(|l| l.contains("nickname set"))
            .count();
        assert_eq!(announcements, 1);
    }

    #[tokio::test]
    async fn block_unblock_roundtrip() {
        let (rt, _sink) = recording_runtime("alice").await;
        rt.process_line("/block mallory").await;
        assert!(rt.inner.blocklist.blocks("mallory", ""));
        rt.process_line("/unblock mallory").await;
        assert!(!rt.inner.blocklist.blocks("mallory", ""));
    }

    #[tokio::test]
    async fn stats_prints_counters() {
        let (rt, sink) = recording_runtime("alice").await;
        rt.process_line("/stats").await;
        assert!(sink
            .system_lines()
            .iter()
            .any(|l| l.starts_with("sent=")));
    }

    #[tokio::test]
    async fn unknown_command_prints_help() {
        let (rt, sink) = recording_runtime("alice").await;
        rt.process_line("/frobnicate").await;
        assert!(sink.system_lines().iter().any(|l| l.contains("commands:")));
    }

    #[tokio::test]
    async fn quit_requests_shutdown() {
        let (rt, _sink) = recording_runtime("alice").await;
        let mut shutdown_rx = rt.shutdown_rx();
        rt.process_line("/quit").await;
        assert!(*shutdown_rx.borrow_and_update());
    }

    #[tokio::test]
    async fn save_writes_pretty_json() {
        let (rt, sink) = recording_runtime("alice").await;
        rt.send_chat_message("for the archive").await;

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("history.json");
        rt.process_line(&format!("/save {}", path.display())).await;

        assert!(sink.system_lines().iter().any(|l| l == "history saved"));
        let data = std::fs::read_to_string(&path).expect("saved file");
        assert!(data.contains("for the archive"));
    }

    #[test]
    fn remainder_after_extracts_trailing_text() {
        assert_eq!(remainder_after("/msg bob  hi there", "bob"), "hi there");
        assert_eq!(remainder_after("/msg bob", "bob"), "");
    }
}
