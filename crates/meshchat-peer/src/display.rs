//! Line-oriented CLI display sink.

use std::io::Write;
use std::sync::Mutex;

use meshchat_node::Sink;
use meshchat_proto::Record;
use meshchat_types::{Notification, Presence};

const ANSI_RESET: &str = "\x1b[0m";
const ANSI_TIME: &str = "\x1b[36m";
const ANSI_NAME: &str = "\x1b[33m";
const ANSI_DM: &str = "\x1b[35m";
const ANSI_SYS: &str = "\x1b[32m";

/// Renders chat events to stdout, one line per event.
pub struct CliDisplay {
    color: bool,
    out: Mutex<()>,
}

impl CliDisplay {
    /// Creates a display; `color` enables ANSI escapes.
    pub fn new(color: bool) -> Self {
        Self {
            color,
            out: Mutex::new(()),
        }
    }

    fn println(&self, line: &str) {
        let _guard = self.out.lock().expect("stdout lock");
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "{line}");
    }

    fn format_line(&self, record: &Record) -> String {
        let ts = record.timestamp.format("%H:%M:%S");
        let label = match record.kind.as_str() {
            "dm" => " (dm)",
            "file" => " (file)",
            _ => "",
        };
        let mut line = if self.color {
            let name_color = if record.kind == "dm" { ANSI_DM } else { ANSI_NAME };
            format!(
                "{ANSI_TIME}[{ts}]{ANSI_RESET} {name_color}{}{label}{ANSI_RESET}: {}",
                record.from, record.content
            )
        } else {
            format!("[{ts}] {}{label}: {}", record.from, record.content)
        };
        if let Some(extras) = format_attachments(record) {
            line.push(' ');
            line.push_str(&extras);
        }
        line
    }
}

impl Sink for CliDisplay {
    fn show_message(&self, record: &Record) {
        self.println(&self.format_line(record));
    }

    fn show_system(&self, text: &str) {
        let ts = chrono::Local::now().format("%H:%M:%S");
        if self.color {
            self.println(&format!(
                "{ANSI_TIME}[{ts}]{ANSI_RESET} {ANSI_SYS}SYSTEM{ANSI_RESET}: {text}"
            ));
        } else {
            self.println(&format!("[{ts}] SYSTEM: {text}"));
        }
    }

    fn update_peers(&self, peers: &[Presence]) {
        if peers.is_empty() {
            return;
        }
        let names: Vec<&str> = peers
            .iter()
            .map(|p| {
                if p.name.is_empty() {
                    p.addr.as_str()
                } else {
                    p.name.as_str()
                }
            })
            .collect();
        let listing = format!("online: {}", names.join(", "));
        if self.color {
            self.println(&format!("{ANSI_SYS}[peers]{ANSI_RESET} {listing}"));
        } else {
            self.println(&format!("[peers] {listing}"));
        }
    }

    fn show_notification(&self, note: &Notification) {
        let ts = note.timestamp.format("%H:%M:%S");
        let prefix = if note.level.is_empty() {
            "NOTIFY".to_string()
        } else {
            note.level.to_uppercase()
        };
        let line = format!("[{ts}] {prefix}: {}", note.text);
        if self.color {
            self.println(&format!("{ANSI_SYS}{line}{ANSI_RESET}"));
        } else {
            self.println(&line);
        }
    }
}

fn format_attachments(record: &Record) -> Option<String> {
    if record.attachments.is_empty() {
        return None;
    }
    let names: Vec<&str> = record
        .attachments
        .iter()
        .map(|a| if a.name.is_empty() { a.id.as_str() } else { a.name.as_str() })
        .collect();
    Some(format!("[files: {}]", names.join(", ")))
}

/// Whether ANSI coloring should be used: disabled by flag, by the
/// `NO_COLOR` convention, or when stdout is not a terminal.
pub fn should_use_color(disable: bool) -> bool {
    if disable || std::env::var_os("NO_COLOR").is_some() {
        return false;
    }
    use std::io::IsTerminal;
    std::io::stdout().is_terminal()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kind: &str, from: &str, content: &str) -> Record {
        Record {
            kind: kind.into(),
            from: from.into(),
            content: content.into(),
            timestamp: chrono::Utc::now(),
            ..Record::default()
        }
    }

    #[test]
    fn plain_format_includes_dm_label() {
        let display = CliDisplay::new(false);
        let line = display.format_line(&record("dm", "alice", "psst"));
        assert!(line.contains("alice (dm): psst"));
    }

    #[test]
    fn colored_format_wraps_name() {
        let display = CliDisplay::new(true);
        let line = display.format_line(&record("chat", "alice", "hi"));
        assert!(line.contains(ANSI_NAME));
        assert!(line.contains(ANSI_RESET));
    }

    #[test]
    fn attachments_are_listed_by_name() {
        let mut rec = record("file", "alice", "shared a file: notes.txt");
        rec.attachments.push(meshchat_proto::Attachment {
            id: "ab".into(),
            name: "notes.txt".into(),
            size: 1,
            ..Default::default()
        });
        let display = CliDisplay::new(false);
        assert!(display.format_line(&rec).contains("[files: notes.txt]"));
    }

    #[test]
    fn no_color_env_is_honored() {
        // The flag alone must force colors off regardless of terminal.
        assert!(!should_use_color(true));
    }
}
