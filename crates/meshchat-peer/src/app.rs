//! Peer assembly and lifecycle.
//!
//! [`App::build`] constructs every subsystem from the parsed config;
//! [`App::start`] launches the background loops and UI surfaces;
//! [`App::wait`] blocks until an interrupt or `/quit`, then runs the
//! ordered, idempotent shutdown sequence.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use meshchat_crypto::SecureBox;
use meshchat_net::{ConnManager, DialScheduler};
use meshchat_node::{AckTracker, Identity, MultiSink, Runtime, RuntimeOptions, Sink};
use meshchat_proto::Record;
use meshchat_storage::{FileStore, HistoryStore};
use meshchat_types::{Notification, Presence, Result};
use meshchat_web::{HistoryProvider, WebBridge, WebBridgeOptions, WebClients, WebEvent};
use tokio::io::AsyncBufReadExt;
use tokio::sync::{mpsc, watch};

use crate::config::Config;
use crate::display::{should_use_color, CliDisplay};
use crate::tui::TuiDisplay;

// ---------------------------------------------------------------------------
// Web adapters
// ---------------------------------------------------------------------------

/// Presents the shared web client registries as a runtime sink.
struct WebSink(Arc<WebClients>);

impl Sink for WebSink {
    fn show_message(&self, record: &Record) {
        self.0.publish(&WebEvent::Message {
            message: record.clone(),
        });
    }

    fn show_system(&self, text: &str) {
        self.0.publish(&WebEvent::System {
            text: text.to_string(),
        });
    }

    fn update_peers(&self, peers: &[Presence]) {
        self.0.publish(&WebEvent::Peers {
            users: peers.to_vec(),
        });
    }

    fn show_notification(&self, note: &Notification) {
        self.0.publish(&WebEvent::Notification {
            notification: note.clone(),
        });
    }
}

/// Exposes the runtime's history window to the web bridge.
struct RuntimeHistory(Runtime);

impl HistoryProvider for RuntimeHistory {
    fn all(&self) -> Vec<Record> {
        self.0.history_all()
    }
}

// ---------------------------------------------------------------------------
// App
// ---------------------------------------------------------------------------

/// A fully wired peer instance.
pub struct App {
    runtime: Runtime,
    cm: Arc<ConnManager>,
    dialer: Arc<DialScheduler>,
    ack: Arc<AckTracker>,
    web: Option<Arc<WebBridge>>,
    tui: Option<Arc<TuiDisplay>>,
    incoming_rx: Option<mpsc::Receiver<Record>>,
    shutdown_tx: watch::Sender<bool>,
    use_cli: bool,
    stopped: AtomicBool,
}

impl App {
    /// Builds every subsystem. Startup-fatal failures (crypto init,
    /// listener bind, data directories) propagate as errors.
    pub async fn build(config: &Config) -> Result<App> {
        let listen_addr = config.listen_addr();

        let secure = SecureBox::new(&config.secret)?;
        let (cm, incoming_rx) = ConnManager::new(listen_addr.clone(), secure);
        let cm = Arc::new(cm);
        let bound = cm.start_listen().await?;
        let self_addr = bound.to_string();

        let store = match HistoryStore::open(&config.history_db) {
            Ok(store) => Some(store),
            Err(e) => {
                tracing::warn!(error = %e, "history store unavailable, continuing in-memory");
                None
            }
        };
        let files = if config.web {
            match FileStore::open(&config.files_db, config.files_dir.clone()) {
                Ok(files) => Some(Arc::new(files)),
                Err(e) => {
                    tracing::warn!(error = %e, "file store unavailable, uploads disabled");
                    None
                }
            }
        } else {
            None
        };

        let ack = AckTracker::spawn(Arc::clone(&cm) as _);
        let dialer = DialScheduler::new(Arc::clone(&cm) as _, self_addr.clone());

        let initial_name = if config.username.is_empty() {
            config.nick.clone()
        } else {
            config.username.clone()
        };
        let identity = Identity::new(&initial_name, &self_addr);
        if !config.username.is_empty() && !config.token.is_empty() {
            identity.set_auth(&config.username, &config.token);
        }

        let web_clients = config.web.then(|| Arc::new(WebClients::new()));
        let mut sinks: Vec<Option<Arc<dyn Sink>>> = Vec::new();

        let (shutdown_tx, _) = watch::channel(false);

        // The TUI needs the runtime for input; wire it after
        // construction through the submit callback's late clone.
        let cli_sink: Option<Arc<dyn Sink>> = config
            .use_cli()
            .then(|| Arc::new(CliDisplay::new(should_use_color(config.no_color))) as Arc<dyn Sink>);
        sinks.push(cli_sink);
        sinks.push(
            web_clients
                .as_ref()
                .map(|clients| Arc::new(WebSink(Arc::clone(clients))) as Arc<dyn Sink>),
        );

        // TUI sink slot is filled below once the runtime exists.
        let runtime_slot: Arc<std::sync::OnceLock<Runtime>> = Arc::new(std::sync::OnceLock::new());

        let tui = if config.tui {
            let slot = Arc::clone(&runtime_slot);
            // The TUI loop runs on its own thread; spawn through the
            // captured handle, not the thread-local runtime context.
            let handle = tokio::runtime::Handle::current();
            let submit = Arc::new(move |line: String| {
                if let Some(rt) = slot.get() {
                    let rt = rt.clone();
                    handle.spawn(async move { rt.process_line(&line).await });
                }
            });
            let quit_slot = Arc::clone(&runtime_slot);
            let on_quit = Arc::new(move || {
                if let Some(rt) = quit_slot.get() {
                    rt.request_shutdown();
                }
            });
            let tui = TuiDisplay::new(submit, on_quit);
            sinks.push(Some(Arc::clone(&tui) as Arc<dyn Sink>));
            Some(tui)
        } else {
            None
        };

        let runtime = Runtime::new(RuntimeOptions {
            cm: Arc::clone(&cm),
            cache_ttl: std::time::Duration::ZERO,
            history_size: config.history,
            store,
            files: files.clone(),
            ack: Arc::clone(&ack),
            dialer: Arc::clone(&dialer),
            sink: Arc::new(MultiSink::new(sinks)),
            identity,
            self_addr,
            web_addr: config.web.then(|| config.web_addr.clone()),
            bootstrap_url: (!config.bootstrap.is_empty()).then(|| config.bootstrap.clone()),
            poll_interval: config.poll_interval(),
            auth_api: (!config.auth_api.is_empty()).then(|| config.auth_api.clone()),
            shutdown_tx: shutdown_tx.clone(),
        });
        let _ = runtime_slot.set(runtime.clone());
        runtime.record_self();

        let web = if let Some(clients) = web_clients {
            let submit_rt = runtime.clone();
            let session_rt = runtime.clone();
            let share_rt = runtime.clone();
            let bridge = WebBridge::new(WebBridgeOptions {
                addr: config.web_addr.clone(),
                clients,
                files,
                history: Arc::new(RuntimeHistory(runtime.clone())),
                submit: Arc::new(move |line: String| {
                    let rt = submit_rt.clone();
                    tokio::spawn(async move { rt.process_line(&line).await });
                }),
                session: Arc::new(move |username: &str, token: &str| {
                    session_rt.web_login(username, token);
                    Ok(())
                }),
                share: Some(Arc::new(move |record, target: String| {
                    let rt = share_rt.clone();
                    tokio::spawn(async move {
                        if let Err(e) = rt.share_file(record, &target).await {
                            tracing::warn!(error = %e, "mesh share failed");
                        }
                    });
                })),
            });
            Some(Arc::new(bridge))
        } else {
            None
        };

        Ok(App {
            runtime,
            cm,
            dialer,
            ack,
            web,
            tui,
            incoming_rx: Some(incoming_rx),
            shutdown_tx,
            use_cli: config.use_cli(),
            stopped: AtomicBool::new(false),
        })
    }

    /// Launches background loops and UI surfaces. Runs at most once.
    pub async fn start(&mut self) -> Result<()> {
        let Some(incoming_rx) = self.incoming_rx.take() else {
            return Ok(());
        };

        if let Some(web) = &self.web {
            web.start().await?;
        }

        if let Err(e) = self.runtime.register_self().await {
            tracing::warn!(error = %e, "registry registration failed");
        }
        self.runtime.connect_bootstrap_peers().await;
        self.runtime.broadcast_handshake().await;

        tokio::spawn(Arc::clone(&self.dialer).run());
        let rt = self.runtime.clone();
        tokio::spawn(async move { rt.handle_incoming(incoming_rx).await });
        let rt = self.runtime.clone();
        tokio::spawn(async move { rt.poll_bootstrap_loop().await });
        let rt = self.runtime.clone();
        tokio::spawn(async move { rt.gossip_loop().await });
        let rt = self.runtime.clone();
        tokio::spawn(async move { rt.presence_loop().await });
        let rt = self.runtime.clone();
        tokio::spawn(async move { rt.refresh_peers_loop().await });

        if self.use_cli {
            let rt = self.runtime.clone();
            tokio::spawn(async move { read_cli_input(rt).await });
        }
        if let Some(tui) = &self.tui {
            let tui = Arc::clone(tui);
            let shutdown_rx = self.shutdown_tx.subscribe();
            std::thread::spawn(move || {
                if let Err(e) = tui.run(shutdown_rx) {
                    tracing::error!(error = %e, "tui error");
                }
            });
        }
        Ok(())
    }

    /// Blocks until an interrupt signal or `/quit`, then shuts down.
    pub async fn wait(&self) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received, shutting down");
            }
            _ = shutdown_rx.changed() => {
                tracing::info!("shutdown requested, shutting down");
            }
        }
        self.shutdown();
    }

    /// Ordered, idempotent shutdown: cancel the root signal, then stop
    /// the web bridge, dial scheduler, ack tracker, connection
    /// manager, and stores.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(true);
        if let Some(web) = &self.web {
            web.stop();
        }
        self.dialer.close();
        self.ack.stop();
        self.cm.stop();
        self.runtime.close_stores();
    }
}

/// Feeds stdin lines into the runtime's line processor.
async fn read_cli_input(runtime: Runtime) {
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => runtime.process_line(&line).await,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(error = %e, "stdin read failed");
                return;
            }
        }
    }
}
