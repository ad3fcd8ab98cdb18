//! Contains all of the state for one running controller: the status tree,
//! the action manager, the rules engine, and the configured adapters.
//!
//! Nothing here is specific to the HTTP interface. The web layer is just
//! one consumer of a `Session`; an IPC or embedded consumer would talk to
//! the same object.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use thiserror::Error;
use tokio::sync::watch;

use crate::actions::{ActionDispatcher, ActionManager};
use crate::adapters::{build_adapters, Adapter, AdapterError, WebUpdatable};
use crate::config::ServerConfig;
use crate::logging::LogBuffer;
use crate::net::SystemPinger;
use crate::poller::{HostPoller, DEFAULT_POLL_PERIOD};
use crate::rules::{Clock, RulesEngine};
use crate::status::{Status, StatusError};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Status(#[from] StatusError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error("could not create {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub struct Session {
    /// When the session was started. Used only for user-facing diagnostics.
    start_time: Instant,

    config: ServerConfig,
    status: Status,
    actions: Arc<ActionManager>,
    clock: Clock,
    web_updatable: Arc<WebUpdatable>,
    log_buffer: Arc<LogBuffer>,

    /// Adapters keep filesystem watcher threads alive; stopped on shutdown.
    adapters: Mutex<Vec<Adapter>>,

    /// Engine handle, taken by `shutdown`.
    rules: Mutex<Option<RulesEngine>>,

    /// Reachability poller handle, taken by `shutdown`.
    poller: Mutex<Option<HostPoller>>,

    restart_tx: watch::Sender<bool>,
    restart_rx: watch::Receiver<bool>,
}

impl Session {
    /// Builds the tree from configuration, starts every adapter, and brings
    /// up the rules engine. Must run inside a tokio runtime.
    pub fn new(config: ServerConfig, log_buffer: Arc<LogBuffer>) -> Result<Session, SessionError> {
        let start_time = Instant::now();
        let status = Status::new();

        // The whole server config is visible in the tree, like any other
        // adapter mount.
        status.set("status://server", config.raw.clone())?;

        let web_updatable = Arc::new(WebUpdatable::default());
        let adapters = build_adapters(&status, &web_updatable, &config.config_dir)?;

        std::fs::create_dir_all(&config.downloads).map_err(|source| SessionError::Io {
            path: config.downloads.clone(),
            source,
        })?;

        let actions = Arc::new(ActionManager::new(
            status.clone(),
            config.downloads.clone(),
            &config.smtp_host,
        ));

        let clock = Clock::system();
        let rules = RulesEngine::start(
            status.clone(),
            Arc::clone(&actions) as Arc<dyn ActionDispatcher>,
            clock.clone(),
            config.timezone,
        );

        let poller = HostPoller::start(
            status.clone(),
            Arc::new(SystemPinger),
            DEFAULT_POLL_PERIOD,
        );

        let (restart_tx, restart_rx) = watch::channel(false);

        Ok(Session {
            start_time,
            config,
            status,
            actions,
            clock,
            web_updatable,
            log_buffer,
            adapters: Mutex::new(adapters),
            rules: Mutex::new(Some(rules)),
            poller: Mutex::new(Some(poller)),
            restart_tx,
            restart_rx,
        })
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn dispatcher(&self) -> Arc<dyn ActionDispatcher> {
        Arc::clone(&self.actions) as Arc<dyn ActionDispatcher>
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn web_updatable(&self) -> &WebUpdatable {
        &self.web_updatable
    }

    pub fn log_buffer(&self) -> &LogBuffer {
        &self.log_buffer
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn start_time(&self) -> Instant {
        self.start_time
    }

    /// Asks the serve loop to exit with a restart.
    pub fn request_restart(&self) {
        log::info!("restart requested");
        let _ = self.restart_tx.send(true);
    }

    /// A receiver that resolves when a restart has been requested.
    pub fn restart_signal(&self) -> watch::Receiver<bool> {
        self.restart_rx.clone()
    }

    /// Stops the rules engine and every adapter. After this resolves no
    /// rule can fire and no adapter writes into the tree.
    pub async fn shutdown(&self) {
        let rules = self.rules.lock().unwrap().take();
        if let Some(rules) = rules {
            rules.stop().await;
        }

        let poller = self.poller.lock().unwrap().take();
        if let Some(poller) = poller {
            poller.stop().await;
        }

        let adapters: Vec<Adapter> = std::mem::take(&mut *self.adapters.lock().unwrap());
        for adapter in adapters {
            adapter.stop(&self.status);
        }
    }
}
