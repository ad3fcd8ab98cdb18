pub mod actions;
pub mod adapters;
pub mod cli;
pub mod config;
pub mod logging;
pub mod net;
pub mod poller;
pub mod rules;
pub mod session;
pub mod status;
pub mod web;

pub use actions::{ActionDispatcher, ActionError, ActionManager};
pub use adapters::{Adapter, WebUpdatable};
pub use config::{load_server_config, ConfigError, ServerConfig};
pub use rules::{Clock, RulesEngine};
pub use session::Session;
pub use status::{Status, StatusError, WatchOutcome, Watcher};
pub use web::LiveServer;
