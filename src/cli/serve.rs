use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::runtime::Runtime;

use crate::config::load_server_config;
use crate::logging::LogBuffer;
use crate::session::Session;
use crate::web::{LiveServer, ServerExitReason};

use super::resolve_path;

const DEFAULT_BIND_ADDRESS: Ipv4Addr = Ipv4Addr::new(0, 0, 0, 0);

/// Run the home-automation controller.
#[derive(Debug, Parser)]
pub struct ServeCommand {
    /// Directory containing `server.json`, the static front-end, and any
    /// adapter files. Defaults to the current directory.
    #[clap(default_value = ".")]
    pub config_dir: PathBuf,

    /// The IP address to listen on. Defaults to `0.0.0.0`.
    #[clap(long)]
    pub address: Option<IpAddr>,

    /// The port to listen on. Defaults to the configuration's preference,
    /// or `8080` if it has none.
    #[clap(long)]
    pub port: Option<u16>,
}

impl ServeCommand {
    pub fn run(self, log_buffer: Arc<LogBuffer>) -> anyhow::Result<()> {
        let config_dir = resolve_path(&self.config_dir);
        let config = load_server_config(&config_dir)?;

        let ip = self.address.unwrap_or(DEFAULT_BIND_ADDRESS.into());
        let port = self.port.unwrap_or(config.port);
        let addr: SocketAddr = (ip, port).into();
        let host = if ip.is_loopback() || ip.is_unspecified() {
            "localhost".to_owned()
        } else {
            ip.to_string()
        };

        let rt = Runtime::new()?;
        rt.block_on(async move {
            let session = Arc::new(Session::new(config, log_buffer)?);
            let server = LiveServer::new(Arc::clone(&session));

            log::info!("Listening: http://{}:{}", host, port);

            match server.serve(addr).await? {
                ServerExitReason::Restart => {
                    log::info!("Restart requested, shutting down.");
                    session.shutdown().await;
                }
            }

            Ok(())
        })
    }
}
