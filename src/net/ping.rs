//! Host reachability probes via the system `ping` binary. Shelling out
//! keeps the process free of raw-socket privileges.

use std::process::Stdio;

use async_trait::async_trait;

const ATTEMPTS: u32 = 3;

#[async_trait]
pub trait Pinger: Send + Sync {
    /// `true` when the host answered.
    async fn ping(&self, hostname: &str) -> bool;
}

pub struct SystemPinger;

#[async_trait]
impl Pinger for SystemPinger {
    async fn ping(&self, hostname: &str) -> bool {
        log::debug!("pinging {}", hostname);

        let status = tokio::process::Command::new("ping")
            .args(["-q", "-c", &ATTEMPTS.to_string(), hostname])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match status {
            Ok(status) => status.success(),
            Err(err) => {
                log::warn!("could not run ping for {}: {}", hostname, err);
                false
            }
        }
    }
}
