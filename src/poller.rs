//! Periodic reachability polling: every configured host gets pinged on a
//! fixed cadence and its `up` flag written back into the status tree, so
//! rules and the front-end can react to hosts coming and going.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::net::Pinger;
use crate::status::Status;

/// Query that enumerates every configured host.
const HOSTS_QUERY: &str = "status://*/host/*";

pub const DEFAULT_POLL_PERIOD: Duration = Duration::from_secs(10);

pub struct HostPoller {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl HostPoller {
    /// Starts polling immediately and then on every `period` tick.
    pub fn start(status: Status, pinger: Arc<dyn Pinger>, period: Duration) -> HostPoller {
        let token = CancellationToken::new();
        let task_token = token.clone();

        let task = tokio::spawn(async move {
            let mut ticks = tokio::time::interval(period);

            loop {
                tokio::select! {
                    _ = task_token.cancelled() => return,
                    _ = ticks.tick() => poll_all(&status, pinger.as_ref()).await,
                }
            }
        });

        HostPoller { token, task }
    }

    /// Stops the poll loop; no further probe results land after this
    /// resolves.
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(err) = self.task.await {
            log::error!("host poller did not shut down cleanly: {}", err);
        }
    }
}

/// Probes every host once, concurrently, and stores the results.
async fn poll_all(status: &Status, pinger: &dyn Pinger) {
    let urls = match status.get_matching_urls(HOSTS_QUERY) {
        Ok(urls) => urls,
        Err(err) => {
            log::error!("could not enumerate hosts: {}", err);
            return;
        }
    };

    let probes = urls.iter().map(|url| {
        // The host id is the trailing path segment.
        let hostname = url.rsplit('/').next().unwrap_or(url).to_owned();
        async move {
            let up = pinger.ping(&hostname).await;
            (url, hostname, up)
        }
    });

    for (url, hostname, up) in join_all(probes).await {
        log::debug!("host {} is {}", hostname, if up { "up" } else { "down" });
        if let Err(err) = status.set(&format!("{}/up", url), serde_json::json!(up)) {
            log::error!("could not record reachability for {}: {}", url, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[derive(Default)]
    struct CountingPinger {
        probes: AtomicUsize,
    }

    #[async_trait]
    impl Pinger for CountingPinger {
        async fn ping(&self, hostname: &str) -> bool {
            self.probes.fetch_add(1, Ordering::SeqCst);
            hostname != "beacon"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn poller_records_reachability_per_host() {
        let status = Status::from_value(json!({
            "net": {
                "host": {
                    "tv": {},
                    "beacon": {},
                },
            },
        }));
        let pinger = Arc::new(CountingPinger::default());

        let watcher = status.deferred(None, "status://net/host/*/up").unwrap();
        let poller = HostPoller::start(
            status.clone(),
            Arc::clone(&pinger) as Arc<dyn Pinger>,
            Duration::from_secs(10),
        );

        // The first poll happens right away.
        watcher.wait().await;
        assert_eq!(status.get("status://net/host/tv/up").unwrap(), json!(true));
        assert_eq!(
            status.get("status://net/host/beacon/up").unwrap(),
            json!(false)
        );

        poller.stop().await;
        let probes = pinger.probes.load(Ordering::SeqCst);
        assert!(probes >= 2, "expected both hosts probed, saw {}", probes);

        // Nothing runs after stop, even as time passes.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(pinger.probes.load(Ordering::SeqCst), probes);
    }

    #[tokio::test(start_paused = true)]
    async fn poller_with_no_hosts_is_idle() {
        let status = Status::new();
        let pinger = Arc::new(CountingPinger::default());

        let poller = HostPoller::start(
            status.clone(),
            Arc::clone(&pinger) as Arc<dyn Pinger>,
            Duration::from_secs(10),
        );

        tokio::time::sleep(Duration::from_secs(35)).await;
        poller.stop().await;

        assert_eq!(pinger.probes.load(Ordering::SeqCst), 0);
        assert_eq!(status.pending_watchers(), 0);
    }
}
