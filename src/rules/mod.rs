//! The rules engine: builds a rule helper per URL matching
//! `status://*/rule/*` and keeps the set in sync with configuration.
//!
//! Rules are never edited in place. When anything under the rule query
//! changes, the supervisor cancels every helper and reconstructs the whole
//! set from the tree.

mod helper;
pub mod schedule;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use chrono::FixedOffset;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::actions::ActionDispatcher;
use crate::status::{Status, WatchOutcome};

pub use helper::{HelperContext, RuleConfig, RuleError, RuleHelper};
pub use schedule::{Clock, ScheduleError, SunEvent};

/// Query that enumerates every configured rule.
pub const RULES_QUERY: &str = "status://*/rule/*";

pub struct RulesEngine {
    token: CancellationToken,
    supervisor: JoinHandle<()>,
}

impl RulesEngine {
    /// Builds helpers for the current rule set and starts watching for
    /// configuration changes.
    pub fn start(
        status: Status,
        dispatcher: Arc<dyn ActionDispatcher>,
        clock: Clock,
        zone: FixedOffset,
    ) -> RulesEngine {
        let token = CancellationToken::new();
        let supervisor = tokio::spawn(supervise(
            status,
            dispatcher,
            clock,
            zone,
            token.clone(),
        ));

        RulesEngine { token, supervisor }
    }

    /// Cancels every helper and waits for all of them to wind down. Once
    /// this returns, no further dispatches can come from this engine.
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(err) = self.supervisor.await {
            log::error!("rules supervisor did not shut down cleanly: {}", err);
        }
    }
}

async fn supervise(
    status: Status,
    dispatcher: Arc<dyn ActionDispatcher>,
    clock: Clock,
    zone: FixedOffset,
    token: CancellationToken,
) {
    loop {
        // Watch for configuration changes before reading the rule set, so a
        // write that lands mid-build still triggers a rebuild.
        let watcher = status
            .deferred(None, RULES_QUERY)
            .expect("the rules query is a valid status url");

        let helpers = build_helpers(&status);
        log::info!("rules engine running {} rules", helpers.len());

        let generation = token.child_token();
        let tasks: Vec<JoinHandle<()>> = helpers
            .into_iter()
            .map(|helper| {
                let ctx = HelperContext {
                    status: status.clone(),
                    dispatcher: Arc::clone(&dispatcher),
                    clock: clock.clone(),
                    zone,
                    token: generation.clone(),
                };
                tokio::spawn(helper.run(ctx))
            })
            .collect();

        let rebuild = tokio::select! {
            _ = token.cancelled() => false,
            outcome = watcher.wait() => outcome == WatchOutcome::Changed,
        };

        generation.cancel();
        for task in tasks {
            if let Err(err) = task.await {
                log::error!("rule helper did not shut down cleanly: {}", err);
            }
        }

        if !rebuild {
            return;
        }

        log::info!("rule configuration changed, rebuilding helpers");
    }
}

fn build_helpers(status: &Status) -> Vec<RuleHelper> {
    let urls = match status.get_matching_urls(RULES_QUERY) {
        Ok(urls) => urls,
        Err(err) => {
            log::error!("could not enumerate rules: {}", err);
            return Vec::new();
        }
    };

    let mut helpers = Vec::new();
    for url in urls {
        let value = match status.get(&url) {
            Ok(value) => value,
            Err(err) => {
                log::error!("could not read rule {}: {}", url, err);
                continue;
            }
        };

        match RuleHelper::from_value(&url, &value) {
            Ok(helper) => helpers.push(helper),
            Err(err) => log::error!("skipping rule: {}", err),
        }
    }

    helpers
}
