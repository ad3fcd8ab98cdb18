//! A rule helper is the long-lived task behind one configured rule. Each
//! variant arms a one-shot (a timer deadline or a status watcher), fires,
//! and re-arms until cancelled. Fire errors are logged and never kill the
//! helper.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::actions::ActionDispatcher;
use crate::status::{Status, WatchOutcome};

use super::schedule::{
    next_daily, next_interval, next_sun_event, parse_interval, parse_time_of_day, Clock, SunEvent,
};

const LATITUDE_URL: &str = "status://server/latitude";
const LONGITUDE_URL: &str = "status://server/longitude";

/// Fallback delay when a timer rule cannot compute its next fire time
/// (typically a missing observer position for sunrise/sunset).
fn retry_delay() -> chrono::Duration {
    chrono::Duration::minutes(10)
}

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("bad rule at {url}: {reason}")]
    BadRule { url: String, reason: String },
}

/// Wire shape of a rule's configuration, dispatched on the `behavior` tag.
/// Extra fields (`action` among them) are carried in the status tree and
/// ignored here.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "behavior", rename_all = "lowercase")]
pub enum RuleConfig {
    Interval { time: String },
    Daily { time: String },
    Watch { value: String, trigger: Option<Value> },
}

#[derive(Debug, Clone)]
enum HelperKind {
    Interval {
        every: chrono::Duration,
    },
    Daily {
        at: DailyTime,
    },
    Watch {
        value_url: String,
        trigger: Option<Value>,
    },
}

#[derive(Debug, Clone)]
enum DailyTime {
    Sunrise,
    Sunset,
    At(chrono::NaiveTime),
}

/// Everything a helper needs to run, cloned per helper task.
#[derive(Clone)]
pub struct HelperContext {
    pub status: Status,
    pub dispatcher: Arc<dyn ActionDispatcher>,
    pub clock: Clock,
    pub zone: FixedOffset,
    pub token: CancellationToken,
}

#[derive(Debug)]
pub struct RuleHelper {
    url: String,
    kind: HelperKind,
}

impl RuleHelper {
    /// Builds a helper from the rule stored at `url`, validating the
    /// variant-specific fields up front.
    pub fn from_value(url: &str, value: &Value) -> Result<RuleHelper, RuleError> {
        let bad = |reason: String| RuleError::BadRule {
            url: url.to_owned(),
            reason,
        };

        let config: RuleConfig =
            serde_json::from_value(value.clone()).map_err(|err| bad(err.to_string()))?;

        let kind = match config {
            RuleConfig::Interval { time } => HelperKind::Interval {
                every: parse_interval(&time).map_err(|err| bad(err.to_string()))?,
            },
            RuleConfig::Daily { time } => {
                let at = match time.as_str() {
                    "sunrise" => DailyTime::Sunrise,
                    "sunset" => DailyTime::Sunset,
                    clock => DailyTime::At(
                        parse_time_of_day(clock).map_err(|err| bad(err.to_string()))?,
                    ),
                };
                HelperKind::Daily { at }
            }
            RuleConfig::Watch { value, trigger } => HelperKind::Watch {
                value_url: value,
                trigger,
            },
        };

        Ok(RuleHelper {
            url: url.to_owned(),
            kind,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// The action every firing dispatches: whatever the configuration
    /// stores next to the rule.
    fn action_url(&self) -> String {
        format!("{}/action", self.url)
    }

    /// Runs until the context token is cancelled.
    pub async fn run(self, ctx: HelperContext) {
        log::debug!("starting rule helper for {}", self.url);

        match self.kind.clone() {
            HelperKind::Interval { every } => {
                self.run_timer(&ctx, |now, _ctx| Some(next_interval(now, every)))
                    .await;
            }
            HelperKind::Daily { at } => {
                self.run_timer(&ctx, move |now, ctx| match &at {
                    DailyTime::At(time) => Some(next_daily(now, *time, ctx.zone)),
                    DailyTime::Sunrise => sun_event_for(ctx, now, SunEvent::Rise),
                    DailyTime::Sunset => sun_event_for(ctx, now, SunEvent::Set),
                })
                .await;
            }
            HelperKind::Watch { value_url, trigger } => {
                self.run_watch(&ctx, &value_url, trigger.as_ref()).await;
            }
        }

        log::debug!("rule helper for {} stopped", self.url);
    }

    async fn run_timer<F>(&self, ctx: &HelperContext, next: F)
    where
        F: Fn(DateTime<Utc>, &HelperContext) -> Option<DateTime<Utc>>,
    {
        loop {
            let now = ctx.clock.now_utc();
            let (target, fire) = match next(now, ctx) {
                Some(target) => (target, true),
                None => (now + retry_delay(), false),
            };
            let delay = (target - now).to_std().unwrap_or_default();

            tokio::select! {
                _ = ctx.token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {
                    if fire {
                        self.dispatch(ctx).await;
                    }
                }
            }
        }
    }

    async fn run_watch(&self, ctx: &HelperContext, value_url: &str, trigger: Option<&Value>) {
        loop {
            let watcher = match ctx.status.deferred(None, value_url) {
                Ok(watcher) => watcher,
                Err(err) => {
                    log::error!("rule {} cannot watch {}: {}", self.url, value_url, err);
                    break;
                }
            };

            tokio::select! {
                _ = ctx.token.cancelled() => break,
                outcome = watcher.wait() => match outcome {
                    WatchOutcome::Cancelled => break,
                    WatchOutcome::Changed => self.fire_watch(ctx, value_url, trigger).await,
                },
            }
        }
    }

    async fn fire_watch(&self, ctx: &HelperContext, value_url: &str, trigger: Option<&Value>) {
        let current = match ctx.status.get(value_url) {
            Ok(value) => value,
            Err(err) => {
                log::error!("rule {} could not read {}: {}", self.url, value_url, err);
                return;
            }
        };

        // A vanished or null value never acts.
        if current.is_null() {
            return;
        }

        if let Some(trigger) = trigger {
            if current != *trigger {
                return;
            }
        }

        self.dispatch(ctx).await;
    }

    async fn dispatch(&self, ctx: &HelperContext) {
        log::info!("rule {} fired", self.url);

        let action = Value::String(self.action_url());
        if let Err(err) = ctx.dispatcher.dispatch(&action).await {
            log::warn!("rule {} action failed: {}", self.url, err);
        }
    }
}

/// Next sunrise/sunset for the observer configured under
/// `status://server`. Returns `None` (retry later) when the position is
/// missing or unparseable.
fn sun_event_for(
    ctx: &HelperContext,
    now: DateTime<Utc>,
    event: SunEvent,
) -> Option<DateTime<Utc>> {
    let latitude = read_coordinate(&ctx.status, LATITUDE_URL)?;
    let longitude = read_coordinate(&ctx.status, LONGITUDE_URL)?;

    Some(next_sun_event(now, event, latitude, longitude))
}

fn read_coordinate(status: &Status, url: &str) -> Option<f64> {
    let value = match status.get(url) {
        Ok(value) => value,
        Err(err) => {
            log::error!("could not read {}: {}", url, err);
            return None;
        }
    };

    let parsed = match &value {
        Value::String(text) => text.parse::<f64>().ok(),
        Value::Number(number) => number.as_f64(),
        _ => None,
    };

    if parsed.is_none() {
        log::error!("no usable coordinate at {} (found {})", url, value);
    }
    parsed
}
