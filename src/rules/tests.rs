use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio::sync::Notify;

use crate::actions::{ActionDispatcher, ActionError};
use crate::status::Status;

use super::schedule::{
    next_daily, next_interval, next_sun_event, parse_interval, parse_time_of_day, Clock, SunEvent,
};
use super::RulesEngine;

fn utc() -> FixedOffset {
    FixedOffset::east_opt(0).unwrap()
}

fn pacific() -> FixedOffset {
    FixedOffset::west_opt(8 * 3600).unwrap()
}

/// 2000-01-02T03:04:05.995Z — just shy of 19:04:06 the previous evening,
/// Pacific time.
fn test_instant() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2000, 1, 2, 3, 4, 5).unwrap() + Duration::milliseconds(995)
}

#[test]
fn interval_parsing() {
    assert_eq!(parse_interval("00:05:00").unwrap(), Duration::seconds(300));
    assert_eq!(parse_interval("01:00:30").unwrap(), Duration::seconds(3630));

    // Degenerate intervals clamp to one second.
    assert_eq!(parse_interval("00:00:00").unwrap(), Duration::seconds(1));

    for bad in ["", "12", "1:2", "1:2:3:4", "aa:bb:cc", "-1:00:00"] {
        assert!(parse_interval(bad).is_err(), "accepted {:?}", bad);
    }

    assert!(parse_time_of_day("19:04:06").is_ok());
    assert!(parse_time_of_day("24:00:00").is_err());
}

#[test]
fn next_interval_is_strictly_future() {
    let now = test_instant();

    assert_eq!(
        next_interval(now, Duration::seconds(10)),
        Utc.with_ymd_and_hms(2000, 1, 2, 3, 4, 10).unwrap()
    );

    // Exactly on a boundary steps to the next one.
    let on_boundary = Utc.with_ymd_and_hms(2000, 1, 2, 3, 4, 10).unwrap();
    assert_eq!(
        next_interval(on_boundary, Duration::seconds(10)),
        Utc.with_ymd_and_hms(2000, 1, 2, 3, 4, 20).unwrap()
    );
}

#[test]
fn next_daily_respects_the_zone() {
    let now = test_instant();
    let at = parse_time_of_day("19:04:06").unwrap();

    // 19:04:06 Pacific is 03:04:06 UTC the next calendar day.
    assert_eq!(
        next_daily(now, at, pacific()),
        Utc.with_ymd_and_hms(2000, 1, 2, 3, 4, 6).unwrap()
    );

    // Already past for today: schedule tomorrow.
    let past = parse_time_of_day("19:04:05").unwrap();
    assert_eq!(
        next_daily(now, past, pacific()),
        Utc.with_ymd_and_hms(2000, 1, 3, 3, 4, 5).unwrap()
    );

    let noon = parse_time_of_day("12:00:00").unwrap();
    let late = Utc.with_ymd_and_hms(2000, 1, 2, 14, 0, 0).unwrap();
    assert_eq!(
        next_daily(late, noon, utc()),
        Utc.with_ymd_and_hms(2000, 1, 3, 12, 0, 0).unwrap()
    );
}

#[test]
fn next_sun_event_is_strictly_future() {
    let now = test_instant();
    let (lat, lon) = (37.3861, -122.0839);

    for event in [SunEvent::Rise, SunEvent::Set] {
        let next = next_sun_event(now, event, lat, lon);
        assert!(next > now);
        assert!(next < now + Duration::hours(48));

        // Asking again at the event must move to a later one.
        let after = next_sun_event(next, event, lat, lon);
        assert!(after > next);
    }
}

#[derive(Default)]
struct RecordingDispatcher {
    dispatched: Mutex<Vec<Value>>,
    notify: Notify,
}

impl RecordingDispatcher {
    fn dispatched(&self) -> Vec<Value> {
        self.dispatched.lock().unwrap().clone()
    }

    async fn wait_for(&self, count: usize) {
        loop {
            let notified = self.notify.notified();
            if self.dispatched.lock().unwrap().len() >= count {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl ActionDispatcher for RecordingDispatcher {
    async fn dispatch(&self, action: &Value) -> Result<(), ActionError> {
        self.dispatched.lock().unwrap().push(action.clone());
        self.notify.notify_waiters();
        Ok(())
    }
}

async fn wait_for_watchers(status: &Status, count: usize) {
    while status.pending_watchers() < count {
        tokio::task::yield_now().await;
    }
}

fn watch_rule_tree(trigger: Option<Value>) -> Value {
    let mut rule = json!({
        "behavior": "watch",
        "value": "status://values/one",
        "action": "take_action",
    });
    if let Some(trigger) = trigger {
        rule["trigger"] = trigger;
    }

    json!({
        "config": { "rule": { "watch_test": rule } },
        "values": { "one": 1 },
    })
}

#[tokio::test]
async fn watch_rule_fires_once_per_change() {
    let status = Status::from_value(watch_rule_tree(None));
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let engine = RulesEngine::start(
        status.clone(),
        Arc::clone(&dispatcher) as Arc<dyn ActionDispatcher>,
        Clock::system(),
        utc(),
    );

    // Supervisor watcher + the helper's value watcher.
    wait_for_watchers(&status, 2).await;

    status.set("status://values/one", json!(2)).unwrap();
    dispatcher.wait_for(1).await;

    // Wait for the helper to re-arm, then confirm nothing else fired.
    wait_for_watchers(&status, 2).await;
    assert_eq!(
        dispatcher.dispatched(),
        vec![json!("status://config/rule/watch_test/action")]
    );

    engine.stop().await;
}

#[tokio::test]
async fn watch_rule_with_trigger_only_fires_on_equality() {
    let status = Status::from_value(watch_rule_tree(Some(json!(2))));
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let engine = RulesEngine::start(
        status.clone(),
        Arc::clone(&dispatcher) as Arc<dyn ActionDispatcher>,
        Clock::system(),
        utc(),
    );

    wait_for_watchers(&status, 2).await;

    // Mismatched value: the helper observes the change but stays quiet.
    status.set("status://values/one", json!(3)).unwrap();
    wait_for_watchers(&status, 2).await;
    assert_eq!(dispatcher.dispatched(), Vec::<Value>::new());

    status.set("status://values/one", json!(2)).unwrap();
    dispatcher.wait_for(1).await;
    assert_eq!(dispatcher.dispatched().len(), 1);

    engine.stop().await;
}

#[tokio::test]
async fn watch_rule_suppresses_null_values() {
    let status = Status::from_value(watch_rule_tree(None));
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let engine = RulesEngine::start(
        status.clone(),
        Arc::clone(&dispatcher) as Arc<dyn ActionDispatcher>,
        Clock::system(),
        utc(),
    );

    wait_for_watchers(&status, 2).await;

    status.set("status://values/one", Value::Null).unwrap();
    wait_for_watchers(&status, 2).await;
    assert_eq!(dispatcher.dispatched(), Vec::<Value>::new());

    engine.stop().await;
}

#[tokio::test]
async fn stopped_engine_dispatches_nothing_further() {
    let status = Status::from_value(watch_rule_tree(None));
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let engine = RulesEngine::start(
        status.clone(),
        Arc::clone(&dispatcher) as Arc<dyn ActionDispatcher>,
        Clock::system(),
        utc(),
    );

    wait_for_watchers(&status, 2).await;
    engine.stop().await;

    assert_eq!(status.pending_watchers(), 0);
    status.set("status://values/one", json!(2)).unwrap();
    tokio::task::yield_now().await;
    assert_eq!(dispatcher.dispatched(), Vec::<Value>::new());
}

#[tokio::test]
async fn engine_rebuilds_when_rules_change() {
    let status = Status::from_value(json!({ "config": { "rule": {} } }));
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let engine = RulesEngine::start(
        status.clone(),
        Arc::clone(&dispatcher) as Arc<dyn ActionDispatcher>,
        Clock::system(),
        utc(),
    );

    wait_for_watchers(&status, 1).await;

    status
        .set(
            "status://config/rule/added",
            json!({
                "behavior": "watch",
                "value": "status://values/two",
                "action": "take_action",
            }),
        )
        .unwrap();

    // Rebuild: fresh supervisor watcher plus the new helper's watcher.
    wait_for_watchers(&status, 2).await;

    status.set("status://values/two", json!("go")).unwrap();
    dispatcher.wait_for(1).await;
    assert_eq!(
        dispatcher.dispatched(),
        vec![json!("status://config/rule/added/action")]
    );

    engine.stop().await;
}

#[tokio::test]
async fn invalid_rules_are_skipped() {
    let status = Status::from_value(json!({
        "config": {
            "rule": {
                "broken": { "behavior": "mirror", "src": "a", "dest": "b" },
                "also_broken": { "behavior": "interval", "time": "soon" },
            },
        },
    }));
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let engine = RulesEngine::start(
        status.clone(),
        Arc::clone(&dispatcher) as Arc<dyn ActionDispatcher>,
        Clock::system(),
        utc(),
    );

    // Only the supervisor's own watcher remains; both rules were rejected.
    wait_for_watchers(&status, 1).await;
    tokio::task::yield_now().await;
    assert_eq!(status.pending_watchers(), 1);

    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn daily_rule_fires_at_the_configured_local_time() {
    let status = Status::from_value(json!({
        "config": {
            "rule": {
                "evening": { "behavior": "daily", "time": "19:04:06", "action": "x" },
            },
        },
    }));
    let dispatcher = Arc::new(RecordingDispatcher::default());

    let start = tokio::time::Instant::now();
    let engine = RulesEngine::start(
        status.clone(),
        Arc::clone(&dispatcher) as Arc<dyn ActionDispatcher>,
        Clock::fixed(test_instant()),
        pacific(),
    );

    dispatcher.wait_for(1).await;
    // The clock sat 5 ms before the target; the fire must land within 10 ms.
    assert!(start.elapsed() <= StdDuration::from_millis(10));
    assert_eq!(
        dispatcher.dispatched()[0],
        json!("status://config/rule/evening/action")
    );

    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn interval_rule_fires_on_the_utc_grid() {
    let status = Status::from_value(json!({
        "config": {
            "rule": {
                "tick": { "behavior": "interval", "time": "00:00:10", "action": "x" },
            },
        },
    }));
    let dispatcher = Arc::new(RecordingDispatcher::default());

    let start = tokio::time::Instant::now();
    let engine = RulesEngine::start(
        status.clone(),
        Arc::clone(&dispatcher) as Arc<dyn ActionDispatcher>,
        Clock::fixed(test_instant()),
        utc(),
    );

    // Next grid point after 03:04:05.995 is 03:04:10 — 4.005 s out.
    dispatcher.wait_for(1).await;
    let elapsed = start.elapsed();
    assert!(
        elapsed >= StdDuration::from_millis(4000) && elapsed <= StdDuration::from_millis(4010),
        "fired after {:?}",
        elapsed
    );

    engine.stop().await;
}
