//! The action manager: a recursive dispatcher for the JSON action DSL.
//!
//! An action is one of: a `status://` URL naming another action, any other
//! absolute URL (fetched), an object tagged with an `"action"` key, or an
//! array of actions run in order. Errors are logged and re-raised to the
//! caller; nothing is swallowed here.


use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{try_join_all, BoxFuture};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::net::{
    download_page, get_page, wake_on_lan, Fetcher, HttpFetcher, Mailer, OutgoingEmail, Pinger,
    SmtpMailer, SystemPinger,
};
use crate::rules::Clock;
use crate::status::{Status, StatusError, STATUS_PREFIX};

const EMAIL_ADDRESS_URL: &str = "status://server/email_address";

#[derive(Debug, Error)]
pub enum ActionError {
    /// The action's shape matched nothing in the DSL.
    #[error("invalid action: {0}")]
    Invalid(String),

    /// An object action whose tag is not in the dispatch table.
    #[error("unknown action tag '{0}'")]
    UnknownTag(String),

    #[error(transparent)]
    Status(#[from] StatusError),

    /// HTTP/SMTP/probe failure from a collaborator.
    #[error(transparent)]
    External(#[from] anyhow::Error),
}

/// Entry point used by the rules engine and the web surface to run
/// actions. [`ActionManager`] is the production implementation.
#[async_trait]
pub trait ActionDispatcher: Send + Sync {
    async fn dispatch(&self, action: &Value) -> Result<(), ActionError>;
}

pub struct ActionManager {
    status: Status,
    fetcher: Arc<dyn Fetcher>,
    mailer: Arc<dyn Mailer>,
    pinger: Arc<dyn Pinger>,
    clock: Clock,
    downloads_dir: PathBuf,
}

impl ActionManager {
    pub fn new(status: Status, downloads_dir: PathBuf, smtp_host: &str) -> ActionManager {
        ActionManager {
            status,
            fetcher: Arc::new(HttpFetcher::new()),
            mailer: Arc::new(SmtpMailer::new(smtp_host)),
            pinger: Arc::new(SystemPinger),
            clock: Clock::system(),
            downloads_dir,
        }
    }

    /// Constructor with every collaborator injected; tests use this to
    /// substitute recording doubles and a fixed clock.
    pub fn with_seams(
        status: Status,
        fetcher: Arc<dyn Fetcher>,
        mailer: Arc<dyn Mailer>,
        pinger: Arc<dyn Pinger>,
        clock: Clock,
        downloads_dir: PathBuf,
    ) -> ActionManager {
        ActionManager {
            status,
            fetcher,
            mailer,
            pinger,
            clock,
            downloads_dir,
        }
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    /// Recursively interprets `action`. Boxed because the DSL nests
    /// arbitrarily (lists of lists, status URLs naming further actions).
    pub fn handle_action<'a>(&'a self, action: &'a Value) -> BoxFuture<'a, Result<(), ActionError>> {
        Box::pin(async move {
            match action {
                Value::String(text) if text.starts_with(STATUS_PREFIX) => {
                    let resolved = self.status.get(text)?;
                    if resolved.is_null() {
                        return Err(ActionError::Invalid(format!("nothing stored at {}", text)));
                    }
                    self.handle_action(&resolved).await
                }

                Value::String(text) if url_scheme(text).is_some() => {
                    get_page(self.fetcher.as_ref(), text).await?;
                    Ok(())
                }

                Value::Object(map) if map.contains_key("action") => self.handle_tagged(map).await,

                Value::Array(items) => {
                    for item in items {
                        self.handle_action(item).await?;
                    }
                    Ok(())
                }

                other => Err(ActionError::Invalid(other.to_string())),
            }
        })
    }

    async fn handle_tagged(&self, map: &Map<String, Value>) -> Result<(), ActionError> {
        let tag = map
            .get("action")
            .and_then(Value::as_str)
            .ok_or_else(|| ActionError::Invalid("non-string action tag".to_owned()))?;

        match tag {
            "delayed" => {
                let seconds = map
                    .get("seconds")
                    .and_then(Value::as_f64)
                    .filter(|s| *s >= 0.0)
                    .ok_or_else(|| missing_field("seconds"))?;
                let delayed = map
                    .get("delayed_action")
                    .ok_or_else(|| missing_field("delayed_action"))?;

                tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
                self.handle_action(delayed).await
            }

            "fetch_url" => {
                let url = require_str(map, "url")?;

                match map.get("download_name").and_then(Value::as_str) {
                    Some(pattern) => {
                        let dest = self.resolve_download_name(pattern, &self.downloads_dir)?;
                        download_page(self.fetcher.as_ref(), url, &dest).await?;
                    }
                    None => {
                        get_page(self.fetcher.as_ref(), url).await?;
                    }
                }
                Ok(())
            }

            "set" => {
                let dest = require_str(map, "dest")?;

                let value = match (map.get("src"), map.get("value")) {
                    (Some(src), None) => {
                        let src = src.as_str().ok_or_else(|| missing_field("src"))?;
                        self.status.get(src)?
                    }
                    (None, Some(value)) => value.clone(),
                    _ => {
                        return Err(ActionError::Invalid(
                            "set takes exactly one of 'src' or 'value'".to_owned(),
                        ))
                    }
                };

                log::debug!("action: set {} -> {}", dest, value);
                self.status.set(dest, value)?;
                Ok(())
            }

            "increment" => {
                let dest = require_str(map, "dest")?;
                let current = self.status.get_or(dest, json!(0))?.as_i64().unwrap_or(0);
                self.status.set(dest, json!(current + 1))?;
                Ok(())
            }

            "wol" => {
                let mac = require_str(map, "mac")?;
                log::debug!("action: wol {}", mac);
                wake_on_lan(mac).map_err(|err| ActionError::External(err.into()))?;
                Ok(())
            }

            "ping" => {
                let hostname = require_str(map, "hostname")?;
                let dest = require_str(map, "dest")?;
                log::debug!("action: ping {} -> {}", hostname, dest);

                let up = self.pinger.ping(hostname).await;
                self.status.set(dest, json!(up))?;
                Ok(())
            }

            "email" => self.handle_email(map).await,

            other => Err(ActionError::UnknownTag(other.to_owned())),
        }
    }

    /// Composes and sends a multipart email. Attachments download
    /// concurrently into a staging directory (or the downloads directory
    /// when marked `preserve`); any failed download is fatal for the whole
    /// email. The staging directory is removed in every outcome.
    async fn handle_email(&self, map: &Map<String, Value>) -> Result<(), ActionError> {
        let own_address = self.status.get(EMAIL_ADDRESS_URL)?;
        let own_address = own_address
            .as_str()
            .ok_or_else(|| ActionError::Invalid(format!("no address at {}", EMAIL_ADDRESS_URL)))?;

        let to = map
            .get("to")
            .and_then(Value::as_str)
            .unwrap_or(own_address)
            .to_owned();
        let subject = map.get("subject").and_then(Value::as_str).unwrap_or("");
        let body = map.get("body").and_then(Value::as_str).unwrap_or("");

        log::debug!("action: email {} about {:?}", to, subject);

        let staging = tempfile::tempdir().map_err(anyhow::Error::from)?;

        let mut files = Vec::new();
        let mut downloads = Vec::new();

        if let Some(attachments) = map.get("attachments").and_then(Value::as_array) {
            for attachment in attachments {
                let attachment = attachment
                    .as_object()
                    .ok_or_else(|| ActionError::Invalid("attachment is not an object".to_owned()))?;

                let url = require_str(attachment, "url")?;
                let pattern = require_str(attachment, "download_name")?;
                let preserve = attachment
                    .get("preserve")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);

                let dir = if preserve {
                    self.downloads_dir.clone()
                } else {
                    staging.path().to_path_buf()
                };

                let dest = self.resolve_download_name(pattern, &dir)?;
                files.push(dest.clone());
                downloads.push(async move {
                    download_page(self.fetcher.as_ref(), url, &dest).await
                });
            }
        }

        try_join_all(downloads).await?;

        let email = OutgoingEmail {
            from: own_address.to_owned(),
            to,
            subject: subject.to_owned(),
            body: body.to_owned(),
            attachments: files,
        };

        let mailer = Arc::clone(&self.mailer);
        tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .map_err(anyhow::Error::from)??;

        Ok(())
    }

    /// Expands `{time}` in a download pattern and reduces the result to its
    /// basename, so a hostile pattern cannot escape the target directory.
    fn resolve_download_name(&self, pattern: &str, dir: &Path) -> Result<PathBuf, ActionError> {
        let name = pattern.replace("{time}", &self.clock.now_utc().timestamp().to_string());
        let base = Path::new(&name)
            .file_name()
            .ok_or_else(|| ActionError::Invalid(format!("bad download name '{}'", pattern)))?;

        Ok(dir.join(base))
    }
}

#[async_trait]
impl ActionDispatcher for ActionManager {
    async fn dispatch(&self, action: &Value) -> Result<(), ActionError> {
        let result = self.handle_action(action).await;
        if let Err(err) = &result {
            log::error!("action failed: {}", err);
        }
        result
    }
}

fn missing_field(key: &str) -> ActionError {
    ActionError::Invalid(format!("missing '{}' field", key))
}

fn require_str<'m>(map: &'m Map<String, Value>, key: &str) -> Result<&'m str, ActionError> {
    map.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| missing_field(key))
}

/// Returns the scheme of `text` when it reads as an absolute URL.
fn url_scheme(text: &str) -> Option<&str> {
    let (scheme, rest) = text.split_once("://")?;

    let valid = !scheme.is_empty()
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));

    if valid && !rest.is_empty() {
        Some(scheme)
    } else {
        None
    }
}
