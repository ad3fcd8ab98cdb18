//! Adapters bind external data sources to mount points in the status tree.
//!
//! The file adapter mirrors a JSON file on disk into its mount and re-reads
//! it when the filesystem reports a change. The web adapter just claims a
//! mount and marks it writable over HTTP PUT.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crossbeam_channel::{select, Receiver, Sender};
use notify::{RecursiveMode, Watcher as _};
use serde_json::{json, Value};
use thiserror::Error;

use crate::status::Status;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("adapter '{name}': {reason}")]
    BadConfig { name: String, reason: String },

    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Status(#[from] crate::status::StatusError),

    #[error(transparent)]
    Watch(#[from] notify::Error),
}

/// Registry of mount prefixes that accept writes from the web layer.
#[derive(Debug, Default)]
pub struct WebUpdatable {
    prefixes: Mutex<Vec<String>>,
}

impl WebUpdatable {
    pub fn register(&self, prefix: &str) {
        self.prefixes.lock().unwrap().push(prefix.to_owned());
    }

    /// Whether `url` sits at or under a registered mount.
    pub fn allows(&self, url: &str) -> bool {
        let prefixes = self.prefixes.lock().unwrap();
        prefixes
            .iter()
            .any(|prefix| url == prefix || url.starts_with(&format!("{}/", prefix)))
    }
}

pub enum Adapter {
    File(FileAdapter),
    Web(WebAdapter),
}

impl Adapter {
    pub fn mount(&self) -> &str {
        match self {
            Adapter::File(adapter) => &adapter.mount,
            Adapter::Web(adapter) => &adapter.mount,
        }
    }

    /// Shuts the adapter down and clears its subtree.
    pub fn stop(self, status: &Status) {
        let mount = self.mount().to_owned();
        if let Adapter::File(adapter) = self {
            adapter.shutdown();
        }
        if let Err(err) = status.set(&mount, json!({})) {
            log::error!("could not clear {}: {}", mount, err);
        }
    }
}

/// Builds every adapter named under `status://server/adapters`.
///
/// Settings look like `{"type": "file", "filename": "house.json"}` or
/// `{"type": "web"}`; each adapter mounts at `status://<name>`.
pub fn build_adapters(
    status: &Status,
    web_updatable: &WebUpdatable,
    config_dir: &Path,
) -> Result<Vec<Adapter>, AdapterError> {
    let configured = status.get("status://server/adapters")?;
    let Some(configured) = configured.as_object() else {
        log::info!("no adapters configured");
        return Ok(Vec::new());
    };

    let mut adapters = Vec::new();

    for (name, settings) in configured {
        let mount = format!("status://{}", name);
        let kind = settings
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| AdapterError::BadConfig {
                name: name.clone(),
                reason: "missing 'type'".to_owned(),
            })?;

        match kind {
            "file" => {
                let filename = settings
                    .get("filename")
                    .and_then(Value::as_str)
                    .map(str::to_owned)
                    .unwrap_or_else(|| format!("{}.json", name));
                let path = config_dir.join(filename);

                log::info!("adapting {} -> {}", path.display(), mount);
                adapters.push(Adapter::File(FileAdapter::start(
                    status.clone(),
                    &mount,
                    name,
                    path,
                )?));
            }
            "web" => {
                log::info!("web adapter at {}", mount);
                adapters.push(Adapter::Web(WebAdapter::start(
                    status,
                    web_updatable,
                    &mount,
                )?));
            }
            other => {
                return Err(AdapterError::BadConfig {
                    name: name.clone(),
                    reason: format!("unknown adapter type '{}'", other),
                })
            }
        }
    }

    Ok(adapters)
}

/// Mirrors one JSON file into the status tree.
///
/// A dedicated thread owns the filesystem watcher and re-reads the file on
/// change events; read or parse failures are logged and the previous value
/// stays in place. The thread is joined on drop, after the shutdown channel
/// is signalled.
pub struct FileAdapter {
    mount: String,
    shutdown_sender: Sender<()>,

    /// Joined on drop; side effects live in the handle.
    #[allow(unused)]
    job_thread: Option<jod_thread::JoinHandle<()>>,
}

impl FileAdapter {
    pub fn start(
        status: Status,
        mount_url: &str,
        name: &str,
        path: PathBuf,
    ) -> Result<FileAdapter, AdapterError> {
        // The first read is load-bearing: a broken config file should stop
        // startup rather than come up empty.
        let initial = read_json_file(&path)?;
        status.set(mount_url, initial)?;

        let (shutdown_sender, shutdown_receiver) = crossbeam_channel::bounded(1);
        let (event_sender, event_receiver) = crossbeam_channel::unbounded();

        let mut watcher = notify::recommended_watcher(move |event| {
            let _ = event_sender.send(event);
        })?;

        // Watch the containing directory; editors that replace the file
        // (write temp + rename) would otherwise detach the watch.
        let watch_root = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        watcher.watch(&watch_root, RecursiveMode::NonRecursive)?;

        let mount = mount_url.to_owned();
        let thread_mount = mount.clone();
        let error_path = path.clone();
        let job_thread = jod_thread::Builder::new()
            .name(format!("{} file adapter", name))
            .spawn(move || {
                // Keep the watcher alive for the thread's lifetime.
                let _watcher = watcher;
                file_adapter_loop(status, thread_mount, path, event_receiver, shutdown_receiver);
            })
            .map_err(|source| AdapterError::Io {
                path: error_path,
                source,
            })?;

        Ok(FileAdapter {
            mount,
            shutdown_sender,
            job_thread: Some(job_thread),
        })
    }

    fn shutdown(mut self) {
        let _ = self.shutdown_sender.send(());
        // Joins the thread.
        self.job_thread.take();
    }
}

fn file_adapter_loop(
    status: Status,
    mount: String,
    path: PathBuf,
    events: Receiver<Result<notify::Event, notify::Error>>,
    shutdown: Receiver<()>,
) {
    loop {
        select! {
            recv(events) -> event => match event {
                Ok(Ok(event)) => {
                    let ours = event
                        .paths
                        .iter()
                        .any(|changed| changed.file_name() == path.file_name());
                    if ours && (event.kind.is_modify() || event.kind.is_create()) {
                        reload_file(&status, &mount, &path);
                    }
                }
                Ok(Err(err)) => log::warn!("watch error for {}: {}", path.display(), err),
                // Watcher hung up; nothing left to do.
                Err(_) => return,
            },
            recv(shutdown) -> _ => {
                log::trace!("file adapter for {} shutting down", mount);
                return;
            }
        }
    }
}

/// Re-reads the file and replaces the mount's value. Failures keep the
/// previous value in place.
fn reload_file(status: &Status, mount: &str, path: &Path) {
    match read_json_file(path) {
        Ok(value) => {
            log::info!("reloading {} -> {}", path.display(), mount);
            if let Err(err) = status.set(mount, value) {
                log::error!("could not store {}: {}", mount, err);
            }
        }
        Err(err) => log::error!("keeping previous value for {}: {}", mount, err),
    }
}

fn read_json_file(path: &Path) -> Result<Value, AdapterError> {
    let text = std::fs::read_to_string(path).map_err(|source| AdapterError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    serde_json::from_str(&text).map_err(|source| AdapterError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Claims a mount for browser-side writes.
pub struct WebAdapter {
    mount: String,
}

impl WebAdapter {
    pub fn start(
        status: &Status,
        web_updatable: &WebUpdatable,
        mount_url: &str,
    ) -> Result<WebAdapter, AdapterError> {
        status.set(mount_url, json!({}))?;
        web_updatable.register(mount_url);

        Ok(WebAdapter {
            mount: mount_url.to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::status::WatchOutcome;

    fn write_file(path: &Path, contents: &str) {
        let mut file = std::fs::File::create(path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.sync_all().unwrap();
    }

    #[test]
    fn web_updatable_matches_whole_segments_only() {
        let updatable = WebUpdatable::default();
        updatable.register("status://web");

        assert!(updatable.allows("status://web"));
        assert!(updatable.allows("status://web/switch/on"));
        assert!(!updatable.allows("status://webber/switch"));
        assert!(!updatable.allows("status://other"));
    }

    #[test]
    fn reload_keeps_previous_value_on_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("house.json");
        let status = Status::new();

        write_file(&file, r#"{"light": true}"#);
        reload_file(&status, "status://house", &file);
        assert_eq!(status.get("status://house").unwrap(), json!({ "light": true }));

        write_file(&file, "{ not json");
        reload_file(&status, "status://house", &file);
        assert_eq!(status.get("status://house").unwrap(), json!({ "light": true }));

        write_file(&file, r#"{"light": false}"#);
        reload_file(&status, "status://house", &file);
        assert_eq!(status.get("status://house").unwrap(), json!({ "light": false }));
    }

    #[tokio::test]
    async fn file_adapter_loads_and_follows_changes() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("garage.json");
        write_file(&file, r#"{"door": "closed"}"#);

        let status = Status::new();
        let adapter =
            FileAdapter::start(status.clone(), "status://garage", "garage", file.clone()).unwrap();

        assert_eq!(
            status.get("status://garage").unwrap(),
            json!({ "door": "closed" })
        );

        let watcher = status.deferred(None, "status://garage").unwrap();
        write_file(&file, r#"{"door": "open"}"#);

        let outcome = tokio::time::timeout(Duration::from_secs(10), watcher.wait())
            .await
            .expect("no change event arrived");
        assert_eq!(outcome, WatchOutcome::Changed);
        assert_eq!(
            status.get("status://garage").unwrap(),
            json!({ "door": "open" })
        );

        Adapter::File(adapter).stop(&status);
        assert_eq!(status.get("status://garage").unwrap(), json!({}));
    }

    #[test]
    fn missing_file_fails_startup() {
        let dir = tempfile::tempdir().unwrap();
        let status = Status::new();

        let result = FileAdapter::start(
            status,
            "status://gone",
            "gone",
            dir.path().join("gone.json"),
        );
        assert!(matches!(result, Err(AdapterError::Io { .. })));
    }

    #[test]
    fn build_adapters_from_config() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir.path().join("house.json"), r#"{"room": 1}"#);

        let status = Status::from_value(json!({
            "server": {
                "adapters": {
                    "house": { "type": "file" },
                    "control": { "type": "web" },
                },
            },
        }));
        let updatable = WebUpdatable::default();

        let adapters = build_adapters(&status, &updatable, dir.path()).unwrap();
        assert_eq!(adapters.len(), 2);

        assert_eq!(status.get("status://house").unwrap(), json!({ "room": 1 }));
        assert_eq!(status.get("status://control").unwrap(), json!({}));
        assert!(updatable.allows("status://control/lamp"));
        assert!(!updatable.allows("status://house/room"));

        for adapter in adapters {
            adapter.stop(&status);
        }
    }
}
