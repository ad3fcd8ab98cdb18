//! Endpoint dispatch for the controller's HTTP API. Status reads are
//! long-polls against tree revisions; writes go through the same
//! optimistic-concurrency checks as any other `set`.

use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::{body::Incoming, Method, Request, Response, StatusCode};
use serde_json::{json as json_value, Value};

use crate::session::Session;
use crate::status::{StatusError, WatchOutcome};
use crate::web::{
    interface::{ButtonResponse, ErrorResponse, HostResponse, LogResponse, StatusResponse},
    ui,
    util::{json, json_ok, query_param, read_json_body},
};

pub async fn call(session: Arc<Session>, request: Request<Incoming>) -> Response<Full<Bytes>> {
    let service = ApiService::new(session);
    let path = request.uri().path().to_owned();

    match (request.method().clone(), path.as_str()) {
        (Method::GET, p) if p == "/status" || p.starts_with("/status/") => {
            service.handle_status_get(request).await
        }
        (Method::PUT, p) if p.starts_with("/status/") => {
            service.handle_status_put(request).await
        }
        (Method::POST, p) if p.starts_with("/button/") => {
            service.handle_button(request).await
        }
        (Method::POST, p) if p.starts_with("/host/") => service.handle_host(request).await,
        (Method::POST, "/restart") => service.handle_restart().await,
        (Method::GET, "/log") | (Method::POST, "/log") => service.handle_log(request).await,

        (Method::GET, _) => ui::call(service.session, request).await,

        (_method, p) => json(
            ErrorResponse::not_found(format!("Route not found: {}", p)),
            StatusCode::NOT_FOUND,
        ),
    }
}

pub struct ApiService {
    session: Arc<Session>,
}

impl ApiService {
    pub fn new(session: Arc<Session>) -> Self {
        ApiService { session }
    }

    /// `GET /status/<path...>?revision=R` — long-poll. With no revision (or
    /// a stale one) the current state comes back immediately; with the
    /// current revision the response parks until the watched region
    /// changes.
    async fn handle_status_get(self, request: Request<Incoming>) -> Response<Full<Bytes>> {
        let url = match status_url_from_path(request.uri().path()) {
            Some(url) => url,
            None => return bad_path_response(request.uri().path()),
        };

        let revision = match parse_revision(&request) {
            Ok(revision) => revision.unwrap_or(0),
            Err(response) => return *response,
        };

        let watcher = match self.session.status().deferred(Some(revision), &url) {
            Ok(watcher) => watcher,
            Err(err) => return status_error(err),
        };

        // The watcher cancels (via drop) if the client goes away first.
        if watcher.wait().await == WatchOutcome::Cancelled {
            return json(
                ErrorResponse::internal("watch cancelled"),
                StatusCode::INTERNAL_SERVER_ERROR,
            );
        }

        self.status_response(&url)
    }

    /// `PUT /status/<path...>?revision=R` — JSON body write, only under
    /// web-updatable mounts.
    async fn handle_status_put(self, request: Request<Incoming>) -> Response<Full<Bytes>> {
        let url = match status_url_from_path(request.uri().path()) {
            Some(url) => url,
            None => return bad_path_response(request.uri().path()),
        };

        if !self.session.web_updatable().allows(&url) {
            return json(
                ErrorResponse::forbidden(format!("{} is not web-updatable", url)),
                StatusCode::FORBIDDEN,
            );
        }

        let expected_revision = match parse_revision(&request) {
            Ok(revision) => revision,
            Err(response) => return *response,
        };

        let value = match read_json_body(request.into_body()).await {
            Ok(value) => value,
            Err(err) => {
                return json(
                    ErrorResponse::bad_request(format!("bad JSON body: {}", err)),
                    StatusCode::BAD_REQUEST,
                )
            }
        };

        match self
            .session
            .status()
            .set_with_revision(&url, value, expected_revision)
        {
            Ok(()) => self.status_response(&url),
            Err(err) => status_error(err),
        }
    }

    /// `POST /button/<id>` — stamps `pushed` on every matching button and
    /// dispatches its action, when one is configured.
    async fn handle_button(self, request: Request<Incoming>) -> Response<Full<Bytes>> {
        let id = match trailing_segment(request.uri().path(), "/button/") {
            Some(id) => id,
            None => return bad_path_response(request.uri().path()),
        };

        let urls = match self
            .session
            .status()
            .get_matching_urls(&format!("status://*/button/{}", id))
        {
            Ok(urls) => urls,
            Err(err) => return status_error(err),
        };

        if urls.is_empty() {
            return json(
                ErrorResponse::not_found(format!("no button '{}'", id)),
                StatusCode::NOT_FOUND,
            );
        }

        let now = self.session.clock().now_utc().timestamp();
        for url in &urls {
            if let Err(err) = self
                .session
                .status()
                .set(&format!("{}/pushed", url), json_value!(now))
            {
                log::error!("could not record push on {}: {}", url, err);
            }

            let action_url = format!("{}/action", url);
            let present = self
                .session
                .status()
                .get(&action_url)
                .map(|value| !value.is_null())
                .unwrap_or(false);

            if present {
                self.spawn_dispatch(action_url);
            }
        }

        json_ok(ButtonResponse { pushed: urls })
    }

    /// `POST /host/<id>?action=<name>` — runs a named action on every
    /// matching host.
    async fn handle_host(self, request: Request<Incoming>) -> Response<Full<Bytes>> {
        let id = match trailing_segment(request.uri().path(), "/host/") {
            Some(id) => id,
            None => return bad_path_response(request.uri().path()),
        };

        let name = match query_param(request.uri(), "action") {
            Some(name) if !name.is_empty() => name.to_owned(),
            _ => {
                return json(
                    ErrorResponse::bad_request("missing 'action' query parameter"),
                    StatusCode::BAD_REQUEST,
                )
            }
        };

        let urls = match self
            .session
            .status()
            .get_matching_urls(&format!("status://*/host/{}/actions/{}", id, name))
        {
            Ok(urls) => urls,
            Err(err) => return status_error(err),
        };

        if urls.is_empty() {
            return json(
                ErrorResponse::not_found(format!("no action '{}' for host '{}'", name, id)),
                StatusCode::NOT_FOUND,
            );
        }

        for url in &urls {
            self.spawn_dispatch(url.clone());
        }

        json_ok(HostResponse { dispatched: urls })
    }

    async fn handle_restart(self) -> Response<Full<Bytes>> {
        self.session.request_restart();
        json_ok(json_value!({ "restarting": true }))
    }

    /// `GET /log?revision=R` — long-poll over the in-memory log buffer.
    async fn handle_log(self, request: Request<Incoming>) -> Response<Full<Bytes>> {
        let requested = match parse_revision(&request) {
            Ok(revision) => revision.unwrap_or(0),
            Err(response) => return *response,
        };

        let (current, _) = self.session.log_buffer().snapshot();
        if current == requested {
            self.session.log_buffer().wait_past(requested).await;
        }

        let (revision, log) = self.session.log_buffer().snapshot();
        json_ok(LogResponse { log, revision })
    }

    fn status_response(&self, url: &str) -> Response<Full<Bytes>> {
        let status = match self.session.status().get(url) {
            Ok(value) => value,
            Err(err) => return status_error(err),
        };

        // The reported revision is exactly the baseline a follow-up
        // long-poll on the same url will compare against.
        let revision = match self.session.status().region_revision(url) {
            Ok(revision) => revision,
            Err(err) => return status_error(err),
        };

        json_ok(StatusResponse {
            revision,
            status,
            url: url.to_owned(),
        })
    }

    /// Actions triggered over HTTP run in their own task; failures are
    /// logged by the dispatcher and never affect the response.
    fn spawn_dispatch(&self, action_url: String) {
        let dispatcher = self.session.dispatcher();
        tokio::spawn(async move {
            let _ = dispatcher.dispatch(&Value::String(action_url)).await;
        });
    }
}

/// Maps `/status/a/b` to `status://a/b` (and `/status` to the root).
fn status_url_from_path(path: &str) -> Option<String> {
    let rest = path.strip_prefix("/status")?;
    let rest = rest.strip_prefix('/').unwrap_or(rest);
    Some(format!("status://{}", rest))
}

/// Extracts the single trailing segment of e.g. `/button/<id>`.
fn trailing_segment<'p>(path: &'p str, prefix: &str) -> Option<&'p str> {
    let id = path.strip_prefix(prefix)?;
    if id.is_empty() || id.contains('/') {
        return None;
    }
    Some(id)
}

fn parse_revision(request: &Request<Incoming>) -> Result<Option<u64>, Box<Response<Full<Bytes>>>> {
    match query_param(request.uri(), "revision") {
        None => Ok(None),
        Some(raw) => match raw.parse::<u64>() {
            Ok(revision) => Ok(Some(revision)),
            Err(_) => Err(Box::new(json(
                ErrorResponse::bad_request(format!("bad revision '{}'", raw)),
                StatusCode::BAD_REQUEST,
            ))),
        },
    }
}

fn bad_path_response(path: &str) -> Response<Full<Bytes>> {
    json(
        ErrorResponse::bad_request(format!("bad path '{}'", path)),
        StatusCode::BAD_REQUEST,
    )
}

fn status_error(err: StatusError) -> Response<Full<Bytes>> {
    let code = match &err {
        StatusError::BadPath(_) => StatusCode::BAD_REQUEST,
        StatusError::UnknownPath(_) => StatusCode::NOT_FOUND,
        StatusError::RevisionMismatch { .. } => StatusCode::PRECONDITION_FAILED,
    };

    json(ErrorResponse::bad_request(err.to_string()), code)
}
