//! Serves the static browser front-end out of the configured static
//! directory.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::{body::Incoming, header::CONTENT_TYPE, Request, Response, StatusCode};

use crate::session::Session;
use crate::web::interface::ErrorResponse;
use crate::web::util::json;

pub async fn call(session: Arc<Session>, request: Request<Incoming>) -> Response<Full<Bytes>> {
    let static_dir = session.config().static_dir.clone();

    let relative = match sanitize(request.uri().path()) {
        Some(relative) => relative,
        None => {
            return json(
                ErrorResponse::bad_request("bad file path"),
                StatusCode::BAD_REQUEST,
            )
        }
    };

    let mut target = static_dir.join(relative);
    if target.is_dir() {
        target = target.join("index.html");
    }

    match tokio::fs::read(&target).await {
        Ok(contents) => Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, content_type(&target))
            .body(Full::new(Bytes::from(contents)))
            .unwrap(),
        Err(_) => json(
            ErrorResponse::not_found(format!("no such file: {}", request.uri().path())),
            StatusCode::NOT_FOUND,
        ),
    }
}

/// Reduces a request path to a safe relative path: plain segments only, no
/// parent references, no absolute components.
fn sanitize(path: &str) -> Option<PathBuf> {
    let trimmed = path.trim_start_matches('/');
    if trimmed.is_empty() {
        return Some(PathBuf::new());
    }

    let mut relative = PathBuf::new();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(segment) => relative.push(segment),
            _ => return None,
        }
    }

    Some(relative)
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_rejects_escapes() {
        assert_eq!(sanitize("/"), Some(PathBuf::new()));
        assert_eq!(sanitize("/app.js"), Some(PathBuf::from("app.js")));
        assert_eq!(sanitize("/css/site.css"), Some(PathBuf::from("css/site.css")));
        assert_eq!(sanitize("/../secrets"), None);
        assert_eq!(sanitize("/css/../../secrets"), None);
    }
}
