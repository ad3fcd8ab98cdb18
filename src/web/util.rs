use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{body::Incoming, header::CONTENT_TYPE, Response, StatusCode, Uri};
use serde::Serialize;

pub fn json_ok<T: Serialize>(value: T) -> Response<Full<Bytes>> {
    json(value, StatusCode::OK)
}

/// Serializes `value` as pretty-printed JSON (2-space indentation; keys are
/// alphabetical because maps deserialize into sorted containers).
pub fn json<T: Serialize>(value: T, code: StatusCode) -> Response<Full<Bytes>> {
    let serialized = match serde_json::to_string_pretty(&value) {
        Ok(v) => v,
        Err(err) => {
            return Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .header(CONTENT_TYPE, "text/plain")
                .body(Full::new(Bytes::from(err.to_string())))
                .unwrap();
        }
    };

    Response::builder()
        .status(code)
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(serialized)))
        .unwrap()
}

/// Collects a request body and parses it as JSON.
pub async fn read_json_body(body: Incoming) -> anyhow::Result<serde_json::Value> {
    let bytes = body.collect().await?.to_bytes();
    Ok(serde_json::from_slice(&bytes)?)
}

/// Pulls a raw query parameter out of a request URI.
pub fn query_param<'u>(uri: &'u Uri, name: &str) -> Option<&'u str> {
    uri.query()?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_params_parse_positionally_anywhere() {
        let uri: Uri = "/status/a/b?revision=23&action=toggle".parse().unwrap();
        assert_eq!(query_param(&uri, "revision"), Some("23"));
        assert_eq!(query_param(&uri, "action"), Some("toggle"));
        assert_eq!(query_param(&uri, "missing"), None);

        let bare: Uri = "/status/a/b".parse().unwrap();
        assert_eq!(query_param(&bare, "revision"), None);
    }

    #[test]
    fn json_responses_are_pretty_printed_with_sorted_keys() {
        use crate::web::interface::StatusResponse;

        let response = StatusResponse {
            revision: 3,
            status: serde_json::json!({ "zeta": 1, "alpha": 2 }),
            url: "status://x".to_owned(),
        };

        let text = serde_json::to_string_pretty(&response).unwrap();
        let expected = "{\n  \"revision\": 3,\n  \"status\": {\n    \"alpha\": 2,\n    \"zeta\": 1\n  },\n  \"url\": \"status://x\"\n}";
        assert_eq!(text, expected);
    }
}
