//! Decoding of raw responses into caller types.

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::error::ParsingError;
use crate::provider::DataResponse;

/// Decodes a successful [`DataResponse`] into `T`.
///
/// Runs on tokio's blocking pool, so implementations may do CPU-heavy work.
pub trait ResponseParser: Send + Sync + 'static {
    fn parse<T: DeserializeOwned>(&self, response: &DataResponse) -> Result<T, ParsingError>;
}

/// Body of a response whose status is outside the success range.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("HTTP {status}: {body}")]
pub struct ApiErrorResponse {
    pub status: u16,
    pub body: String,
}

/// Decodes JSON with `serde_json`.
///
/// Error statuses (4xx and 5xx) are reported as [`ParsingError::Response`]
/// carrying an [`ApiErrorResponse`]. An empty body decodes as JSON `null`,
/// so `()` and `Option<_>` targets accept `204 No Content`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonResponseParser;

impl ResponseParser for JsonResponseParser {
    fn parse<T: DeserializeOwned>(&self, response: &DataResponse) -> Result<T, ParsingError> {
        if let Some(status) = response.status().filter(|status| *status >= 400) {
            return Err(ParsingError::Response(Box::new(ApiErrorResponse {
                status,
                body: String::from_utf8_lossy(&response.data).into_owned(),
            })));
        }

        let body: &[u8] = if response.data.iter().all(u8::is_ascii_whitespace) {
            b"null"
        } else {
            &response.data
        };
        serde_json::from_slice(body).map_err(|e| ParsingError::Parsing(Box::new(e)))
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;
    use crate::http::{HttpMethod, HttpRequest, HttpResponse};

    #[derive(Debug, Deserialize, PartialEq)]
    struct Account {
        id: String,
    }

    fn response(status: u16, body: &str) -> DataResponse {
        DataResponse {
            data: body.as_bytes().to_vec(),
            request: HttpRequest::new(HttpMethod::Get, "https://h/accounts/828319"),
            response: Some(HttpResponse::new(status)),
        }
    }

    #[test]
    fn decodes_json_body() {
        let account: Account = JsonResponseParser.parse(&response(200, r#"{"id":"828319"}"#)).unwrap();
        assert_eq!(account, Account { id: "828319".to_string() });
    }

    #[test]
    fn empty_body_decodes_as_null() {
        let nothing: Option<Account> = JsonResponseParser.parse(&response(204, "")).unwrap();
        assert_eq!(nothing, None);
        let () = JsonResponseParser.parse(&response(204, "")).unwrap();
    }

    #[test]
    fn malformed_body_is_a_parsing_error() {
        let err = JsonResponseParser.parse::<Account>(&response(200, "{not json")).unwrap_err();
        assert!(matches!(err, ParsingError::Parsing(_)));
    }

    #[test]
    fn error_status_is_an_api_error() {
        let err = JsonResponseParser
            .parse::<Account>(&response(404, r#"{"error":"unknown account"}"#))
            .unwrap_err();
        match err {
            ParsingError::Response(source) => {
                let api = source.downcast_ref::<ApiErrorResponse>().unwrap();
                assert_eq!(api.status, 404);
                assert!(api.body.contains("unknown account"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
