//! Applies an [`EncodingStrategy`] to an outgoing request.

use serde_json::Value;
use url::Url;

use crate::api::{DefaultJsonEncoder, EncodingStrategy, JsonEncoder, Payload};
use crate::error::{BoxError, ServiceError};
use crate::http::HttpRequest;

pub const CONTENT_TYPE: &str = "Content-Type";
pub const APPLICATION_JSON: &str = "application/json";

/// Encodes the strategy's payload into `request`: query strategies rewrite
/// the URL, body strategies set the body. The request is returned unchanged
/// for [`EncodingStrategy::None`].
pub fn encode(mut request: HttpRequest, strategy: &EncodingStrategy) -> Result<HttpRequest, ServiceError> {
    match strategy {
        EncodingStrategy::None => {}
        EncodingStrategy::QueryParameters(payload) => {
            request.url = encode_query(&request.url, payload)?;
        }
        EncodingStrategy::JsonBody(payload) => {
            request.body = Some(encode_body(payload, &DefaultJsonEncoder)?);
        }
        EncodingStrategy::JsonBodyCustomEncoder(payload, encoder) => {
            request.body = Some(encode_body(payload, encoder.as_ref())?);
        }
    }
    Ok(request)
}

/// Appends one query parameter per top-level key of the payload.
fn encode_query(url: &str, payload: &Payload) -> Result<String, ServiceError> {
    let parameter_error = || ServiceError::ParameterEncoding {
        url: url.to_string(),
        payload: payload.clone(),
    };
    let mut parsed = Url::parse(url).map_err(|_| parameter_error())?;

    let params = match payload.to_json() {
        Ok(Value::Object(map)) => map,
        Ok(_) | Err(_) => return Err(parameter_error()),
    };
    if params.is_empty() {
        return Ok(parsed.into());
    }

    {
        let mut pairs = parsed.query_pairs_mut();
        for (key, value) in &params {
            pairs.append_pair(key, &query_value(value));
        }
    }
    Ok(parsed.into())
}

fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn encode_body(payload: &Payload, encoder: &dyn JsonEncoder) -> Result<Vec<u8>, ServiceError> {
    let body_error = |source: BoxError| ServiceError::ApplyingBody {
        payload: payload.clone(),
        encoder: encoder.name().to_string(),
        source,
    };
    let value = payload.to_json().map_err(|e| body_error(e.into()))?;
    encoder.encode(&value).map_err(body_error)
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};
    use std::sync::Arc;

    use proptest::prelude::*;
    use serde::ser::{Error as _, Serializer};
    use serde::Serialize;

    use super::*;
    use crate::api::PrettyJsonEncoder;
    use crate::http::HttpMethod;

    #[derive(Debug, Serialize)]
    struct EchoParams {
        foo: String,
        bar: String,
    }

    #[derive(Debug)]
    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("refuses to serialize"))
        }
    }

    #[derive(Debug)]
    struct FailingEncoder;

    impl JsonEncoder for FailingEncoder {
        fn name(&self) -> &str {
            "failing"
        }

        fn encode(&self, _value: &Value) -> Result<Vec<u8>, BoxError> {
            Err("encoder is broken".into())
        }
    }

    fn get(url: &str) -> HttpRequest {
        HttpRequest::new(HttpMethod::Get, url)
    }

    fn query_map(url: &str) -> HashMap<String, String> {
        Url::parse(url).unwrap().query_pairs().into_owned().collect()
    }

    #[test]
    fn none_leaves_request_untouched() {
        let request = get("https://postman-echo.com/get");
        let encoded = encode(request.clone(), &EncodingStrategy::None).unwrap();
        assert_eq!(encoded, request);
    }

    #[test]
    fn query_parameters_are_appended() {
        let strategy = EncodingStrategy::query(EchoParams {
            foo: "here".to_string(),
            bar: "there".to_string(),
        });
        let encoded = encode(get("https://postman-echo.com/get"), &strategy).unwrap();
        let query = query_map(&encoded.url);
        assert_eq!(query.len(), 2);
        assert_eq!(query["foo"], "here");
        assert_eq!(query["bar"], "there");
        assert!(encoded.body.is_none());
    }

    #[test]
    fn query_parameters_keep_existing_query() {
        let strategy = EncodingStrategy::query(BTreeMap::from([("count", 10)]));
        let encoded = encode(get("https://h/items?page=2"), &strategy).unwrap();
        let query = query_map(&encoded.url);
        assert_eq!(query["page"], "2");
        assert_eq!(query["count"], "10");
    }

    #[test]
    fn empty_query_payload_leaves_url_unchanged() {
        let strategy = EncodingStrategy::query(BTreeMap::<String, String>::new());
        let encoded = encode(get("https://h/items"), &strategy).unwrap();
        assert_eq!(encoded.url, "https://h/items");
    }

    #[test]
    fn non_object_query_payload_is_a_parameter_error() {
        let strategy = EncodingStrategy::query(vec![1, 2, 3]);
        let err = encode(get("https://h/items"), &strategy).unwrap_err();
        assert!(matches!(err, ServiceError::ParameterEncoding { ref url, .. } if url == "https://h/items"));
    }

    #[test]
    fn unparsable_url_is_a_parameter_error() {
        let strategy = EncodingStrategy::query(BTreeMap::from([("count", 10)]));
        let err = encode(get("not a url"), &strategy).unwrap_err();
        assert!(matches!(err, ServiceError::ParameterEncoding { ref url, .. } if url == "not a url"));
    }

    #[test]
    fn pretty_encoded_body_decodes_to_payload() {
        let params = EchoParams {
            foo: "here".to_string(),
            bar: "there".to_string(),
        };
        let expected = serde_json::to_value(&params).unwrap();
        let strategy = EncodingStrategy::json_body_with(params, PrettyJsonEncoder);
        let encoded = encode(HttpRequest::new(HttpMethod::Put, "https://h/items"), &strategy).unwrap();

        let body = encoded.body.as_deref().unwrap();
        assert!(body.contains(&b'\n'));
        let decoded: Value = serde_json::from_slice(body).unwrap();
        assert_eq!(decoded, expected);
    }

    #[test]
    fn json_body_round_trips() {
        let strategy = EncodingStrategy::json_body(EchoParams {
            foo: "here".to_string(),
            bar: "there".to_string(),
        });
        let encoded = encode(HttpRequest::new(HttpMethod::Post, "https://h/post"), &strategy).unwrap();
        let body: Value = serde_json::from_slice(encoded.body.as_deref().unwrap()).unwrap();
        assert_eq!(body, serde_json::json!({ "foo": "here", "bar": "there" }));
        assert_eq!(encoded.url, "https://h/post");
    }

    #[test]
    fn failing_custom_encoder_reports_its_name() {
        let strategy = EncodingStrategy::JsonBodyCustomEncoder(
            Arc::new(EchoParams {
                foo: "here".to_string(),
                bar: "there".to_string(),
            }),
            Arc::new(FailingEncoder),
        );
        let err = encode(HttpRequest::new(HttpMethod::Post, "https://h/post"), &strategy).unwrap_err();
        match err {
            ServiceError::ApplyingBody { encoder, source, .. } => {
                assert_eq!(encoder, "failing");
                assert_eq!(source.to_string(), "encoder is broken");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unserializable_body_is_an_applying_body_error() {
        let strategy = EncodingStrategy::json_body(Unserializable);
        let err = encode(HttpRequest::new(HttpMethod::Post, "https://h/post"), &strategy).unwrap_err();
        assert!(matches!(err, ServiceError::ApplyingBody { ref encoder, .. } if encoder == "default"));
    }

    proptest! {
        #[test]
        fn query_encoding_round_trips(params in proptest::collection::hash_map("[a-zA-Z0-9_]{1,8}", ".{0,12}", 0..6)) {
            let strategy = EncodingStrategy::query(params.clone());
            let encoded = encode(get("https://postman-echo.com/get"), &strategy).unwrap();
            let decoded = query_map(&encoded.url);
            prop_assert_eq!(decoded, params.clone());
            if params.is_empty() {
                prop_assert_eq!(encoded.url.as_str(), "https://postman-echo.com/get");
            }
        }
    }
}
