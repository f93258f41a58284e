//! Request and response envelopes
//!
//! Envelopes are the JSON bodies carried across the broker. The correlation id
//! and the reply address are *not* part of the request body: they travel as
//! message metadata (see [`crate::broker::Message`]) so a body can be replayed
//! without reusing a routing token.
//!
//! # Wire format
//!
//! Request:
//!
//! ```json
//! { "id": "3f0c…", "version": "v1", "action": "create_book",
//!   "data": {"title": "Dune"}, "auth": "secret", "idempotency_key": "k-1" }
//! ```
//!
//! Response:
//!
//! ```json
//! { "correlation_id": "9a1e…", "status": "ok", "data": {"id": 1} }
//! { "correlation_id": "9a1e…", "status": "error", "error": "Book not found" }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Error messages shared by the dispatcher and its callers
pub mod errors {
    /// The request body was not a valid envelope
    pub const INVALID_JSON: &str = "Invalid JSON";
    /// The shared secret did not match
    pub const INVALID_API_KEY: &str = "Invalid API key";
    /// No handler is registered for the `(action, version)` pair
    pub const UNKNOWN_ACTION: &str = "Unknown action or version";
    /// The client identity exhausted its quota
    pub const RATE_LIMIT_EXCEEDED: &str = "Rate limit exceeded";
    /// Another request holding the same idempotency key has not finished yet
    pub const REQUEST_IN_PROGRESS: &str = "Request with this idempotency key is already in progress";
}

/// Version assumed when a request omits it
pub const DEFAULT_VERSION: &str = "v1";

fn default_version() -> String {
    DEFAULT_VERSION.to_string()
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// Body of a request published to the request queue
///
/// `id` and `action` are required; everything else has a default so that an
/// envelope with a missing `auth` fails the secret check instead of parsing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Opaque unique token for this request body
    #[serde(rename = "id")]
    pub request_id: String,
    /// API generation, e.g. "v1" or "v2"
    #[serde(default = "default_version")]
    pub version: String,
    /// Named operation
    pub action: String,
    /// Handler-owned payload
    #[serde(rename = "data", default = "empty_object")]
    pub payload: Value,
    /// Shared secret
    #[serde(rename = "auth", default)]
    pub auth_token: String,
    /// Opt-in deduplication key for mutating calls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl RequestEnvelope {
    /// Build a request with a freshly minted request id
    pub fn new(
        action: impl Into<String>,
        version: impl Into<String>,
        payload: Value,
        auth_token: impl Into<String>,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            version: version.into(),
            action: action.into(),
            payload,
            auth_token: auth_token.into(),
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Decode a request body
    pub fn from_slice(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    /// Encode the request body
    pub fn to_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Outcome of a call as seen on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

/// Body of a response published to a reply queue
///
/// Exactly one of `data` and `error` is populated; use [`ResponseEnvelope::ok`]
/// and [`ResponseEnvelope::error`] to keep it that way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Copied from the request's transport metadata
    pub correlation_id: String,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResponseEnvelope {
    pub fn ok(correlation_id: impl Into<String>, data: Value) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            status: Status::Ok,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(correlation_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            status: Status::Error,
            data: None,
            error: Some(message.into()),
        }
    }

    /// Build a response from a handler-style result
    pub fn from_result(correlation_id: impl Into<String>, result: Result<Value, String>) -> Self {
        match result {
            Ok(data) => Self::ok(correlation_id, data),
            Err(message) => Self::error(correlation_id, message),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    /// Error message, if this is an error response
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Convert into `Ok(data)` or `Err(message)`
    pub fn into_result(self) -> Result<Value, String> {
        match self.status {
            Status::Ok => Ok(self.data.unwrap_or(Value::Null)),
            Status::Error => Err(self.error.unwrap_or_default()),
        }
    }

    pub fn from_slice(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_field_names() {
        let request = RequestEnvelope::new("create_book", "v2", json!({"title": "Dune"}), "secret")
            .with_idempotency_key("k-1");

        let value: Value = serde_json::from_slice(&request.to_vec().unwrap()).unwrap();
        assert_eq!(value["id"], json!(request.request_id));
        assert_eq!(value["version"], "v2");
        assert_eq!(value["action"], "create_book");
        assert_eq!(value["data"]["title"], "Dune");
        assert_eq!(value["auth"], "secret");
        assert_eq!(value["idempotency_key"], "k-1");
    }

    #[test]
    fn test_request_omits_absent_idempotency_key() {
        let request = RequestEnvelope::new("get_books", "v1", json!({}), "secret");
        let json = String::from_utf8(request.to_vec().unwrap()).unwrap();
        assert!(!json.contains("idempotency_key"));
    }

    #[test]
    fn test_request_defaults() {
        let request = RequestEnvelope::from_slice(br#"{"id": "r1", "action": "get_books"}"#).unwrap();
        assert_eq!(request.version, DEFAULT_VERSION);
        assert_eq!(request.payload, json!({}));
        assert_eq!(request.auth_token, "");
        assert_eq!(request.idempotency_key, None);
    }

    #[test]
    fn test_request_missing_action_is_malformed() {
        assert!(RequestEnvelope::from_slice(br#"{"id": "r1", "auth": "x"}"#).is_err());
        assert!(RequestEnvelope::from_slice(b"not json").is_err());
    }

    #[test]
    fn test_response_has_exactly_one_of_data_and_error() {
        let ok: Value = serde_json::to_value(ResponseEnvelope::ok("c1", json!({"id": 1}))).unwrap();
        assert_eq!(ok["status"], "ok");
        assert!(ok.get("error").is_none());
        assert_eq!(ok["data"]["id"], 1);

        let err: Value =
            serde_json::to_value(ResponseEnvelope::error("c2", errors::UNKNOWN_ACTION)).unwrap();
        assert_eq!(err["status"], "error");
        assert!(err.get("data").is_none());
        assert_eq!(err["error"], "Unknown action or version");
    }

    #[test]
    fn test_response_into_result() {
        let response = ResponseEnvelope::from_slice(
            br#"{"correlation_id": "c1", "status": "error", "error": "Book not found"}"#,
        )
        .unwrap();
        assert!(!response.is_ok());
        assert_eq!(response.error_message(), Some("Book not found"));
        assert_eq!(response.into_result(), Err("Book not found".to_string()));
    }
}
