//! HTTP-style adapter for atomic values.
//!
//! Maps requests onto [`AtomicValue`] operations without binding to an HTTP
//! server: a request is a method, a path relative to the resource and a
//! body, and the response is a status code plus an optional JSON body.
//!
//! | Method | Path   | Body                                 | Success body      |
//! |--------|--------|--------------------------------------|-------------------|
//! | GET    | `/`    | -                                    | value or `null`   |
//! | PUT    | `/`    | value (text)                         | -                 |
//! | POST   | `/cas` | `{"expect": ..., "update": ...}`     | `true` / `false`  |
//!
//! Values are UTF-8 strings on this surface.

use crate::core::error::{RestErrorMapping, TrellisError};
use crate::resource::facade::AtomicValue;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestMethod {
    Get,
    Put,
    Post,
}

/// Response produced once the underlying operation resolves.
#[derive(Debug, Clone, PartialEq)]
pub struct RestResponse {
    pub status: u16,
    pub body: Option<serde_json::Value>,
}

impl RestResponse {
    fn ok(body: Option<serde_json::Value>) -> Self {
        Self { status: 200, body }
    }

    fn error(error: &TrellisError) -> Self {
        let mut body = json!({ "error": error.to_string() });
        if let Some(leader) = error.leader_hint() {
            body["leader"] = json!(leader.as_str());
        }
        Self {
            status: RestErrorMapping::to_status_code(error),
            body: Some(body),
        }
    }

    fn bad_request(message: String) -> Self {
        Self::error(&TrellisError::invalid_command(message))
    }

    fn not_found() -> Self {
        Self {
            status: 404,
            body: None,
        }
    }
}

/// Body of `POST /cas`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompareAndSetRequest {
    #[serde(default)]
    pub expect: Option<String>,
    #[serde(default)]
    pub update: Option<String>,
}

/// REST resource over one atomic value.
#[derive(Debug, Clone)]
pub struct AtomicValueResource {
    value: AtomicValue,
}

impl AtomicValueResource {
    pub fn new(value: AtomicValue) -> Self {
        Self { value }
    }

    /// Dispatch a request by method and path.
    pub async fn handle(&self, method: RestMethod, path: &str, body: &str) -> RestResponse {
        match (method, path.trim_end_matches('/')) {
            (RestMethod::Get, "") => self.get().await,
            (RestMethod::Put, "") => self.set(body).await,
            (RestMethod::Post, "/cas") => self.compare_and_set(body).await,
            _ => RestResponse::not_found(),
        }
    }

    /// `GET /`
    pub async fn get(&self) -> RestResponse {
        match self.value.get().await {
            Ok(value) => match value.map(text).transpose() {
                Ok(value) => RestResponse::ok(Some(json!(value))),
                Err(e) => RestResponse::error(&e),
            },
            Err(e) => RestResponse::error(&e),
        }
    }

    /// `PUT /`
    pub async fn set(&self, body: &str) -> RestResponse {
        match self.value.set(Some(Bytes::copy_from_slice(body.as_bytes()))).await {
            Ok(_) => RestResponse::ok(None),
            Err(e) => RestResponse::error(&e),
        }
    }

    /// `POST /cas`
    pub async fn compare_and_set(&self, body: &str) -> RestResponse {
        let request: CompareAndSetRequest = match serde_json::from_str(body) {
            Ok(request) => request,
            Err(e) => return RestResponse::bad_request(format!("invalid cas request: {}", e)),
        };
        let expect = request.expect.map(Bytes::from);
        let update = request.update.map(Bytes::from);
        match self.value.compare_and_set(expect, update).await {
            Ok(swapped) => RestResponse::ok(Some(json!(swapped))),
            Err(e) => RestResponse::error(&e),
        }
    }
}

fn text(value: Bytes) -> Result<String, TrellisError> {
    String::from_utf8(value.to_vec())
        .map_err(|_| TrellisError::internal("stored value is not valid UTF-8"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::membership::MemberId;

    #[test]
    fn errors_map_to_status_and_leader_hint() {
        let response = RestResponse::error(&TrellisError::not_leader(Some(MemberId::new("b"))));
        assert_eq!(response.status, 307);
        let body = response.body.unwrap();
        assert_eq!(body["leader"], "b");

        let response = RestResponse::error(&TrellisError::Timeout);
        assert_eq!(response.status, 504);
        assert!(response.body.unwrap().get("leader").is_none());
    }

    #[test]
    fn cas_request_fields_default_to_null() {
        let request: CompareAndSetRequest = serde_json::from_str(r#"{"update":"x"}"#).unwrap();
        assert_eq!(request.expect, None);
        assert_eq!(request.update.as_deref(), Some("x"));
    }
}
