//! Thin HTTP invokers for the services flock automates.
//!
//! Each invoker performs exactly one request per target and classifies any
//! failure into an `InvocationError` so the orchestrator can record it and
//! `Retrying` can decide whether another attempt makes sense.

pub mod contents;
pub mod github;
pub mod secrets;
pub mod tailscale;

use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;

use crate::error::{FlockError, Result};
use crate::orchestrator::{InvocationError, InvocationErrorKind};

const USER_AGENT: &str = concat!("flock/", env!("CARGO_PKG_VERSION"));

pub(crate) fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| FlockError::Http(e.to_string()))
}

/// Classify a failure that happened before any response arrived.
pub(crate) fn transport_error(e: reqwest::Error) -> InvocationError {
    if e.is_timeout() {
        InvocationError::timeout(e.to_string())
    } else {
        InvocationError::new(InvocationErrorKind::Transport, e.to_string())
    }
}

/// Classify a non-success response.
pub(crate) fn status_error(status: StatusCode, body: &str) -> InvocationError {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string());
    let text = if message.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {message}")
    };

    let kind = if status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN && message.to_lowercase().contains("rate limit"))
    {
        InvocationErrorKind::RateLimited
    } else if status.is_server_error() {
        InvocationErrorKind::Server
    } else {
        InvocationErrorKind::Rejected
    };
    InvocationError::new(kind, text)
}

/// Read a response to the end without judging its status.
pub(crate) fn read_body(response: Response) -> std::result::Result<(StatusCode, String), InvocationError> {
    let status = response.status();
    let body = response.text().map_err(transport_error)?;
    Ok((status, body))
}

/// Judge a fully read response: its JSON body, or an `InvocationError`.
pub(crate) fn decode_body(
    status: StatusCode,
    body: &str,
) -> std::result::Result<serde_json::Value, InvocationError> {
    if !status.is_success() {
        return Err(status_error(status, body));
    }
    if body.trim().is_empty() {
        return Ok(serde_json::Value::Null);
    }
    serde_json::from_str(body).map_err(|e| {
        InvocationError::new(
            InvocationErrorKind::Server,
            format!("unreadable response body: {e}"),
        )
    })
}

/// Turn a response into its JSON body, or an `InvocationError`.
pub(crate) fn json_body(response: Response) -> std::result::Result<serde_json::Value, InvocationError> {
    let (status, body) = read_body(response)?;
    decode_body(status, &body)
}

/// Deserialize a target payload, treating `null` as "all defaults".
pub(crate) fn parse_payload<T>(payload: &serde_json::Value) -> std::result::Result<T, InvocationError>
where
    T: serde::de::DeserializeOwned + Default,
{
    if payload.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(payload.clone())
        .map_err(|e| InvocationError::rejected(format!("invalid target payload: {e}")))
}
