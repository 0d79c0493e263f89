//! Response classification for authenticated JSON exchanges.
//!
//! [`classify`] is a pure function of the HTTP status, body text, and attempt
//! position. It owns two correctness-critical distinctions:
//!
//! - 401 on a first attempt is a retryable credential expiry; 401 on a replay and
//!   403 in any position are terminal. Treating 403 as refreshable would spin a
//!   futile refresh cycle on requests that can never succeed.
//! - A non-2xx response whose payload marks itself `success: true` is delivered as
//!   a success. The backend overloads HTTP status for non-error signaling on some
//!   "not found"-style results; the escape hatch is preserved as observed, not
//!   generalized.

// self
use crate::{
	_prelude::*,
	error::{ApiError, ErrorResponse},
};

/// Outcome of one HTTP exchange, consumed immediately by the dispatcher.
#[derive(Clone, Debug)]
pub enum ClassifiedResponse {
	/// Successful exchange carrying the parsed payload.
	Ok(Value),
	/// Expired-credential signal eligible for one coordinated refresh + replay.
	RetryableAuth {
		/// HTTP status of the exchange (401).
		status: u16,
		/// Parsed payload, kept so the error can be surfaced if refresh is denied.
		payload: Value,
	},
	/// Error that ends the call without further recovery attempts.
	Terminal(ApiError),
}

/// Position of the exchange within one logical call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Attempt {
	/// Original attempt; a 401 here may trigger refresh + replay.
	First,
	/// Post-refresh replay; a 401 here is terminal.
	Replay,
}

/// Classifies a raw response into a [`ClassifiedResponse`].
pub fn classify(status: u16, body: &str, attempt: Attempt) -> ClassifiedResponse {
	let payload = parse_payload(status, body);

	if (200..300).contains(&status) {
		return ClassifiedResponse::Ok(payload);
	}
	if payload.get("success").and_then(Value::as_bool) == Some(true) {
		return ClassifiedResponse::Ok(payload);
	}
	if status == 401 && attempt == Attempt::First {
		return ClassifiedResponse::RetryableAuth { status, payload };
	}

	ClassifiedResponse::Terminal(terminal_error(status, payload))
}

/// Builds the terminal error for a non-success exchange.
///
/// Also used by the dispatcher to surface a 401 on the refresh endpoint itself,
/// which is never eligible for refresh.
pub fn terminal_error(status: u16, payload: Value) -> ApiError {
	ApiError {
		message: derive_message(status, &payload),
		status,
		error_code: derive_error_code(&payload),
		response: ErrorResponse { status, data: payload },
	}
}

/// Parses the body leniently; a malformed body must never fail the call.
pub(crate) fn parse_payload(status: u16, body: &str) -> Value {
	if body.trim().is_empty() {
		return synthesized_payload(status);
	}

	serde_json::from_str(body).unwrap_or_else(|_| synthesized_payload(status))
}

fn synthesized_payload(status: u16) -> Value {
	json!({ "message": status_text(status) })
}

/// Message priority: nested `error.message`, top-level `message`, generic fallback.
pub(crate) fn derive_message(status: u16, payload: &Value) -> String {
	if let Some(message) = payload.pointer("/error/message").and_then(Value::as_str) {
		return message.into();
	}
	if let Some(message) = payload.get("message").and_then(Value::as_str) {
		return message.into();
	}

	format!("Request failed with status {status}")
}

fn derive_error_code(payload: &Value) -> Option<String> {
	match payload.pointer("/error/code")? {
		Value::String(code) => Some(code.clone()),
		Value::Number(code) => Some(code.to_string()),
		_ => None,
	}
}

fn status_text(status: u16) -> &'static str {
	match status {
		200 => "OK",
		201 => "Created",
		204 => "No Content",
		400 => "Bad Request",
		401 => "Unauthorized",
		403 => "Forbidden",
		404 => "Not Found",
		409 => "Conflict",
		422 => "Unprocessable Entity",
		429 => "Too Many Requests",
		500 => "Internal Server Error",
		502 => "Bad Gateway",
		503 => "Service Unavailable",
		504 => "Gateway Timeout",
		_ => "Unknown Status",
	}
}
