//! Relay-level error types shared across the classifier, coordinator, and client.

// self
use crate::_prelude::*;

/// Relay-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical relay error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Terminal HTTP error reported by the server.
	#[error(transparent)]
	Api(#[from] ApiError),
	/// No response was obtained at all (DNS, TCP, TLS).
	#[error("Server is unreachable: {message}.")]
	Unreachable {
		/// Transport-supplied failure summary.
		message: String,
	},
	/// Token refresh failed; the session has been invalidated.
	#[error(transparent)]
	SessionExpired(#[from] RefreshError),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
}
impl Error {
	/// Returns the HTTP status associated with the error, using `0` for failures
	/// where no response was obtained.
	pub fn status(&self) -> u16 {
		match self {
			Self::Api(err) => err.status,
			Self::Unreachable { .. } => 0,
			Self::SessionExpired(err) => err.status(),
			Self::Config(_) => 0,
		}
	}
}

/// Caller-facing terminal error for a single HTTP exchange.
///
/// The shape is stable so UI callers can branch on [`status`](ApiError::status)
/// and display [`message`](ApiError::message) without inspecting the payload.
#[derive(Clone, Debug, ThisError)]
#[error("{message}")]
pub struct ApiError {
	/// Human-readable message derived from the response payload.
	pub message: String,
	/// HTTP status code of the failed exchange.
	pub status: u16,
	/// Machine-readable error code, when the payload carried one.
	pub error_code: Option<String>,
	/// Raw response context for callers that need the full payload.
	pub response: ErrorResponse,
}

/// Raw response context attached to an [`ApiError`].
#[derive(Clone, Debug)]
pub struct ErrorResponse {
	/// HTTP status code of the failed exchange.
	pub status: u16,
	/// Parsed (or synthesized) response payload.
	pub data: Value,
}

/// Refresh failure shared verbatim by every caller that joined the in-flight
/// refresh, hence [`Clone`] with owned message strings instead of sources.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum RefreshError {
	/// Refresh endpoint answered with a non-success status.
	#[error("Token refresh was rejected upstream: {message}.")]
	Rejected {
		/// HTTP status returned by the refresh endpoint.
		status: u16,
		/// Message derived from the refresh response payload.
		message: String,
	},
	/// Refresh endpoint could not be reached at all.
	#[error("Token refresh could not reach the server: {message}.")]
	Unreachable {
		/// Transport-supplied failure summary.
		message: String,
	},
	/// Refresh endpoint answered 2xx but the body did not parse as a grant.
	#[error("Token refresh returned a malformed grant: {message}.")]
	MalformedGrant {
		/// HTTP status returned by the refresh endpoint.
		status: u16,
		/// Structured parse failure, including the JSON path.
		message: String,
	},
	/// Leading caller was dropped before the refresh settled.
	///
	/// Waiters receive this instead of hanging; the session is left intact and the
	/// next caller elects a fresh leader.
	#[error("Token refresh was interrupted before completion.")]
	Interrupted,
}
impl RefreshError {
	/// Returns the HTTP status associated with the failure, `0` when unreachable.
	pub fn status(&self) -> u16 {
		match self {
			Self::Rejected { status, .. } | Self::MalformedGrant { status, .. } => *status,
			Self::Unreachable { .. } | Self::Interrupted => 0,
		}
	}
}

/// Configuration and validation failures raised by the relay.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// Base URL cannot be parsed.
	#[error("Base URL is invalid.")]
	InvalidBaseUrl {
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Request path cannot be joined onto the base URL.
	#[error("Endpoint path `{path}` cannot be resolved against the base URL.")]
	InvalidEndpoint {
		/// Offending request path.
		path: String,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Request body cannot be serialized to JSON.
	#[error("Request body cannot be serialized.")]
	BodySerialization(#[from] serde_json::Error),
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}
