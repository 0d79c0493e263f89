//! Transport primitives for authenticated JSON exchanges.
//!
//! [`HttpTransport`] is the relay's only dependency on an HTTP stack. The trait
//! hands back the raw status + body text so classification stays a pure function
//! in [`classify`](crate::classify); transport-level failures (no response at
//! all) are reported as [`TransportFailure`] and kept distinct from HTTP-level
//! errors throughout the crate.

// std
use std::ops::Deref;
// self
use crate::_prelude::*;

/// Boxed future returned by [`HttpTransport::execute`].
pub type TransportFuture<'a> =
	Pin<Box<dyn Future<Output = Result<RawResponse, TransportFailure>> + 'a + Send>>;

/// Abstraction over HTTP transports capable of executing one JSON exchange.
///
/// Implementations must be `Send + Sync + 'static` so one transport can be shared
/// by the client and the refresh coordinator behind `Arc<T>` without wrappers.
pub trait HttpTransport
where
	Self: 'static + Send + Sync,
{
	/// Executes the request and returns the raw status + body text.
	fn execute(&self, request: WireRequest) -> TransportFuture<'_>;
}

/// HTTP method subset used by the relay.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
	/// HTTP GET.
	Get,
	/// HTTP POST.
	Post,
	/// HTTP PUT.
	Put,
	/// HTTP DELETE.
	Delete,
}
impl Method {
	/// Returns the wire-format method name.
	pub const fn as_str(self) -> &'static str {
		match self {
			Method::Get => "GET",
			Method::Post => "POST",
			Method::Put => "PUT",
			Method::Delete => "DELETE",
		}
	}
}
impl Display for Method {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Fully-resolved request handed to the transport.
///
/// Built fresh for every attempt so replays pick up headers rebuilt from the
/// credential committed after refresh, never a stale snapshot.
#[derive(Clone, Debug)]
pub struct WireRequest {
	/// HTTP method.
	pub method: Method,
	/// Absolute request URL.
	pub url: Url,
	/// Ordered header list; later entries override earlier ones of the same name
	/// (case-insensitive), so caller extras win over the defaults.
	pub headers: Vec<(String, String)>,
	/// Serialized JSON body, when present.
	pub body: Option<String>,
}

/// Raw response handed back by the transport.
#[derive(Clone, Debug)]
pub struct RawResponse {
	/// HTTP status code.
	pub status: u16,
	/// Body text; may be empty or non-JSON.
	pub body: String,
}

/// Transport-level failure: no usable response was obtained.
#[derive(Debug, ThisError)]
#[error("Network error occurred while calling `{url}`.")]
pub struct TransportFailure {
	/// URL of the failed exchange.
	pub url: Url,
	/// Transport-specific failure.
	#[source]
	pub source: Box<dyn std::error::Error + Send + Sync>,
}
impl TransportFailure {
	/// Wraps a transport-specific failure.
	pub fn new(url: Url, src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self { url, source: Box::new(src) }
	}

	/// Returns a one-line summary suitable for `Clone`-able error variants.
	pub fn summary(&self) -> String {
		self.source.to_string()
	}
}

/// Standard JSON content/accept header pair attached to every relay request.
pub(crate) fn json_headers() -> Vec<(String, String)> {
	vec![
		("Content-Type".into(), "application/json".into()),
		("Accept".into(), "application/json".into()),
	]
}

/// Thin wrapper around [`ReqwestClient`] so shared HTTP behavior lives in one place.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransport(pub ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestTransport {
	/// Wraps an existing [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}
}
#[cfg(feature = "reqwest")]
impl AsRef<ReqwestClient> for ReqwestTransport {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl Deref for ReqwestTransport {
	type Target = ReqwestClient;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl HttpTransport for ReqwestTransport {
	fn execute(&self, request: WireRequest) -> TransportFuture<'_> {
		let client = self.0.clone();

		Box::pin(async move {
			let headers = collapse_headers(&request)?;
			let mut builder =
				client.request(request.method.into(), request.url.clone()).headers(headers);

			if let Some(body) = request.body {
				builder = builder.body(body);
			}

			let response = builder
				.send()
				.await
				.map_err(|err| TransportFailure::new(request.url.clone(), err))?;
			let status = response.status().as_u16();
			let body = response
				.text()
				.await
				.map_err(|err| TransportFailure::new(request.url.clone(), err))?;

			Ok(RawResponse { status, body })
		})
	}
}
/// Folds the ordered header list into a [`reqwest::header::HeaderMap`] via
/// `insert`, which replaces rather than appends, giving later entries precedence.
#[cfg(feature = "reqwest")]
fn collapse_headers(request: &WireRequest) -> Result<reqwest::header::HeaderMap, TransportFailure> {
	// std
	use std::str::FromStr;
	// crates.io
	use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

	let mut map = HeaderMap::new();

	for (name, value) in &request.headers {
		let name = HeaderName::from_str(name)
			.map_err(|err| TransportFailure::new(request.url.clone(), err))?;
		let value = HeaderValue::from_str(value)
			.map_err(|err| TransportFailure::new(request.url.clone(), err))?;

		map.insert(name, value);
	}

	Ok(map)
}

#[cfg(feature = "reqwest")]
impl From<Method> for reqwest::Method {
	fn from(method: Method) -> Self {
		match method {
			Method::Get => reqwest::Method::GET,
			Method::Post => reqwest::Method::POST,
			Method::Put => reqwest::Method::PUT,
			Method::Delete => reqwest::Method::DELETE,
		}
	}
}
