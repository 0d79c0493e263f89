//! Authenticated request dispatch with coordinated refresh + single replay.
//!
//! [`ApiClient`] is the uniform request/response surface page and service code
//! calls. Each operation captures a [`RequestDescriptor`] so the original call can
//! be replayed verbatim (headers excepted) after a successful refresh. At most one
//! replay is attempted: a second 401 is surfaced terminal, never retried again,
//! which bounds a call to original attempt + refresh + one replay.

// self
use crate::{
	_prelude::*,
	classify::{self, Attempt, ClassifiedResponse, classify},
	credential::CredentialStore,
	error::ConfigError,
	http::{self, HttpTransport, Method, RawResponse, WireRequest},
	obs::{self, CallKind, CallOutcome, CallSpan},
	refresh::RefreshCoordinator,
};
#[cfg(feature = "reqwest")]
use crate::{http::ReqwestTransport, session::{SessionNavigator, SessionTerminator}};

/// Per-call options controlling headers and authentication.
#[derive(Clone, Debug)]
pub struct RequestOptions {
	headers: Vec<(String, String)>,
	authenticated: bool,
}
impl RequestOptions {
	/// Creates options with authentication enabled and no extra headers.
	pub fn new() -> Self {
		Self { headers: Vec::new(), authenticated: true }
	}

	/// Suppresses the Authorization header for this call.
	///
	/// Needed for unauthenticated endpoints such as the refresh call itself.
	pub fn unauthenticated(mut self) -> Self {
		self.authenticated = false;

		self
	}

	/// Appends an extra header to this call.
	pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.push((name.into(), value.into()));

		self
	}
}
impl Default for RequestOptions {
	fn default() -> Self {
		Self::new()
	}
}

/// One logical call, captured at call time so it can be replayed verbatim.
///
/// Lives only for the duration of the call (original attempt + at most one
/// replay); headers here are the caller's extras, not the rebuilt auth headers.
#[derive(Clone, Debug)]
pub struct RequestDescriptor {
	/// HTTP method.
	pub method: Method,
	/// Request path relative to the client's base URL.
	pub path: String,
	/// JSON body, when present.
	pub body: Option<Value>,
	/// Caller-supplied extra headers.
	pub headers: Vec<(String, String)>,
	/// Whether the Authorization header is attached.
	pub authenticated: bool,
}
impl RequestDescriptor {
	fn new(method: Method, path: &str, body: Option<Value>, opts: RequestOptions) -> Self {
		Self {
			method,
			path: path.into(),
			body,
			headers: opts.headers,
			authenticated: opts.authenticated,
		}
	}
}

/// Authenticated JSON API client shared by all callers in a process.
///
/// The client owns the transport, credential capability, and refresh coordinator
/// references; callers never deal with tokens. Only final success payloads or
/// terminal errors cross this boundary.
pub struct ApiClient<T>
where
	T: ?Sized + HttpTransport,
{
	/// Transport used for every outbound exchange.
	pub transport: Arc<T>,
	/// Base URL every request path is resolved against.
	pub base_url: Url,
	/// Credential capability read at call time for the Authorization header.
	pub credentials: Arc<dyn CredentialStore>,
	/// Coordinator driven when a call observes an expired credential.
	pub refresher: Arc<RefreshCoordinator<T>>,
	refresh_path: String,
}
impl<T> ApiClient<T>
where
	T: ?Sized + HttpTransport,
{
	/// Creates a client that reuses the caller-provided transport + coordinator pair.
	///
	/// `refresh_path` must identify the same endpoint the coordinator calls; a 401
	/// from that path is never refreshed. A base URL without a trailing slash gets
	/// one so request paths nest under its path prefix instead of replacing it.
	pub fn with_transport(
		transport: impl Into<Arc<T>>,
		base_url: Url,
		refresh_path: impl Into<String>,
		credentials: Arc<dyn CredentialStore>,
		refresher: Arc<RefreshCoordinator<T>>,
	) -> Self {
		Self {
			transport: transport.into(),
			base_url: normalize_base(base_url),
			credentials,
			refresher,
			refresh_path: normalize_path(&refresh_path.into()).into(),
		}
	}

	/// Issues a GET request.
	pub async fn get(&self, path: &str, opts: RequestOptions) -> Result<Value> {
		self.dispatch(RequestDescriptor::new(Method::Get, path, None, opts)).await
	}

	/// Issues a POST request with a JSON body.
	pub async fn post(&self, path: &str, body: Value, opts: RequestOptions) -> Result<Value> {
		self.dispatch(RequestDescriptor::new(Method::Post, path, Some(body), opts)).await
	}

	/// Issues a PUT request with a JSON body.
	pub async fn put(&self, path: &str, body: Value, opts: RequestOptions) -> Result<Value> {
		self.dispatch(RequestDescriptor::new(Method::Put, path, Some(body), opts)).await
	}

	/// Issues a DELETE request.
	pub async fn delete(&self, path: &str, opts: RequestOptions) -> Result<Value> {
		self.dispatch(RequestDescriptor::new(Method::Delete, path, None, opts)).await
	}

	async fn dispatch(&self, descriptor: RequestDescriptor) -> Result<Value> {
		const KIND: CallKind = CallKind::Request;

		let span = CallSpan::new(KIND, "dispatch");

		obs::record_call_outcome(KIND, CallOutcome::Attempt);

		let result = span.instrument(self.dispatch_inner(descriptor)).await;

		match &result {
			Ok(_) => obs::record_call_outcome(KIND, CallOutcome::Success),
			Err(_) => obs::record_call_outcome(KIND, CallOutcome::Failure),
		}

		result
	}

	async fn dispatch_inner(&self, descriptor: RequestDescriptor) -> Result<Value> {
		let response = self.send(&descriptor).await?;

		match classify(response.status, &response.body, Attempt::First) {
			ClassifiedResponse::Ok(payload) => Ok(payload),
			ClassifiedResponse::Terminal(err) => Err(err.into()),
			ClassifiedResponse::RetryableAuth { status, payload } => {
				// A 401 from the refresh endpoint itself must not trigger refresh;
				// refreshing to retry refresh is a guaranteed loop.
				if self.is_refresh_endpoint(&descriptor.path) {
					return Err(classify::terminal_error(status, payload).into());
				}

				self.refresher.refresh().await?;
				self.replay(&descriptor).await
			},
		}
	}

	/// Replays the captured descriptor once, with headers rebuilt from the
	/// credential committed after refresh settled.
	async fn replay(&self, descriptor: &RequestDescriptor) -> Result<Value> {
		const KIND: CallKind = CallKind::Replay;

		let span = CallSpan::new(KIND, "replay");

		obs::record_call_outcome(KIND, CallOutcome::Attempt);

		let result = span
			.instrument(async move {
				let response = self.send(descriptor).await?;

				match classify(response.status, &response.body, Attempt::Replay) {
					ClassifiedResponse::Ok(payload) => Ok(payload),
					ClassifiedResponse::Terminal(err) => Err(err.into()),
					// Unreachable for Attempt::Replay; surfaced terminal regardless.
					ClassifiedResponse::RetryableAuth { status, payload } =>
						Err(classify::terminal_error(status, payload).into()),
				}
			})
			.await;

		match &result {
			Ok(_) => obs::record_call_outcome(KIND, CallOutcome::Success),
			Err(_) => obs::record_call_outcome(KIND, CallOutcome::Failure),
		}

		result
	}

	async fn send(&self, descriptor: &RequestDescriptor) -> Result<RawResponse> {
		let request = self.wire_request(descriptor)?;

		self.transport
			.execute(request)
			.await
			.map_err(|failure| Error::Unreachable { message: failure.summary() })
	}

	/// Builds the wire request fresh for every attempt; the bearer token is read
	/// from the store at build time, never from a snapshot captured earlier.
	fn wire_request(&self, descriptor: &RequestDescriptor) -> Result<WireRequest> {
		let url = resolve_endpoint(&self.base_url, &descriptor.path)?;
		let mut headers = http::json_headers();

		if descriptor.authenticated {
			if let Some(token) = self.credentials.get() {
				headers.push(("Authorization".into(), format!("Bearer {}", token.expose())));
			}
		}

		headers.extend(descriptor.headers.iter().cloned());

		let body = match descriptor.body.as_ref() {
			Some(value) => Some(serde_json::to_string(value).map_err(ConfigError::from)?),
			None => None,
		};

		Ok(WireRequest { method: descriptor.method, url, headers, body })
	}

	fn is_refresh_endpoint(&self, path: &str) -> bool {
		normalize_path(path) == self.refresh_path
	}
}
#[cfg(feature = "reqwest")]
impl ApiClient<ReqwestTransport> {
	/// Creates a client with its own reqwest transport, terminator, and coordinator.
	pub fn new(
		base_url: Url,
		refresh_path: &str,
		credentials: Arc<dyn CredentialStore>,
		navigator: Arc<dyn SessionNavigator>,
	) -> Result<Self> {
		let base_url = normalize_base(base_url);
		let transport = Arc::new(ReqwestTransport::default());
		let terminator = Arc::new(SessionTerminator::new(credentials.clone(), navigator));
		let endpoint = resolve_endpoint(&base_url, refresh_path)?;
		let refresher = Arc::new(RefreshCoordinator::new(
			transport.clone(),
			credentials.clone(),
			terminator,
			endpoint,
		));

		Ok(Self::with_transport(transport, base_url, refresh_path, credentials, refresher))
	}
}
impl<T> Debug for ApiClient<T>
where
	T: ?Sized + HttpTransport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ApiClient")
			.field("base_url", &self.base_url.as_str())
			.field("refresh_path", &self.refresh_path)
			.finish()
	}
}

fn normalize_base(mut base_url: Url) -> Url {
	if !base_url.path().ends_with('/') {
		let path = format!("{}/", base_url.path());

		base_url.set_path(&path);
	}

	base_url
}

fn normalize_path(path: &str) -> &str {
	path.trim_start_matches('/')
}

fn resolve_endpoint(base_url: &Url, path: &str) -> Result<Url, ConfigError> {
	base_url
		.join(normalize_path(path))
		.map_err(|source| ConfigError::InvalidEndpoint { path: path.into(), source })
}
