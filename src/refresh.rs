//! Single-flight token refresh coordination.
//!
//! [`RefreshCoordinator::refresh`] guarantees that regardless of how many callers
//! observe an expired credential concurrently, exactly one refresh network call is
//! issued; every caller receives the same eventual outcome. The in-flight state is
//! a mutex over an optional shared task (`Some` iff a live, not-yet-settled refresh
//! exists), so leader election is an atomic check-and-install rather than a
//! time-of-check/time-of-use pattern, and the design stays correct under true
//! parallelism as well as cooperative scheduling.
//!
//! Refresh failure is terminal for the session: the leader settles every waiter
//! with the same error, then triggers one session teardown. It is never retried.

mod metrics;

pub use metrics::RefreshMetrics;

// self
use crate::{
	_prelude::*,
	classify,
	credential::{AccessToken, CredentialStore, SessionIdentity},
	error::RefreshError,
	http::{self, HttpTransport, Method, WireRequest},
	obs::{self, CallKind, CallOutcome, CallSpan},
	session::SessionTerminator,
};

type RefreshOutcome = Result<AccessToken, RefreshError>;

/// Shared settlement for one in-flight refresh.
///
/// The cell is set exactly once; followers await it and clone the outcome.
#[derive(Debug, Default)]
struct RefreshTask {
	settled: AsyncOnceCell<RefreshOutcome>,
}

enum Role {
	Leader,
	Follower,
}

/// Keeps the leading future honest about settlement.
///
/// The leader runs the exchange inline in the calling future, which can be
/// dropped mid-flight (a timeout around the call, an aborted task). Dropping
/// this guard before [`complete`](LeaderGuard::complete) settles the waiters
/// with [`RefreshError::Interrupted`] and frees the slot, so a cancelled leader
/// can never wedge later refreshes behind a task that will never settle.
struct LeaderGuard<'a, T>
where
	T: ?Sized + HttpTransport,
{
	coordinator: &'a RefreshCoordinator<T>,
	task: Arc<RefreshTask>,
	settled: bool,
}
impl<'a, T> LeaderGuard<'a, T>
where
	T: ?Sized + HttpTransport,
{
	fn new(coordinator: &'a RefreshCoordinator<T>, task: Arc<RefreshTask>) -> Self {
		Self { coordinator, task, settled: false }
	}

	fn complete(mut self, outcome: RefreshOutcome) {
		self.settled = true;

		self.coordinator.settle(&self.task, outcome);
	}
}
impl<T> Drop for LeaderGuard<'_, T>
where
	T: ?Sized + HttpTransport,
{
	fn drop(&mut self) {
		if !self.settled {
			self.coordinator.metrics.record_failure();
			self.coordinator.settle(&self.task, Err(RefreshError::Interrupted));
		}
	}
}

/// Wire shape returned by the refresh endpoint on success.
#[derive(Debug, Deserialize)]
struct RefreshEnvelope {
	data: RefreshGrant,
}
#[derive(Debug, Deserialize)]
struct RefreshGrant {
	#[serde(rename = "accessToken")]
	access_token: String,
	#[serde(default)]
	user: SessionIdentity,
}

/// Coordinates at-most-once token refresh shared by all in-flight requests.
pub struct RefreshCoordinator<T>
where
	T: ?Sized + HttpTransport,
{
	/// Transport used for the refresh exchange.
	pub transport: Arc<T>,
	/// Credential store the new token is committed to before waiters settle.
	pub credentials: Arc<dyn CredentialStore>,
	/// Terminator invoked once per unrecoverable refresh failure.
	pub terminator: Arc<SessionTerminator>,
	/// Absolute refresh endpoint URL, called without an Authorization header.
	pub endpoint: Url,
	metrics: Arc<RefreshMetrics>,
	in_flight: Mutex<Option<Arc<RefreshTask>>>,
}
impl<T> RefreshCoordinator<T>
where
	T: ?Sized + HttpTransport,
{
	/// Creates a coordinator over the provided transport, store, and terminator.
	pub fn new(
		transport: impl Into<Arc<T>>,
		credentials: Arc<dyn CredentialStore>,
		terminator: Arc<SessionTerminator>,
		endpoint: Url,
	) -> Self {
		Self {
			transport: transport.into(),
			credentials,
			terminator,
			endpoint,
			metrics: Default::default(),
			in_flight: Mutex::new(None),
		}
	}

	/// Returns the shared refresh counters.
	pub fn metrics(&self) -> &RefreshMetrics {
		&self.metrics
	}

	/// Obtains a fresh access token, joining the in-flight refresh when one exists.
	///
	/// The leader commits the new token to the credential store before settling, so
	/// every waiter that proceeds to replay reads the post-refresh value. On failure
	/// the leader settles every waiter first, then invalidates the session once.
	///
	/// If the leading future is dropped mid-flight, the waiters settle with
	/// [`RefreshError::Interrupted`] and the session is not torn down; nothing is
	/// known about its validity yet, and the next caller runs a fresh refresh.
	pub async fn refresh(&self) -> RefreshOutcome {
		const KIND: CallKind = CallKind::Refresh;

		let span = CallSpan::new(KIND, "refresh");

		obs::record_call_outcome(KIND, CallOutcome::Attempt);

		let result = span
			.instrument(async move {
				let (task, role) = self.join_or_lead();

				if let Role::Follower = role {
					self.metrics.record_coalesced();

					return task.settled.wait().await.clone();
				}

				self.metrics.record_attempt();

				let guard = LeaderGuard::new(self, task.clone());
				let outcome = match self.execute().await {
					Ok((token, identity)) => {
						self.credentials.set(token.clone(), identity);
						self.metrics.record_success();

						Ok(token)
					},
					Err(err) => {
						self.metrics.record_failure();

						Err(err)
					},
				};

				guard.complete(outcome.clone());

				if outcome.is_err() {
					self.terminator.invalidate();
				}

				outcome
			})
			.await;

		match &result {
			Ok(_) => obs::record_call_outcome(KIND, CallOutcome::Success),
			Err(_) => obs::record_call_outcome(KIND, CallOutcome::Failure),
		}

		result
	}

	/// Installs a new task when idle, otherwise joins the live one.
	fn join_or_lead(&self) -> (Arc<RefreshTask>, Role) {
		let mut slot = self.in_flight.lock();

		match slot.as_ref() {
			Some(task) => (task.clone(), Role::Follower),
			None => {
				let task = Arc::new(RefreshTask::default());

				*slot = Some(task.clone());

				(task, Role::Leader)
			},
		}
	}

	/// Settles the task and releases the in-flight flag under one lock, so no
	/// caller can observe an idle coordinator with an unsettled outcome and no new
	/// leader can start while settlement is still propagating.
	fn settle(&self, task: &RefreshTask, outcome: RefreshOutcome) {
		let mut slot = self.in_flight.lock();
		let _ = task.settled.set_blocking(outcome);

		*slot = None;
	}

	/// Issues the refresh exchange. The expired Authorization header is never
	/// attached; session identity travels out-of-band (cookies or transport state).
	async fn execute(&self) -> Result<(AccessToken, SessionIdentity), RefreshError> {
		let request = WireRequest {
			method: Method::Post,
			url: self.endpoint.clone(),
			headers: http::json_headers(),
			body: None,
		};
		let response = self
			.transport
			.execute(request)
			.await
			.map_err(|failure| RefreshError::Unreachable { message: failure.summary() })?;

		if !(200..300).contains(&response.status) {
			let payload = classify::parse_payload(response.status, &response.body);

			return Err(RefreshError::Rejected {
				status: response.status,
				message: classify::derive_message(response.status, &payload),
			});
		}

		let mut deserializer = serde_json::Deserializer::from_str(&response.body);
		let envelope: RefreshEnvelope = serde_path_to_error::deserialize(&mut deserializer)
			.map_err(|err| RefreshError::MalformedGrant {
				status: response.status,
				message: err.to_string(),
			})?;

		Ok((AccessToken::new(envelope.data.access_token), envelope.data.user))
	}
}
impl<T> Debug for RefreshCoordinator<T>
where
	T: ?Sized + HttpTransport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RefreshCoordinator")
			.field("endpoint", &self.endpoint.as_str())
			.field("in_flight", &self.in_flight.lock().is_some())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::{
		sync::atomic::{AtomicUsize, Ordering},
		time::Duration,
	};
	// self
	use super::*;
	use crate::{
		credential::MemoryCredentialStore,
		http::{RawResponse, TransportFailure, TransportFuture},
		session::SessionNavigator,
	};

	#[derive(Debug, Default)]
	struct CountingNavigator(AtomicUsize);
	impl SessionNavigator for CountingNavigator {
		fn to_entry(&self) {
			self.0.fetch_add(1, Ordering::SeqCst);
		}
	}

	/// Transport that replays one scripted response after an optional delay.
	struct ScriptedTransport {
		calls: AtomicUsize,
		response: Result<RawResponse, String>,
		delay: Duration,
	}
	impl ScriptedTransport {
		fn responding(status: u16, body: &str, delay: Duration) -> Self {
			Self {
				calls: AtomicUsize::new(0),
				response: Ok(RawResponse { status, body: body.into() }),
				delay,
			}
		}

		fn unreachable(message: &str) -> Self {
			Self {
				calls: AtomicUsize::new(0),
				response: Err(message.to_string()),
				delay: Duration::ZERO,
			}
		}

		fn calls(&self) -> usize {
			self.calls.load(Ordering::SeqCst)
		}
	}
	impl HttpTransport for ScriptedTransport {
		fn execute(&self, request: WireRequest) -> TransportFuture<'_> {
			self.calls.fetch_add(1, Ordering::SeqCst);

			let response = self.response.clone();
			let delay = self.delay;

			Box::pin(async move {
				if !delay.is_zero() {
					tokio::time::sleep(delay).await;
				}

				response.map_err(|message| {
					TransportFailure::new(
						request.url,
						std::io::Error::new(std::io::ErrorKind::ConnectionRefused, message),
					)
				})
			})
		}
	}

	fn build_coordinator(
		transport: Arc<ScriptedTransport>,
	) -> (Arc<RefreshCoordinator<ScriptedTransport>>, Arc<MemoryCredentialStore>, Arc<CountingNavigator>)
	{
		let store = Arc::new(MemoryCredentialStore::default());
		let credentials: Arc<dyn CredentialStore> = store.clone();
		let navigator = Arc::new(CountingNavigator::default());
		let terminator =
			Arc::new(SessionTerminator::new(credentials.clone(), navigator.clone()));
		let endpoint = Url::parse("http://backend.test/session/refresh")
			.expect("Refresh endpoint fixture should parse.");
		let coordinator =
			Arc::new(RefreshCoordinator::new(transport, credentials, terminator, endpoint));

		(coordinator, store, navigator)
	}

	const GRANT_BODY: &str =
		"{\"success\":true,\"data\":{\"accessToken\":\"t-new\",\"user\":{\"userId\":\"u-1\"}}}";

	#[tokio::test]
	async fn concurrent_refreshes_share_one_network_call() {
		let transport =
			Arc::new(ScriptedTransport::responding(200, GRANT_BODY, Duration::from_millis(50)));
		let (coordinator, store, _) = build_coordinator(transport.clone());
		let (first, second) = tokio::join!(coordinator.refresh(), coordinator.refresh());
		let first = first.expect("First refresh should succeed.");
		let second = second.expect("Second refresh should succeed.");

		assert_eq!(first.expose(), "t-new");
		assert_eq!(second.expose(), "t-new");
		assert_eq!(transport.calls(), 1);
		assert_eq!(coordinator.metrics().attempts(), 1);
		assert_eq!(coordinator.metrics().coalesced(), 1);
		assert_eq!(store.get().map(|token| token.expose().to_string()), Some("t-new".into()));
		assert_eq!(store.identity().and_then(|identity| identity.user_id), Some("u-1".into()));
	}

	#[tokio::test]
	async fn failed_refresh_settles_all_waiters_and_invalidates_once() {
		let transport = Arc::new(ScriptedTransport::responding(
			401,
			"{\"message\":\"session gone\"}",
			Duration::from_millis(50),
		));
		let (coordinator, store, navigator) = build_coordinator(transport.clone());
		let (first, second) = tokio::join!(coordinator.refresh(), coordinator.refresh());
		let first = first.expect_err("First refresh should fail.");
		let second = second.expect_err("Second refresh should fail.");

		assert_eq!(first, second);
		assert_eq!(first, RefreshError::Rejected { status: 401, message: "session gone".into() });
		assert_eq!(transport.calls(), 1);
		assert_eq!(navigator.0.load(Ordering::SeqCst), 1);
		assert_eq!(store.get(), None);
	}

	#[tokio::test]
	async fn coordinator_returns_to_idle_after_settlement() {
		let transport =
			Arc::new(ScriptedTransport::responding(200, GRANT_BODY, Duration::ZERO));
		let (coordinator, _, _) = build_coordinator(transport.clone());

		coordinator.refresh().await.expect("First refresh should succeed.");
		coordinator.refresh().await.expect("Second refresh should succeed.");

		assert_eq!(transport.calls(), 2);
		assert_eq!(coordinator.metrics().coalesced(), 0);
	}

	#[tokio::test]
	async fn dropped_leader_settles_waiters_and_frees_the_slot() {
		let transport =
			Arc::new(ScriptedTransport::responding(200, GRANT_BODY, Duration::from_millis(200)));
		let (coordinator, store, navigator) = build_coordinator(transport.clone());
		let (leader, follower) = tokio::join!(
			tokio::time::timeout(Duration::from_millis(20), coordinator.refresh()),
			coordinator.refresh(),
		);

		leader.expect_err("Leading refresh should have been dropped by the timeout.");

		let follower = follower.expect_err("Waiter should settle, not hang.");

		assert_eq!(follower, RefreshError::Interrupted);
		// Interruption says nothing about session validity; no teardown.
		assert_eq!(navigator.0.load(Ordering::SeqCst), 0);
		assert!(store.get().is_none());

		let retried =
			coordinator.refresh().await.expect("Next refresh should elect a fresh leader.");

		assert_eq!(retried.expose(), "t-new");
		assert_eq!(transport.calls(), 2);
		assert_eq!(coordinator.metrics().attempts(), 2);
		assert_eq!(coordinator.metrics().failures(), 1);
	}

	#[tokio::test]
	async fn malformed_grant_is_terminal_for_the_session() {
		let transport = Arc::new(ScriptedTransport::responding(
			200,
			"{\"data\":{\"token\":\"wrong-shape\"}}",
			Duration::ZERO,
		));
		let (coordinator, _, navigator) = build_coordinator(transport);
		let err = coordinator.refresh().await.expect_err("Malformed grant should fail.");

		assert!(matches!(err, RefreshError::MalformedGrant { status: 200, .. }));
		assert_eq!(navigator.0.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn unreachable_endpoint_maps_to_transport_kind() {
		let transport = Arc::new(ScriptedTransport::unreachable("connection refused"));
		let (coordinator, _, navigator) = build_coordinator(transport);
		let err = coordinator.refresh().await.expect_err("Unreachable endpoint should fail.");

		assert!(matches!(err, RefreshError::Unreachable { .. }));
		assert_eq!(err.status(), 0);
		assert_eq!(navigator.0.load(Ordering::SeqCst), 1);
	}
}
