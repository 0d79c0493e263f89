//! Session-aware JSON API client—bearer header injection, single-flight token refresh,
//! transparent replay, and idempotent session teardown in one crate.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod classify;
pub mod client;
pub mod credential;
pub mod error;
pub mod http;
pub mod obs;
pub mod refresh;
pub mod session;
#[cfg(all(any(test, feature = "test"), feature = "reqwest"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// std
	use std::sync::atomic::{AtomicUsize, Ordering};
	// self
	use crate::{
		client::ApiClient,
		credential::{AccessToken, CredentialStore, MemoryCredentialStore, SessionIdentity},
		http::ReqwestTransport,
		session::SessionNavigator,
	};

	/// Navigator double that counts entry redirects instead of navigating.
	#[derive(Debug, Default)]
	pub struct RecordingNavigator(AtomicUsize);
	impl RecordingNavigator {
		/// Returns how many times the session was redirected to the entry point.
		pub fn redirects(&self) -> usize {
			self.0.load(Ordering::SeqCst)
		}
	}
	impl SessionNavigator for RecordingNavigator {
		fn to_entry(&self) {
			self.0.fetch_add(1, Ordering::SeqCst);
		}
	}

	/// Builds an [`ApiClient`] over a reqwest transport, an in-memory credential
	/// store, and a recording navigator, wired the way integration tests expect.
	pub fn build_test_client(
		base_url: &str,
		refresh_path: &str,
	) -> (ApiClient<ReqwestTransport>, Arc<MemoryCredentialStore>, Arc<RecordingNavigator>) {
		let store = Arc::new(MemoryCredentialStore::default());
		let credentials: Arc<dyn CredentialStore> = store.clone();
		let navigator = Arc::new(RecordingNavigator::default());
		let base_url = Url::parse(base_url).expect("Test base URL should parse successfully.");
		let client = ApiClient::new(base_url, refresh_path, credentials, navigator.clone())
			.expect("Test client should build successfully.");

		(client, store, navigator)
	}

	/// Seeds the store with a token and empty identity fields.
	pub fn seed_token(store: &MemoryCredentialStore, token: &str) {
		store.set(AccessToken::new(token), SessionIdentity::default());
	}
}

mod _prelude {
	pub use std::{
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		sync::Arc,
	};

	pub use async_lock::OnceCell as AsyncOnceCell;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use serde_json::{Value, json};
	pub use thiserror::Error as ThisError;
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use {bearer_relay as _, httpmock as _, tokio as _};
