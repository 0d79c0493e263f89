//! Credential capability consumed by the relay.
//!
//! The relay never issues tokens itself; it reads the current bearer token from a
//! [`CredentialStore`], commits a replacement after a successful refresh, and clears
//! the store during session teardown. Embedders supply the backing storage
//! (typically durable local storage mirrored in memory); [`MemoryCredentialStore`]
//! covers tests and in-process use.

// self
use crate::_prelude::*;

/// Redacted bearer token wrapper keeping sensitive material out of logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken(String);
impl AccessToken {
	/// Wraps a new token string.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Returns the inner token value. Callers must avoid logging this string.
	pub fn expose(&self) -> &str {
		&self.0
	}
}
impl AsRef<str> for AccessToken {
	fn as_ref(&self) -> &str {
		self.expose()
	}
}
impl Debug for AccessToken {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("AccessToken").field(&"<redacted>").finish()
	}
}
impl Display for AccessToken {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("<redacted>")
	}
}

/// Identity fields committed next to the token on login and refresh.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionIdentity {
	/// Stable user identifier.
	pub user_id: Option<String>,
	/// Display name shown by UI callers.
	pub display_name: Option<String>,
	/// Role label used for authorization display, not enforcement.
	pub role: Option<String>,
}

/// Capability over the current credential.
///
/// At most one credential value is authoritative at any instant; implementations
/// must make a committed [`set`](CredentialStore::set) visible to every subsequent
/// [`get`](CredentialStore::get), including from other threads.
pub trait CredentialStore
where
	Self: Send + Sync,
{
	/// Returns the current bearer token, if a session is active.
	fn get(&self) -> Option<AccessToken>;

	/// Commits a new token and its identity fields as the authoritative credential.
	fn set(&self, token: AccessToken, identity: SessionIdentity);

	/// Clears the credential and any session-identifying fields.
	fn clear(&self);
}

impl Debug for dyn CredentialStore {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("CredentialStore(..)")
	}
}

#[derive(Clone, Debug)]
struct Credential {
	token: AccessToken,
	identity: SessionIdentity,
}

/// Thread-safe in-memory [`CredentialStore`] for tests and in-process embedders.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore(RwLock<Option<Credential>>);
impl MemoryCredentialStore {
	/// Returns the identity committed next to the current token, if any.
	pub fn identity(&self) -> Option<SessionIdentity> {
		self.0.read().as_ref().map(|credential| credential.identity.clone())
	}
}
impl CredentialStore for MemoryCredentialStore {
	fn get(&self) -> Option<AccessToken> {
		self.0.read().as_ref().map(|credential| credential.token.clone())
	}

	fn set(&self, token: AccessToken, identity: SessionIdentity) {
		*self.0.write() = Some(Credential { token, identity });
	}

	fn clear(&self) {
		*self.0.write() = None;
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn token_formatters_redact() {
		let token = AccessToken::new("super-secret");

		assert_eq!(format!("{token:?}"), "AccessToken(\"<redacted>\")");
		assert_eq!(format!("{token}"), "<redacted>");
	}

	#[test]
	fn memory_store_commits_and_clears() {
		let store = MemoryCredentialStore::default();

		assert_eq!(store.get(), None);

		store.set(AccessToken::new("t-1"), SessionIdentity {
			user_id: Some("u-1".into()),
			..Default::default()
		});

		assert_eq!(store.get().map(|token| token.expose().to_string()), Some("t-1".into()));
		assert_eq!(store.identity().and_then(|identity| identity.user_id), Some("u-1".into()));

		store.clear();

		assert_eq!(store.get(), None);
		assert_eq!(store.identity(), None);
	}

	#[test]
	fn latest_commit_wins() {
		let store = MemoryCredentialStore::default();

		store.set(AccessToken::new("t-1"), SessionIdentity::default());
		store.set(AccessToken::new("t-2"), SessionIdentity::default());

		assert_eq!(store.get().map(|token| token.expose().to_string()), Some("t-2".into()));
	}
}
