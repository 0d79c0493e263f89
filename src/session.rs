//! Idempotent session teardown.

// std
use std::sync::atomic::{AtomicBool, Ordering};
// self
use crate::{_prelude::*, credential::CredentialStore};

/// Navigation hook invoked when the session becomes unrecoverable.
///
/// Embedders route this to their unauthenticated entry surface (a login route,
/// a window location change, a process signal). Implementations must tolerate
/// being invoked once per independent session failure.
pub trait SessionNavigator
where
	Self: Send + Sync,
{
	/// Navigates back to the unauthenticated entry point.
	fn to_entry(&self);
}

/// Tears down local session state when refresh is unrecoverable.
///
/// Multiple concurrent requests can all observe the same refresh failure, so
/// [`invalidate`](SessionTerminator::invalidate) collapses overlapping calls to
/// one observable clear + redirect. The guard is reset unconditionally after the
/// sequence finishes so a later independent session failure is handled again.
#[derive(Debug)]
pub struct SessionTerminator {
	credentials: Arc<dyn CredentialStore>,
	navigator: Arc<dyn SessionNavigator>,
	tearing_down: AtomicBool,
}
impl SessionTerminator {
	/// Creates a terminator over the provided credential store and navigator.
	pub fn new(credentials: Arc<dyn CredentialStore>, navigator: Arc<dyn SessionNavigator>) -> Self {
		Self { credentials, navigator, tearing_down: AtomicBool::new(false) }
	}

	/// Clears the credential and session storage, then redirects to the entry point.
	///
	/// Calls that arrive while a teardown is already running return immediately.
	/// The guard resets even when the navigator panics, so one failed redirect
	/// cannot permanently disarm teardown for the rest of the process.
	pub fn invalidate(&self) {
		if self.tearing_down.swap(true, Ordering::SeqCst) {
			return;
		}

		let _reset = ResetOnDrop(&self.tearing_down);

		self.credentials.clear();
		self.navigator.to_entry();
	}
}

struct ResetOnDrop<'a>(&'a AtomicBool);
impl Drop for ResetOnDrop<'_> {
	fn drop(&mut self) {
		self.0.store(false, Ordering::SeqCst);
	}
}
impl Debug for dyn SessionNavigator {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("SessionNavigator(..)")
	}
}
