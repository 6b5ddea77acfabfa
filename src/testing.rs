//! In-memory collaborators for exercising a [`SessionResolver`](crate::SessionResolver)
//! without a network.
//!
//! Enabled with the `test-util` feature. Tokens handed out by
//! [`MockIdentityProvider`] encode the uid, which [`MockMembershipApi`] uses to
//! look up that user's memberships.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore, mpsc};

use crate::backend::MembershipApi;
use crate::error::{Error, IdentityError};
use crate::identity::{IdentityEvent, IdentityEvents, IdentityProvider};
use crate::types::{
    AcceptInviteRequest, BootstrapOwnerRequest, BusinessId, Identity, Membership, Memberships,
    Role,
};

const TOKEN_PREFIX: &str = "tok-";
const FRESH_SUFFIX: &str = "-fresh";

fn token_for(uid: &str, fresh: bool) -> String {
    if fresh {
        format!("{TOKEN_PREFIX}{uid}{FRESH_SUFFIX}")
    } else {
        format!("{TOKEN_PREFIX}{uid}")
    }
}

fn uid_from_token(token: &str) -> Option<&str> {
    let rest = token.strip_prefix(TOKEN_PREFIX)?;
    Some(rest.strip_suffix(FRESH_SUFFIX).unwrap_or(rest))
}

// ── Identity provider ──────────────────────────────────────────────

#[derive(Default)]
struct IdentityState {
    accounts: HashMap<String, (String, Identity)>,
    current: Option<Identity>,
    subscribers: Vec<mpsc::UnboundedSender<IdentityEvent>>,
    token_requests: Vec<bool>,
    next_uid: u64,
    sign_out_error: Option<IdentityError>,
}

/// Identity provider backed by an in-memory account table.
///
/// Sign-in, account creation and sign-out emit identity events to every
/// subscriber, like a real provider does.
#[derive(Default)]
pub struct MockIdentityProvider {
    state: Mutex<IdentityState>,
}

impl MockIdentityProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an account without signing in.
    pub fn add_account(&self, email: &str, password: &str) -> Identity {
        let mut state = self.state.lock();
        state.next_uid += 1;
        let identity = Identity::new(format!("uid-{}", state.next_uid)).with_email(email);
        state
            .accounts
            .insert(email.to_owned(), (password.to_owned(), identity.clone()));
        identity
    }

    /// Emit an identity event directly, without changing provider state.
    pub fn emit(&self, event: IdentityEvent) {
        let mut state = self.state.lock();
        state.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Make the next `sign_out` fail with `error` (after signing out locally).
    pub fn fail_next_sign_out(&self, error: IdentityError) {
        self.state.lock().sign_out_error = Some(error);
    }

    #[must_use]
    pub fn has_account(&self, email: &str) -> bool {
        self.state.lock().accounts.contains_key(email)
    }

    #[must_use]
    pub fn current(&self) -> Option<Identity> {
        self.state.lock().current.clone()
    }

    /// `force_refresh` flag of every `get_token` call so far.
    #[must_use]
    pub fn token_requests(&self) -> Vec<bool> {
        self.state.lock().token_requests.clone()
    }

    fn set_current(state: &mut IdentityState, identity: Option<Identity>) {
        state.current = identity.clone();
        state.subscribers.retain(|tx| tx.send(identity.clone()).is_ok());
    }
}

impl IdentityProvider for MockIdentityProvider {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Identity, IdentityError> {
        let mut state = self.state.lock();
        let identity = match state.accounts.get(email) {
            Some((stored, identity)) if stored == password => identity.clone(),
            Some(_) => {
                return Err(IdentityError::new(
                    "auth/wrong-password",
                    "The password is invalid.",
                ));
            }
            None => {
                return Err(IdentityError::new(
                    "auth/user-not-found",
                    "There is no user record corresponding to this identifier.",
                ));
            }
        };
        Self::set_current(&mut state, Some(identity.clone()));
        Ok(identity)
    }

    async fn create_account(&self, email: &str, password: &str) -> Result<Identity, IdentityError> {
        if !email.contains('@') {
            return Err(IdentityError::new(
                "auth/invalid-email",
                "The email address is badly formatted.",
            ));
        }
        if password.len() < 6 {
            return Err(IdentityError::new(
                "auth/weak-password",
                "Password should be at least 6 characters.",
            ));
        }
        if self.has_account(email) {
            return Err(IdentityError::new(
                "auth/email-already-in-use",
                "The email address is already in use by another account.",
            ));
        }
        let identity = self.add_account(email, password);
        let mut state = self.state.lock();
        Self::set_current(&mut state, Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        let mut state = self.state.lock();
        Self::set_current(&mut state, None);
        match state.sign_out_error.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn get_token(&self, force_refresh: bool) -> Result<String, IdentityError> {
        let mut state = self.state.lock();
        state.token_requests.push(force_refresh);
        match &state.current {
            Some(identity) => Ok(token_for(&identity.uid, force_refresh)),
            None => Err(IdentityError::new("auth/no-current-user", "No user is signed in.")),
        }
    }

    fn auth_state_changes(&self) -> IdentityEvents {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().subscribers.push(tx);
        rx
    }
}

// ── Membership backend ─────────────────────────────────────────────

/// Scripted failure for the next `refresh_claims` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// Server unreachable (status 0).
    Unavailable,
    /// Server answered with this HTTP status.
    Status(u16),
    /// Server answered 401 unless the token was force-refreshed.
    StaleToken,
    /// Server answered with a body that does not parse.
    Malformed,
}

#[derive(Default)]
struct BackendState {
    memberships: HashMap<String, Memberships>,
    invites: HashMap<String, Membership>,
    failures: VecDeque<MockFailure>,
    bootstrap_requests: Vec<BootstrapOwnerRequest>,
    fail_bootstrap: Option<u16>,
    gate: Option<Arc<Semaphore>>,
}

/// Membership backend keyed by the uid encoded in the bearer token.
#[derive(Default)]
pub struct MockMembershipApi {
    state: Mutex<BackendState>,
    refresh_calls: AtomicUsize,
    started: Notify,
}

impl MockMembershipApi {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the memberships returned for `uid`.
    pub fn set_memberships(&self, uid: &str, memberships: Memberships) {
        self.state
            .lock()
            .memberships
            .insert(uid.to_owned(), memberships);
    }

    /// Register an invite that grants `membership` when accepted.
    pub fn add_invite(&self, invite_id: &str, membership: Membership) {
        self.state
            .lock()
            .invites
            .insert(invite_id.to_owned(), membership);
    }

    /// Queue a failure for an upcoming `refresh_claims` call.
    pub fn fail_next_refresh(&self, failure: MockFailure) {
        self.state.lock().failures.push_back(failure);
    }

    /// Make the next `bootstrap_owner` call answer with `status`.
    pub fn fail_next_bootstrap(&self, status: u16) {
        self.state.lock().fail_bootstrap = Some(status);
    }

    /// Park `refresh_claims` calls until [`release`](Self::release).
    pub fn hold(&self) {
        self.state.lock().gate = Some(Arc::new(Semaphore::new(0)));
    }

    /// Let held and future `refresh_claims` calls complete.
    pub fn release(&self) {
        if let Some(gate) = self.state.lock().gate.take() {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    /// Wait until a `refresh_claims` call has started.
    pub async fn wait_for_refresh(&self) {
        self.started.notified().await;
    }

    #[must_use]
    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn bootstrap_requests(&self) -> Vec<BootstrapOwnerRequest> {
        self.state.lock().bootstrap_requests.clone()
    }

    fn uid(token: &str) -> Result<String, Error> {
        uid_from_token(token)
            .map(str::to_owned)
            .ok_or_else(|| Error::Backend {
                operation: "authenticate",
                status: Some(401),
                detail: "invalid token".into(),
            })
    }
}

fn status_error(operation: &'static str, status: u16) -> Error {
    Error::Backend {
        operation,
        status: Some(status),
        detail: format!("mock status {status}"),
    }
}

impl MembershipApi for MockMembershipApi {
    async fn refresh_claims(&self, token: &str) -> Result<Memberships, Error> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();

        let gate = self.state.lock().gate.clone();
        if let Some(gate) = gate {
            // closed semaphores are never produced here
            let _permit = gate.acquire().await;
        }

        let uid = Self::uid(token)?;
        let mut state = self.state.lock();
        match state.failures.pop_front() {
            Some(MockFailure::Unavailable) => return Err(status_error("refresh claims", 0)),
            Some(MockFailure::Status(status)) => return Err(status_error("refresh claims", status)),
            Some(MockFailure::StaleToken) if !token.ends_with(FRESH_SUFFIX) => {
                return Err(status_error("refresh claims", 401));
            }
            Some(MockFailure::Malformed) => {
                return Err(Error::Backend {
                    operation: "refresh claims",
                    status: None,
                    detail: "mock malformed body".into(),
                });
            }
            _ => {}
        }
        Ok(state.memberships.get(&uid).cloned().unwrap_or_default())
    }

    async fn bootstrap_owner(
        &self,
        token: &str,
        request: &BootstrapOwnerRequest,
    ) -> Result<(), Error> {
        let uid = Self::uid(token)?;
        let mut state = self.state.lock();
        state.bootstrap_requests.push(request.clone());
        if let Some(status) = state.fail_bootstrap.take() {
            return Err(status_error("bootstrap owner", status));
        }

        let entry = state.memberships.entry(uid.clone()).or_default();
        for business in request.businesses.iter().flatten() {
            let id = BusinessId(format!("{uid}-{}", business.business_name.to_lowercase()));
            entry.insert(id.clone(), Membership::new(id, Role::Owner));
        }
        if request.create_personal_business {
            let id = BusinessId(format!("{uid}-personal"));
            entry.insert(id.clone(), Membership::new(id, Role::Owner));
        }
        Ok(())
    }

    async fn accept_invite(
        &self,
        token: &str,
        invite_id: &str,
        _request: &AcceptInviteRequest,
    ) -> Result<(), Error> {
        let uid = Self::uid(token)?;
        let mut state = self.state.lock();
        let membership = state
            .invites
            .remove(invite_id)
            .ok_or_else(|| status_error("accept invite", 404))?;
        state
            .memberships
            .entry(uid)
            .or_default()
            .insert(membership.business_id.clone(), membership);
        Ok(())
    }
}
