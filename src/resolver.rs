//! Session bootstrap and business-context resolution.
//!
//! [`SessionResolver`] is the single writer of the [`SessionSnapshot`]. It is
//! built once at startup with the identity provider and backend, handed to
//! the UI, and read through [`SessionResolver::snapshot`] or
//! [`SessionResolver::subscribe`].
//!
//! # Session generations
//!
//! Every identity event (and every operation that changes the user's
//! memberships) bumps a generation counter. Async work captures the
//! generation it started in and only commits if it is still current, so a
//! slow refresh can never overwrite a later sign-out.
//!
//! ```rust,ignore
//! let resolver = SessionResolver::new(firebase, BackendClient::new(BackendConfig::from_env()?)?);
//! let _events = resolver.listen();
//!
//! let mut session = resolver.subscribe();
//! while session.changed().await.is_ok() {
//!     render(&session.borrow());
//! }
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::backend::MembershipApi;
use crate::error::Error;
use crate::identity::{IdentityEvent, IdentityProvider, SignUpProfile};
use crate::selection::select_business_user;
use crate::types::{
    AcceptInviteRequest, BootstrapOwnerRequest, Identity, Memberships, SessionSnapshot,
    SessionStatus,
};

/// Owns the session lifecycle. Cheap to clone; clones share state.
pub struct SessionResolver<I, B> {
    inner: Arc<Inner<I, B>>,
}

struct Inner<I, B> {
    identity: I,
    backend: B,
    state: Mutex<State>,
    snapshot: watch::Sender<SessionSnapshot>,
}

#[derive(Default)]
struct State {
    generation: u64,
    identity: Option<Identity>,
    /// Generation of the membership fetch currently running, if any.
    in_flight: Option<u64>,
    /// Bumped by every `listen`; only the newest listener applies events.
    listener: u64,
}

// Manual Clone: avoid derive adding `I: Clone, B: Clone` bounds.
impl<I, B> Clone for SessionResolver<I, B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Handle for the identity event listener started by
/// [`SessionResolver::listen`]. Dropping it stops listening.
#[must_use = "dropping a Subscription stops identity event handling"]
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    /// Stop listening for identity events.
    pub fn unsubscribe(self) {}

    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl<I: IdentityProvider, B: MembershipApi> SessionResolver<I, B> {
    #[must_use]
    pub fn new(identity: I, backend: B) -> Self {
        let (snapshot, _) = watch::channel(SessionSnapshot::default());
        Self {
            inner: Arc::new(Inner {
                identity,
                backend,
                state: Mutex::new(State::default()),
                snapshot,
            }),
        }
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    /// Receive every new snapshot version.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.snapshot.subscribe()
    }

    #[must_use]
    pub fn identity_provider(&self) -> &I {
        &self.inner.identity
    }

    #[must_use]
    pub fn backend(&self) -> &B {
        &self.inner.backend
    }

    /// Start following identity-provider events.
    ///
    /// Each event's state transition is applied in emission order; the
    /// membership refresh it triggers runs on its own task so a later event
    /// can supersede it. Must be called within a Tokio runtime.
    ///
    /// Call once per resolver. A later call replaces the earlier listener,
    /// which stops at its next event.
    pub fn listen(&self) -> Subscription {
        let epoch = {
            let mut state = self.inner.state.lock();
            state.listener += 1;
            if state.listener > 1 {
                tracing::warn!(listener = state.listener, "Replacing an active identity listener");
            }
            state.listener
        };
        let mut events = self.inner.identity.auth_state_changes();
        let resolver = self.clone();

        let task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if resolver.inner.state.lock().listener != epoch {
                    tracing::debug!(listener = epoch, "Identity listener superseded");
                    return;
                }
                if resolver.apply_identity_event(event) {
                    let resolver = resolver.clone();
                    tokio::spawn(async move {
                        resolver.refresh_session().await;
                    });
                }
            }
            tracing::debug!("Identity event stream closed");
        });

        Subscription { task }
    }

    /// Apply one identity event and, for a sign-in, wait for the resulting
    /// membership refresh.
    pub async fn handle_identity_event(&self, event: IdentityEvent) -> SessionSnapshot {
        if self.apply_identity_event(event) {
            self.refresh_session().await
        } else {
            self.snapshot()
        }
    }

    /// Returns whether a refresh should follow.
    fn apply_identity_event(&self, event: IdentityEvent) -> bool {
        let mut state = self.inner.state.lock();
        state.generation += 1;
        state.in_flight = None;
        state.identity = event.clone();

        match event {
            Some(identity) => {
                tracing::debug!(uid = %identity.uid, generation = state.generation, "Identity signed in");
                self.publish(SessionSnapshot {
                    identity: Some(identity),
                    business_user: None,
                    memberships: None,
                    status: SessionStatus::Loading,
                    generation: state.generation,
                });
                true
            }
            None => {
                tracing::debug!(generation = state.generation, "Identity signed out");
                self.publish(SessionSnapshot::signed_out(state.generation));
                false
            }
        }
    }

    /// Start a new generation for the same identity, so that an in-flight
    /// fetch issued before a membership change is discarded.
    ///
    /// Returns `false` when nobody is signed in.
    fn invalidate(&self) -> bool {
        let mut state = self.inner.state.lock();
        if state.identity.is_none() {
            return false;
        }
        state.generation += 1;
        state.in_flight = None;
        let generation = state.generation;
        self.inner.snapshot.send_modify(|s| {
            s.status = SessionStatus::Loading;
            s.generation = generation;
        });
        true
    }

    /// Reset to the empty signed-out snapshot.
    fn clear(&self) {
        let mut state = self.inner.state.lock();
        state.generation += 1;
        state.in_flight = None;
        state.identity = None;
        self.publish(SessionSnapshot::signed_out(state.generation));
    }

    fn publish(&self, snapshot: SessionSnapshot) {
        self.inner.snapshot.send_replace(snapshot);
    }

    /// Re-fetch memberships for the current identity and reselect the active
    /// business.
    ///
    /// Never fails: errors are logged and reflected in the snapshot. While a
    /// fetch for the current generation is running, further calls make no
    /// request and wait for it to settle instead.
    pub async fn refresh_session(&self) -> SessionSnapshot {
        let started = {
            let mut state = self.inner.state.lock();
            match state.identity.clone() {
                None => {
                    let snapshot = SessionSnapshot::signed_out(state.generation);
                    self.publish(snapshot.clone());
                    return snapshot;
                }
                Some(_) if state.in_flight == Some(state.generation) => None,
                Some(identity) => {
                    let generation = state.generation;
                    state.in_flight = Some(generation);
                    self.inner.snapshot.send_modify(|s| {
                        s.status = SessionStatus::Loading;
                        s.generation = generation;
                    });
                    Some((generation, identity))
                }
            }
        };

        let Some((generation, identity)) = started else {
            tracing::debug!("Membership refresh already in flight");
            return self.wait_until_ready().await;
        };

        let result = self.fetch_memberships().await;
        self.commit(generation, identity, result)
    }

    async fn wait_until_ready(&self) -> SessionSnapshot {
        let mut rx = self.inner.snapshot.subscribe();
        let settled = rx
            .wait_for(SessionSnapshot::is_ready)
            .await
            .map(|snapshot| snapshot.clone());
        settled.unwrap_or_else(|_| self.snapshot())
    }

    async fn fetch_memberships(&self) -> Result<Memberships, Error> {
        let token = self.inner.identity.get_token(false).await?;
        match self.inner.backend.refresh_claims(&token).await {
            Err(e) if e.is_unauthorized() => {
                tracing::debug!("Claims rejected, retrying with a fresh token");
                let token = self.inner.identity.get_token(true).await?;
                self.inner.backend.refresh_claims(&token).await
            }
            other => other,
        }
    }

    fn commit(
        &self,
        generation: u64,
        identity: Identity,
        result: Result<Memberships, Error>,
    ) -> SessionSnapshot {
        let mut state = self.inner.state.lock();
        if state.in_flight == Some(generation) {
            state.in_flight = None;
        }
        if state.generation != generation {
            tracing::debug!(
                generation,
                current = state.generation,
                "Discarding stale membership refresh"
            );
            return self.snapshot();
        }

        let snapshot = match result {
            Ok(memberships) => {
                let business_user = select_business_user(&memberships, identity.email.as_deref());
                tracing::info!(
                    uid = %identity.uid,
                    memberships = memberships.len(),
                    business_id = ?business_user.as_ref().map(|b| b.business_id.as_str()),
                    "Session refreshed"
                );
                SessionSnapshot {
                    identity: Some(identity),
                    business_user,
                    memberships: Some(memberships),
                    status: SessionStatus::Ready,
                    generation,
                }
            }
            Err(e) if e.is_network_unavailable() || e.is_authorization_failure() => {
                if e.is_network_unavailable() {
                    tracing::warn!(uid = %identity.uid, error = %e, "Backend unreachable, signed in without business context");
                } else {
                    tracing::info!(uid = %identity.uid, "No access to memberships");
                }
                SessionSnapshot {
                    identity: Some(identity),
                    business_user: None,
                    memberships: None,
                    status: SessionStatus::Ready,
                    generation,
                }
            }
            Err(e) => {
                tracing::error!(uid = %identity.uid, error = %e, "Membership refresh failed, keeping previous business context");
                SessionSnapshot {
                    status: SessionStatus::Ready,
                    ..self.snapshot()
                }
            }
        };

        self.publish(snapshot.clone());
        snapshot
    }

    /// Sign in with email and password.
    ///
    /// The snapshot is not touched here: the provider's sign-in event drives
    /// the membership refresh.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Identity`] with the provider's error unmodified.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, Error> {
        let identity = self
            .inner
            .identity
            .sign_in_with_password(email, password)
            .await
            .inspect_err(|e| tracing::warn!(code = %e.code, "Sign-in rejected"))?;

        tracing::info!(uid = %identity.uid, "Signed in");
        Ok(identity)
    }

    /// Create an account and bootstrap its owner businesses.
    ///
    /// The personal business is always created; `business_name` adds a named
    /// one. A failure after the account exists leaves that account in place.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Identity`] if the account cannot be created or no
    /// fresh token is issued, and the backend error if bootstrap fails.
    pub async fn sign_up(
        &self,
        profile: &SignUpProfile,
        business_name: Option<&str>,
    ) -> Result<Identity, Error> {
        let identity = self
            .inner
            .identity
            .create_account(&profile.email, &profile.password)
            .await
            .inspect_err(|e| tracing::warn!(code = %e.code, "Account creation rejected"))?;

        let request = BootstrapOwnerRequest::new(profile.owner(), business_name.map(str::to_owned));
        if let Err(e) = self.bootstrap_owner(&request).await {
            tracing::warn!(
                uid = %identity.uid,
                error = %e,
                "Owner bootstrap failed, identity account left in place"
            );
            return Err(e);
        }

        tracing::info!(uid = %identity.uid, named_business = business_name.is_some(), "Owner bootstrapped");

        if self.invalidate() {
            self.refresh_session().await;
        }
        Ok(identity)
    }

    async fn bootstrap_owner(&self, request: &BootstrapOwnerRequest) -> Result<(), Error> {
        let token = self.inner.identity.get_token(true).await?;
        self.inner.backend.bootstrap_owner(&token, request).await
    }

    /// Sign out and reset to the empty snapshot.
    ///
    /// Local state is cleared even when the provider reports a failure.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Identity`] if the provider failed to sign out.
    pub async fn sign_out(&self) -> Result<(), Error> {
        let result = self.inner.identity.sign_out().await;
        self.clear();

        if let Err(e) = &result {
            tracing::warn!(code = %e.code, "Provider sign-out failed, local session cleared");
        } else {
            tracing::info!("Signed out");
        }
        result.map_err(Into::into)
    }

    /// Accept a business invite, then refresh to pick up the new membership.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotSignedIn`] without an identity, or the token or
    /// backend error; the snapshot is unchanged on error.
    pub async fn accept_invite(
        &self,
        invite_id: &str,
        overrides: Option<AcceptInviteRequest>,
    ) -> Result<SessionSnapshot, Error> {
        let uid = self
            .inner
            .state
            .lock()
            .identity
            .as_ref()
            .map(|i| i.uid.clone())
            .ok_or(Error::NotSignedIn)?;

        let token = self.inner.identity.get_token(false).await?;
        self.inner
            .backend
            .accept_invite(&token, invite_id, &overrides.unwrap_or_default())
            .await
            .inspect_err(|e| tracing::warn!(uid = %uid, invite_id, error = %e, "Invite acceptance failed"))?;

        tracing::info!(uid = %uid, invite_id, "Invite accepted");

        if self.invalidate() {
            Ok(self.refresh_session().await)
        } else {
            Ok(self.snapshot())
        }
    }
}
