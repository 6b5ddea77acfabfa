use std::future::Future;

use crate::error::Error;
use crate::types::{AcceptInviteRequest, BootstrapOwnerRequest, Memberships};

/// Backend membership and bootstrap endpoints.
///
/// Every call takes the caller's bearer token; the implementation must not
/// cache it. [`BackendClient`](crate::BackendClient) is the HTTP
/// implementation; tests use an in-memory one.
pub trait MembershipApi: Send + Sync + 'static {
    /// `GET /auth/refresh-claims`: the caller's memberships, in payload order.
    fn refresh_claims(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<Memberships, Error>> + Send;

    /// `POST /auth/bootstrap-owner`: create the owner's businesses.
    fn bootstrap_owner(
        &self,
        token: &str,
        request: &BootstrapOwnerRequest,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// `POST /auth/invites/{inviteId}/accept`.
    fn accept_invite(
        &self,
        token: &str,
        invite_id: &str,
        request: &AcceptInviteRequest,
    ) -> impl Future<Output = Result<(), Error>> + Send;
}
