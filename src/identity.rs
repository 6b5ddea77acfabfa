use std::future::Future;

use tokio::sync::mpsc;

use crate::error::IdentityError;
use crate::types::{Identity, OwnerProfile};

/// One identity-provider state change: `Some` on sign-in, `None` on sign-out.
pub type IdentityEvent = Option<Identity>;

/// Ordered stream of identity events. Dropping it unsubscribes.
pub type IdentityEvents = mpsc::UnboundedReceiver<IdentityEvent>;

/// Consumer-provided identity provider.
///
/// Errors are the provider's own codes, returned unmodified so the UI can
/// translate them (see [`IdentityError::user_message`]).
///
/// # Example
///
/// ```rust,ignore
/// impl IdentityProvider for FirebaseAuth {
///     async fn sign_in_with_password(&self, email: &str, password: &str)
///         -> Result<Identity, IdentityError>
///     {
///         let user = self.sdk.sign_in(email, password).await.map_err(to_identity_error)?;
///         Ok(Identity::new(user.uid).with_email(email))
///     }
///     // ...
/// }
/// ```
pub trait IdentityProvider: Send + Sync + 'static {
    /// Sign in an existing account. Emits a sign-in event on success.
    fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> impl Future<Output = Result<Identity, IdentityError>> + Send;

    /// Create an account and sign it in. Emits a sign-in event on success.
    fn create_account(
        &self,
        email: &str,
        password: &str,
    ) -> impl Future<Output = Result<Identity, IdentityError>> + Send;

    /// Sign out the current identity. Emits a sign-out event.
    fn sign_out(&self) -> impl Future<Output = Result<(), IdentityError>> + Send;

    /// Current bearer token for the signed-in identity.
    ///
    /// `force_refresh` bypasses any cached token.
    fn get_token(
        &self,
        force_refresh: bool,
    ) -> impl Future<Output = Result<String, IdentityError>> + Send;

    /// Subscribe to sign-in/sign-out events, delivered in emission order.
    fn auth_state_changes(&self) -> IdentityEvents;
}

/// Sign-up form data.
#[derive(Clone)]
pub struct SignUpProfile {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
}

impl SignUpProfile {
    pub(crate) fn owner(&self) -> OwnerProfile {
        OwnerProfile {
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            email: self.email.clone(),
        }
    }
}

// Manual Debug: keep the password out of logs.
impl std::fmt::Debug for SignUpProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignUpProfile")
            .field("first_name", &self.first_name)
            .field("last_name", &self.last_name)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}
