#![doc = include_str!("../README.md")]

pub mod backend;
#[cfg(feature = "http")]
pub mod client;
#[cfg(feature = "http")]
pub mod config;
pub mod error;
pub mod identity;
pub mod resolver;
pub mod selection;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod types;

// Re-exports for convenient access
pub use backend::MembershipApi;
#[cfg(feature = "http")]
pub use client::BackendClient;
#[cfg(feature = "http")]
pub use config::BackendConfig;
pub use error::{Error, IdentityError, IdentityErrorCode, default_on_forbidden};
pub use identity::{IdentityEvent, IdentityEvents, IdentityProvider, SignUpProfile};
pub use resolver::{SessionResolver, Subscription};
pub use selection::{is_personal_business, select_business_user, select_membership};
pub use types::{
    AcceptInviteRequest, BootstrapOwnerRequest, BusinessId, BusinessUser, Identity, Membership,
    Memberships, NewBusiness, OwnerProfile, PermissionSet, Role, SessionSnapshot, SessionStatus,
};
