use std::fmt;

/// Errors returned by session operations and backend calls.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Identity-provider failure, passed through unmodified.
    #[error("Identity provider error: {0}")]
    Identity(#[from] IdentityError),

    /// Transport failure: the backend could not be reached.
    #[cfg(feature = "http")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered, but not with what the operation expected.
    #[error("{operation} failed (status {status:?}): {detail}")]
    Backend {
        operation: &'static str,
        status: Option<u16>,
        detail: String,
    },

    /// The operation needs a signed-in identity.
    #[error("Not signed in")]
    NotSignedIn,

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// HTTP status associated with this error.
    ///
    /// Transport failures (including the identity provider's own network
    /// failure) report `Some(0)`, matching the "status 0" convention for an
    /// unreachable server.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Identity(e) if e.kind() == IdentityErrorCode::NetworkRequestFailed => Some(0),
            #[cfg(feature = "http")]
            Self::Http(e) => match e.status() {
                Some(status) => Some(status.as_u16()),
                // a malformed body still means the server answered
                None if e.is_decode() => None,
                None => Some(0),
            },
            Self::Backend { status, .. } => *status,
            _ => None,
        }
    }

    /// The backend could not be reached at all.
    #[must_use]
    pub fn is_network_unavailable(&self) -> bool {
        self.status() == Some(0)
    }

    /// The backend refused the caller (`401` or `403`).
    #[must_use]
    pub fn is_authorization_failure(&self) -> bool {
        matches!(self.status(), Some(401 | 403))
    }

    pub(crate) fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }
}

/// Collapse an authorization failure into `T::default()`.
///
/// Under-permissioned users legitimately get `401`/`403` from secondary
/// endpoints (alert badges and the like). That is an expected state, so it is
/// logged at debug level only and the caller sees an empty value.
///
/// # Errors
///
/// Any error that is not an authorization failure is returned unchanged.
pub fn default_on_forbidden<T: Default>(result: Result<T, Error>) -> Result<T, Error> {
    match result {
        Err(e) if e.is_authorization_failure() => {
            tracing::debug!(error = %e, "No access, using default value");
            Ok(T::default())
        }
        other => other,
    }
}

/// Error reported by the identity provider.
///
/// `code` and `message` are exactly what the provider returned; translate with
/// [`IdentityError::user_message`] at the display layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct IdentityError {
    pub code: String,
    pub message: String,
}

impl IdentityError {
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Parsed form of the provider code.
    #[must_use]
    pub fn kind(&self) -> IdentityErrorCode {
        IdentityErrorCode::from_code(&self.code)
    }

    /// User-facing copy for this error.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self.kind() {
            IdentityErrorCode::EmailAlreadyInUse => "An account with this email already exists.",
            IdentityErrorCode::InvalidEmail => "Please enter a valid email address.",
            IdentityErrorCode::WeakPassword => "Password should be at least 6 characters.",
            IdentityErrorCode::WrongPassword
            | IdentityErrorCode::UserNotFound
            | IdentityErrorCode::InvalidCredential => "Incorrect email or password.",
            IdentityErrorCode::TooManyRequests => {
                "Too many attempts. Please wait a moment and try again."
            }
            IdentityErrorCode::NetworkRequestFailed => {
                "Can't reach the server. Check your connection and try again."
            }
            IdentityErrorCode::Other => "Something went wrong. Please try again.",
        }
    }
}

/// Well-known identity-provider error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum IdentityErrorCode {
    EmailAlreadyInUse,
    InvalidEmail,
    WeakPassword,
    WrongPassword,
    UserNotFound,
    InvalidCredential,
    TooManyRequests,
    NetworkRequestFailed,
    Other,
}

impl IdentityErrorCode {
    /// Parse a provider code such as `auth/weak-password`.
    ///
    /// The `auth/` prefix is optional.
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        match code.strip_prefix("auth/").unwrap_or(code) {
            "email-already-in-use" => Self::EmailAlreadyInUse,
            "invalid-email" => Self::InvalidEmail,
            "weak-password" => Self::WeakPassword,
            "wrong-password" => Self::WrongPassword,
            "user-not-found" => Self::UserNotFound,
            "invalid-credential" => Self::InvalidCredential,
            "too-many-requests" => Self::TooManyRequests,
            "network-request-failed" => Self::NetworkRequestFailed,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for IdentityErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::EmailAlreadyInUse => "auth/email-already-in-use",
            Self::InvalidEmail => "auth/invalid-email",
            Self::WeakPassword => "auth/weak-password",
            Self::WrongPassword => "auth/wrong-password",
            Self::UserNotFound => "auth/user-not-found",
            Self::InvalidCredential => "auth/invalid-credential",
            Self::TooManyRequests => "auth/too-many-requests",
            Self::NetworkRequestFailed => "auth/network-request-failed",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}
