use std::collections::BTreeSet;
use std::fmt;

use derive_more::{Display, From, Into};
use serde::de::{MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Backend business identifier.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, From, Into,
)]
#[serde(transparent)]
pub struct BusinessId(pub String);

impl BusinessId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BusinessId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Role of a user within one business.
///
/// The session layer only distinguishes owners and super users; every other
/// backend role deserializes as [`Role::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Owner,
    Super,
    Other,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Super => "super",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Role {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(match s.as_str() {
            "owner" => Self::Owner,
            "super" => Self::Super,
            _ => Self::Other,
        })
    }
}

/// Permission names granted by a membership.
///
/// Accepts either `["inventory.read", ...]` or `{"inventory.read": true, ...}`
/// on the wire; in the object form only `true` entries are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PermissionSet(BTreeSet<String>);

impl PermissionSet {
    #[must_use]
    pub fn contains(&self, permission: &str) -> bool {
        self.0.contains(permission)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for PermissionSet {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl<'de> Deserialize<'de> for PermissionSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PermissionVisitor;

        impl<'de> Visitor<'de> for PermissionVisitor {
            type Value = PermissionSet;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a list of permissions or a map of permission flags")
            }

            fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
                Ok(PermissionSet::default())
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut set = BTreeSet::new();
                while let Some(name) = seq.next_element::<String>()? {
                    set.insert(name);
                }
                Ok(PermissionSet(set))
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut set = BTreeSet::new();
                while let Some((name, granted)) = map.next_entry::<String, bool>()? {
                    if granted {
                        set.insert(name);
                    }
                }
                Ok(PermissionSet(set))
            }
        }

        deserializer.deserialize_any(PermissionVisitor)
    }
}

/// One business the user belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    /// Always the mapping key once inside [`Memberships`].
    #[serde(default)]
    pub business_id: BusinessId,
    pub role: Role,
    #[serde(default)]
    pub permissions: PermissionSet,
}

impl Membership {
    #[must_use]
    pub fn new(business_id: impl Into<BusinessId>, role: Role) -> Self {
        Self {
            business_id: business_id.into(),
            role,
            permissions: PermissionSet::default(),
        }
    }

    #[must_use]
    pub fn with_permissions(mut self, permissions: PermissionSet) -> Self {
        self.permissions = permissions;
        self
    }
}

/// Business memberships keyed by business id, in backend payload order.
///
/// Iteration order is the order entries were inserted (or appeared in the
/// JSON object), which is what breaks ties during selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Memberships {
    entries: Vec<(BusinessId, Membership)>,
}

impl Memberships {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a membership. An existing key keeps its position and gets the
    /// new value.
    ///
    /// The key is the business id: a different `business_id` on the
    /// membership is replaced by it.
    pub fn insert(&mut self, business_id: BusinessId, mut membership: Membership) {
        if membership.business_id != business_id {
            if !membership.business_id.as_str().is_empty() {
                tracing::warn!(
                    key = %business_id,
                    payload = %membership.business_id,
                    "Membership business id disagrees with its key, using the key"
                );
            }
            membership.business_id = business_id.clone();
        }
        match self.entries.iter_mut().find(|(id, _)| *id == business_id) {
            Some((_, slot)) => *slot = membership,
            None => self.entries.push((business_id, membership)),
        }
    }

    #[must_use]
    pub fn get(&self, business_id: &BusinessId) -> Option<&Membership> {
        self.entries
            .iter()
            .find(|(id, _)| id == business_id)
            .map(|(_, m)| m)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BusinessId, &Membership)> {
        self.entries.iter().map(|(id, m)| (id, m))
    }
}

impl FromIterator<(BusinessId, Membership)> for Memberships {
    fn from_iter<T: IntoIterator<Item = (BusinessId, Membership)>>(iter: T) -> Self {
        let mut out = Self::new();
        for (id, m) in iter {
            out.insert(id, m);
        }
        out
    }
}

impl FromIterator<Membership> for Memberships {
    fn from_iter<T: IntoIterator<Item = Membership>>(iter: T) -> Self {
        iter.into_iter()
            .map(|m| (m.business_id.clone(), m))
            .collect()
    }
}

impl Serialize for Memberships {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.entries.iter().map(|(id, m)| (id, m)))
    }
}

impl<'de> Deserialize<'de> for Memberships {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MembershipsVisitor;

        impl<'de> Visitor<'de> for MembershipsVisitor {
            type Value = Memberships;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of business id to membership")
            }

            fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
                Ok(Memberships::new())
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut out = Memberships::new();
                while let Some((id, membership)) = map.next_entry::<BusinessId, Membership>()? {
                    out.insert(id, membership);
                }
                Ok(out)
            }
        }

        deserializer.deserialize_any(MembershipsVisitor)
    }
}

/// The selected membership, promoted to the active business context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessUser {
    pub role: Role,
    pub business_id: BusinessId,
    pub permissions: PermissionSet,
    pub email: Option<String>,
}

/// Authenticated principal from the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub uid: String,
    #[serde(default)]
    pub email: Option<String>,
}

impl Identity {
    #[must_use]
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            email: None,
        }
    }

    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Uninitialized,
    Loading,
    Ready,
}

/// Externally visible session state.
///
/// Published whole on every change; readers never see a half-updated value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub identity: Option<Identity>,
    pub business_user: Option<BusinessUser>,
    pub memberships: Option<Memberships>,
    pub status: SessionStatus,
    /// Session generation this snapshot belongs to.
    pub generation: u64,
}

impl SessionSnapshot {
    pub(crate) fn signed_out(generation: u64) -> Self {
        Self {
            status: SessionStatus::Ready,
            generation,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_signed_in(&self) -> bool {
        self.identity.is_some()
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.status == SessionStatus::Ready
    }

    /// Active business id, if a business context was resolved.
    #[must_use]
    pub fn business_id(&self) -> Option<&BusinessId> {
        self.business_user.as_ref().map(|b| &b.business_id)
    }

    /// Signed in and settled, but without business data: the server could not
    /// be reached (or refused the claims request).
    #[must_use]
    pub fn is_connectivity_degraded(&self) -> bool {
        self.is_ready() && self.identity.is_some() && self.memberships.is_none()
    }
}

/// Owner details for `POST /auth/bootstrap-owner`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerProfile {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBusiness {
    pub business_name: String,
}

/// Body of `POST /auth/bootstrap-owner`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapOwnerRequest {
    pub owner: OwnerProfile,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub businesses: Option<Vec<NewBusiness>>,
    pub create_personal_business: bool,
}

impl BootstrapOwnerRequest {
    /// Personal business always; a named business as well when given.
    #[must_use]
    pub fn new(owner: OwnerProfile, business_name: Option<String>) -> Self {
        Self {
            owner,
            businesses: business_name
                .map(|business_name| vec![NewBusiness { business_name }]),
            create_personal_business: true,
        }
    }
}

/// Body of `POST /auth/invites/{inviteId}/accept`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptInviteRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
}
