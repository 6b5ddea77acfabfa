//! Active business selection.
//!
//! Every screen reads the active business from [`BusinessUser::business_id`];
//! nothing else should pick a membership on its own.

use crate::types::{BusinessUser, Membership, Memberships, Role};

/// Pick the active membership.
///
/// Owner beats super beats the first membership encountered. The first owner
/// ends the scan; among equal candidates iteration order wins.
#[must_use]
pub fn select_membership(memberships: &Memberships) -> Option<&Membership> {
    let mut selected: Option<&Membership> = None;

    for (_, membership) in memberships.iter() {
        if membership.role == Role::Owner {
            selected = Some(membership);
            break;
        }
        // super beats an earlier tentative pick of another role
        let promote = match selected {
            None => true,
            Some(current) => membership.role == Role::Super && current.role != Role::Super,
        };
        if promote {
            selected = Some(membership);
        }
    }

    selected
}

/// Build the [`BusinessUser`] for a membership mapping.
///
/// Returns `None` when `memberships` is empty.
#[must_use]
pub fn select_business_user(
    memberships: &Memberships,
    email: Option<&str>,
) -> Option<BusinessUser> {
    select_membership(memberships).map(|m| BusinessUser {
        role: m.role,
        business_id: m.business_id.clone(),
        permissions: m.permissions.clone(),
        email: email.map(str::to_owned),
    })
}

/// Whether a business id names the user's personal business.
///
/// Informational only: selection is role-based and ignores this.
#[must_use]
pub fn is_personal_business(business_id: &str) -> bool {
    business_id.contains("personal")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BusinessId, PermissionSet};

    fn memberships(entries: &[(&str, Role)]) -> Memberships {
        entries
            .iter()
            .map(|(id, role)| Membership::new(*id, *role))
            .collect()
    }

    fn selected(entries: &[(&str, Role)]) -> Option<String> {
        select_membership(&memberships(entries)).map(|m| m.business_id.to_string())
    }

    #[test]
    fn owner_beats_earlier_super_and_other() {
        let picked = selected(&[("A", Role::Super), ("B", Role::Other), ("C", Role::Owner)]);
        assert_eq!(picked.as_deref(), Some("C"));
    }

    #[test]
    fn super_beats_earlier_other() {
        let picked = selected(&[("A", Role::Other), ("B", Role::Super)]);
        assert_eq!(picked.as_deref(), Some("B"));
    }

    #[test]
    fn first_other_wins_without_owner_or_super() {
        let picked = selected(&[("A", Role::Other), ("B", Role::Other)]);
        assert_eq!(picked.as_deref(), Some("A"));
    }

    #[test]
    fn first_owner_wins_among_owners() {
        let picked = selected(&[("A", Role::Other), ("B", Role::Owner), ("C", Role::Owner)]);
        assert_eq!(picked.as_deref(), Some("B"));
    }

    #[test]
    fn first_super_wins_among_supers() {
        let picked = selected(&[("A", Role::Super), ("B", Role::Other), ("C", Role::Super)]);
        assert_eq!(picked.as_deref(), Some("A"));
    }

    #[test]
    fn empty_mapping_selects_nothing() {
        assert!(select_membership(&Memberships::new()).is_none());
        assert!(select_business_user(&Memberships::new(), Some("a@b.c")).is_none());
    }

    #[test]
    fn selection_is_deterministic() {
        let m = memberships(&[("x", Role::Other), ("y", Role::Super), ("z", Role::Other)]);
        let first = select_business_user(&m, Some("u@example.com"));
        let second = select_business_user(&m, Some("u@example.com"));
        assert_eq!(first, second);
    }

    #[test]
    fn business_user_carries_permissions_and_email() {
        let perms: PermissionSet = ["pos.sell", "inventory.write"].into_iter().collect();
        let m: Memberships = [Membership::new("shop", Role::Owner).with_permissions(perms.clone())]
            .into_iter()
            .collect();

        let user = select_business_user(&m, Some("owner@shop.test")).unwrap();
        assert_eq!(user.business_id, BusinessId::from("shop"));
        assert_eq!(user.role, Role::Owner);
        assert_eq!(user.permissions, perms);
        assert_eq!(user.email.as_deref(), Some("owner@shop.test"));
    }

    #[test]
    fn personal_heuristic_does_not_affect_selection() {
        assert!(is_personal_business("uid123-personal"));
        assert!(!is_personal_business("acme"));

        let picked = selected(&[("uid123-personal", Role::Owner), ("acme", Role::Owner)]);
        assert_eq!(picked.as_deref(), Some("uid123-personal"));
    }
}
