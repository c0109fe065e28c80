//! Catalog permission rules (spec §4.5). These are pure functions over a
//! `Holding` and the caller's `(user, group, role)`; the admin-role lookup
//! itself goes through [`crate::auth::Authenticator::authenticate_collection`]
//! and is cached for the life of one transaction (spec: "the engine
//! caches the answer for the life of one transaction").

use super::models::Holding;
use crate::auth::GroupRole;

fn is_admin(role: GroupRole) -> bool {
    matches!(role, GroupRole::Manager | GroupRole::Deputy)
}

/// `user_has_get_holding_permission`: true iff `holding.user == user` OR
/// the caller is manager/deputy of `group`.
pub fn user_has_get_holding_permission(holding: &Holding, user: &str, role: GroupRole) -> bool {
    holding.user == user || is_admin(role)
}

/// `user_has_get_file_permission`: identical rule to holding-get, applied
/// transitively through the file's owning holding.
pub fn user_has_get_file_permission(holding: &Holding, user: &str, role: GroupRole) -> bool {
    user_has_get_holding_permission(holding, user, role)
}

/// `user_has_delete_from_holding_permission`: true iff the caller is both
/// the holding's owning user AND acting within the holding's own group,
/// OR is manager/deputy of `group`.
pub fn user_has_delete_from_holding_permission(
    holding: &Holding,
    user: &str,
    group: &str,
    role: GroupRole,
) -> bool {
    (holding.user == user && holding.group == group) || is_admin(role)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn holding(user: &str, group: &str) -> Holding {
        Holding {
            id: 1,
            label: "default".to_string(),
            tags: Vec::new(),
            user: user.to_string(),
            group: group.to_string(),
        }
    }

    #[test]
    fn owner_can_get_own_holding() {
        let h = holding("alice", "gws_test");
        assert!(user_has_get_holding_permission(&h, "alice", GroupRole::Member));
    }

    #[test]
    fn non_owner_member_cannot_get_holding() {
        let h = holding("alice", "gws_test");
        assert!(!user_has_get_holding_permission(&h, "bob", GroupRole::Member));
    }

    #[test]
    fn manager_can_get_any_holding_in_group() {
        let h = holding("alice", "gws_test");
        assert!(user_has_get_holding_permission(&h, "bob", GroupRole::Manager));
        assert!(user_has_get_holding_permission(&h, "bob", GroupRole::Deputy));
    }

    #[test]
    fn delete_requires_owner_and_matching_group_or_admin() {
        let h = holding("alice", "gws_test");
        assert!(user_has_delete_from_holding_permission(
            &h,
            "alice",
            "gws_test",
            GroupRole::Member
        ));
        assert!(!user_has_delete_from_holding_permission(
            &h,
            "alice",
            "gws_other",
            GroupRole::Member
        ));
        assert!(user_has_delete_from_holding_permission(
            &h,
            "bob",
            "gws_other",
            GroupRole::Manager
        ));
    }
}
