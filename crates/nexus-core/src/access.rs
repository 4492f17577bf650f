//! # Role / Ability Evaluation
//!
//! Permissions are plain relations: a user holds zero or more roles, a role
//! grants zero or more named abilities (`create-users`, `review-audits`, …).
//! A role flagged `grants_all` implies every ability, present or future.
//!
//! A user may perform an action when any of their roles grants the
//! requested ability. Resolution here is pure; caching the resolved set per
//! user and invalidating it after mutations is the caller's concern.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Ability names known to the system, with their display titles.
pub mod abilities {
    /// Browse user accounts.
    pub const VIEW_USERS: &str = "view-users";
    /// Create user accounts.
    pub const CREATE_USERS: &str = "create-users";
    /// Edit user accounts and their role assignments.
    pub const EDIT_USERS: &str = "edit-users";
    /// Delete user accounts.
    pub const DELETE_USERS: &str = "delete-users";
    /// Manage roles and their abilities.
    pub const MANAGE_ROLES: &str = "manage-roles";
    /// Browse outlets.
    pub const VIEW_OUTLETS: &str = "view-outlets";
    /// Create, edit and delete outlets.
    pub const MANAGE_OUTLETS: &str = "manage-outlets";
    /// Browse compliance requirements.
    pub const VIEW_COMPLIANCE: &str = "view-compliance";
    /// Create, edit and delete compliance requirements.
    pub const MANAGE_COMPLIANCE: &str = "manage-compliance";
    /// Create, edit and delete form templates.
    pub const MANAGE_FORMS: &str = "manage-forms";
    /// Browse every audit, not only one's own.
    pub const VIEW_AUDITS: &str = "view-audits";
    /// Start audits and submit forms.
    pub const CREATE_AUDITS: &str = "create-audits";
    /// Approve or reject audits and audit forms.
    pub const REVIEW_AUDITS: &str = "review-audits";
    /// Raise issues and record corrective actions.
    pub const MANAGE_ISSUES: &str = "manage-issues";
    /// Browse and export the activity log.
    pub const VIEW_ACTIVITY_LOGS: &str = "view-activity-logs";

    /// Every ability with its title, in display order.
    pub const ALL: &[(&str, &str)] = &[
        (VIEW_USERS, "View Users"),
        (CREATE_USERS, "Create Users"),
        (EDIT_USERS, "Edit Users"),
        (DELETE_USERS, "Delete Users"),
        (MANAGE_ROLES, "Manage Roles & Abilities"),
        (VIEW_OUTLETS, "View Outlets"),
        (MANAGE_OUTLETS, "Manage Outlets"),
        (VIEW_COMPLIANCE, "View Compliance Requirements"),
        (MANAGE_COMPLIANCE, "Manage Compliance Requirements"),
        (MANAGE_FORMS, "Manage Form Templates"),
        (VIEW_AUDITS, "View All Audits"),
        (CREATE_AUDITS, "Create Audits"),
        (REVIEW_AUDITS, "Review Audits"),
        (MANAGE_ISSUES, "Manage Issues & Corrective Actions"),
        (VIEW_ACTIVITY_LOGS, "View Activity Logs"),
    ];
}

/// Seed definition of a built-in role.
#[derive(Debug, Clone, Copy)]
pub struct RoleSeed {
    /// Role name.
    pub name: &'static str,
    /// Display title.
    pub title: &'static str,
    /// Whether the role implies every ability.
    pub grants_all: bool,
    /// Explicitly granted abilities.
    pub abilities: &'static [&'static str],
}

/// Name of the built-in administrator role.
pub const ADMIN_ROLE: &str = "admin";
/// Name of the built-in manager role.
pub const MANAGER_ROLE: &str = "manager";
/// Name of the built-in outlet staff role.
pub const OUTLET_USER_ROLE: &str = "outlet-user";

/// Built-in roles created on first start.
pub const DEFAULT_ROLES: &[RoleSeed] = &[
    RoleSeed {
        name: ADMIN_ROLE,
        title: "Administrator",
        grants_all: true,
        abilities: &[],
    },
    RoleSeed {
        name: MANAGER_ROLE,
        title: "Manager",
        grants_all: false,
        abilities: &[
            abilities::VIEW_USERS,
            abilities::VIEW_OUTLETS,
            abilities::VIEW_COMPLIANCE,
            abilities::VIEW_AUDITS,
            abilities::REVIEW_AUDITS,
            abilities::MANAGE_ISSUES,
            abilities::VIEW_ACTIVITY_LOGS,
        ],
    },
    RoleSeed {
        name: OUTLET_USER_ROLE,
        title: "Outlet User",
        grants_all: false,
        abilities: &[
            abilities::VIEW_OUTLETS,
            abilities::VIEW_COMPLIANCE,
            abilities::CREATE_AUDITS,
        ],
    },
];

/// A role together with the abilities it grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAbilities {
    /// Role name.
    pub role: String,
    /// Whether the role implies every ability.
    pub grants_all: bool,
    /// Explicitly granted ability names.
    pub abilities: BTreeSet<String>,
}

/// The effective abilities of a user after resolving all their roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "abilities", rename_all = "snake_case")]
pub enum ResolvedAbilities {
    /// At least one role grants everything.
    All,
    /// Union of the explicitly granted abilities.
    Only(BTreeSet<String>),
}

impl ResolvedAbilities {
    /// Resolve the effective abilities of a set of roles.
    pub fn resolve<'a>(roles: impl IntoIterator<Item = &'a RoleAbilities>) -> Self {
        let mut granted = BTreeSet::new();
        for role in roles {
            if role.grants_all {
                return Self::All;
            }
            granted.extend(role.abilities.iter().cloned());
        }
        Self::Only(granted)
    }

    /// Whether the requested ability is granted.
    pub fn allows(&self, ability: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(set) => set.contains(ability),
        }
    }

    /// Whether every ability is implied.
    pub fn is_unrestricted(&self) -> bool {
        matches!(self, Self::All)
    }

    /// The explicit ability names, or every known ability for `All`.
    pub fn names(&self) -> Vec<String> {
        match self {
            Self::All => abilities::ALL.iter().map(|(n, _)| n.to_string()).collect(),
            Self::Only(set) => set.iter().cloned().collect(),
        }
    }
}

/// Whether any of `roles` grants `ability`.
pub fn can<'a>(roles: impl IntoIterator<Item = &'a RoleAbilities>, ability: &str) -> bool {
    roles
        .into_iter()
        .any(|r| r.grants_all || r.abilities.contains(ability))
}

/// Whether `name` is one of the known ability names.
pub fn is_known_ability(name: &str) -> bool {
    abilities::ALL.iter().any(|(n, _)| *n == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role(name: &str, grants_all: bool, abilities: &[&str]) -> RoleAbilities {
        RoleAbilities {
            role: name.to_string(),
            grants_all,
            abilities: abilities.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn admin_role_grants_everything() {
        let roles = [role("admin", true, &[])];
        assert!(can(&roles, abilities::DELETE_USERS));
        assert!(can(&roles, "some-future-ability"));
        assert!(ResolvedAbilities::resolve(&roles).is_unrestricted());
    }

    #[test]
    fn explicit_grant_is_required_for_non_admin() {
        let roles = [role("manager", false, &[abilities::REVIEW_AUDITS])];
        assert!(can(&roles, abilities::REVIEW_AUDITS));
        assert!(!can(&roles, abilities::DELETE_USERS));
    }

    #[test]
    fn any_role_suffices() {
        let roles = [
            role("outlet-user", false, &[abilities::CREATE_AUDITS]),
            role("auditor", false, &[abilities::VIEW_AUDITS]),
        ];
        assert!(can(&roles, abilities::CREATE_AUDITS));
        assert!(can(&roles, abilities::VIEW_AUDITS));
        let resolved = ResolvedAbilities::resolve(&roles);
        assert_eq!(
            resolved.names(),
            vec![abilities::CREATE_AUDITS.to_string(), abilities::VIEW_AUDITS.to_string()]
        );
    }

    #[test]
    fn no_roles_grants_nothing() {
        let roles: [RoleAbilities; 0] = [];
        assert!(!can(&roles, abilities::VIEW_USERS));
        assert_eq!(
            ResolvedAbilities::resolve(&roles),
            ResolvedAbilities::Only(BTreeSet::new())
        );
    }

    #[test]
    fn default_roles_only_reference_known_abilities() {
        for seed in DEFAULT_ROLES {
            for ability in seed.abilities {
                assert!(is_known_ability(ability), "{} grants unknown {ability}", seed.name);
            }
        }
    }

    #[test]
    fn unrestricted_names_list_every_ability() {
        assert_eq!(ResolvedAbilities::All.names().len(), abilities::ALL.len());
    }
}
