//! # Resolved Ability Cache
//!
//! Resolving a user's abilities walks user → roles → abilities across three
//! stores. The result is memoized per user in a [`PermissionCache`] owned by
//! `AppState`. Every handler that changes a role, a role's abilities, or a
//! user's role assignment must invalidate the cache afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use nexus_core::{ResolvedAbilities, RoleAbilities};
use parking_lot::RwLock;

use crate::state::AppState;

/// Per-user memo of resolved abilities.
#[derive(Debug, Clone, Default)]
pub struct PermissionCache {
    resolved: Arc<RwLock<HashMap<i64, ResolvedAbilities>>>,
}

impl PermissionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached abilities of `user_id`, resolving with `resolve` on a miss.
    ///
    /// The write lock is held while resolving so an invalidation issued
    /// after a store mutation can never be overwritten by a stale result.
    pub fn get_or_resolve(
        &self,
        user_id: i64,
        resolve: impl FnOnce() -> ResolvedAbilities,
    ) -> ResolvedAbilities {
        if let Some(hit) = self.resolved.read().get(&user_id) {
            return hit.clone();
        }
        let mut guard = self.resolved.write();
        if let Some(hit) = guard.get(&user_id) {
            return hit.clone();
        }
        let resolved = resolve();
        guard.insert(user_id, resolved.clone());
        resolved
    }

    /// Drop the cached entry of one user.
    pub fn invalidate_user(&self, user_id: i64) {
        self.resolved.write().remove(&user_id);
    }

    /// Drop every cached entry.
    pub fn invalidate_all(&self) {
        self.resolved.write().clear();
    }

    /// Number of cached users.
    pub fn len(&self) -> usize {
        self.resolved.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Resolve the abilities of `user_id` from the stores, bypassing the cache.
///
/// Unknown and inactive users resolve to no abilities.
pub fn resolve_user(state: &AppState, user_id: i64) -> ResolvedAbilities {
    let user = match state.users.get(&user_id) {
        Some(user) if user.is_active => user,
        _ => return ResolvedAbilities::Only(Default::default()),
    };

    let roles: Vec<RoleAbilities> = user
        .role_ids
        .iter()
        .filter_map(|id| state.roles.get(id))
        .map(|role| RoleAbilities {
            role: role.name,
            grants_all: role.grants_all,
            abilities: role
                .ability_ids
                .iter()
                .filter_map(|id| state.abilities.get(id))
                .map(|a| a.name)
                .collect(),
        })
        .collect();

    ResolvedAbilities::resolve(&roles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::UserRecord;
    use chrono::Utc;
    use nexus_core::access::{abilities, MANAGER_ROLE};

    fn add_user(state: &AppState, role_names: &[&str]) -> i64 {
        let role_ids = role_names
            .iter()
            .filter_map(|n| state.roles.find(|r| r.name == *n))
            .map(|r| r.id)
            .collect();
        let now = Utc::now();
        state
            .users
            .insert_with(|id| UserRecord {
                id,
                name: "Test".into(),
                email: format!("user{id}@nexus.test"),
                password_hash: String::new(),
                role_ids,
                is_active: true,
                created_at: now,
                updated_at: now,
            })
            .id
    }

    #[test]
    fn manager_resolves_to_seeded_abilities() {
        let state = AppState::new();
        let id = add_user(&state, &[MANAGER_ROLE]);
        let resolved = state.abilities_for(id);
        assert!(resolved.allows(abilities::REVIEW_AUDITS));
        assert!(!resolved.allows(abilities::DELETE_USERS));
    }

    #[test]
    fn results_are_cached_until_invalidated() {
        let state = AppState::new();
        let id = add_user(&state, &[MANAGER_ROLE]);
        assert!(!state.abilities_for(id).allows(abilities::DELETE_USERS));
        assert_eq!(state.permissions.len(), 1);

        let delete = state
            .abilities
            .find(|a| a.name == abilities::DELETE_USERS)
            .unwrap();
        let manager = state.roles.find(|r| r.name == MANAGER_ROLE).unwrap();
        state
            .roles
            .update(&manager.id, |r| r.ability_ids.push(delete.id));

        // Stale until invalidated.
        assert!(!state.abilities_for(id).allows(abilities::DELETE_USERS));
        state.permissions.invalidate_all();
        assert!(state.abilities_for(id).allows(abilities::DELETE_USERS));
    }

    #[test]
    fn inactive_user_has_no_abilities() {
        let state = AppState::new();
        let id = add_user(&state, &["admin"]);
        state.users.update(&id, |u| u.is_active = false);
        assert!(!resolve_user(&state, id).allows(abilities::VIEW_USERS));
    }

    #[test]
    fn invalidate_user_only_drops_that_entry() {
        let cache = PermissionCache::new();
        cache.get_or_resolve(1, || ResolvedAbilities::All);
        cache.get_or_resolve(2, || ResolvedAbilities::All);
        cache.invalidate_user(1);
        assert_eq!(cache.len(), 1);
    }
}
