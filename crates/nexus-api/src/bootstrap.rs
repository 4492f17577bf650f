//! # Startup Bootstrap
//!
//! Brings an [`AppState`] to a servable condition.
//!
//! ## Bootstrap Sequence
//!
//! 1. **Prepare storage**: create `<storage_root>/audit_files`.
//! 2. **Hydrate**: load every table when a database pool is configured.
//! 3. **Seed**: create any missing built-in ability and role, and the
//!    administrator account when `ADMIN_EMAIL`/`ADMIN_PASSWORD` are set and
//!    no account with that email exists yet.
//! 4. **Persist seed**: write the newly created records through.
//!
//! Seeding is idempotent; existing records are never modified, so renamed
//! titles or edited role abilities survive restarts.

use chrono::Utc;
use nexus_core::access::{abilities, ADMIN_ROLE, DEFAULT_ROLES};
use sqlx::PgPool;

use crate::state::{AbilityRecord, AppConfig, AppState, RoleRecord, UserRecord};
use crate::storage::AUDIT_FILES_DIR;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors during startup bootstrap.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    /// Stored rows could not be loaded.
    #[error("database hydration failed: {0}")]
    Hydration(String),

    /// The storage directory could not be created.
    #[error("storage directory unavailable: {0}")]
    Io(#[from] std::io::Error),
}

/// Records created by [`seed_defaults`].
#[derive(Debug, Default)]
pub struct SeedReport {
    pub abilities: Vec<AbilityRecord>,
    pub roles: Vec<RoleRecord>,
    pub admin: Option<UserRecord>,
}

impl SeedReport {
    pub fn is_empty(&self) -> bool {
        self.abilities.is_empty() && self.roles.is_empty() && self.admin.is_none()
    }
}

/// Create missing built-in abilities, roles and the configured admin account.
pub fn seed_defaults(state: &AppState) -> SeedReport {
    let now = Utc::now();
    let mut report = SeedReport::default();

    for (name, title) in abilities::ALL {
        if state.abilities.find(|a| a.name == *name).is_some() {
            continue;
        }
        let record = state.abilities.insert_with(|id| AbilityRecord {
            id,
            name: name.to_string(),
            title: title.to_string(),
            created_at: now,
        });
        report.abilities.push(record);
    }

    for seed in DEFAULT_ROLES {
        if state.roles.find(|r| r.name == seed.name).is_some() {
            continue;
        }
        let ability_ids = seed
            .abilities
            .iter()
            .filter_map(|name| state.abilities.find(|a| a.name == *name))
            .map(|a| a.id)
            .collect();
        let record = state.roles.insert_with(|id| RoleRecord {
            id,
            name: seed.name.to_string(),
            title: seed.title.to_string(),
            grants_all: seed.grants_all,
            ability_ids,
            created_at: now,
            updated_at: now,
        });
        report.roles.push(record);
    }

    report.admin = seed_admin(state, &state.config);
    if !report.is_empty() {
        state.permissions.invalidate_all();
    }
    report
}

fn seed_admin(state: &AppState, config: &AppConfig) -> Option<UserRecord> {
    let (Some(email), Some(password)) = (&config.admin_email, &config.admin_password) else {
        return None;
    };
    if state
        .users
        .find(|u| u.email.eq_ignore_ascii_case(email))
        .is_some()
    {
        return None;
    }
    let admin_role = state.roles.find(|r| r.name == ADMIN_ROLE)?;
    let now = Utc::now();
    let user = state.users.insert_with(|id| UserRecord {
        id,
        name: "Administrator".to_string(),
        email: email.clone(),
        password_hash: crate::auth::hash_password(password, config.password_iterations),
        role_ids: vec![admin_role.id],
        is_active: true,
        created_at: now,
        updated_at: now,
    });
    tracing::info!(user_id = user.id, email = %user.email, "Seeded administrator account");
    Some(user)
}

/// Write the records of a [`SeedReport`] through to the database.
pub async fn persist_seed(pool: Option<&PgPool>, report: &SeedReport) {
    for ability in &report.abilities {
        crate::db::write_through(pool, "ability", ability.id, |pool| {
            crate::db::roles::upsert_ability(pool, ability)
        })
        .await;
    }
    for role in &report.roles {
        crate::db::write_through(pool, "role", role.id, |pool| {
            crate::db::roles::upsert_role(pool, role)
        })
        .await;
    }
    if let Some(admin) = &report.admin {
        crate::db::write_through(pool, "user", admin.id, |pool| {
            crate::db::users::upsert(pool, admin)
        })
        .await;
    }
}

/// Build the application state: prepare storage, hydrate, seed.
pub async fn bootstrap(
    config: AppConfig,
    db_pool: Option<PgPool>,
) -> Result<AppState, BootstrapError> {
    tokio::fs::create_dir_all(config.storage_root.join(AUDIT_FILES_DIR)).await?;

    let state = AppState::with_config(config, db_pool);
    state
        .hydrate_from_db()
        .await
        .map_err(BootstrapError::Hydration)?;

    let report = seed_defaults(&state);
    persist_seed(state.db_pool.as_ref(), &report).await;

    tracing::info!(
        storage_root = %state.config.storage_root.display(),
        week_start = state.config.week_start.as_str(),
        persistent = state.db_pool.is_some(),
        seeded_abilities = report.abilities.len(),
        seeded_roles = report.roles.len(),
        seeded_admin = report.admin.is_some(),
        "NexusComply bootstrap complete"
    );

    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use zeroize::Zeroizing;

    fn admin_config() -> AppConfig {
        AppConfig {
            admin_email: Some("admin@nexus.test".into()),
            admin_password: Some(Zeroizing::new("admin-pass".into())),
            password_iterations: 5,
            ..AppConfig::default()
        }
    }

    #[test]
    fn seeding_is_idempotent() {
        let state = AppState::with_config(AppConfig::default(), None);
        let first = seed_defaults(&state);
        assert_eq!(first.abilities.len(), abilities::ALL.len());
        assert_eq!(first.roles.len(), DEFAULT_ROLES.len());
        assert!(first.admin.is_none());

        let second = seed_defaults(&state);
        assert!(second.is_empty());
        assert_eq!(state.roles.len(), DEFAULT_ROLES.len());
    }

    #[test]
    fn admin_role_grants_everything() {
        let state = AppState::seeded(admin_config());
        let admin = state
            .users
            .find(|u| u.email == "admin@nexus.test")
            .expect("admin seeded");
        let resolved = state.abilities_for(admin.id);
        assert!(resolved.is_unrestricted());
        assert!(crate::auth::verify_password("admin-pass", &admin.password_hash));
    }

    #[test]
    fn manager_role_links_seeded_abilities() {
        let state = AppState::new();
        let manager = state
            .roles
            .find(|r| r.name == nexus_core::access::MANAGER_ROLE)
            .unwrap();
        let names: Vec<String> = manager
            .ability_ids
            .iter()
            .filter_map(|id| state.abilities.get(id))
            .map(|a| a.name)
            .collect();
        assert!(names.contains(&abilities::REVIEW_AUDITS.to_string()));
        assert!(!names.contains(&abilities::MANAGE_ROLES.to_string()));
    }

    #[test]
    fn existing_admin_email_is_not_reseeded() {
        let state = AppState::seeded(admin_config());
        let report = seed_defaults(&state);
        assert!(report.admin.is_none());
        assert_eq!(state.users.len(), 1);
    }

    #[tokio::test]
    async fn bootstrap_creates_storage_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            storage_root: dir.path().join("store"),
            ..admin_config()
        };
        let state = bootstrap(config, None).await.unwrap();
        assert!(dir.path().join("store").join(AUDIT_FILES_DIR).is_dir());
        assert_eq!(state.users.len(), 1);
    }
}
