//! # Application State
//!
//! Shared state for the Axum application, passed to all route handlers
//! via the `State` extractor.
//!
//! ## Architecture
//!
//! In-memory [`Store`]s are the runtime source of truth for every table.
//! When a database pool is configured, handlers write through to Postgres
//! after mutating the store, and [`AppState::hydrate_from_db`] loads all
//! rows back on startup.
//!
//! Record ids are `i64`, allocated by each store. Hydration advances the
//! allocator past the highest persisted id and past the `id_watermarks`
//! left by deleted rows, so an id is never reissued.

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use nexus_core::{
    DueDatePolicy, Frequency, IssueStatus, RecordStatus, ResolvedAbilities, Severity, WeekStart,
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use utoipa::ToSchema;
use zeroize::Zeroizing;

use crate::middleware::metrics::ApiMetrics;
use crate::permissions::PermissionCache;
use crate::storage::FileStorage;

// -- Generic In-Memory Store --------------------------------------------------

/// Thread-safe, cloneable in-memory table keyed by `i64` id.
///
/// All operations are synchronous (`parking_lot`, not `tokio::sync`) and no
/// lock is held across an `.await`. Iteration order is ascending id.
#[derive(Debug)]
pub struct Store<T: Clone + Send + Sync> {
    data: Arc<RwLock<BTreeMap<i64, T>>>,
    next_id: Arc<AtomicI64>,
}

impl<T: Clone + Send + Sync> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            next_id: Arc::clone(&self.next_id),
        }
    }
}

impl<T: Clone + Send + Sync> Store<T> {
    /// Create an empty store whose first allocated id is 1.
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(BTreeMap::new())),
            next_id: Arc::new(AtomicI64::new(1)),
        }
    }

    /// Insert a record under an explicit id, returning the previous value.
    ///
    /// Advances the id allocator past `id`.
    pub fn insert(&self, id: i64, value: T) -> Option<T> {
        self.next_id.fetch_max(id + 1, Ordering::SeqCst);
        self.data.write().insert(id, value)
    }

    /// Never allocate an id below `next_id`.
    pub fn reserve_below(&self, next_id: i64) {
        self.next_id.fetch_max(next_id, Ordering::SeqCst);
    }

    /// Allocate a fresh id, build the record with it, and insert it.
    pub fn insert_with(&self, build: impl FnOnce(i64) -> T) -> T {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let value = build(id);
        self.data.write().insert(id, value.clone());
        value
    }

    /// Retrieve a record by id.
    pub fn get(&self, id: &i64) -> Option<T> {
        self.data.read().get(id).cloned()
    }

    /// List all records in id order.
    pub fn list(&self) -> Vec<T> {
        self.data.read().values().cloned().collect()
    }

    /// Records matching `pred`, in id order.
    pub fn filter(&self, pred: impl Fn(&T) -> bool) -> Vec<T> {
        self.data.read().values().filter(|v| pred(v)).cloned().collect()
    }

    /// First record matching `pred`.
    pub fn find(&self, pred: impl Fn(&T) -> bool) -> Option<T> {
        self.data.read().values().find(|v| pred(v)).cloned()
    }

    /// Number of records matching `pred`.
    pub fn count(&self, pred: impl Fn(&T) -> bool) -> usize {
        self.data.read().values().filter(|v| pred(v)).count()
    }

    /// Update a record in place. Returns the updated record, or `None` if not found.
    pub fn update(&self, id: &i64, f: impl FnOnce(&mut T)) -> Option<T> {
        let mut guard = self.data.write();
        if let Some(entry) = guard.get_mut(id) {
            f(entry);
            Some(entry.clone())
        } else {
            None
        }
    }

    /// Atomically read-validate-update a record.
    ///
    /// The closure runs under a single write lock. Returns `None` if the
    /// record doesn't exist, or `Some(result)` with the closure's `Result`.
    pub fn try_update<R, E>(
        &self,
        id: &i64,
        f: impl FnOnce(&mut T) -> Result<R, E>,
    ) -> Option<Result<R, E>> {
        self.data.write().get_mut(id).map(f)
    }

    /// Apply `f` to every record matching `pred`, returning the updated records.
    pub fn update_where(&self, pred: impl Fn(&T) -> bool, f: impl Fn(&mut T)) -> Vec<T> {
        let mut guard = self.data.write();
        guard
            .values_mut()
            .filter(|v| pred(v))
            .map(|v| {
                f(v);
                v.clone()
            })
            .collect()
    }

    /// Remove a record by id.
    pub fn remove(&self, id: &i64) -> Option<T> {
        self.data.write().remove(id)
    }

    /// Remove every record matching `pred`, returning the removed records.
    pub fn remove_where(&self, pred: impl Fn(&T) -> bool) -> Vec<T> {
        let mut guard = self.data.write();
        let ids: Vec<i64> = guard
            .iter()
            .filter(|(_, v)| pred(v))
            .map(|(id, _)| *id)
            .collect();
        ids.iter().filter_map(|id| guard.remove(id)).collect()
    }

    /// Check if a record exists.
    pub fn contains(&self, id: &i64) -> bool {
        self.data.read().contains_key(id)
    }

    /// Return the number of records.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone + Send + Sync> Default for Store<T> {
    fn default() -> Self {
        Self::new()
    }
}

// -- Record Types ---------------------------------------------------------------

/// User account.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserRecord {
    pub id: i64,
    pub name: String,
    pub email: String,
    /// Encoded password hash; never serialized.
    #[serde(skip)]
    pub password_hash: String,
    pub role_ids: Vec<i64>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Named role granting a set of abilities.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RoleRecord {
    pub id: i64,
    pub name: String,
    pub title: String,
    /// Implies every ability, present or future.
    pub grants_all: bool,
    pub ability_ids: Vec<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Named ability a role may grant.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AbilityRecord {
    pub id: i64,
    pub name: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

/// Physical outlet (store, branch, kitchen) that gets audited.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OutletRecord {
    pub id: i64,
    pub name: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub phone_number: Option<String>,
    /// Free-form opening hours, e.g. `{"mon": "09:00-17:00"}`.
    pub operating_hours_info: serde_json::Value,
    pub is_active: bool,
    /// Outlet staff member who performs audits here.
    pub outlet_user_id: Option<i64>,
    pub manager_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// How a requirement is satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionType {
    /// Filling in the attached form templates.
    Form,
    /// Uploading documents.
    Upload,
    /// Both forms and documents.
    Both,
}

impl SubmissionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Form => "form",
            Self::Upload => "upload",
            Self::Both => "both",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "form" => Some(Self::Form),
            "upload" => Some(Self::Upload),
            "both" => Some(Self::Both),
            _ => None,
        }
    }
}

/// Recurring compliance obligation with its attached form templates.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ComplianceRequirementRecord {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    /// Recurrence label; `None` means the monthly default applies.
    #[schema(value_type = Option<String>, example = "Monthly")]
    pub frequency: Option<Frequency>,
    pub is_active: bool,
    pub submission_type: SubmissionType,
    pub document_upload_instructions: Option<String>,
    /// Form templates an audit of this requirement must complete.
    pub form_template_ids: Vec<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Dynamic form template; `structure` is validated by `nexus_core::FormStructure`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FormTemplateRecord {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub structure: serde_json::Value,
    #[schema(value_type = String, example = "draft")]
    pub status: RecordStatus,
    pub created_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One execution of a compliance requirement at an outlet.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuditRecord {
    pub id: i64,
    pub compliance_id: i64,
    pub outlet_id: i64,
    /// User who started the audit.
    pub user_id: i64,
    #[schema(value_type = String, example = "draft")]
    pub status: RecordStatus,
    pub start_time: NaiveDateTime,
    /// Set when the audit is approved.
    pub end_time: Option<NaiveDateTime>,
    pub due_date: NaiveDateTime,
    /// Percentage of required form templates with a submitted form.
    pub progress: f64,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Submitted values of one form template within an audit.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuditFormRecord {
    pub id: i64,
    pub audit_id: i64,
    pub form_id: i64,
    pub name: String,
    pub value: serde_json::Value,
    #[schema(value_type = String, example = "draft")]
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Finding raised during review of an audit.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IssueRecord {
    pub id: i64,
    pub audit_id: i64,
    pub description: String,
    #[schema(value_type = String, example = "high")]
    pub severity: Severity,
    pub due_date: Option<NaiveDate>,
    #[schema(value_type = String, example = "open")]
    pub status: IssueStatus,
    pub raised_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Work item resolving an issue.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CorrectiveActionRecord {
    pub id: i64,
    pub issue_id: i64,
    pub description: String,
    pub assigned_to: Option<i64>,
    pub completion_date: Option<NaiveDate>,
    pub verification_date: Option<NaiveDate>,
    #[schema(value_type = String, example = "in_progress")]
    pub status: IssueStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only record of a mutating operation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ActivityLogRecord {
    pub id: i64,
    /// Acting user; `None` for system actions.
    pub user_id: Option<i64>,
    pub action: String,
    pub target_type: String,
    pub target_id: Option<i64>,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Bearer session, keyed in [`AppState::sessions`] by the token's SHA-256 digest.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub user_id: i64,
    pub device_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
}

/// Outstanding password reset, keyed by the reset token's digest.
#[derive(Debug, Clone)]
pub struct PasswordResetRecord {
    pub user_id: i64,
    pub expires_at: DateTime<Utc>,
}

/// Public view of a user with resolved role names and abilities.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserView {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub is_active: bool,
    pub roles: Vec<String>,
    pub abilities: Vec<String>,
    pub created_at: DateTime<Utc>,
}

// -- Application State --------------------------------------------------------

/// Application configuration.
///
/// Custom `Debug` redacts the seeded admin password.
#[derive(Clone)]
pub struct AppConfig {
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// Directory under which uploaded files are stored.
    pub storage_root: PathBuf,
    /// First day of the week for weekly due dates.
    pub week_start: WeekStart,
    /// Lifetime of password reset tokens.
    pub reset_token_ttl_minutes: i64,
    /// Iteration count for new password hashes.
    pub password_iterations: u32,
    /// Seeded administrator account, created on first start when both are set.
    pub admin_email: Option<String>,
    pub admin_password: Option<Zeroizing<String>>,
    /// Whether the Prometheus middleware and `/metrics` are mounted.
    pub metrics_enabled: bool,
    /// Reverse proxies whose `X-Forwarded-For` header keys rate limits.
    pub trusted_proxies: Vec<IpAddr>,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("port", &self.port)
            .field("storage_root", &self.storage_root)
            .field("week_start", &self.week_start)
            .field("reset_token_ttl_minutes", &self.reset_token_ttl_minutes)
            .field("password_iterations", &self.password_iterations)
            .field("admin_email", &self.admin_email)
            .field(
                "admin_password",
                &self.admin_password.as_ref().map(|_| "[REDACTED]"),
            )
            .field("metrics_enabled", &self.metrics_enabled)
            .field("trusted_proxies", &self.trusted_proxies)
            .finish()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            storage_root: PathBuf::from("./storage"),
            week_start: WeekStart::Monday,
            reset_token_ttl_minutes: 60,
            password_iterations: crate::auth::DEFAULT_PASSWORD_ITERATIONS,
            admin_email: None,
            admin_password: None,
            metrics_enabled: true,
            trusted_proxies: Vec::new(),
        }
    }
}

/// Shared application state accessible to all route handlers.
///
/// Clone-friendly via `Arc` internals in each field.
#[derive(Debug, Clone)]
pub struct AppState {
    // -- Accounts & authorization --
    pub users: Store<UserRecord>,
    pub roles: Store<RoleRecord>,
    pub abilities: Store<AbilityRecord>,
    /// Live sessions keyed by token digest.
    pub sessions: Arc<RwLock<HashMap<String, SessionRecord>>>,
    /// Pending password resets keyed by token digest. Not persisted.
    pub password_resets: Arc<RwLock<HashMap<String, PasswordResetRecord>>>,
    /// Resolved abilities per user; invalidated after role or assignment changes.
    pub permissions: PermissionCache,

    // -- Compliance domain --
    pub outlets: Store<OutletRecord>,
    pub compliance_requirements: Store<ComplianceRequirementRecord>,
    pub form_templates: Store<FormTemplateRecord>,
    pub audits: Store<AuditRecord>,
    pub audit_forms: Store<AuditFormRecord>,
    pub issues: Store<IssueRecord>,
    pub corrective_actions: Store<CorrectiveActionRecord>,
    pub activity_logs: Store<ActivityLogRecord>,

    /// Serializes audit-form upserts together with the progress recompute.
    pub submissions: Arc<Mutex<()>>,
    /// Serializes audit and audit-form write-through. Held across the
    /// database call, hence `tokio::sync`.
    pub audit_writes: Arc<tokio::sync::Mutex<()>>,

    pub storage: FileStorage,
    pub metrics: ApiMetrics,

    // -- Database persistence (optional) --
    /// When `Some`, mutations are written through to Postgres.
    pub db_pool: Option<PgPool>,

    pub config: AppConfig,
}

impl AppState {
    /// In-memory state with default configuration, default roles and abilities.
    pub fn new() -> Self {
        Self::seeded(AppConfig::default())
    }

    /// In-memory state with the given configuration, seeded with default roles,
    /// abilities and the configured admin account.
    pub fn seeded(config: AppConfig) -> Self {
        let state = Self::with_config(config, None);
        crate::bootstrap::seed_defaults(&state);
        state
    }

    /// Empty state with the given configuration and optional database pool.
    pub fn with_config(config: AppConfig, db_pool: Option<PgPool>) -> Self {
        Self {
            users: Store::new(),
            roles: Store::new(),
            abilities: Store::new(),
            sessions: Arc::new(RwLock::new(HashMap::new())),
            password_resets: Arc::new(RwLock::new(HashMap::new())),
            permissions: PermissionCache::new(),
            outlets: Store::new(),
            compliance_requirements: Store::new(),
            form_templates: Store::new(),
            audits: Store::new(),
            audit_forms: Store::new(),
            issues: Store::new(),
            corrective_actions: Store::new(),
            activity_logs: Store::new(),
            submissions: Arc::new(Mutex::new(())),
            audit_writes: Arc::new(tokio::sync::Mutex::new(())),
            storage: FileStorage::new(config.storage_root.clone()),
            metrics: ApiMetrics::new(),
            db_pool,
            config,
        }
    }

    /// Due-date policy honouring the configured week start.
    pub fn due_date_policy(&self) -> DueDatePolicy {
        DueDatePolicy::new(self.config.week_start)
    }

    /// Effective abilities of `user_id`, memoized in [`AppState::permissions`].
    pub fn abilities_for(&self, user_id: i64) -> ResolvedAbilities {
        self.permissions
            .get_or_resolve(user_id, || crate::permissions::resolve_user(self, user_id))
    }

    /// Public view of a user.
    pub fn user_view(&self, user: &UserRecord) -> UserView {
        let roles = user
            .role_ids
            .iter()
            .filter_map(|id| self.roles.get(id))
            .map(|r| r.name)
            .collect();
        UserView {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            is_active: user.is_active,
            roles,
            abilities: self.abilities_for(user.id).names(),
            created_at: user.created_at,
        }
    }

    /// Hydrate in-memory stores from the database.
    ///
    /// Called once on startup when a database pool is available.
    pub async fn hydrate_from_db(&self) -> Result<(), String> {
        let pool = match &self.db_pool {
            Some(pool) => pool,
            None => return Ok(()),
        };

        let abilities = crate::db::roles::load_abilities(pool)
            .await
            .map_err(|e| format!("failed to load abilities: {e}"))?;
        for record in abilities {
            self.abilities.insert(record.id, record);
        }

        let roles = crate::db::roles::load_roles(pool)
            .await
            .map_err(|e| format!("failed to load roles: {e}"))?;
        for record in roles {
            self.roles.insert(record.id, record);
        }

        let users = crate::db::users::load_all(pool)
            .await
            .map_err(|e| format!("failed to load users: {e}"))?;
        let user_count = users.len();
        for record in users {
            self.users.insert(record.id, record);
        }

        let sessions = crate::db::sessions::load_all(pool)
            .await
            .map_err(|e| format!("failed to load sessions: {e}"))?;
        {
            let mut guard = self.sessions.write();
            for (digest, session) in sessions {
                guard.insert(digest, session);
            }
        }

        for record in crate::db::outlets::load_all(pool)
            .await
            .map_err(|e| format!("failed to load outlets: {e}"))?
        {
            self.outlets.insert(record.id, record);
        }

        for record in crate::db::form_templates::load_all(pool)
            .await
            .map_err(|e| format!("failed to load form templates: {e}"))?
        {
            self.form_templates.insert(record.id, record);
        }

        for record in crate::db::compliance::load_all(pool)
            .await
            .map_err(|e| format!("failed to load compliance requirements: {e}"))?
        {
            self.compliance_requirements.insert(record.id, record);
        }

        let audits = crate::db::audits::load_all(pool)
            .await
            .map_err(|e| format!("failed to load audits: {e}"))?;
        let audit_count = audits.len();
        for record in audits {
            self.audits.insert(record.id, record);
        }

        for record in crate::db::audit_forms::load_all(pool)
            .await
            .map_err(|e| format!("failed to load audit forms: {e}"))?
        {
            self.audit_forms.insert(record.id, record);
        }

        for record in crate::db::issues::load_issues(pool)
            .await
            .map_err(|e| format!("failed to load issues: {e}"))?
        {
            self.issues.insert(record.id, record);
        }

        for record in crate::db::issues::load_corrective_actions(pool)
            .await
            .map_err(|e| format!("failed to load corrective actions: {e}"))?
        {
            self.corrective_actions.insert(record.id, record);
        }

        for record in crate::db::activity_logs::load_all(pool)
            .await
            .map_err(|e| format!("failed to load activity logs: {e}"))?
        {
            self.activity_logs.insert(record.id, record);
        }

        let watermarks = crate::db::watermarks::load_all(pool)
            .await
            .map_err(|e| format!("failed to load id watermarks: {e}"))?;
        self.apply_id_watermarks(&watermarks);

        self.permissions.invalidate_all();

        tracing::info!(
            users = user_count,
            outlets = self.outlets.len(),
            compliance_requirements = self.compliance_requirements.len(),
            form_templates = self.form_templates.len(),
            audits = audit_count,
            audit_forms = self.audit_forms.len(),
            "Hydrated in-memory stores from database"
        );

        Ok(())
    }
}

impl AppState {
    /// Advance each table's id allocator to its recorded high-water mark.
    pub fn apply_id_watermarks(&self, watermarks: &[(String, i64)]) {
        for (table, next_id) in watermarks {
            let next_id = *next_id;
            match table.as_str() {
                "abilities" => self.abilities.reserve_below(next_id),
                "roles" => self.roles.reserve_below(next_id),
                "users" => self.users.reserve_below(next_id),
                "outlets" => self.outlets.reserve_below(next_id),
                "form_templates" => self.form_templates.reserve_below(next_id),
                "compliance_requirements" => self.compliance_requirements.reserve_below(next_id),
                "audits" => self.audits.reserve_below(next_id),
                "audit_forms" => self.audit_forms.reserve_below(next_id),
                "issues" => self.issues.reserve_below(next_id),
                "corrective_actions" => self.corrective_actions.reserve_below(next_id),
                "activity_logs" => self.activity_logs.reserve_below(next_id),
                other => tracing::warn!(table = other, "id watermark for unknown table"),
            }
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_outlet(id: i64) -> OutletRecord {
        let now = Utc::now();
        OutletRecord {
            id,
            name: format!("Outlet {id}"),
            address: "1 Harbour Road".to_string(),
            city: "Penang".to_string(),
            state: "PG".to_string(),
            postal_code: "10200".to_string(),
            phone_number: None,
            operating_hours_info: serde_json::json!({}),
            is_active: true,
            outlet_user_id: None,
            manager_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    // -- Store tests ----------------------------------------------------------

    #[test]
    fn store_new_creates_empty_store() {
        let store: Store<OutletRecord> = Store::new();
        assert!(store.is_empty());
        assert!(store.list().is_empty());
    }

    #[test]
    fn watermark_keeps_deleted_ids_retired_after_reload() {
        // Rows 1 and 2 survived; row 3 was deleted before the restart.
        let state = AppState::with_config(AppConfig::default(), None);
        state.outlets.insert(1, sample_outlet(1));
        state.outlets.insert(2, sample_outlet(2));
        state.apply_id_watermarks(&[("outlets".to_string(), 4), ("audits".to_string(), 2)]);

        let next = state.outlets.insert_with(sample_outlet);
        assert_eq!(next.id, 4);
        // A lower mark never moves an allocator backwards.
        state.outlets.reserve_below(1);
        assert_eq!(state.outlets.insert_with(sample_outlet).id, 5);
    }

    #[test]
    fn insert_with_allocates_sequential_ids() {
        let store = Store::new();
        let a = store.insert_with(sample_outlet);
        let b = store.insert_with(sample_outlet);
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(store.get(&2).unwrap().name, "Outlet 2");
    }

    #[test]
    fn explicit_insert_advances_allocator() {
        let store = Store::new();
        store.insert(41, sample_outlet(41));
        let next = store.insert_with(sample_outlet);
        assert_eq!(next.id, 42);
    }

    #[test]
    fn list_is_ordered_by_id() {
        let store = Store::new();
        store.insert(3, sample_outlet(3));
        store.insert(1, sample_outlet(1));
        store.insert(2, sample_outlet(2));
        let ids: Vec<i64> = store.list().iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn update_modifies_existing_and_ignores_missing() {
        let store = Store::new();
        store.insert(1, sample_outlet(1));
        let updated = store.update(&1, |o| o.is_active = false).unwrap();
        assert!(!updated.is_active);
        assert!(!store.get(&1).unwrap().is_active);
        assert!(store.update(&9, |o| o.is_active = false).is_none());
    }

    #[test]
    fn try_update_propagates_closure_error() {
        let store = Store::new();
        store.insert(1, sample_outlet(1));
        let result: Option<Result<(), &str>> = store.try_update(&1, |_| Err("locked"));
        assert_eq!(result, Some(Err("locked")));
    }

    #[test]
    fn remove_where_returns_removed() {
        let store = Store::new();
        for id in 1..=4 {
            store.insert(id, sample_outlet(id));
        }
        let removed = store.remove_where(|o| o.id % 2 == 0);
        assert_eq!(removed.len(), 2);
        assert_eq!(store.len(), 2);
        assert!(!store.contains(&2));
    }

    #[test]
    fn find_count_and_filter() {
        let store = Store::new();
        for id in 1..=3 {
            store.insert(id, sample_outlet(id));
        }
        assert_eq!(store.count(|o| o.id > 1), 2);
        assert_eq!(store.find(|o| o.name == "Outlet 3").unwrap().id, 3);
        assert_eq!(store.filter(|o| o.id < 3).len(), 2);
    }

    #[test]
    fn store_clone_shares_underlying_data() {
        let store = Store::new();
        store.insert(1, sample_outlet(1));
        let clone = store.clone();
        clone.insert_with(sample_outlet);
        assert_eq!(store.len(), 2);
    }

    // -- AppState tests -------------------------------------------------------

    #[test]
    fn new_state_is_seeded_with_default_roles() {
        let state = AppState::new();
        assert_eq!(state.roles.len(), nexus_core::access::DEFAULT_ROLES.len());
        assert_eq!(
            state.abilities.len(),
            nexus_core::access::abilities::ALL.len()
        );
        assert!(state.users.is_empty());
        assert!(state.db_pool.is_none());
    }

    #[test]
    fn config_debug_redacts_admin_password() {
        let config = AppConfig {
            admin_email: Some("admin@nexus.test".into()),
            admin_password: Some(Zeroizing::new("s3cret-pass".into())),
            ..AppConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("s3cret-pass"));
    }

    #[test]
    fn due_date_policy_uses_configured_week_start() {
        let state = AppState::with_config(
            AppConfig {
                week_start: WeekStart::Sunday,
                ..AppConfig::default()
            },
            None,
        );
        assert_eq!(state.due_date_policy().week_start, WeekStart::Sunday);
    }

    #[test]
    fn submission_type_names() {
        for t in [SubmissionType::Form, SubmissionType::Upload, SubmissionType::Both] {
            assert_eq!(SubmissionType::from_name(t.as_str()), Some(t));
        }
        assert!(SubmissionType::from_name("fax").is_none());
    }
}
