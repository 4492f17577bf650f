//! # OpenAPI Specification Assembly
//!
//! Assembles all utoipa-documented routes into a single OpenAPI 3.1 spec.
//! Serves at `/openapi.json`.

use axum::routing::get;
use axum::{Json, Router};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::state::AppState;

/// Adds the bearer session token scheme to the spec.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .description(Some(
                            "Opaque session token returned by POST /api/login.",
                        ))
                        .build(),
                ),
            );
        }
    }
}

/// Assembled OpenAPI spec for the mobile and admin API surfaces.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "NexusComply API",
        version = "0.3.0",
        description = "Compliance audit management for retail outlets.\n\nProvides:\n- **Mobile API** (`/api/*`) for outlet users: audits, form submission, evidence upload\n- **Admin API** (`/admin/*`) for managers: review queue, master data, users, roles and abilities\n- **Issues** and corrective actions raised against audits\n- **Activity log** with CSV and PDF export\n\nAuthentication: Bearer token via `Authorization: Bearer <token>` header, obtained from `POST /api/login`.\nHealth probes (`/health/*`) and `/metrics` are unauthenticated.",
        license(name = "MIT")
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development server"),
    ),
    security(
        ("bearer_auth" = [])
    ),
    paths(
        // ── Account ─────────────────────────────────────────────────────
        crate::routes::account::login,
        crate::routes::account::logout,
        crate::routes::account::me,
        crate::routes::account::forgot_password,
        crate::routes::account::reset_password,

        // ── Audits ──────────────────────────────────────────────────────
        crate::routes::audits::create_audit,
        crate::routes::audits::list_audits,
        crate::routes::audits::admin_list_audits,
        crate::routes::audits::get_audit,
        crate::routes::audits::list_audit_forms,
        crate::routes::audits::delete_audit,
        crate::routes::audits::submit_audit,
        crate::routes::audits::review_audit,

        // ── Audit forms ─────────────────────────────────────────────────
        crate::routes::audit_forms::submit_form,
        crate::routes::audit_forms::get_form,
        crate::routes::audit_forms::review_form,

        // ── Master data ─────────────────────────────────────────────────
        crate::routes::outlets::get_outlet,
        crate::routes::outlets::list_outlets,
        crate::routes::outlets::admin_get_outlet,
        crate::routes::outlets::create_outlet,
        crate::routes::outlets::update_outlet,
        crate::routes::outlets::delete_outlet,
        crate::routes::compliance::list_active,
        crate::routes::compliance::list_requirements,
        crate::routes::compliance::get_requirement,
        crate::routes::compliance::create_requirement,
        crate::routes::compliance::update_requirement,
        crate::routes::compliance::delete_requirement,
        crate::routes::form_templates::get_template,
        crate::routes::form_templates::list_templates,
        crate::routes::form_templates::admin_get_template,
        crate::routes::form_templates::create_template,
        crate::routes::form_templates::update_template,
        crate::routes::form_templates::delete_template,

        // ── Users, roles, abilities ─────────────────────────────────────
        crate::routes::users::list_users,
        crate::routes::users::get_user,
        crate::routes::users::create_user,
        crate::routes::users::update_user,
        crate::routes::users::delete_user,
        crate::routes::roles::list_roles,
        crate::routes::roles::get_role,
        crate::routes::roles::create_role,
        crate::routes::roles::update_role,
        crate::routes::roles::delete_role,
        crate::routes::roles::list_abilities,
        crate::routes::roles::create_ability,
        crate::routes::roles::delete_ability,

        // ── Issues & corrective actions ─────────────────────────────────
        crate::routes::issues::list_issues,
        crate::routes::issues::get_issue,
        crate::routes::issues::create_issue,
        crate::routes::issues::update_issue,
        crate::routes::issues::delete_issue,
        crate::routes::issues::create_action,
        crate::routes::issues::update_action,
        crate::routes::issues::delete_action,

        // ── Activity log ────────────────────────────────────────────────
        crate::routes::activity_logs::list_activity,
        crate::routes::activity_logs::export_csv,
        crate::routes::activity_logs::export_pdf,

        // ── Files ───────────────────────────────────────────────────────
        crate::routes::files::upload_file,
        crate::routes::files::download_file,
    ),
    components(
        schemas(
            // Shared
            crate::error::ErrorBody,
            crate::error::ErrorDetail,
            crate::routes::PaginationParams,
            // Records
            crate::state::UserRecord,
            crate::state::UserView,
            crate::state::RoleRecord,
            crate::state::AbilityRecord,
            crate::state::OutletRecord,
            crate::state::SubmissionType,
            crate::state::ComplianceRequirementRecord,
            crate::state::FormTemplateRecord,
            crate::state::AuditRecord,
            crate::state::AuditFormRecord,
            crate::state::IssueRecord,
            crate::state::CorrectiveActionRecord,
            crate::state::ActivityLogRecord,
            crate::orchestration::ReviewDecision,
            // Account
            crate::routes::account::LoginRequest,
            crate::routes::account::LoginResponse,
            crate::routes::account::ForgotPasswordRequest,
            crate::routes::account::ResetPasswordRequest,
            crate::routes::account::MessageResponse,
            // Audits
            crate::routes::audits::CreateAuditRequest,
            crate::routes::audits::ReviewAuditRequest,
            crate::routes::audits::AuditDetail,
            crate::routes::audit_forms::SubmitFormRequest,
            crate::routes::audit_forms::SubmitFormResponse,
            crate::routes::audit_forms::ReviewFormRequest,
            // Master data
            crate::routes::outlets::OutletRequest,
            crate::routes::compliance::ComplianceRequest,
            crate::routes::compliance::TemplateSummary,
            crate::routes::compliance::ComplianceWithTemplates,
            crate::routes::form_templates::CreateTemplateRequest,
            crate::routes::form_templates::UpdateTemplateRequest,
            crate::routes::form_templates::TemplateDetail,
            // Users & roles
            crate::routes::users::CreateUserRequest,
            crate::routes::users::UpdateUserRequest,
            crate::routes::roles::RoleRequest,
            crate::routes::roles::AbilityRequest,
            crate::routes::roles::RoleDetail,
            crate::routes::roles::AbilityDetail,
            // Issues
            crate::routes::issues::CreateIssueRequest,
            crate::routes::issues::UpdateIssueRequest,
            crate::routes::issues::CreateActionRequest,
            crate::routes::issues::UpdateActionRequest,
            crate::routes::issues::IssueDetail,
            // Files
            crate::routes::files::UploadRequest,
            crate::routes::files::UploadResponse,
        ),
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "account", description = "Login, logout, password reset and the current user"),
        (name = "audits", description = "Audit lifecycle: start, submit, review, delete"),
        (name = "audit-forms", description = "Form submission with progress tracking and per-form review"),
        (name = "outlets", description = "Retail outlets under audit"),
        (name = "compliance", description = "Compliance requirements and their attached templates"),
        (name = "form-templates", description = "Dynamic form templates"),
        (name = "users", description = "User account administration"),
        (name = "roles", description = "Roles and abilities"),
        (name = "issues", description = "Findings raised against audits and their corrective actions"),
        (name = "activity-logs", description = "Activity trail with CSV and PDF export"),
        (name = "files", description = "Audit evidence upload and download"),
    )
)]
pub struct ApiDoc;

/// Serves the OpenAPI JSON at `/openapi.json`.
pub fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(openapi_json))
}

/// GET /openapi.json: Return the generated OpenAPI specification.
async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_carries_title_and_version() {
        let spec = ApiDoc::openapi();
        assert_eq!(spec.info.title, "NexusComply API");
        assert_eq!(spec.info.version, "0.3.0");
    }

    #[test]
    fn spec_lists_mobile_and_admin_paths() {
        let spec = ApiDoc::openapi();
        for path in [
            "/api/login",
            "/api/audits",
            "/api/audits/{id}/submit",
            "/api/audit-forms",
            "/api/upload-file",
            "/admin/audits/{id}/review",
            "/admin/form-templates/{id}",
            "/admin/issues/{id}/corrective-actions",
            "/admin/activity-logs/export/pdf",
        ] {
            assert!(spec.paths.paths.contains_key(path), "missing {path}");
        }
    }

    #[test]
    fn every_operation_is_tagged() {
        let spec = ApiDoc::openapi();
        let json = serde_json::to_value(&spec).unwrap();
        let paths = json["paths"].as_object().unwrap();
        for (path, item) in paths {
            for (method, op) in item.as_object().unwrap() {
                if !["get", "post", "put", "patch", "delete"].contains(&method.as_str()) {
                    continue;
                }
                assert!(
                    op.get("tags").and_then(|t| t.as_array()).is_some_and(|t| !t.is_empty()),
                    "{method} {path} has no tag"
                );
            }
        }
    }

    #[test]
    fn spec_declares_bearer_scheme() {
        let json = serde_json::to_string(&ApiDoc::openapi()).unwrap();
        assert!(json.contains("bearer_auth"));
    }

    #[test]
    fn router_builds() {
        let _router = router();
    }
}
