//! OpenAPI documentation and schema generation
//!
//! This module defines the OpenAPI specification for the idm REST API
//! using utoipa for compile-time spec generation.

use utoipa::OpenApi;

/// OpenAPI documentation for the idm REST API
///
/// The document is served at:
/// - `/api/v1/openapi.json` - JSON format OpenAPI specification
/// - `/swagger-ui` - Interactive Swagger UI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "idm REST API",
        version = "0.1.0",
        description = "REST API for creating, listing, editing and reading back download tasks",
        license(
            name = "MIT OR Apache-2.0"
        )
    ),
    servers(
        (url = "http://localhost:6790", description = "Local development server")
    ),
    paths(
        // Download Tasks
        crate::api::routes::create_download_task,
        crate::api::routes::list_download_tasks,
        crate::api::routes::update_download_task,
        crate::api::routes::delete_download_task,
        crate::api::routes::get_download_task_file,

        // System
        crate::api::routes::health_check,
        crate::api::routes::openapi_spec,
        crate::api::routes::event_stream,
    ),
    components(schemas(
        // Core types from types.rs
        crate::types::TaskId,
        crate::types::AccountId,
        crate::types::TaskStatus,
        crate::types::DownloadType,
        crate::types::Account,
        crate::types::TaskInfo,
        crate::types::TaskList,
        crate::types::TaskUpdate,
        crate::types::Event,

        // API request types from routes
        crate::api::routes::CreateDownloadTaskRequest,
        crate::api::routes::ListDownloadTasksQuery,

        // Error types from error.rs
        crate::error::ApiError,
        crate::error::ErrorDetail,
    )),
    tags(
        (name = "download-tasks", description = "Download tasks - Create, list, edit, delete and read back the caller's tasks"),
        (name = "system", description = "System endpoints - Health checks, OpenAPI spec, events"),
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// Security addon describing the two ways a caller presents its token
struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        use utoipa::openapi::security::{ApiKey, ApiKeyValue, Http, HttpAuthScheme, SecurityScheme};

        if let Some(components) = &mut openapi.components {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            );
            components.add_security_scheme(
                "cookie",
                SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::new(
                    crate::api::auth::AUTH_COOKIE_NAME,
                ))),
            );
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_spec_has_task_paths() {
        let spec = ApiDoc::openapi();

        assert!(spec.paths.paths.contains_key("/api/v1/download-tasks"));
        assert!(spec.paths.paths.contains_key("/api/v1/download-tasks/{id}"));
        assert!(
            spec.paths
                .paths
                .contains_key("/api/v1/download-tasks/{id}/file")
        );
    }

    #[test]
    fn test_openapi_spec_has_schemas() {
        let spec = ApiDoc::openapi();
        let components = spec.components.unwrap();

        for name in ["TaskInfo", "TaskList", "TaskUpdate", "ApiError"] {
            assert!(
                components.schemas.contains_key(name),
                "missing schema {name}"
            );
        }
    }

    #[test]
    fn test_openapi_spec_has_tags() {
        let spec = ApiDoc::openapi();
        let tags = spec.tags.unwrap();
        let tag_names: Vec<&str> = tags.iter().map(|t| t.name.as_str()).collect();

        assert!(tag_names.contains(&"download-tasks"));
        assert!(tag_names.contains(&"system"));
    }

    #[test]
    fn test_openapi_spec_has_security_schemes() {
        let spec = ApiDoc::openapi();
        let components = spec.components.unwrap();

        assert!(components.security_schemes.contains_key("bearer"));
        assert!(components.security_schemes.contains_key("cookie"));
    }

    #[test]
    fn test_openapi_json_serialization() {
        let spec = ApiDoc::openapi();

        let json = serde_json::to_value(&spec).expect("Should serialize to JSON");
        let version = json.get("openapi").and_then(|v| v.as_str()).unwrap();
        assert!(version.starts_with("3."));
        assert_eq!(json["info"]["title"], "idm REST API");
    }
}
