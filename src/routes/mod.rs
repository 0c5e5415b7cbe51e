use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, patch, post},
    Router,
};
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use crate::state::AppState;

pub mod developments;
pub mod health;
pub mod issues;
pub mod polling;
pub mod projects;
pub mod requirements;
pub mod sources;

const MAX_UPLOAD_BYTES: usize = 1024 * 1024 * 50;

pub fn create_router(state: AppState) -> Router<()> {
    let cors = cors_layer(state.config.cors_allowed_origin.as_deref());

    let project_routes = Router::new()
        .route(
            "/",
            get(projects::list_projects).post(projects::create_project),
        )
        .route(
            "/:id",
            get(projects::get_project)
                .patch(projects::update_project)
                .delete(projects::delete_project),
        );

    let source_routes = Router::new()
        .route("/", get(sources::list_sources))
        .route("/upload", post(sources::upload_source))
        .route("/manual", post(sources::create_manual_source))
        .route("/chatwork", post(sources::connect_chatwork_room))
        .route("/chatwork/status", get(sources::chatwork_status))
        .route("/chatwork/rooms", get(sources::list_chatwork_rooms))
        .route(
            "/:id",
            get(sources::get_source).delete(sources::delete_source),
        )
        .route("/:id/messages", get(sources::list_source_messages))
        .route("/:id/content", get(sources::get_source_content));

    let issue_routes = Router::new()
        .route("/", get(issues::list_issues))
        .route("/extract", post(issues::extract_issues))
        .route(
            "/:id",
            get(issues::get_issue).delete(issues::delete_issue),
        )
        .route("/:id/status", patch(issues::update_issue_status))
        .route("/:id/select", post(issues::select_issue));

    let requirement_routes = Router::new()
        .route("/", get(requirements::list_requirements))
        .route("/generate", post(requirements::generate_requirement))
        .route(
            "/:id",
            get(requirements::get_requirement)
                .patch(requirements::update_requirement)
                .delete(requirements::delete_requirement),
        )
        .route("/:id/approve", post(requirements::approve_requirement))
        .route("/:id/github-issue", post(requirements::create_github_issue));

    let development_routes = Router::new()
        .route("/", get(developments::list_developments))
        .route("/start", post(developments::start_development))
        .route("/github/status", get(developments::github_status))
        .route("/:id", get(developments::get_development))
        .route("/:id/logs", get(developments::get_development_logs))
        .route("/:id/pull-request", post(developments::create_pull_request));

    let polling_routes = Router::new()
        .route("/status", get(polling::polling_status))
        .route("/start", post(polling::start_polling))
        .route("/stop", post(polling::stop_polling))
        .route("/config", post(polling::configure_polling))
        .route("/sync", post(polling::sync_now))
        .route("/sync-status", get(polling::list_sync_status))
        .route("/sync-status/:source_id", get(polling::get_sync_status));

    Router::new()
        .route("/", get(health::banner))
        .route("/health", get(health::health_check))
        .route("/api/health", get(health::health_check))
        .nest("/api/projects", project_routes)
        .nest("/api/sources", source_routes)
        .nest("/api/issues", issue_routes)
        .nest("/api/requirements", requirement_routes)
        .nest("/api/developments", development_routes)
        .nest("/api/polling", polling_routes)
        .with_state(state)
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(allowed: Option<&str>) -> CorsLayer {
    let allow_origin = match allowed {
        Some(origins) => {
            let headers: Vec<HeaderValue> = origins
                .split(',')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .filter_map(|value| match value.parse::<HeaderValue>() {
                    Ok(header) => Some(header),
                    Err(_) => {
                        warn!(origin = value, "ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            AllowOrigin::list(headers)
        }
        None => AllowOrigin::mirror_request(),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}
