pub mod ai_blog;
pub mod auth;
pub mod posts;
pub mod research;
pub mod settings;
pub mod taxonomy;

use std::collections::BTreeMap;

use axum::{
    Json, Router,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::{Value, json};
use sqlx::{QueryBuilder, Sqlite};
use tower::Layer;
use tower_http::{
    cors::{Any, CorsLayer},
    normalize_path::{NormalizePath, NormalizePathLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use crate::state::AppState;

pub type ApiError = (StatusCode, Json<Value>);

pub fn internal_error<E: std::fmt::Display>(error: E) -> ApiError {
    tracing::error!("Internal error: {}", error);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"detail": error.to_string()})),
    )
}

pub fn not_found() -> ApiError {
    (StatusCode::NOT_FOUND, Json(json!({"detail": "Not found."})))
}

pub fn bad_request(detail: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({"detail": detail})))
}

pub fn forbidden(detail: &str) -> ApiError {
    (StatusCode::FORBIDDEN, Json(json!({"detail": detail})))
}

pub fn unauthorized(detail: &str) -> ApiError {
    (StatusCode::UNAUTHORIZED, Json(json!({"detail": detail})))
}

/// Per-field validation messages, rendered as a 400 `{field: [messages]}` body.
#[derive(Debug, Default)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.entry(field.to_string()).or_default().push(message.into());
    }

    pub fn require(&mut self, field: &str, value: Option<&str>) {
        match value {
            None => self.add(field, "This field is required."),
            Some(text) if text.trim().is_empty() => self.add(field, "This field may not be blank."),
            Some(_) => {}
        }
    }

    pub fn max_chars(&mut self, field: &str, value: Option<&str>, limit: usize) {
        if value.is_some_and(|text| text.chars().count() > limit) {
            self.add(field, format!("Ensure this field has no more than {} characters.", limit));
        }
    }

    pub fn has(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_result(self) -> Result<(), ApiError> {
        if self.0.is_empty() {
            return Ok(());
        }
        tracing::warn!("Validation failed: {:?}", self.0);
        Err((StatusCode::BAD_REQUEST, Json(json!(self.0))))
    }
}

/// Appends `AND (col LIKE ? OR ...)` for a trimmed search term, matching `%` and `_` literally.
pub fn push_search_any(query: &mut QueryBuilder<'_, Sqlite>, columns: &[&str], search: Option<&str>) {
    let Some(term) = search.map(str::trim).filter(|term| !term.is_empty()) else {
        return;
    };
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    let pattern = format!("%{}%", escaped);
    query.push(" AND (");
    for (index, column) in columns.iter().enumerate() {
        if index > 0 {
            query.push(" OR ");
        }
        query
            .push(*column)
            .push(" LIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\'");
    }
    query.push(")");
}

/// Every route of the service, trailing slashes optional.
pub fn app(state: AppState) -> NormalizePath<Router> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let media_root = state.config.media_root.clone();

    let router = Router::new()
        .nest("/api/auth", auth::auth_routes())
        .route("/api/auth-token", post(auth::obtain_token))
        .nest("/api/posts", posts::posts_routes())
        .nest("/api/categories", taxonomy::categories_routes())
        .nest("/api/tags", taxonomy::tags_routes())
        .nest("/api/site-settings", settings::site_settings_routes())
        .nest("/api/seo-settings", settings::seo_settings_routes())
        .nest("/api/ai-blog", ai_blog::ai_blog_routes())
        .nest("/api/research", research::research_routes())
        .route("/api/health", get(health_check))
        .route("/robots.txt", get(settings::robots_txt))
        .nest_service("/media", ServeDir::new(media_root))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    NormalizePathLayer::trim_trailing_slash().layer(router)
}

async fn health_check() -> impl IntoResponse {
    Json(json!({"status": "healthy"}))
}
