use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, header::CONTENT_TYPE},
    response::IntoResponse,
    routing::get,
};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use super::auth::extract_staff_user;
use super::{ApiError, FieldErrors, internal_error};
use crate::models::{
    DEFAULT_META_DESCRIPTION, DEFAULT_ROBOTS_TXT, DEFAULT_SITE_NAME, SeoSettings, SeoSettingsPatch,
    SiteSettings, SiteSettingsPatch,
};
use crate::state::AppState;

pub fn site_settings_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_site_settings))
        .route("/current", get(current_site_settings))
        .route(
            "/update_settings",
            axum::routing::post(update_site_settings).put(update_site_settings),
        )
}

pub fn seo_settings_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_seo_settings))
        .route("/current", get(current_seo_settings))
        .route(
            "/update_settings",
            axum::routing::post(update_seo_settings).put(update_seo_settings),
        )
}

/// The single site settings row, created with defaults when absent.
pub async fn ensure_site_settings(pool: &SqlitePool) -> Result<SiteSettings, sqlx::Error> {
    if let Some(settings) = sqlx::query_as::<_, SiteSettings>("SELECT * FROM site_settings ORDER BY id LIMIT 1")
        .fetch_optional(pool)
        .await?
    {
        return Ok(settings);
    }
    sqlx::query("INSERT INTO site_settings (site_name) VALUES (?)")
        .bind(DEFAULT_SITE_NAME)
        .execute(pool)
        .await?;
    tracing::info!("Created default site settings");
    sqlx::query_as::<_, SiteSettings>("SELECT * FROM site_settings ORDER BY id LIMIT 1")
        .fetch_one(pool)
        .await
}

pub async fn ensure_seo_settings(pool: &SqlitePool) -> Result<SeoSettings, sqlx::Error> {
    if let Some(settings) = sqlx::query_as::<_, SeoSettings>("SELECT * FROM seo_settings ORDER BY id LIMIT 1")
        .fetch_optional(pool)
        .await?
    {
        return Ok(settings);
    }
    sqlx::query(
        "INSERT INTO seo_settings (default_meta_title, default_meta_description, robots_txt) VALUES (?, ?, ?)",
    )
    .bind(DEFAULT_SITE_NAME)
    .bind(DEFAULT_META_DESCRIPTION)
    .bind(DEFAULT_ROBOTS_TXT)
    .execute(pool)
    .await?;
    tracing::info!("Created default SEO settings");
    sqlx::query_as::<_, SeoSettings>("SELECT * FROM seo_settings ORDER BY id LIMIT 1")
        .fetch_one(pool)
        .await
}

fn set_text<'a>(
    fields: &mut sqlx::query_builder::Separated<'_, 'a, Sqlite, &'static str>,
    column: &str,
    value: &'a Option<String>,
) {
    if let Some(value) = value {
        fields.push(format!("{} = ", column));
        fields.push_bind_unseparated(value);
    }
}

async fn list_site_settings(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let settings = sqlx::query_as::<_, SiteSettings>("SELECT * FROM site_settings ORDER BY id LIMIT 1")
        .fetch_all(&state.pool)
        .await
        .map_err(internal_error)?;
    Ok(Json(settings))
}

async fn current_site_settings(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(ensure_site_settings(&state.pool).await.map_err(internal_error)?))
}

async fn update_site_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(patch): Json<SiteSettingsPatch>,
) -> Result<impl IntoResponse, ApiError> {
    let user = extract_staff_user(&state, &headers).await?;
    let current = ensure_site_settings(&state.pool).await.map_err(internal_error)?;

    let mut errors = FieldErrors::new();
    if patch.site_name.is_some() {
        errors.require("site_name", patch.site_name.as_deref());
    }
    errors.into_result()?;

    let mut query = QueryBuilder::<Sqlite>::new("UPDATE site_settings SET ");
    let mut fields = query.separated(", ");
    set_text(&mut fields, "site_name", &patch.site_name);
    set_text(&mut fields, "site_description", &patch.site_description);
    set_text(&mut fields, "logo", &patch.logo);
    set_text(&mut fields, "favicon", &patch.favicon);
    set_text(&mut fields, "email", &patch.email);
    set_text(&mut fields, "phone", &patch.phone);
    set_text(&mut fields, "address", &patch.address);
    set_text(&mut fields, "facebook", &patch.facebook);
    set_text(&mut fields, "twitter", &patch.twitter);
    set_text(&mut fields, "instagram", &patch.instagram);
    set_text(&mut fields, "linkedin", &patch.linkedin);
    set_text(&mut fields, "footer_text", &patch.footer_text);
    set_text(&mut fields, "copyright_text", &patch.copyright_text);
    fields.push("id = id");
    query.push(" WHERE id = ").push_bind(current.id);
    query.build().execute(&state.pool).await.map_err(internal_error)?;

    tracing::info!("Site settings updated by {}", user.username);
    Ok(Json(ensure_site_settings(&state.pool).await.map_err(internal_error)?))
}

async fn list_seo_settings(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let settings = sqlx::query_as::<_, SeoSettings>("SELECT * FROM seo_settings ORDER BY id LIMIT 1")
        .fetch_all(&state.pool)
        .await
        .map_err(internal_error)?;
    Ok(Json(settings))
}

async fn current_seo_settings(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(ensure_seo_settings(&state.pool).await.map_err(internal_error)?))
}

async fn update_seo_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(patch): Json<SeoSettingsPatch>,
) -> Result<impl IntoResponse, ApiError> {
    let user = extract_staff_user(&state, &headers).await?;
    let current = ensure_seo_settings(&state.pool).await.map_err(internal_error)?;

    let mut errors = FieldErrors::new();
    if patch.default_meta_title.is_some() {
        errors.require("default_meta_title", patch.default_meta_title.as_deref());
    }
    if patch.default_meta_description.is_some() {
        errors.require("default_meta_description", patch.default_meta_description.as_deref());
    }
    errors.into_result()?;

    let mut query = QueryBuilder::<Sqlite>::new("UPDATE seo_settings SET ");
    let mut fields = query.separated(", ");
    set_text(&mut fields, "default_meta_title", &patch.default_meta_title);
    set_text(&mut fields, "default_meta_description", &patch.default_meta_description);
    set_text(&mut fields, "default_meta_keywords", &patch.default_meta_keywords);
    set_text(&mut fields, "og_image", &patch.og_image);
    set_text(&mut fields, "google_analytics_id", &patch.google_analytics_id);
    set_text(&mut fields, "google_tag_manager_id", &patch.google_tag_manager_id);
    set_text(&mut fields, "google_site_verification", &patch.google_site_verification);
    set_text(&mut fields, "bing_site_verification", &patch.bing_site_verification);
    set_text(&mut fields, "robots_txt", &patch.robots_txt);
    if let Some(enabled) = patch.enable_structured_data {
        fields.push("enable_structured_data = ");
        fields.push_bind_unseparated(enabled);
    }
    fields.push("id = id");
    query.push(" WHERE id = ").push_bind(current.id);
    query.build().execute(&state.pool).await.map_err(internal_error)?;

    tracing::info!("SEO settings updated by {}", user.username);
    Ok(Json(ensure_seo_settings(&state.pool).await.map_err(internal_error)?))
}

pub async fn robots_txt(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let row: Option<(String,)> = sqlx::query_as("SELECT robots_txt FROM seo_settings ORDER BY id LIMIT 1")
        .fetch_optional(&state.pool)
        .await
        .map_err(internal_error)?;
    let body = row
        .map(|(text,)| text)
        .filter(|text| !text.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_ROBOTS_TXT.to_string());
    Ok(([(CONTENT_TYPE, "text/plain; charset=utf-8")], body))
}
