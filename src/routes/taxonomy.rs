use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
};
use chrono::Utc;
use serde::Serialize;
use sqlx::{FromRow, sqlite::SqliteRow};

use super::auth::extract_current_user;
use super::posts::list_items;
use super::{ApiError, FieldErrors, internal_error, not_found};
use crate::content::{SlugTable, slugify, unique_slug};
use crate::models::{Category, Post, Tag, TermInput};
use crate::state::AppState;

/// A slugged label attached to posts through a join table.
pub trait Taxonomy: for<'r> FromRow<'r, SqliteRow> + Serialize + Send + Sync + Unpin + 'static {
    const TABLE: SlugTable;
    const JOIN_TABLE: &'static str;
    const JOIN_COLUMN: &'static str;
    const LABEL: &'static str;
    const HAS_DESCRIPTION: bool;
    const MAX_NAME_CHARS: usize;
}

impl Taxonomy for Category {
    const TABLE: SlugTable = SlugTable::Categories;
    const JOIN_TABLE: &'static str = "blog_post_categories";
    const JOIN_COLUMN: &'static str = "category_id";
    const LABEL: &'static str = "category";
    const HAS_DESCRIPTION: bool = true;
    const MAX_NAME_CHARS: usize = 100;
}

impl Taxonomy for Tag {
    const TABLE: SlugTable = SlugTable::Tags;
    const JOIN_TABLE: &'static str = "blog_post_tags";
    const JOIN_COLUMN: &'static str = "tag_id";
    const LABEL: &'static str = "tag";
    const HAS_DESCRIPTION: bool = false;
    const MAX_NAME_CHARS: usize = 50;
}

pub fn categories_routes() -> Router<AppState> {
    term_routes::<Category>()
}

pub fn tags_routes() -> Router<AppState> {
    term_routes::<Tag>()
}

fn term_routes<T: Taxonomy>() -> Router<AppState> {
    Router::new()
        .route("/", get(list_terms::<T>).post(create_term::<T>))
        .route(
            "/{slug}",
            get(get_term::<T>)
                .put(replace_term::<T>)
                .patch(patch_term::<T>)
                .delete(delete_term::<T>),
        )
        .route("/{slug}/posts", get(term_posts::<T>))
}

async fn fetch_term<T: Taxonomy>(state: &AppState, slug: &str) -> Result<T, ApiError> {
    sqlx::query_as::<_, T>(&format!("SELECT * FROM {} WHERE slug = ?", T::TABLE.table_name()))
        .bind(slug)
        .fetch_optional(&state.pool)
        .await
        .map_err(internal_error)?
        .ok_or_else(not_found)
}

async fn term_id(state: &AppState, table: &str, slug: &str) -> Result<i64, ApiError> {
    let row: Option<(i64,)> = sqlx::query_as(&format!("SELECT id FROM {} WHERE slug = ?", table))
        .bind(slug)
        .fetch_optional(&state.pool)
        .await
        .map_err(internal_error)?;
    row.map(|(id,)| id).ok_or_else(not_found)
}

async fn list_terms<T: Taxonomy>(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let terms = sqlx::query_as::<_, T>(&format!("SELECT * FROM {} ORDER BY id", T::TABLE.table_name()))
        .fetch_all(&state.pool)
        .await
        .map_err(internal_error)?;
    Ok(Json(terms))
}

async fn get_term<T: Taxonomy>(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(fetch_term::<T>(&state, &slug).await?))
}

/// Validates and writes a term. `existing` is `(id, current name, current slug)` on update.
async fn save_term<T: Taxonomy>(
    state: &AppState,
    existing: Option<(i64, String, String)>,
    input: TermInput,
    full: bool,
) -> Result<i64, ApiError> {
    let mut errors = FieldErrors::new();
    if full || input.name.is_some() {
        errors.require("name", input.name.as_deref());
    }
    errors.max_chars("name", input.name.as_deref(), T::MAX_NAME_CHARS);

    let exclude_id = existing.as_ref().map(|(id, _, _)| *id);
    let explicit_slug = input
        .slug
        .as_deref()
        .map(str::trim)
        .filter(|slug| !slug.is_empty())
        .map(ToString::to_string);
    if let Some(slug) = &explicit_slug {
        if !slug.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_') {
            errors.add(
                "slug",
                "Enter a valid \u{201c}slug\u{201d} consisting of letters, numbers, underscores or hyphens.",
            );
        } else if crate::content::slug::slug_exists(&state.pool, T::TABLE, slug, exclude_id)
            .await
            .map_err(internal_error)?
        {
            errors.add("slug", format!("{} with this slug already exists.", T::LABEL));
        }
    }
    errors.into_result()?;

    let name = match (&input.name, &existing) {
        (Some(name), _) => name.trim().to_string(),
        (None, Some((_, name, _))) => name.clone(),
        (None, None) => String::new(),
    };
    let slug = match (explicit_slug, &existing) {
        (Some(slug), _) => slug,
        (None, Some((_, _, slug))) if !slug.is_empty() => slug.clone(),
        _ => unique_slug(&state.pool, T::TABLE, &slugify(&name), exclude_id)
            .await
            .map_err(internal_error)?
            .ok_or_else(|| super::bad_request("Could not generate a unique slug."))?,
    };

    match existing {
        Some((id, _, _)) => {
            let mut query = sqlx::QueryBuilder::<sqlx::Sqlite>::new(format!("UPDATE {} SET name = ", T::TABLE.table_name()));
            query.push_bind(&name).push(", slug = ").push_bind(&slug);
            if T::HAS_DESCRIPTION {
                if let Some(description) = &input.description {
                    query.push(", description = ").push_bind(description);
                }
            }
            query.push(" WHERE id = ").push_bind(id);
            query.build().execute(&state.pool).await.map_err(internal_error)?;
            Ok(id)
        }
        None => {
            let result = if T::HAS_DESCRIPTION {
                sqlx::query(&format!(
                    "INSERT INTO {} (name, slug, description) VALUES (?, ?, ?)",
                    T::TABLE.table_name()
                ))
                .bind(&name)
                .bind(&slug)
                .bind(input.description.as_deref().unwrap_or_default())
                .execute(&state.pool)
                .await
            } else {
                sqlx::query(&format!("INSERT INTO {} (name, slug) VALUES (?, ?)", T::TABLE.table_name()))
                    .bind(&name)
                    .bind(&slug)
                    .execute(&state.pool)
                    .await
            };
            Ok(result.map_err(internal_error)?.last_insert_rowid())
        }
    }
}

async fn fetch_by_id<T: Taxonomy>(state: &AppState, id: i64) -> Result<T, ApiError> {
    sqlx::query_as::<_, T>(&format!("SELECT * FROM {} WHERE id = ?", T::TABLE.table_name()))
        .bind(id)
        .fetch_one(&state.pool)
        .await
        .map_err(internal_error)
}

async fn create_term<T: Taxonomy>(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<TermInput>,
) -> Result<impl IntoResponse, ApiError> {
    extract_current_user(&state, &headers).await?;
    let id = save_term::<T>(&state, None, input, true).await?;
    tracing::info!(id, "Created {}", T::LABEL);
    Ok((StatusCode::CREATED, Json(fetch_by_id::<T>(&state, id).await?)))
}

async fn update_term<T: Taxonomy>(
    state: &AppState,
    headers: &HeaderMap,
    slug: &str,
    input: TermInput,
    full: bool,
) -> Result<T, ApiError> {
    extract_current_user(state, headers).await?;
    let row: Option<(i64, String, String)> =
        sqlx::query_as(&format!("SELECT id, name, slug FROM {} WHERE slug = ?", T::TABLE.table_name()))
            .bind(slug)
            .fetch_optional(&state.pool)
            .await
            .map_err(internal_error)?;
    let existing = row.ok_or_else(not_found)?;
    let id = save_term::<T>(state, Some(existing), input, full).await?;
    fetch_by_id::<T>(state, id).await
}

async fn replace_term<T: Taxonomy>(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(slug): Path<String>,
    Json(input): Json<TermInput>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(update_term::<T>(&state, &headers, &slug, input, true).await?))
}

async fn patch_term<T: Taxonomy>(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(slug): Path<String>,
    Json(input): Json<TermInput>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(update_term::<T>(&state, &headers, &slug, input, false).await?))
}

async fn delete_term<T: Taxonomy>(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    extract_current_user(&state, &headers).await?;
    let id = term_id(&state, T::TABLE.table_name(), &slug).await?;
    sqlx::query(&format!("DELETE FROM {} WHERE id = ?", T::TABLE.table_name()))
        .bind(id)
        .execute(&state.pool)
        .await
        .map_err(internal_error)?;
    tracing::info!(id, "Deleted {}", T::LABEL);
    Ok(StatusCode::NO_CONTENT)
}

/// Published, due posts carrying the term.
async fn term_posts<T: Taxonomy>(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = term_id(&state, T::TABLE.table_name(), &slug).await?;
    let posts = sqlx::query_as::<_, Post>(&format!(
        r#"
        SELECT p.* FROM blog_posts p
        JOIN {join} j ON j.post_id = p.id
        WHERE j.{column} = ? AND p.status = 'published' AND p.published_at <= ?
        ORDER BY p.published_at DESC, p.id DESC
        "#,
        join = T::JOIN_TABLE,
        column = T::JOIN_COLUMN
    ))
    .bind(id)
    .bind(Utc::now())
    .fetch_all(&state.pool)
    .await
    .map_err(internal_error)?;

    Ok(Json(list_items(&state.pool, posts).await?))
}
