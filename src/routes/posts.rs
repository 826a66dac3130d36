use axum::{
    Json, Router,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode, header::HOST},
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

use super::auth::{extract_current_user, extract_optional_user};
use super::{ApiError, FieldErrors, bad_request, forbidden, internal_error, not_found, push_search_any};
use crate::content::posts::{
    fetch_post, insert_post, missing_ids, post_detail, post_list_item, set_post_terms, update_post,
};
use crate::content::{PostDraft, SlugTable};
use crate::images::FEATURED_IMAGE_DIR;
use crate::models::{Paginated, Post, PostDetail, PostInput, PostListItem, PostQuery, User};
use crate::state::AppState;

const DEFAULT_PAGE_SIZE: i64 = 10;
const MAX_PAGE_SIZE: i64 = 100;
const RECENT_POSTS: i64 = 5;
const MAX_TITLE_CHARS: usize = 200;

pub fn posts_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_posts).post(create_post))
        .route("/featured", get(featured_posts))
        .route("/recent", get(recent_posts))
        .route(
            "/{slug}",
            get(get_post)
                .put(replace_post)
                .patch(patch_post)
                .delete(delete_post),
        )
        .route("/{slug}/featured-image", post(upload_featured_image))
}

/// Restricts `query` to posts `viewer` may see.
fn push_visibility(query: &mut QueryBuilder<'_, Sqlite>, viewer: Option<&User>) {
    match viewer {
        Some(user) if user.is_staff => {
            query.push(" WHERE 1 = 1");
        }
        Some(user) => {
            query
                .push(" WHERE (author_id = ")
                .push_bind(user.id)
                .push(" OR (status = 'published' AND published_at <= ")
                .push_bind(Utc::now())
                .push("))");
        }
        None => {
            query
                .push(" WHERE status = 'published' AND published_at <= ")
                .push_bind(Utc::now());
        }
    }
}

fn push_search(query: &mut QueryBuilder<'_, Sqlite>, search: Option<&str>) {
    push_search_any(
        query,
        &["title", "content", "excerpt", "meta_title", "meta_description"],
        search,
    );
}

/// `ORDER BY` clause for `published_at|created_at|title`, optionally prefixed with `-`.
fn order_clause(ordering: Option<&str>) -> String {
    let requested = ordering.unwrap_or("-published_at").trim();
    let (column, descending) = match requested.strip_prefix('-') {
        Some(column) => (column, true),
        None => (requested, false),
    };
    let (column, descending) = match column {
        "published_at" | "created_at" | "title" => (column, descending),
        _ => ("published_at", true),
    };
    format!(
        " ORDER BY {} {}, id {}",
        column,
        if descending { "DESC" } else { "ASC" },
        if descending { "DESC" } else { "ASC" }
    )
}

fn page_link(headers: &HeaderMap, query: &PostQuery, page: i64, page_size: i64) -> Option<String> {
    let host = headers
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("localhost");
    let mut params = vec![("page", page.to_string())];
    if query.page_size.is_some() {
        params.push(("page_size", page_size.to_string()));
    }
    if let Some(search) = &query.search {
        params.push(("search", search.clone()));
    }
    if let Some(ordering) = &query.ordering {
        params.push(("ordering", ordering.clone()));
    }
    reqwest::Url::parse_with_params(&format!("http://{}/api/posts/", host), &params)
        .ok()
        .map(String::from)
}

async fn list_posts(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<PostQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let viewer = extract_optional_user(&state, &headers).await?;
    let page = query.page.unwrap_or(1);
    if page < 1 {
        return Err(not_found());
    }
    let page_size = query
        .page_size
        .filter(|size| *size > 0)
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .min(MAX_PAGE_SIZE);

    let mut count_query = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM blog_posts");
    push_visibility(&mut count_query, viewer.as_ref());
    push_search(&mut count_query, query.search.as_deref());
    let (count,): (i64,) = count_query
        .build_query_as()
        .fetch_one(&state.pool)
        .await
        .map_err(internal_error)?;

    let invalid_page = || {
        (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"detail": "Invalid page."})),
        )
    };
    let offset = (page - 1).checked_mul(page_size).ok_or_else(invalid_page)?;
    if offset > 0 && offset >= count {
        return Err(invalid_page());
    }

    let mut select = QueryBuilder::<Sqlite>::new("SELECT * FROM blog_posts");
    push_visibility(&mut select, viewer.as_ref());
    push_search(&mut select, query.search.as_deref());
    select.push(order_clause(query.ordering.as_deref()));
    select.push(" LIMIT ").push_bind(page_size);
    select.push(" OFFSET ").push_bind(offset);
    let posts: Vec<Post> = select
        .build_query_as()
        .fetch_all(&state.pool)
        .await
        .map_err(internal_error)?;

    let results = list_items(&state.pool, posts).await?;
    let next = (offset + page_size < count)
        .then(|| page_link(&headers, &query, page + 1, page_size))
        .flatten();
    let previous = (page > 1)
        .then(|| page_link(&headers, &query, page - 1, page_size))
        .flatten();

    Ok(Json(Paginated {
        count,
        next,
        previous,
        results,
    }))
}

pub async fn list_items(pool: &SqlitePool, posts: Vec<Post>) -> Result<Vec<PostListItem>, ApiError> {
    let mut items = Vec::with_capacity(posts.len());
    for post in posts {
        items.push(post_list_item(pool, post).await.map_err(internal_error)?);
    }
    Ok(items)
}

async fn detail(pool: &SqlitePool, post: Post) -> Result<PostDetail, ApiError> {
    post_detail(pool, post).await.map_err(internal_error)
}

/// Post by slug, visible to `viewer`.
async fn visible_post(state: &AppState, viewer: Option<&User>, slug: &str) -> Result<Post, ApiError> {
    let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM blog_posts");
    push_visibility(&mut query, viewer);
    query.push(" AND slug = ").push_bind(slug);
    query
        .build_query_as::<Post>()
        .fetch_optional(&state.pool)
        .await
        .map_err(internal_error)?
        .ok_or_else(not_found)
}

/// Post by slug that `user` may modify: author or staff.
async fn editable_post(state: &AppState, user: &User, slug: &str) -> Result<Post, ApiError> {
    let post = visible_post(state, Some(user), slug).await?;
    if post.author_id != user.id && !user.is_staff {
        return Err(forbidden("You do not have permission to perform this action."));
    }
    Ok(post)
}

async fn get_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let viewer = extract_optional_user(&state, &headers).await?;
    tracing::info!("Received retrieve request for slug: {}", slug);
    let post = visible_post(&state, viewer.as_ref(), &slug).await?;
    Ok(Json(detail(&state.pool, post).await?))
}

/// Applies `input` over `draft`; a full replace requires title and content.
async fn apply_input(
    pool: &SqlitePool,
    draft: &mut PostDraft,
    input: &PostInput,
    full: bool,
) -> Result<(), ApiError> {
    let mut errors = FieldErrors::new();
    if full || input.title.is_some() {
        errors.require("title", input.title.as_deref());
    }
    errors.max_chars("title", input.title.as_deref(), MAX_TITLE_CHARS);
    if full || input.content.is_some() {
        match input.content.as_deref() {
            None => errors.add("content", "This field is required."),
            Some(content) if content.trim().is_empty() => {
                errors.add("content", "This field may not be blank.")
            }
            Some(_) => {}
        }
    }
    for (field, table, ids) in [
        ("categories", SlugTable::Categories, &input.categories),
        ("tags", SlugTable::Tags, &input.tags),
    ] {
        let Some(ids) = ids else { continue };
        for id in missing_ids(pool, table, ids).await.map_err(internal_error)? {
            errors.add(field, format!("Invalid pk \"{}\" - object does not exist.", id));
        }
    }
    errors.into_result()?;

    if let Some(title) = &input.title {
        draft.title = title.trim().to_string();
    }
    if let Some(content) = &input.content {
        draft.content = content.clone();
    }
    if let Some(format) = input.content_format {
        draft.content_format = format;
    }
    if let Some(excerpt) = &input.excerpt {
        draft.excerpt = excerpt.clone();
    }
    if let Some(image) = &input.featured_image {
        draft.featured_image = Some(image.clone()).filter(|image| !image.is_empty());
    }
    if let Some(status) = input.status {
        draft.status = status;
    }
    if let Some(published_at) = input.published_at {
        draft.published_at = published_at;
    }
    if let Some(is_featured) = input.is_featured {
        draft.is_featured = is_featured;
    }
    if let Some(meta_title) = &input.meta_title {
        draft.meta_title = meta_title.clone();
    }
    if let Some(meta_description) = &input.meta_description {
        draft.meta_description = meta_description.clone();
    }
    if let Some(canonical_url) = &input.canonical_url {
        draft.canonical_url = canonical_url.clone();
    }
    if let Some(focus_keywords) = &input.focus_keywords {
        draft.focus_keywords = focus_keywords.clone();
    }
    Ok(())
}

async fn create_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<PostInput>,
) -> Result<impl IntoResponse, ApiError> {
    let user = extract_current_user(&state, &headers).await?;

    let mut draft = PostDraft::new(String::new(), String::new());
    apply_input(&state.pool, &mut draft, &input, true).await?;

    let post_id = insert_post(&state.pool, state.config.site_domain.as_deref(), user.id, draft)
        .await
        .map_err(internal_error)?;
    set_post_terms(
        &state.pool,
        post_id,
        Some(input.categories.as_deref().unwrap_or_default()),
        Some(input.tags.as_deref().unwrap_or_default()),
    )
    .await
    .map_err(internal_error)?;

    let post = fetch_post(&state.pool, post_id)
        .await
        .map_err(internal_error)?
        .ok_or_else(not_found)?;
    tracing::info!(post_id, "Blog post created by {}", user.username);
    Ok((StatusCode::CREATED, Json(detail(&state.pool, post).await?)))
}

async fn save_changes(
    state: &AppState,
    headers: &HeaderMap,
    slug: &str,
    input: PostInput,
    full: bool,
) -> Result<PostDetail, ApiError> {
    let user = extract_current_user(state, headers).await?;
    let post = editable_post(state, &user, slug).await?;
    let post_id = post.id;

    let mut draft = PostDraft::from(post);
    apply_input(&state.pool, &mut draft, &input, full).await?;
    update_post(&state.pool, state.config.site_domain.as_deref(), post_id, draft)
        .await
        .map_err(internal_error)?;
    set_post_terms(
        &state.pool,
        post_id,
        input.categories.as_deref(),
        input.tags.as_deref(),
    )
    .await
    .map_err(internal_error)?;

    let post = fetch_post(&state.pool, post_id)
        .await
        .map_err(internal_error)?
        .ok_or_else(not_found)?;
    detail(&state.pool, post).await
}

async fn replace_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(slug): Path<String>,
    Json(input): Json<PostInput>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(save_changes(&state, &headers, &slug, input, true).await?))
}

async fn patch_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(slug): Path<String>,
    Json(input): Json<PostInput>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(save_changes(&state, &headers, &slug, input, false).await?))
}

async fn delete_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let user = extract_current_user(&state, &headers).await?;
    let post = editable_post(&state, &user, &slug).await?;

    sqlx::query("DELETE FROM blog_posts WHERE id = ?")
        .bind(post.id)
        .execute(&state.pool)
        .await
        .map_err(internal_error)?;

    tracing::info!(post_id = post.id, "Blog post deleted by {}", user.username);
    Ok(StatusCode::NO_CONTENT)
}

async fn upload_featured_image(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(slug): Path<String>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let user = extract_current_user(&state, &headers).await?;
    let post = editable_post(&state, &user, &slug).await?;

    let mut stored = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(&e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let extension = field
            .file_name()
            .and_then(|name| std::path::Path::new(name).extension())
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase)
            .unwrap_or_else(|| "jpg".to_string());
        let data = field.bytes().await.map_err(|e| bad_request(&e.to_string()))?;
        if data.is_empty() {
            return Err(bad_request("The submitted file is empty."));
        }

        let directory = state.config.media_root.join(FEATURED_IMAGE_DIR);
        tokio::fs::create_dir_all(&directory)
            .await
            .map_err(internal_error)?;
        let file_name = format!("{}.{}", Uuid::new_v4(), extension);
        tokio::fs::write(directory.join(&file_name), &data)
            .await
            .map_err(internal_error)?;
        stored = Some(format!("/media/{}/{}", FEATURED_IMAGE_DIR, file_name));
    }

    let Some(path) = stored else {
        return Err(bad_request("No file was submitted."));
    };

    sqlx::query("UPDATE blog_posts SET featured_image = ?, updated_at = ? WHERE id = ?")
        .bind(&path)
        .bind(Utc::now())
        .bind(post.id)
        .execute(&state.pool)
        .await
        .map_err(internal_error)?;

    let post = fetch_post(&state.pool, post.id)
        .await
        .map_err(internal_error)?
        .ok_or_else(not_found)?;
    Ok(Json(detail(&state.pool, post).await?))
}

async fn featured_posts(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let posts = sqlx::query_as::<_, Post>(
        r#"
        SELECT * FROM blog_posts
        WHERE is_featured = 1 AND status = 'published' AND published_at <= ?
        ORDER BY published_at DESC, id DESC
        "#,
    )
    .bind(Utc::now())
    .fetch_all(&state.pool)
    .await
    .map_err(internal_error)?;

    let mut results = Vec::with_capacity(posts.len());
    for post in posts {
        results.push(detail(&state.pool, post).await?);
    }
    Ok(Json(results))
}

async fn recent_posts(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let posts = sqlx::query_as::<_, Post>(
        r#"
        SELECT * FROM blog_posts
        WHERE status = 'published' AND published_at <= ?
        ORDER BY published_at DESC, id DESC
        LIMIT ?
        "#,
    )
    .bind(Utc::now())
    .bind(RECENT_POSTS)
    .fetch_all(&state.pool)
    .await
    .map_err(internal_error)?;

    Ok(Json(list_items(&state.pool, posts).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::{create_user, send, test_state};
    use serde_json::json;

    async fn publish(state: &AppState, token: &str, title: &str) -> serde_json::Value {
        let (status, body) = send(
            state,
            "POST",
            "/api/posts/",
            Some(token),
            Some(json!({"title": title, "content": "<p>Body</p>", "status": "published"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body
    }

    #[tokio::test]
    async fn create_requires_authentication_and_fields() {
        let (state, _media) = test_state().await;
        let (status, _) = send(&state, "POST", "/api/posts/", None, Some(json!({"title": "x"}))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (_, token) = create_user(&state, "writer", false).await;
        let (status, body) = send(
            &state,
            "POST",
            "/api/posts/",
            Some(&token),
            Some(json!({"title": "x", "categories": [42]})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["content"][0], "This field is required.");
        assert_eq!(body["categories"][0], "Invalid pk \"42\" - object does not exist.");
    }

    #[tokio::test]
    async fn create_fills_slug_meta_and_link_counts() {
        let (state, _media) = test_state().await;
        let (_, token) = create_user(&state, "writer", false).await;
        let (status, body) = send(
            &state,
            "POST",
            "/api/posts",
            Some(&token),
            Some(json!({
                "title": "Hello Rust",
                "content": "<p><a href=\"/blog/a\">a</a> <a href=\"https://docs.rs\">b</a></p>",
                "excerpt": "Short"
            })),
        )
        .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["slug"], "hello-rust");
        assert_eq!(body["status"], "draft");
        assert_eq!(body["meta_title"], "Hello Rust");
        assert_eq!(body["meta_description"], "Short");
        assert_eq!(body["internal_links_count"], 1);
        assert_eq!(body["external_links_count"], 1);
        assert_eq!(body["author"]["username"], "writer");
    }

    #[tokio::test]
    async fn drafts_are_hidden_from_other_users() {
        let (state, _media) = test_state().await;
        let (_, author) = create_user(&state, "author", false).await;
        let (_, reader) = create_user(&state, "reader", false).await;
        let (_, staff) = create_user(&state, "editor", true).await;
        send(
            &state,
            "POST",
            "/api/posts/",
            Some(&author),
            Some(json!({"title": "Secret", "content": "draft"})),
        )
        .await;
        publish(&state, &author, "Public").await;

        let (_, anonymous) = send(&state, "GET", "/api/posts/", None, None).await;
        assert_eq!(anonymous["count"], 1);
        let (_, own) = send(&state, "GET", "/api/posts/", Some(&author), None).await;
        assert_eq!(own["count"], 2);
        let (_, other) = send(&state, "GET", "/api/posts/", Some(&reader), None).await;
        assert_eq!(other["count"], 1);
        let (_, all) = send(&state, "GET", "/api/posts/", Some(&staff), None).await;
        assert_eq!(all["count"], 2);

        let (status, _) = send(&state, "GET", "/api/posts/secret/", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn list_paginates_searches_and_orders() {
        let (state, _media) = test_state().await;
        let (_, token) = create_user(&state, "writer", false).await;
        for title in ["Alpha", "Beta", "Gamma"] {
            publish(&state, &token, title).await;
        }

        let (_, page) = send(&state, "GET", "/api/posts/?page_size=2&ordering=title", None, None).await;
        assert_eq!(page["count"], 3);
        assert_eq!(page["results"][0]["title"], "Alpha");
        assert!(page["results"][0].get("content").is_none());
        assert!(page["next"].as_str().unwrap().contains("page=2"));
        assert!(page["previous"].is_null());

        let (_, second) = send(&state, "GET", "/api/posts/?page=2&page_size=2&ordering=title", None, None).await;
        assert_eq!(second["results"][0]["title"], "Gamma");
        assert!(second["next"].is_null());

        let (_, found) = send(&state, "GET", "/api/posts/?search=gamm", None, None).await;
        assert_eq!(found["count"], 1);

        let (status, _) = send(&state, "GET", "/api/posts/?page=9", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn only_author_or_staff_may_modify() {
        let (state, _media) = test_state().await;
        let (_, author) = create_user(&state, "author", false).await;
        let (_, reader) = create_user(&state, "reader", false).await;
        let (_, staff) = create_user(&state, "editor", true).await;
        publish(&state, &author, "Shared").await;

        let (status, _) = send(
            &state,
            "PATCH",
            "/api/posts/shared/",
            Some(&reader),
            Some(json!({"title": "Mine now"})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(
            &state,
            "PATCH",
            "/api/posts/shared/",
            Some(&staff),
            Some(json!({"is_featured": true})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["is_featured"], true);
        assert_eq!(body["title"], "Shared");

        let (_, featured) = send(&state, "GET", "/api/posts/featured/", None, None).await;
        assert_eq!(featured.as_array().unwrap().len(), 1);
        assert!(featured[0].get("content").is_some());

        let (status, _) = send(&state, "PUT", "/api/posts/shared/", Some(&author), Some(json!({"title": "Only"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&state, "DELETE", "/api/posts/shared/", Some(&author), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, recent) = send(&state, "GET", "/api/posts/recent/", None, None).await;
        assert!(recent.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn scheduled_posts_stay_hidden_until_due() {
        let (state, _media) = test_state().await;
        let (_, author) = create_user(&state, "author", false).await;
        let (_, reader) = create_user(&state, "reader", false).await;
        let (_, staff) = create_user(&state, "editor", true).await;
        let (_, tag) = send(&state, "POST", "/api/tags/", Some(&author), Some(json!({"name": "Later"}))).await;

        let (status, _) = send(
            &state,
            "POST",
            "/api/posts/",
            Some(&author),
            Some(json!({
                "title": "Tomorrow",
                "content": "<p>Soon</p>",
                "status": "published",
                "published_at": "2099-01-01T00:00:00Z",
                "is_featured": true,
                "tags": [tag["id"]]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (_, anonymous) = send(&state, "GET", "/api/posts/", None, None).await;
        assert_eq!(anonymous["count"], 0);
        let (_, other) = send(&state, "GET", "/api/posts/", Some(&reader), None).await;
        assert_eq!(other["count"], 0);
        let (_, own) = send(&state, "GET", "/api/posts/", Some(&author), None).await;
        assert_eq!(own["count"], 1);
        let (_, all) = send(&state, "GET", "/api/posts/", Some(&staff), None).await;
        assert_eq!(all["count"], 1);

        for path in ["/api/posts/featured/", "/api/posts/recent/", "/api/tags/later/posts/"] {
            let (status, body) = send(&state, "GET", path, None, None).await;
            assert_eq!(status, StatusCode::OK, "{}", path);
            assert!(body.as_array().unwrap().is_empty(), "{}", path);
        }
        let (status, _) = send(&state, "GET", "/api/posts/tomorrow/", Some(&reader), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn huge_page_numbers_are_invalid_pages() {
        let (state, _media) = test_state().await;
        let (_, token) = create_user(&state, "writer", false).await;
        publish(&state, &token, "Only").await;

        let (status, body) = send(&state, "GET", "/api/posts/?page=9223372036854775807", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "Invalid page.");
    }

    #[tokio::test]
    async fn search_treats_wildcards_literally() {
        let (state, _media) = test_state().await;
        let (_, token) = create_user(&state, "writer", false).await;
        publish(&state, &token, "Coverage at 100%").await;
        publish(&state, &token, "Coverage at 1000 lines").await;
        publish(&state, &token, "snake_case names").await;
        publish(&state, &token, "snakeXcase names").await;

        let (_, percent) = send(&state, "GET", "/api/posts/?search=100%25", None, None).await;
        assert_eq!(percent["count"], 1);
        assert_eq!(percent["results"][0]["title"], "Coverage at 100%");

        let (_, underscore) = send(&state, "GET", "/api/posts/?search=snake_case", None, None).await;
        assert_eq!(underscore["count"], 1);
        assert_eq!(underscore["results"][0]["title"], "snake_case names");
    }

    #[tokio::test]
    async fn titles_are_capped_at_two_hundred_characters() {
        let (state, _media) = test_state().await;
        let (_, token) = create_user(&state, "writer", false).await;
        let (status, body) = send(
            &state,
            "POST",
            "/api/posts/",
            Some(&token),
            Some(json!({"title": "x".repeat(201), "content": "c"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["title"][0], "Ensure this field has no more than 200 characters.");

        let (status, _) = send(
            &state,
            "POST",
            "/api/posts/",
            Some(&token),
            Some(json!({"title": "x".repeat(200), "content": "c"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    #[test]
    fn unknown_ordering_falls_back_to_newest_first() {
        assert_eq!(order_clause(None), " ORDER BY published_at DESC, id DESC");
        assert_eq!(order_clause(Some("title")), " ORDER BY title ASC, id ASC");
        assert_eq!(order_clause(Some("-password")), " ORDER BY published_at DESC, id DESC");
    }
}
