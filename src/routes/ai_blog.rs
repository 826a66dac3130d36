use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;
use serde_json::json;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use super::auth::{extract_current_user, token_from_headers};
use super::{ApiError, FieldErrors, internal_error, not_found};
use crate::ai_blog::generator::{
    discard_batch_children, discard_generation, set_batch_status, set_request_status,
};
use crate::content::PostDraft;
use crate::content::posts::{add_post_category, add_post_tag, fetch_post, insert_post, post_detail, set_post_status};
use crate::models::{
    BatchRequest, BatchRequestInput, BatchRequestResponse, BlogRequest, BlogRequestInput, BlogRequestSummary,
    Category, DEFAULT_BATCH_SIZE, Generation, GenerationResponse, GenerationStatus, MAX_BATCH_SIZE, PostStatus,
    Tag, User, parse_generated_ideas,
};
use crate::state::AppState;

pub fn ai_blog_routes() -> Router<AppState> {
    Router::new()
        .route("/requests", get(list_requests).post(create_request))
        .route("/requests/auth_test", get(auth_test))
        .route(
            "/requests/{id}",
            get(get_request)
                .put(replace_request)
                .patch(patch_request)
                .delete(delete_request),
        )
        .route("/requests/{id}/generation", get(request_generation))
        .route("/requests/{id}/regenerate", post(regenerate_request))
        .route("/generations", get(list_generations))
        .route("/generations/{id}", get(get_generation))
        .route("/generations/{id}/publish", post(publish_generation))
        .route("/batch-requests", get(list_batches).post(create_batch))
        .route(
            "/batch-requests/{id}",
            get(get_batch)
                .put(replace_batch)
                .patch(patch_batch)
                .delete(delete_batch),
        )
        .route("/batch-requests/{id}/regenerate", post(regenerate_batch))
}

// ============================
// Requests
// ============================

async fn owned_request(pool: &SqlitePool, user: &User, id: i64) -> Result<BlogRequest, ApiError> {
    sqlx::query_as::<_, BlogRequest>("SELECT * FROM ai_blog_requests WHERE id = ? AND user_id = ?")
        .bind(id)
        .bind(user.id)
        .fetch_optional(pool)
        .await
        .map_err(internal_error)?
        .ok_or_else(not_found)
}

fn validate_request_input(input: &BlogRequestInput, full: bool) -> Result<(), ApiError> {
    let mut errors = FieldErrors::new();
    if full || input.prompt.is_some() {
        errors.require("prompt", input.prompt.as_deref());
    }
    if full || input.topic.is_some() {
        errors.require("topic", input.topic.as_deref());
    }
    errors.max_chars("topic", input.topic.as_deref(), 200);
    errors.into_result()
}

async fn list_requests(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user = extract_current_user(&state, &headers).await?;
    let requests = sqlx::query_as::<_, BlogRequestSummary>(
        "SELECT id, topic, status, created_at, updated_at FROM ai_blog_requests WHERE user_id = ? ORDER BY created_at DESC, id DESC",
    )
    .bind(user.id)
    .fetch_all(&state.pool)
    .await
    .map_err(internal_error)?;
    Ok(Json(requests))
}

async fn create_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<BlogRequestInput>,
) -> Result<impl IntoResponse, ApiError> {
    let user = extract_current_user(&state, &headers).await?;
    validate_request_input(&input, true)?;

    let now = Utc::now();
    let id = sqlx::query(
        r#"
        INSERT INTO ai_blog_requests (user_id, prompt, topic, keywords, allow_web_search, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(user.id)
    .bind(input.prompt.as_deref().unwrap_or_default())
    .bind(input.topic.as_deref().unwrap_or_default())
    .bind(input.keywords.as_deref().unwrap_or_default())
    .bind(input.allow_web_search.unwrap_or(false))
    .bind(GenerationStatus::Pending)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await
    .map_err(internal_error)?
    .last_insert_rowid();

    tracing::info!("Blog request {} created by {}", id, user.username);
    state.spawn_generation(id);

    let request = owned_request(&state.pool, &user, id).await?;
    Ok((StatusCode::CREATED, Json(request)))
}

async fn get_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user = extract_current_user(&state, &headers).await?;
    Ok(Json(owned_request(&state.pool, &user, id).await?))
}

async fn replace_request(
    state: State<AppState>,
    headers: HeaderMap,
    id: Path<i64>,
    Json(input): Json<BlogRequestInput>,
) -> Result<impl IntoResponse, ApiError> {
    update_request(state, headers, id, input, true).await
}

async fn patch_request(
    state: State<AppState>,
    headers: HeaderMap,
    id: Path<i64>,
    Json(input): Json<BlogRequestInput>,
) -> Result<impl IntoResponse, ApiError> {
    update_request(state, headers, id, input, false).await
}

async fn update_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    input: BlogRequestInput,
    full: bool,
) -> Result<Json<BlogRequest>, ApiError> {
    let user = extract_current_user(&state, &headers).await?;
    owned_request(&state.pool, &user, id).await?;
    validate_request_input(&input, full)?;

    let mut query = QueryBuilder::<Sqlite>::new("UPDATE ai_blog_requests SET ");
    let mut fields = query.separated(", ");
    if let Some(prompt) = &input.prompt {
        fields.push("prompt = ");
        fields.push_bind_unseparated(prompt);
    }
    if let Some(topic) = &input.topic {
        fields.push("topic = ");
        fields.push_bind_unseparated(topic);
    }
    if let Some(keywords) = &input.keywords {
        fields.push("keywords = ");
        fields.push_bind_unseparated(keywords);
    }
    if let Some(allow) = input.allow_web_search {
        fields.push("allow_web_search = ");
        fields.push_bind_unseparated(allow);
    }
    fields.push("updated_at = ");
    fields.push_bind_unseparated(Utc::now());
    query.push(" WHERE id = ").push_bind(id);
    query.build().execute(&state.pool).await.map_err(internal_error)?;

    Ok(Json(owned_request(&state.pool, &user, id).await?))
}

async fn delete_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user = extract_current_user(&state, &headers).await?;
    owned_request(&state.pool, &user, id).await?;
    sqlx::query("DELETE FROM ai_blog_requests WHERE id = ?")
        .bind(id)
        .execute(&state.pool)
        .await
        .map_err(internal_error)?;
    tracing::info!("Blog request {} deleted by {}", id, user.username);
    Ok(StatusCode::NO_CONTENT)
}

async fn request_generation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user = extract_current_user(&state, &headers).await?;
    let request = owned_request(&state.pool, &user, id).await?;
    let generation = sqlx::query_as::<_, Generation>("SELECT * FROM ai_blog_generations WHERE request_id = ?")
        .bind(request.id)
        .fetch_optional(&state.pool)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(json!({"error": "Generation not found"})),
            )
        })?;
    Ok(Json(generation_response(&state.pool, generation).await?))
}

async fn regenerate_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user = extract_current_user(&state, &headers).await?;
    let request = owned_request(&state.pool, &user, id).await?;

    discard_generation(&state.pool, request.id)
        .await
        .map_err(internal_error)?;
    set_request_status(&state.pool, request.id, GenerationStatus::Pending, None)
        .await
        .map_err(internal_error)?;
    tracing::info!("Regenerating blog request {}", request.id);
    state.spawn_generation(request.id);

    Ok(Json(json!({"status": "regenerating"})))
}

/// Reports how the request's credentials were resolved.
async fn auth_test(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user = extract_current_user(&state, &headers).await?;
    let auth_header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    Ok(Json(json!({
        "authenticated": true,
        "user": user.username,
        "token_key": token_from_headers(&headers),
        "token_exists": true,
        "token_user": user.username,
        "request_user": user.username,
        "auth_header": auth_header,
    })))
}

// ============================
// Generations
// ============================

async fn generation_response(pool: &SqlitePool, generation: Generation) -> Result<GenerationResponse, ApiError> {
    let blog_post = match generation.blog_post_id {
        Some(post_id) => match fetch_post(pool, post_id).await.map_err(internal_error)? {
            Some(post) => Some(post_detail(pool, post).await.map_err(internal_error)?),
            None => None,
        },
        None => None,
    };
    let suggested_categories = sqlx::query_as::<_, Category>(
        r#"
        SELECT c.* FROM blog_categories c
        JOIN ai_generation_categories gc ON gc.category_id = c.id
        WHERE gc.generation_id = ?
        ORDER BY c.id
        "#,
    )
    .bind(generation.id)
    .fetch_all(pool)
    .await
    .map_err(internal_error)?;
    let suggested_tags = sqlx::query_as::<_, Tag>(
        r#"
        SELECT t.* FROM blog_tags t
        JOIN ai_generation_tags gt ON gt.tag_id = t.id
        WHERE gt.generation_id = ?
        ORDER BY t.id
        "#,
    )
    .bind(generation.id)
    .fetch_all(pool)
    .await
    .map_err(internal_error)?;

    Ok(GenerationResponse {
        id: generation.id,
        request: generation.request_id,
        blog_post,
        title: generation.title,
        content: generation.content,
        excerpt: generation.excerpt,
        meta_title: generation.meta_title,
        meta_description: generation.meta_description,
        suggested_categories,
        suggested_tags,
        focus_keywords: generation.focus_keywords,
        created_at: generation.created_at,
    })
}

async fn owned_generation(pool: &SqlitePool, user: &User, id: i64) -> Result<Generation, ApiError> {
    sqlx::query_as::<_, Generation>(
        r#"
        SELECT g.* FROM ai_blog_generations g
        JOIN ai_blog_requests r ON r.id = g.request_id
        WHERE g.id = ? AND r.user_id = ?
        "#,
    )
    .bind(id)
    .bind(user.id)
    .fetch_optional(pool)
    .await
    .map_err(internal_error)?
    .ok_or_else(not_found)
}

async fn list_generations(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user = extract_current_user(&state, &headers).await?;
    let generations = sqlx::query_as::<_, Generation>(
        r#"
        SELECT g.* FROM ai_blog_generations g
        JOIN ai_blog_requests r ON r.id = g.request_id
        WHERE r.user_id = ?
        ORDER BY g.created_at DESC, g.id DESC
        "#,
    )
    .bind(user.id)
    .fetch_all(&state.pool)
    .await
    .map_err(internal_error)?;

    let mut responses = Vec::with_capacity(generations.len());
    for generation in generations {
        responses.push(generation_response(&state.pool, generation).await?);
    }
    Ok(Json(responses))
}

async fn get_generation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user = extract_current_user(&state, &headers).await?;
    let generation = owned_generation(&state.pool, &user, id).await?;
    Ok(Json(generation_response(&state.pool, generation).await?))
}

/// Creates the draft post for a generation that has none, copying its suggested terms.
async fn create_post_from_generation(
    state: &AppState,
    user: &User,
    generation: &Generation,
) -> Result<i64, ApiError> {
    let mut draft = PostDraft::new(&generation.title, &generation.content);
    draft.excerpt = generation.excerpt.clone();
    draft.meta_title = generation.meta_title.clone();
    draft.meta_description = generation.meta_description.clone();
    draft.focus_keywords = generation.focus_keywords.clone();

    let post_id = insert_post(&state.pool, state.config.site_domain.as_deref(), user.id, draft)
        .await
        .map_err(internal_error)?;

    let categories: Vec<(i64,)> =
        sqlx::query_as("SELECT category_id FROM ai_generation_categories WHERE generation_id = ?")
            .bind(generation.id)
            .fetch_all(&state.pool)
            .await
            .map_err(internal_error)?;
    for (category_id,) in categories {
        add_post_category(&state.pool, post_id, category_id)
            .await
            .map_err(internal_error)?;
    }
    let tags: Vec<(i64,)> = sqlx::query_as("SELECT tag_id FROM ai_generation_tags WHERE generation_id = ?")
        .bind(generation.id)
        .fetch_all(&state.pool)
        .await
        .map_err(internal_error)?;
    for (tag_id,) in tags {
        add_post_tag(&state.pool, post_id, tag_id).await.map_err(internal_error)?;
    }

    sqlx::query("UPDATE ai_blog_generations SET blog_post_id = ? WHERE id = ?")
        .bind(post_id)
        .bind(generation.id)
        .execute(&state.pool)
        .await
        .map_err(internal_error)?;
    Ok(post_id)
}

async fn publish_generation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user = extract_current_user(&state, &headers).await?;
    let generation = owned_generation(&state.pool, &user, id).await?;

    let existing = match generation.blog_post_id {
        Some(post_id) => fetch_post(&state.pool, post_id).await.map_err(internal_error)?,
        None => None,
    };
    let post_id = match existing {
        Some(post) => post.id,
        None => create_post_from_generation(&state, &user, &generation).await?,
    };
    set_post_status(&state.pool, post_id, PostStatus::Published)
        .await
        .map_err(internal_error)?;

    tracing::info!("Generation {} published as post {}", generation.id, post_id);
    Ok(Json(json!({"status": "published", "blog_post_id": post_id})))
}

// ============================
// Batch requests
// ============================

async fn owned_batch(pool: &SqlitePool, user: &User, id: i64) -> Result<BatchRequest, ApiError> {
    sqlx::query_as::<_, BatchRequest>("SELECT * FROM ai_blog_batch_requests WHERE id = ? AND user_id = ?")
        .bind(id)
        .bind(user.id)
        .fetch_optional(pool)
        .await
        .map_err(internal_error)?
        .ok_or_else(not_found)
}

async fn child_count(pool: &SqlitePool, batch_id: i64) -> Result<i64, ApiError> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM ai_blog_requests WHERE parent_batch_id = ?")
        .bind(batch_id)
        .fetch_one(pool)
        .await
        .map_err(internal_error)?;
    Ok(count)
}

async fn batch_response(pool: &SqlitePool, batch: BatchRequest) -> Result<BatchRequestResponse, ApiError> {
    let count = child_count(pool, batch.id).await?;
    Ok(BatchRequestResponse::new(batch, count))
}

fn validate_batch_input(input: &BatchRequestInput, full: bool) -> Result<(), ApiError> {
    let mut errors = FieldErrors::new();
    if full || input.topic.is_some() {
        errors.require("topic", input.topic.as_deref());
    }
    if full || input.description.is_some() {
        errors.require("description", input.description.as_deref());
    }
    if full || input.prompt.is_some() {
        errors.require("prompt", input.prompt.as_deref());
    }
    if let Some(num_posts) = input.num_posts {
        if num_posts < 1 {
            errors.add("num_posts", "Ensure this value is greater than or equal to 1.");
        } else if num_posts > MAX_BATCH_SIZE {
            errors.add(
                "num_posts",
                format!("Ensure this value is less than or equal to {}.", MAX_BATCH_SIZE),
            );
        }
    }
    errors.into_result()
}

async fn list_batches(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user = extract_current_user(&state, &headers).await?;
    let batches = sqlx::query_as::<_, BatchRequest>(
        "SELECT * FROM ai_blog_batch_requests WHERE user_id = ? ORDER BY created_at DESC, id DESC",
    )
    .bind(user.id)
    .fetch_all(&state.pool)
    .await
    .map_err(internal_error)?;

    let mut responses = Vec::with_capacity(batches.len());
    for batch in batches {
        responses.push(batch_response(&state.pool, batch).await?);
    }
    Ok(Json(responses))
}

async fn create_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<BatchRequestInput>,
) -> Result<impl IntoResponse, ApiError> {
    let user = extract_current_user(&state, &headers).await?;
    validate_batch_input(&input, true)?;

    let now = Utc::now();
    let id = sqlx::query(
        r#"
        INSERT INTO ai_blog_batch_requests (
            user_id, topic, description, prompt, keywords, num_posts, allow_web_search, status, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(user.id)
    .bind(input.topic.as_deref().unwrap_or_default())
    .bind(input.description.as_deref().unwrap_or_default())
    .bind(input.prompt.as_deref().unwrap_or_default())
    .bind(input.keywords.as_deref().unwrap_or_default())
    .bind(input.num_posts.unwrap_or(DEFAULT_BATCH_SIZE))
    .bind(input.allow_web_search.unwrap_or(false))
    .bind(GenerationStatus::Pending)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await
    .map_err(internal_error)?
    .last_insert_rowid();

    tracing::info!("Batch request {} created by {}", id, user.username);
    state.spawn_batch(id);

    let batch = owned_batch(&state.pool, &user, id).await?;
    Ok((StatusCode::CREATED, Json(batch_response(&state.pool, batch).await?)))
}

async fn get_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user = extract_current_user(&state, &headers).await?;
    let batch = owned_batch(&state.pool, &user, id).await?;
    let ideas = parse_generated_ideas(batch.generated_ideas.as_deref());
    let children = sqlx::query_as::<_, BlogRequestSummary>(
        "SELECT id, topic, status, created_at, updated_at FROM ai_blog_requests WHERE parent_batch_id = ? ORDER BY created_at DESC, id DESC",
    )
    .bind(batch.id)
    .fetch_all(&state.pool)
    .await
    .map_err(internal_error)?;

    let mut response = BatchRequestResponse::new(batch, children.len() as i64);
    response.child_requests = Some(children);
    response.generated_ideas = Some(ideas);
    Ok(Json(response))
}

async fn replace_batch(
    state: State<AppState>,
    headers: HeaderMap,
    id: Path<i64>,
    Json(input): Json<BatchRequestInput>,
) -> Result<impl IntoResponse, ApiError> {
    update_batch(state, headers, id, input, true).await
}

async fn patch_batch(
    state: State<AppState>,
    headers: HeaderMap,
    id: Path<i64>,
    Json(input): Json<BatchRequestInput>,
) -> Result<impl IntoResponse, ApiError> {
    update_batch(state, headers, id, input, false).await
}

async fn update_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    input: BatchRequestInput,
    full: bool,
) -> Result<Json<BatchRequestResponse>, ApiError> {
    let user = extract_current_user(&state, &headers).await?;
    owned_batch(&state.pool, &user, id).await?;
    validate_batch_input(&input, full)?;

    let mut query = QueryBuilder::<Sqlite>::new("UPDATE ai_blog_batch_requests SET ");
    let mut fields = query.separated(", ");
    for (column, value) in [
        ("topic", &input.topic),
        ("description", &input.description),
        ("prompt", &input.prompt),
        ("keywords", &input.keywords),
    ] {
        if let Some(value) = value {
            fields.push(format!("{} = ", column));
            fields.push_bind_unseparated(value);
        }
    }
    if let Some(num_posts) = input.num_posts {
        fields.push("num_posts = ");
        fields.push_bind_unseparated(num_posts);
    }
    if let Some(allow) = input.allow_web_search {
        fields.push("allow_web_search = ");
        fields.push_bind_unseparated(allow);
    }
    fields.push("updated_at = ");
    fields.push_bind_unseparated(Utc::now());
    query.push(" WHERE id = ").push_bind(id);
    query.build().execute(&state.pool).await.map_err(internal_error)?;

    let batch = owned_batch(&state.pool, &user, id).await?;
    Ok(Json(batch_response(&state.pool, batch).await?))
}

async fn delete_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user = extract_current_user(&state, &headers).await?;
    owned_batch(&state.pool, &user, id).await?;
    sqlx::query("DELETE FROM ai_blog_batch_requests WHERE id = ?")
        .bind(id)
        .execute(&state.pool)
        .await
        .map_err(internal_error)?;
    tracing::info!("Batch request {} deleted by {}", id, user.username);
    Ok(StatusCode::NO_CONTENT)
}

async fn regenerate_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user = extract_current_user(&state, &headers).await?;
    let batch = owned_batch(&state.pool, &user, id).await?;

    let removed = discard_batch_children(&state.pool, batch.id)
        .await
        .map_err(internal_error)?;
    set_batch_status(&state.pool, batch.id, GenerationStatus::Pending, None)
        .await
        .map_err(internal_error)?;
    tracing::info!("Regenerating batch {} after removing {} child requests", batch.id, removed);
    state.spawn_batch(batch.id);

    Ok(Json(json!({"status": "regenerating"})))
}

#[cfg(test)]
mod tests {
    use crate::routes::test_support::{count, create_user, send, test_state};
    use axum::http::StatusCode;
    use chrono::Utc;
    use serde_json::json;
    use sqlx::SqlitePool;

    async fn seed_generation(pool: &SqlitePool, request_id: i64) -> i64 {
        let generation_id = sqlx::query(
            "INSERT INTO ai_blog_generations (request_id, title, content, excerpt, meta_title, meta_description, focus_keywords, created_at) VALUES (?, 'Rust Tips', '<p>Body</p>', 'Short', 'Rust Tips', 'About rust', 'rust', ?)",
        )
        .bind(request_id)
        .bind(Utc::now())
        .execute(pool)
        .await
        .unwrap()
        .last_insert_rowid();
        let category_id = sqlx::query("INSERT INTO blog_categories (name, slug, description) VALUES ('Tech', 'tech', '')")
            .execute(pool)
            .await
            .unwrap()
            .last_insert_rowid();
        sqlx::query("INSERT INTO ai_generation_categories (generation_id, category_id) VALUES (?, ?)")
            .bind(generation_id)
            .bind(category_id)
            .execute(pool)
            .await
            .unwrap();
        generation_id
    }

    #[tokio::test]
    async fn requests_require_authentication() {
        let (state, _media) = test_state().await;
        let (status, body) = send(&state, "GET", "/api/ai-blog/requests/", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["detail"], "Authentication credentials were not provided.");
    }

    #[tokio::test]
    async fn request_lifecycle_is_scoped_to_owner() {
        let (state, _media) = test_state().await;
        let (_, ana) = create_user(&state, "ana", false).await;
        let (_, bob) = create_user(&state, "bob", false).await;

        let (status, errors) = send(
            &state,
            "POST",
            "/api/ai-blog/requests/",
            Some(&ana),
            Some(json!({"topic": "Rust"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(errors["prompt"][0], "This field is required.");

        let (status, created) = send(
            &state,
            "POST",
            "/api/ai-blog/requests/",
            Some(&ana),
            Some(json!({"topic": "Rust", "prompt": "Write about ownership", "keywords": "rust, memory"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["status"], "pending");
        assert_eq!(created["allow_web_search"], false);
        assert_eq!(created["parent_batch"], serde_json::Value::Null);
        let id = created["id"].as_i64().unwrap();

        let (_, listed) = send(&state, "GET", "/api/ai-blog/requests/", Some(&ana), None).await;
        assert_eq!(listed.as_array().unwrap().len(), 1);
        assert!(listed[0].get("prompt").is_none());

        let (_, others) = send(&state, "GET", "/api/ai-blog/requests/", Some(&bob), None).await;
        assert_eq!(others, json!([]));
        let uri = format!("/api/ai-blog/requests/{}/", id);
        let (status, _) = send(&state, "GET", &uri, Some(&bob), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, patched) = send(&state, "PATCH", &uri, Some(&ana), Some(json!({"allow_web_search": true}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(patched["allow_web_search"], true);
        assert_eq!(patched["topic"], "Rust");

        let (status, _) = send(&state, "DELETE", &uri, Some(&ana), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(count(&state.pool, "SELECT COUNT(*) FROM ai_blog_requests").await, 0);
    }

    #[tokio::test]
    async fn missing_generation_uses_error_key() {
        let (state, _media) = test_state().await;
        let (_, token) = create_user(&state, "ana", false).await;
        let (_, created) = send(
            &state,
            "POST",
            "/api/ai-blog/requests",
            Some(&token),
            Some(json!({"topic": "Rust", "prompt": "p"})),
        )
        .await;
        let uri = format!("/api/ai-blog/requests/{}/generation/", created["id"]);
        let (status, body) = send(&state, "GET", &uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({"error": "Generation not found"}));
    }

    #[tokio::test]
    async fn regenerate_discards_completed_generation() {
        let (state, _media) = test_state().await;
        let (user_id, token) = create_user(&state, "ana", false).await;
        let request_id = sqlx::query(
            "INSERT INTO ai_blog_requests (user_id, prompt, topic, status, error_message, created_at, updated_at) VALUES (?, 'p', 't', 'completed', NULL, ?, ?)",
        )
        .bind(user_id)
        .bind(Utc::now())
        .bind(Utc::now())
        .execute(&state.pool)
        .await
        .unwrap()
        .last_insert_rowid();
        seed_generation(&state.pool, request_id).await;

        let uri = format!("/api/ai-blog/requests/{}/regenerate/", request_id);
        let (status, body) = send(&state, "POST", &uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "regenerating"}));
        assert_eq!(count(&state.pool, "SELECT COUNT(*) FROM ai_blog_generations").await, 0);
        assert_eq!(
            count(&state.pool, "SELECT COUNT(*) FROM ai_blog_requests WHERE status = 'pending'").await,
            1
        );
    }

    #[tokio::test]
    async fn regenerate_clears_generation_left_by_failed_request() {
        let (state, _media) = test_state().await;
        let (user_id, token) = create_user(&state, "ana", false).await;
        let request_id = sqlx::query(
            "INSERT INTO ai_blog_requests (user_id, prompt, topic, status, error_message, created_at, updated_at) VALUES (?, 'p', 't', 'failed', 'term link failed', ?, ?)",
        )
        .bind(user_id)
        .bind(Utc::now())
        .bind(Utc::now())
        .execute(&state.pool)
        .await
        .unwrap()
        .last_insert_rowid();
        seed_generation(&state.pool, request_id).await;

        let uri = format!("/api/ai-blog/requests/{}/regenerate/", request_id);
        let (status, _) = send(&state, "POST", &uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(count(&state.pool, "SELECT COUNT(*) FROM ai_blog_generations").await, 0);
        assert_eq!(
            count(
                &state.pool,
                "SELECT COUNT(*) FROM ai_blog_requests WHERE status = 'pending' AND error_message IS NULL"
            )
            .await,
            1
        );
    }

    #[tokio::test]
    async fn publish_creates_post_with_suggested_terms() {
        let (state, _media) = test_state().await;
        let (user_id, token) = create_user(&state, "ana", false).await;
        let request_id = sqlx::query(
            "INSERT INTO ai_blog_requests (user_id, prompt, topic, status, created_at, updated_at) VALUES (?, 'p', 't', 'completed', ?, ?)",
        )
        .bind(user_id)
        .bind(Utc::now())
        .bind(Utc::now())
        .execute(&state.pool)
        .await
        .unwrap()
        .last_insert_rowid();
        let generation_id = seed_generation(&state.pool, request_id).await;

        let (status, generation) = send(
            &state,
            "GET",
            &format!("/api/ai-blog/generations/{}", generation_id),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(generation["blog_post"], serde_json::Value::Null);
        assert_eq!(generation["suggested_categories"][0]["slug"], "tech");

        let uri = format!("/api/ai-blog/generations/{}/publish/", generation_id);
        let (status, body) = send(&state, "POST", &uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "published");
        let post_id = body["blog_post_id"].as_i64().unwrap();

        let (_, again) = send(&state, "POST", &uri, Some(&token), None).await;
        assert_eq!(again["blog_post_id"].as_i64().unwrap(), post_id);
        assert_eq!(count(&state.pool, "SELECT COUNT(*) FROM blog_posts").await, 1);

        let (_, generation) = send(
            &state,
            "GET",
            &format!("/api/ai-blog/generations/{}", generation_id),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(generation["blog_post"]["status"], "published");
        assert_eq!(generation["blog_post"]["slug"], "rust-tips");
        assert_eq!(generation["blog_post"]["categories"][0]["name"], "Tech");
    }

    #[tokio::test]
    async fn batch_validation_and_detail() {
        let (state, _media) = test_state().await;
        let (_, token) = create_user(&state, "ana", false).await;

        let (status, errors) = send(
            &state,
            "POST",
            "/api/ai-blog/batch-requests/",
            Some(&token),
            Some(json!({"topic": "Rust", "description": "d", "prompt": "p", "num_posts": 21})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(errors["num_posts"].is_array());

        let (status, created) = send(
            &state,
            "POST",
            "/api/ai-blog/batch-requests/",
            Some(&token),
            Some(json!({"topic": "Rust", "description": "d", "prompt": "p"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["num_posts"], 5);
        assert_eq!(created["child_requests_count"], 0);
        assert!(created.get("generated_ideas").is_none());

        let id = created["id"].as_i64().unwrap();
        sqlx::query("UPDATE ai_blog_batch_requests SET generated_ideas = 'broken' WHERE id = ?")
            .bind(id)
            .execute(&state.pool)
            .await
            .unwrap();
        let (_, detail) = send(&state, "GET", &format!("/api/ai-blog/batch-requests/{}", id), Some(&token), None).await;
        assert_eq!(detail["generated_ideas"], json!([]));
        assert_eq!(detail["child_requests"], json!([]));
    }

    #[tokio::test]
    async fn batch_regenerate_removes_children() {
        let (state, _media) = test_state().await;
        let (user_id, token) = create_user(&state, "ana", false).await;
        let batch_id = sqlx::query(
            "INSERT INTO ai_blog_batch_requests (user_id, topic, description, prompt, status, error_message, created_at, updated_at) VALUES (?, 't', 'd', 'p', 'failed', 'boom', ?, ?)",
        )
        .bind(user_id)
        .bind(Utc::now())
        .bind(Utc::now())
        .execute(&state.pool)
        .await
        .unwrap()
        .last_insert_rowid();
        for _ in 0..2 {
            sqlx::query(
                "INSERT INTO ai_blog_requests (user_id, prompt, topic, parent_batch_id, created_at, updated_at) VALUES (?, 'p', 't', ?, ?, ?)",
            )
            .bind(user_id)
            .bind(batch_id)
            .bind(Utc::now())
            .bind(Utc::now())
            .execute(&state.pool)
            .await
            .unwrap();
        }

        let (_, listed) = send(&state, "GET", "/api/ai-blog/batch-requests", Some(&token), None).await;
        assert_eq!(listed[0]["child_requests_count"], 2);

        let uri = format!("/api/ai-blog/batch-requests/{}/regenerate", batch_id);
        let (status, body) = send(&state, "POST", &uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "regenerating"}));
        assert_eq!(count(&state.pool, "SELECT COUNT(*) FROM ai_blog_requests").await, 0);

        let (_, detail) = send(&state, "GET", &format!("/api/ai-blog/batch-requests/{}", batch_id), Some(&token), None).await;
        assert_eq!(detail["status"], "pending");
        assert_eq!(detail["error_message"], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn auth_test_reports_token() {
        let (state, _media) = test_state().await;
        let (_, token) = create_user(&state, "ana", false).await;
        let (status, body) = send(&state, "GET", "/api/ai-blog/requests/auth_test/", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["authenticated"], true);
        assert_eq!(body["user"], "ana");
        assert_eq!(body["token_key"], token);
        assert_eq!(body["auth_header"], format!("Token {}", token));
    }
}
