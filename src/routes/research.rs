use axum::{
    Json, Router,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{Datelike, Utc};
use serde_json::{Value, json};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

use super::auth::extract_current_user;
use super::{ApiError, FieldErrors, bad_request, forbidden, internal_error, not_found, push_search_any};
use crate::content::{SlugTable, slugify, unique_slug};
use crate::models::{
    AddCollaborator, Analysis, AnalysisInput, AnalysisQuery, AnalysisResponse, AnalysisStatus, CommentInput,
    CommentQuery, CommentResponse, DataSet, DataSetPatch, DataSetQuery, DataSetResponse, DataType, MAX_BIO_CHARS,
    Profile, ProfileInput, ProfileResponse, Project, ProjectInput, ProjectQuery, ProjectResponse, ResearchComment,
    User, UserResponse, parse_json_object,
};
use crate::state::AppState;

const DATA_DIR: &str = "research_data";
const NO_PERMISSION: &str = "You do not have permission to perform this action.";

pub fn research_routes() -> Router<AppState> {
    Router::new()
        .route("/profiles", get(list_profiles))
        .route(
            "/profiles/{id}",
            get(get_profile).put(update_profile).patch(update_profile),
        )
        .route("/projects", get(list_projects).post(create_project))
        .route(
            "/projects/{id}",
            get(get_project)
                .put(replace_project)
                .patch(patch_project)
                .delete(delete_project),
        )
        .route("/projects/{id}/add_collaborator", post(add_collaborator))
        .route("/data", get(list_data).post(upload_data))
        .route(
            "/data/{id}",
            get(get_data).put(update_data).patch(update_data).delete(delete_data),
        )
        .route("/analyses", get(list_analyses).post(create_analysis))
        .route(
            "/analyses/{id}",
            get(get_analysis)
                .put(replace_analysis)
                .patch(patch_analysis)
                .delete(delete_analysis),
        )
        .route("/analyses/{id}/retry_analysis", post(retry_analysis))
        .route("/comments", get(list_comments).post(create_comment))
        .route(
            "/comments/{id}",
            get(get_comment)
                .put(update_comment)
                .patch(update_comment)
                .delete(delete_comment),
        )
}

fn error_body(status: StatusCode, message: &str) -> ApiError {
    (status, Json(json!({"error": message})))
}

async fn user_response(pool: &SqlitePool, user_id: i64) -> Result<UserResponse, ApiError> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_one(pool)
        .await
        .map_err(internal_error)?;
    Ok(UserResponse::from(user))
}

async fn optional_user_response(pool: &SqlitePool, user_id: Option<i64>) -> Result<Option<UserResponse>, ApiError> {
    match user_id {
        Some(id) => Ok(Some(user_response(pool, id).await?)),
        None => Ok(None),
    }
}

/// Restricts `query` to projects aliased `p` that `user` owns, collaborates on, or that are public.
fn push_visible_projects(query: &mut QueryBuilder<'_, Sqlite>, user: &User) {
    query
        .push(" (p.owner_id = ")
        .push_bind(user.id)
        .push(" OR p.is_public = 1 OR EXISTS (SELECT 1 FROM research_project_collaborators rc WHERE rc.project_id = p.id AND rc.user_id = ")
        .push_bind(user.id)
        .push("))");
}

/// How the current user relates to a project.
struct ProjectAccess {
    project: Project,
    owner: bool,
    collaborator: bool,
}

impl ProjectAccess {
    fn can_read(&self) -> bool {
        self.owner || self.collaborator || self.project.is_public
    }

    fn is_member(&self) -> bool {
        self.owner || self.collaborator
    }
}

async fn project_access(pool: &SqlitePool, user: &User, project_id: i64) -> Result<Option<ProjectAccess>, ApiError> {
    let Some(project) = sqlx::query_as::<_, Project>("SELECT * FROM research_projects WHERE id = ?")
        .bind(project_id)
        .fetch_optional(pool)
        .await
        .map_err(internal_error)?
    else {
        return Ok(None);
    };
    let (collaborators,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM research_project_collaborators WHERE project_id = ? AND user_id = ?",
    )
    .bind(project_id)
    .bind(user.id)
    .fetch_one(pool)
    .await
    .map_err(internal_error)?;
    Ok(Some(ProjectAccess {
        owner: project.owner_id == user.id,
        collaborator: collaborators > 0,
        project,
    }))
}

/// Project a write may target: must be visible, and the user must be a member.
async fn writable_project(
    pool: &SqlitePool,
    user: &User,
    project_id: i64,
    errors: &mut FieldErrors,
) -> Result<Option<ProjectAccess>, ApiError> {
    match project_access(pool, user, project_id).await? {
        Some(access) if access.can_read() => {
            if !access.is_member() {
                return Err(forbidden(NO_PERMISSION));
            }
            Ok(Some(access))
        }
        _ => {
            errors.add("project", format!("Invalid pk \"{}\" - object does not exist.", project_id));
            Ok(None)
        }
    }
}

/// Loads the project behind a project-scoped object, enforcing read or member-write access.
async fn scoped_access(pool: &SqlitePool, user: &User, project_id: i64, write: bool) -> Result<(), ApiError> {
    let access = project_access(pool, user, project_id)
        .await?
        .filter(ProjectAccess::can_read)
        .ok_or_else(not_found)?;
    if write && !access.is_member() {
        return Err(forbidden(NO_PERMISSION));
    }
    Ok(())
}

// ============================
// Profiles
// ============================

async fn profile_response(pool: &SqlitePool, profile: Profile) -> Result<ProfileResponse, ApiError> {
    Ok(ProfileResponse {
        id: profile.id,
        user: user_response(pool, profile.user_id).await?,
        bio: profile.bio,
        institution: profile.institution,
        position: profile.position,
        research_interests: profile.research_interests,
        website: profile.website,
        created_at: profile.created_at,
        updated_at: profile.updated_at,
    })
}

#[derive(Debug, serde::Deserialize, Default)]
struct SearchQuery {
    search: Option<String>,
}

async fn list_profiles(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let user = extract_current_user(&state, &headers).await?;
    let mut sql = QueryBuilder::<Sqlite>::new(
        "SELECT rp.* FROM research_profiles rp JOIN users u ON u.id = rp.user_id WHERE rp.user_id = ",
    );
    sql.push_bind(user.id);
    push_search_any(
        &mut sql,
        &["u.username", "rp.institution", "rp.research_interests"],
        query.search.as_deref(),
    );
    let profiles = sql
        .build_query_as::<Profile>()
        .fetch_all(&state.pool)
        .await
        .map_err(internal_error)?;

    let mut results = Vec::with_capacity(profiles.len());
    for profile in profiles {
        results.push(profile_response(&state.pool, profile).await?);
    }
    Ok(Json(results))
}

async fn fetch_profile(pool: &SqlitePool, id: i64) -> Result<Profile, ApiError> {
    sqlx::query_as::<_, Profile>("SELECT * FROM research_profiles WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(internal_error)?
        .ok_or_else(not_found)
}

async fn get_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    extract_current_user(&state, &headers).await?;
    let profile = fetch_profile(&state.pool, id).await?;
    Ok(Json(profile_response(&state.pool, profile).await?))
}

async fn update_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(input): Json<ProfileInput>,
) -> Result<impl IntoResponse, ApiError> {
    let user = extract_current_user(&state, &headers).await?;
    let profile = fetch_profile(&state.pool, id).await?;
    if profile.user_id != user.id {
        return Err(forbidden(NO_PERMISSION));
    }

    let mut errors = FieldErrors::new();
    errors.max_chars("bio", input.bio.as_deref(), MAX_BIO_CHARS);
    if let Some(website) = input.website.as_deref().filter(|site| !site.is_empty()) {
        if reqwest::Url::parse(website).is_err() {
            errors.add("website", "Enter a valid URL.");
        }
    }
    errors.into_result()?;

    let mut query = QueryBuilder::<Sqlite>::new("UPDATE research_profiles SET ");
    let mut fields = query.separated(", ");
    for (column, value) in [
        ("bio", &input.bio),
        ("institution", &input.institution),
        ("position", &input.position),
        ("research_interests", &input.research_interests),
        ("website", &input.website),
    ] {
        if let Some(value) = value {
            fields.push(format!("{} = ", column));
            fields.push_bind_unseparated(value);
        }
    }
    fields.push("updated_at = ");
    fields.push_bind_unseparated(Utc::now());
    query.push(" WHERE id = ").push_bind(profile.id);
    query.build().execute(&state.pool).await.map_err(internal_error)?;

    let profile = fetch_profile(&state.pool, id).await?;
    Ok(Json(profile_response(&state.pool, profile).await?))
}

// ============================
// Projects
// ============================

async fn project_response(pool: &SqlitePool, project: Project) -> Result<ProjectResponse, ApiError> {
    let owner = user_response(pool, project.owner_id).await?;
    let collaborators = sqlx::query_as::<_, User>(
        r#"
        SELECT u.* FROM users u
        JOIN research_project_collaborators rc ON rc.user_id = u.id
        WHERE rc.project_id = ?
        ORDER BY u.id
        "#,
    )
    .bind(project.id)
    .fetch_all(pool)
    .await
    .map_err(internal_error)?
    .into_iter()
    .map(UserResponse::from)
    .collect();

    Ok(ProjectResponse {
        id: project.id,
        title: project.title,
        slug: project.slug,
        description: project.description,
        owner,
        collaborators,
        status: project.status,
        is_public: project.is_public,
        start_date: project.start_date,
        end_date: project.end_date,
        created_at: project.created_at,
        updated_at: project.updated_at,
    })
}

/// `ORDER BY` clause for `created_at|updated_at|title`, optionally prefixed with `-`.
fn project_order(ordering: Option<&str>) -> String {
    let requested = ordering.unwrap_or("-created_at").trim();
    let (column, descending) = match requested.strip_prefix('-') {
        Some(column) => (column, true),
        None => (requested, false),
    };
    let (column, descending) = match column {
        "created_at" | "updated_at" | "title" => (column, descending),
        _ => ("created_at", true),
    };
    let direction = if descending { "DESC" } else { "ASC" };
    format!(" ORDER BY p.{} {}, p.id {}", column, direction, direction)
}

async fn list_projects(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ProjectQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let user = extract_current_user(&state, &headers).await?;
    let mut sql = QueryBuilder::<Sqlite>::new("SELECT p.* FROM research_projects p WHERE");
    push_visible_projects(&mut sql, &user);
    if let Some(status) = query.status {
        sql.push(" AND p.status = ").push_bind(status);
    }
    if let Some(is_public) = query.is_public {
        sql.push(" AND p.is_public = ").push_bind(is_public);
    }
    push_search_any(&mut sql, &["p.title", "p.description"], query.search.as_deref());
    sql.push(project_order(query.ordering.as_deref()));

    let projects = sql
        .build_query_as::<Project>()
        .fetch_all(&state.pool)
        .await
        .map_err(internal_error)?;
    let mut results = Vec::with_capacity(projects.len());
    for project in projects {
        results.push(project_response(&state.pool, project).await?);
    }
    Ok(Json(results))
}

fn validate_project(input: &ProjectInput, full: bool) -> Result<(), ApiError> {
    let mut errors = FieldErrors::new();
    if full || input.title.is_some() {
        errors.require("title", input.title.as_deref());
    }
    errors.max_chars("title", input.title.as_deref(), 200);
    if full || input.description.is_some() {
        errors.require("description", input.description.as_deref());
    }
    errors.into_result()
}

async fn project_slug(pool: &SqlitePool, title: &str) -> Result<String, ApiError> {
    let base = slugify(title);
    match unique_slug(pool, SlugTable::Projects, &base, None)
        .await
        .map_err(internal_error)?
    {
        Some(slug) => Ok(slug),
        None => {
            let base = if base.is_empty() { "project".to_string() } else { base };
            let suffix = Uuid::new_v4().simple().to_string();
            Ok(format!("{}-{}", base, &suffix[..8]))
        }
    }
}

async fn create_project(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<ProjectInput>,
) -> Result<impl IntoResponse, ApiError> {
    let user = extract_current_user(&state, &headers).await?;
    validate_project(&input, true)?;

    let title = input.title.as_deref().unwrap_or_default();
    let slug = project_slug(&state.pool, title).await?;
    let now = Utc::now();
    let id = sqlx::query(
        r#"
        INSERT INTO research_projects (
            title, slug, description, owner_id, status, is_public, start_date, end_date, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(title)
    .bind(&slug)
    .bind(input.description.as_deref().unwrap_or_default())
    .bind(user.id)
    .bind(input.status.unwrap_or_default())
    .bind(input.is_public.unwrap_or(false))
    .bind(input.start_date)
    .bind(input.end_date)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await
    .map_err(internal_error)?
    .last_insert_rowid();

    tracing::info!("Research project {} ({}) created by {}", id, slug, user.username);
    let access = project_access(&state.pool, &user, id).await?.ok_or_else(not_found)?;
    Ok((StatusCode::CREATED, Json(project_response(&state.pool, access.project).await?)))
}

async fn readable_project(state: &AppState, user: &User, id: i64) -> Result<ProjectAccess, ApiError> {
    project_access(&state.pool, user, id)
        .await?
        .filter(ProjectAccess::can_read)
        .ok_or_else(not_found)
}

async fn get_project(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user = extract_current_user(&state, &headers).await?;
    let access = readable_project(&state, &user, id).await?;
    Ok(Json(project_response(&state.pool, access.project).await?))
}

async fn replace_project(
    state: State<AppState>,
    headers: HeaderMap,
    id: Path<i64>,
    Json(input): Json<ProjectInput>,
) -> Result<impl IntoResponse, ApiError> {
    update_project(state, headers, id, input, true).await
}

async fn patch_project(
    state: State<AppState>,
    headers: HeaderMap,
    id: Path<i64>,
    Json(input): Json<ProjectInput>,
) -> Result<impl IntoResponse, ApiError> {
    update_project(state, headers, id, input, false).await
}

async fn update_project(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    input: ProjectInput,
    full: bool,
) -> Result<Json<ProjectResponse>, ApiError> {
    let user = extract_current_user(&state, &headers).await?;
    let access = readable_project(&state, &user, id).await?;
    if !access.owner {
        return Err(forbidden(NO_PERMISSION));
    }
    validate_project(&input, full)?;

    let mut query = QueryBuilder::<Sqlite>::new("UPDATE research_projects SET ");
    let mut fields = query.separated(", ");
    if let Some(title) = &input.title {
        fields.push("title = ");
        fields.push_bind_unseparated(title);
    }
    if let Some(description) = &input.description {
        fields.push("description = ");
        fields.push_bind_unseparated(description);
    }
    if let Some(status) = input.status {
        fields.push("status = ");
        fields.push_bind_unseparated(status);
    }
    if let Some(is_public) = input.is_public {
        fields.push("is_public = ");
        fields.push_bind_unseparated(is_public);
    }
    if full || input.start_date.is_some() {
        fields.push("start_date = ");
        fields.push_bind_unseparated(input.start_date);
    }
    if full || input.end_date.is_some() {
        fields.push("end_date = ");
        fields.push_bind_unseparated(input.end_date);
    }
    fields.push("updated_at = ");
    fields.push_bind_unseparated(Utc::now());
    query.push(" WHERE id = ").push_bind(id);
    query.build().execute(&state.pool).await.map_err(internal_error)?;

    let access = readable_project(&state, &user, id).await?;
    Ok(Json(project_response(&state.pool, access.project).await?))
}

async fn delete_project(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user = extract_current_user(&state, &headers).await?;
    let access = readable_project(&state, &user, id).await?;
    if !access.owner {
        return Err(forbidden(NO_PERMISSION));
    }
    sqlx::query("DELETE FROM research_projects WHERE id = ?")
        .bind(id)
        .execute(&state.pool)
        .await
        .map_err(internal_error)?;
    tracing::info!("Research project {} deleted by {}", id, user.username);
    Ok(StatusCode::NO_CONTENT)
}

async fn add_collaborator(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(input): Json<AddCollaborator>,
) -> Result<impl IntoResponse, ApiError> {
    let user = extract_current_user(&state, &headers).await?;
    let access = readable_project(&state, &user, id).await?;
    if !access.owner {
        return Err(error_body(StatusCode::FORBIDDEN, "Only project owner can add collaborators"));
    }
    let Some(user_id) = input.user_id.filter(|id| *id != 0) else {
        return Err(error_body(StatusCode::BAD_REQUEST, "user_id is required"));
    };
    let exists: Option<(i64,)> = sqlx::query_as("SELECT id FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(&state.pool)
        .await
        .map_err(internal_error)?;
    if exists.is_none() {
        return Err(error_body(StatusCode::NOT_FOUND, "User not found"));
    }

    sqlx::query("INSERT OR IGNORE INTO research_project_collaborators (project_id, user_id) VALUES (?, ?)")
        .bind(id)
        .bind(user_id)
        .execute(&state.pool)
        .await
        .map_err(internal_error)?;
    tracing::info!("User {} added to research project {}", user_id, id);
    Ok(Json(json!({"status": "collaborator added"})))
}

// ============================
// Data sets
// ============================

async fn data_response(pool: &SqlitePool, data: DataSet) -> Result<DataSetResponse, ApiError> {
    Ok(DataSetResponse {
        id: data.id,
        project: data.project_id,
        title: data.title,
        description: data.description,
        data_type: data.data_type,
        file: data.file_path,
        uploaded_by: optional_user_response(pool, data.uploaded_by_id).await?,
        version: data.version,
        metadata: parse_json_object(&data.metadata),
        created_at: data.created_at,
        updated_at: data.updated_at,
    })
}

async fn list_data(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<DataSetQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let user = extract_current_user(&state, &headers).await?;
    let mut sql =
        QueryBuilder::<Sqlite>::new("SELECT d.* FROM research_data d JOIN research_projects p ON p.id = d.project_id WHERE");
    push_visible_projects(&mut sql, &user);
    if let Some(data_type) = query.data_type {
        sql.push(" AND d.data_type = ").push_bind(data_type);
    }
    if let Some(project) = query.project {
        sql.push(" AND d.project_id = ").push_bind(project);
    }
    push_search_any(&mut sql, &["d.title", "d.description"], query.search.as_deref());
    sql.push(" ORDER BY d.created_at DESC, d.id DESC");

    let data_sets = sql
        .build_query_as::<DataSet>()
        .fetch_all(&state.pool)
        .await
        .map_err(internal_error)?;
    let mut results = Vec::with_capacity(data_sets.len());
    for data in data_sets {
        results.push(data_response(&state.pool, data).await?);
    }
    Ok(Json(results))
}

/// Fields of a multipart data set upload.
#[derive(Default)]
struct DataUpload {
    project: Option<String>,
    title: Option<String>,
    description: Option<String>,
    data_type: Option<String>,
    version: Option<String>,
    metadata: Option<String>,
    file: Option<(String, Vec<u8>)>,
}

async fn read_upload(mut multipart: Multipart) -> Result<DataUpload, ApiError> {
    let mut upload = DataUpload::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(&e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            let extension = field
                .file_name()
                .and_then(|name| std::path::Path::new(name).extension())
                .and_then(|ext| ext.to_str())
                .map(str::to_lowercase)
                .unwrap_or_else(|| "bin".to_string());
            let data = field.bytes().await.map_err(|e| bad_request(&e.to_string()))?;
            upload.file = Some((extension, data.to_vec()));
            continue;
        }
        let text = field.text().await.map_err(|e| bad_request(&e.to_string()))?;
        match name.as_str() {
            "project" => upload.project = Some(text),
            "title" => upload.title = Some(text),
            "description" => upload.description = Some(text),
            "data_type" => upload.data_type = Some(text),
            "version" => upload.version = Some(text),
            "metadata" => upload.metadata = Some(text),
            _ => {}
        }
    }
    Ok(upload)
}

fn parse_data_type(raw: &str) -> Option<DataType> {
    serde_json::from_value(Value::String(raw.to_string())).ok()
}

async fn upload_data(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let user = extract_current_user(&state, &headers).await?;
    let upload = read_upload(multipart).await?;

    let mut errors = FieldErrors::new();
    errors.require("title", upload.title.as_deref());
    errors.require("description", upload.description.as_deref());
    errors.require("data_type", upload.data_type.as_deref());
    let data_type = upload.data_type.as_deref().filter(|raw| !raw.is_empty()).and_then(|raw| {
        let parsed = parse_data_type(raw);
        if parsed.is_none() {
            errors.add("data_type", format!("\"{}\" is not a valid choice.", raw));
        }
        parsed
    });
    let metadata = match upload.metadata.as_deref().filter(|raw| !raw.trim().is_empty()) {
        Some(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(value) => value,
            Err(_) => {
                errors.add("metadata", "Value must be valid JSON.");
                Value::Null
            }
        },
        None => json!({}),
    };
    match &upload.file {
        None => errors.add("file", "No file was submitted."),
        Some((_, bytes)) if bytes.is_empty() => errors.add("file", "The submitted file is empty."),
        Some(_) => {}
    }
    let project_id = match upload.project.as_deref().map(str::trim) {
        None | Some("") => {
            errors.add("project", "This field is required.");
            None
        }
        Some(raw) => match raw.parse::<i64>() {
            Ok(id) => writable_project(&state.pool, &user, id, &mut errors)
                .await?
                .map(|access| access.project.id),
            Err(_) => {
                errors.add("project", "Incorrect type. Expected pk value.");
                None
            }
        },
    };
    errors.into_result()?;

    let (Some(project_id), Some(data_type), Some((extension, bytes))) = (project_id, data_type, upload.file) else {
        return Err(bad_request("Invalid upload."));
    };

    let today = Utc::now();
    let relative = format!("{}/{:04}/{:02}/{:02}", DATA_DIR, today.year(), today.month(), today.day());
    let directory = state.config.media_root.join(&relative);
    tokio::fs::create_dir_all(&directory)
        .await
        .map_err(internal_error)?;
    let file_name = format!("{}.{}", Uuid::new_v4(), extension);
    tokio::fs::write(directory.join(&file_name), &bytes)
        .await
        .map_err(internal_error)?;
    let file_path = format!("/media/{}/{}", relative, file_name);

    let now = Utc::now();
    let id = sqlx::query(
        r#"
        INSERT INTO research_data (
            project_id, title, description, data_type, file_path, uploaded_by_id, version, metadata, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(project_id)
    .bind(upload.title.as_deref().unwrap_or_default())
    .bind(upload.description.as_deref().unwrap_or_default())
    .bind(data_type)
    .bind(&file_path)
    .bind(user.id)
    .bind(upload.version.as_deref().unwrap_or_default())
    .bind(metadata.to_string())
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await
    .map_err(internal_error)?
    .last_insert_rowid();

    tracing::info!("Data set {} uploaded to project {} ({} bytes)", id, project_id, bytes.len());
    let data = fetch_data(&state.pool, id).await?;
    Ok((StatusCode::CREATED, Json(data_response(&state.pool, data).await?)))
}

async fn fetch_data(pool: &SqlitePool, id: i64) -> Result<DataSet, ApiError> {
    sqlx::query_as::<_, DataSet>("SELECT * FROM research_data WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(internal_error)?
        .ok_or_else(not_found)
}

async fn get_data(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user = extract_current_user(&state, &headers).await?;
    let data = fetch_data(&state.pool, id).await?;
    scoped_access(&state.pool, &user, data.project_id, false).await?;
    Ok(Json(data_response(&state.pool, data).await?))
}

async fn update_data(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(patch): Json<DataSetPatch>,
) -> Result<impl IntoResponse, ApiError> {
    let user = extract_current_user(&state, &headers).await?;
    let data = fetch_data(&state.pool, id).await?;
    scoped_access(&state.pool, &user, data.project_id, true).await?;

    let mut errors = FieldErrors::new();
    if patch.title.is_some() {
        errors.require("title", patch.title.as_deref());
    }
    if patch.description.is_some() {
        errors.require("description", patch.description.as_deref());
    }
    errors.into_result()?;

    let metadata = patch.metadata.as_ref().map(Value::to_string);
    let mut query = QueryBuilder::<Sqlite>::new("UPDATE research_data SET ");
    let mut fields = query.separated(", ");
    for (column, value) in [
        ("title", &patch.title),
        ("description", &patch.description),
        ("version", &patch.version),
        ("metadata", &metadata),
    ] {
        if let Some(value) = value {
            fields.push(format!("{} = ", column));
            fields.push_bind_unseparated(value);
        }
    }
    if let Some(data_type) = patch.data_type {
        fields.push("data_type = ");
        fields.push_bind_unseparated(data_type);
    }
    fields.push("updated_at = ");
    fields.push_bind_unseparated(Utc::now());
    query.push(" WHERE id = ").push_bind(id);
    query.build().execute(&state.pool).await.map_err(internal_error)?;

    let data = fetch_data(&state.pool, id).await?;
    Ok(Json(data_response(&state.pool, data).await?))
}

async fn delete_data(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user = extract_current_user(&state, &headers).await?;
    let data = fetch_data(&state.pool, id).await?;
    scoped_access(&state.pool, &user, data.project_id, true).await?;

    sqlx::query("DELETE FROM research_data WHERE id = ?")
        .bind(id)
        .execute(&state.pool)
        .await
        .map_err(internal_error)?;
    if let Some(relative) = data.file_path.strip_prefix("/media/") {
        if let Err(e) = tokio::fs::remove_file(state.config.media_root.join(relative)).await {
            tracing::warn!("Failed to remove data file {}: {}", data.file_path, e);
        }
    }
    Ok(StatusCode::NO_CONTENT)
}

// ============================
// Analyses
// ============================

async fn analysis_response(pool: &SqlitePool, analysis: Analysis) -> Result<AnalysisResponse, ApiError> {
    Ok(AnalysisResponse {
        id: analysis.id,
        project: analysis.project_id,
        data: analysis.data_id,
        title: analysis.title,
        description: analysis.description,
        analysis_type: analysis.analysis_type,
        parameters: parse_json_object(&analysis.parameters),
        results: parse_json_object(&analysis.results),
        status: analysis.status,
        error_message: analysis.error_message,
        requested_by: optional_user_response(pool, analysis.requested_by_id).await?,
        created_at: analysis.created_at,
        updated_at: analysis.updated_at,
    })
}

async fn fetch_analysis(pool: &SqlitePool, id: i64) -> Result<Analysis, ApiError> {
    sqlx::query_as::<_, Analysis>("SELECT * FROM research_analyses WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(internal_error)?
        .ok_or_else(not_found)
}

async fn list_analyses(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AnalysisQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let user = extract_current_user(&state, &headers).await?;
    let mut sql = QueryBuilder::<Sqlite>::new(
        "SELECT a.* FROM research_analyses a JOIN research_projects p ON p.id = a.project_id WHERE",
    );
    push_visible_projects(&mut sql, &user);
    if let Some(status) = query.status {
        sql.push(" AND a.status = ").push_bind(status);
    }
    if let Some(analysis_type) = &query.analysis_type {
        sql.push(" AND a.analysis_type = ").push_bind(analysis_type.clone());
    }
    if let Some(project) = query.project {
        sql.push(" AND a.project_id = ").push_bind(project);
    }
    push_search_any(&mut sql, &["a.title", "a.description"], query.search.as_deref());
    sql.push(" ORDER BY a.created_at DESC, a.id DESC");

    let analyses = sql
        .build_query_as::<Analysis>()
        .fetch_all(&state.pool)
        .await
        .map_err(internal_error)?;
    let mut results = Vec::with_capacity(analyses.len());
    for analysis in analyses {
        results.push(analysis_response(&state.pool, analysis).await?);
    }
    Ok(Json(results))
}

fn validate_analysis(input: &AnalysisInput, full: bool, errors: &mut FieldErrors) {
    if full || input.title.is_some() {
        errors.require("title", input.title.as_deref());
    }
    if full || input.description.is_some() {
        errors.require("description", input.description.as_deref());
    }
    if full || input.analysis_type.is_some() {
        errors.require("analysis_type", input.analysis_type.as_deref());
    }
    if let Some(parameters) = &input.parameters {
        if !parameters.is_object() {
            errors.add("parameters", "Value must be a JSON object.");
        }
    }
}

async fn create_analysis(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<AnalysisInput>,
) -> Result<impl IntoResponse, ApiError> {
    let user = extract_current_user(&state, &headers).await?;
    let mut errors = FieldErrors::new();
    validate_analysis(&input, true, &mut errors);

    let project_id = match input.project {
        Some(id) => writable_project(&state.pool, &user, id, &mut errors)
            .await?
            .map(|access| access.project.id),
        None => {
            errors.add("project", "This field is required.");
            None
        }
    };
    match input.data {
        Some(data_id) => {
            let data: Option<(i64,)> = sqlx::query_as("SELECT project_id FROM research_data WHERE id = ?")
                .bind(data_id)
                .fetch_optional(&state.pool)
                .await
                .map_err(internal_error)?;
            match data {
                None => errors.add("data", format!("Invalid pk \"{}\" - object does not exist.", data_id)),
                Some((data_project,)) if project_id.is_some_and(|id| id != data_project) => {
                    errors.add("data", "Data set does not belong to this project.")
                }
                Some(_) => {}
            }
        }
        None => errors.add("data", "This field is required."),
    }
    errors.into_result()?;

    let (Some(project_id), Some(data_id)) = (project_id, input.data) else {
        return Err(bad_request("Invalid analysis."));
    };
    let parameters = input.parameters.clone().unwrap_or_else(|| json!({}));
    let now = Utc::now();
    let id = sqlx::query(
        r#"
        INSERT INTO research_analyses (
            project_id, data_id, title, description, analysis_type, parameters, status, requested_by_id, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(project_id)
    .bind(data_id)
    .bind(input.title.as_deref().unwrap_or_default())
    .bind(input.description.as_deref().unwrap_or_default())
    .bind(input.analysis_type.as_deref().unwrap_or_default())
    .bind(parameters.to_string())
    .bind(AnalysisStatus::Pending)
    .bind(user.id)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await
    .map_err(internal_error)?
    .last_insert_rowid();

    tracing::info!("Analysis {} requested on data set {} by {}", id, data_id, user.username);
    let analysis = fetch_analysis(&state.pool, id).await?;
    Ok((StatusCode::CREATED, Json(analysis_response(&state.pool, analysis).await?)))
}

async fn get_analysis(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user = extract_current_user(&state, &headers).await?;
    let analysis = fetch_analysis(&state.pool, id).await?;
    scoped_access(&state.pool, &user, analysis.project_id, false).await?;
    Ok(Json(analysis_response(&state.pool, analysis).await?))
}

async fn replace_analysis(
    state: State<AppState>,
    headers: HeaderMap,
    id: Path<i64>,
    Json(input): Json<AnalysisInput>,
) -> Result<impl IntoResponse, ApiError> {
    update_analysis(state, headers, id, input, true).await
}

async fn patch_analysis(
    state: State<AppState>,
    headers: HeaderMap,
    id: Path<i64>,
    Json(input): Json<AnalysisInput>,
) -> Result<impl IntoResponse, ApiError> {
    update_analysis(state, headers, id, input, false).await
}

async fn update_analysis(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    input: AnalysisInput,
    full: bool,
) -> Result<Json<AnalysisResponse>, ApiError> {
    let user = extract_current_user(&state, &headers).await?;
    let analysis = fetch_analysis(&state.pool, id).await?;
    scoped_access(&state.pool, &user, analysis.project_id, true).await?;

    let mut errors = FieldErrors::new();
    validate_analysis(&input, full, &mut errors);
    errors.into_result()?;

    let parameters = input.parameters.as_ref().map(Value::to_string);
    let mut query = QueryBuilder::<Sqlite>::new("UPDATE research_analyses SET ");
    let mut fields = query.separated(", ");
    for (column, value) in [
        ("title", &input.title),
        ("description", &input.description),
        ("analysis_type", &input.analysis_type),
        ("parameters", &parameters),
    ] {
        if let Some(value) = value {
            fields.push(format!("{} = ", column));
            fields.push_bind_unseparated(value);
        }
    }
    fields.push("updated_at = ");
    fields.push_bind_unseparated(Utc::now());
    query.push(" WHERE id = ").push_bind(id);
    query.build().execute(&state.pool).await.map_err(internal_error)?;

    let analysis = fetch_analysis(&state.pool, id).await?;
    Ok(Json(analysis_response(&state.pool, analysis).await?))
}

async fn delete_analysis(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user = extract_current_user(&state, &headers).await?;
    let analysis = fetch_analysis(&state.pool, id).await?;
    scoped_access(&state.pool, &user, analysis.project_id, true).await?;
    sqlx::query("DELETE FROM research_analyses WHERE id = ?")
        .bind(id)
        .execute(&state.pool)
        .await
        .map_err(internal_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn retry_analysis(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user = extract_current_user(&state, &headers).await?;
    let analysis = fetch_analysis(&state.pool, id).await?;
    scoped_access(&state.pool, &user, analysis.project_id, true).await?;
    if analysis.status != AnalysisStatus::Failed {
        return Err(error_body(StatusCode::BAD_REQUEST, "Only failed analyses can be retried"));
    }

    sqlx::query("UPDATE research_analyses SET status = ?, error_message = '', updated_at = ? WHERE id = ?")
        .bind(AnalysisStatus::Pending)
        .bind(Utc::now())
        .bind(id)
        .execute(&state.pool)
        .await
        .map_err(internal_error)?;
    tracing::info!("Analysis {} queued for retry by {}", id, user.username);
    Ok(Json(json!({"status": "analysis queued"})))
}

// ============================
// Comments
// ============================

async fn comment_response(pool: &SqlitePool, comment: ResearchComment) -> Result<CommentResponse, ApiError> {
    Ok(CommentResponse {
        id: comment.id,
        project: comment.project_id,
        author: user_response(pool, comment.author_id).await?,
        content: comment.content,
        parent: comment.parent_id,
        created_at: comment.created_at,
        updated_at: comment.updated_at,
    })
}

async fn fetch_comment(pool: &SqlitePool, id: i64) -> Result<ResearchComment, ApiError> {
    sqlx::query_as::<_, ResearchComment>("SELECT * FROM research_comments WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(internal_error)?
        .ok_or_else(not_found)
}

async fn list_comments(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CommentQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let user = extract_current_user(&state, &headers).await?;
    let mut sql = QueryBuilder::<Sqlite>::new(
        "SELECT c.* FROM research_comments c JOIN research_projects p ON p.id = c.project_id WHERE",
    );
    push_visible_projects(&mut sql, &user);
    if let Some(project) = query.project {
        sql.push(" AND c.project_id = ").push_bind(project);
    }
    sql.push(" ORDER BY c.created_at ASC, c.id ASC");

    let comments = sql
        .build_query_as::<ResearchComment>()
        .fetch_all(&state.pool)
        .await
        .map_err(internal_error)?;
    let mut results = Vec::with_capacity(comments.len());
    for comment in comments {
        results.push(comment_response(&state.pool, comment).await?);
    }
    Ok(Json(results))
}

async fn create_comment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<CommentInput>,
) -> Result<impl IntoResponse, ApiError> {
    let user = extract_current_user(&state, &headers).await?;
    let mut errors = FieldErrors::new();
    errors.require("content", input.content.as_deref());

    let project_id = match input.project {
        Some(id) => writable_project(&state.pool, &user, id, &mut errors)
            .await?
            .map(|access| access.project.id),
        None => {
            errors.add("project", "This field is required.");
            None
        }
    };
    if let Some(parent_id) = input.parent {
        let parent: Option<(i64,)> = sqlx::query_as("SELECT project_id FROM research_comments WHERE id = ?")
            .bind(parent_id)
            .fetch_optional(&state.pool)
            .await
            .map_err(internal_error)?;
        match parent {
            None => errors.add("parent", format!("Invalid pk \"{}\" - object does not exist.", parent_id)),
            Some((parent_project,)) if project_id.is_some_and(|id| id != parent_project) => {
                errors.add("parent", "Parent comment belongs to another project.")
            }
            Some(_) => {}
        }
    }
    errors.into_result()?;

    let Some(project_id) = project_id else {
        return Err(bad_request("Invalid comment."));
    };
    let now = Utc::now();
    let id = sqlx::query(
        "INSERT INTO research_comments (project_id, author_id, content, parent_id, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(project_id)
    .bind(user.id)
    .bind(input.content.as_deref().unwrap_or_default())
    .bind(input.parent)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await
    .map_err(internal_error)?
    .last_insert_rowid();

    let comment = fetch_comment(&state.pool, id).await?;
    Ok((StatusCode::CREATED, Json(comment_response(&state.pool, comment).await?)))
}

async fn get_comment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user = extract_current_user(&state, &headers).await?;
    let comment = fetch_comment(&state.pool, id).await?;
    scoped_access(&state.pool, &user, comment.project_id, false).await?;
    Ok(Json(comment_response(&state.pool, comment).await?))
}

async fn update_comment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(input): Json<CommentInput>,
) -> Result<impl IntoResponse, ApiError> {
    let user = extract_current_user(&state, &headers).await?;
    let comment = fetch_comment(&state.pool, id).await?;
    scoped_access(&state.pool, &user, comment.project_id, true).await?;

    let Some(content) = input.content else {
        return Ok(Json(comment_response(&state.pool, comment).await?));
    };
    let mut errors = FieldErrors::new();
    errors.require("content", Some(&content));
    errors.into_result()?;

    sqlx::query("UPDATE research_comments SET content = ?, updated_at = ? WHERE id = ?")
        .bind(&content)
        .bind(Utc::now())
        .bind(id)
        .execute(&state.pool)
        .await
        .map_err(internal_error)?;
    let comment = fetch_comment(&state.pool, id).await?;
    Ok(Json(comment_response(&state.pool, comment).await?))
}

async fn delete_comment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user = extract_current_user(&state, &headers).await?;
    let comment = fetch_comment(&state.pool, id).await?;
    scoped_access(&state.pool, &user, comment.project_id, true).await?;
    sqlx::query("DELETE FROM research_comments WHERE id = ?")
        .bind(id)
        .execute(&state.pool)
        .await
        .map_err(internal_error)?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use crate::routes::app;
    use crate::routes::test_support::{count, create_user, send, test_state};
    use crate::state::AppState;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    async fn create_project(state: &AppState, token: &str, title: &str, is_public: bool) -> i64 {
        let (status, body) = send(
            state,
            "POST",
            "/api/research/projects/",
            Some(token),
            Some(json!({"title": title, "description": "A study", "is_public": is_public})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["id"].as_i64().unwrap()
    }

    async fn upload(state: &AppState, token: &str, project: i64, metadata: &str) -> (StatusCode, Value) {
        let boundary = "research-boundary";
        let mut body = String::new();
        for (name, value) in [
            ("project", project.to_string()),
            ("title", "Survey".to_string()),
            ("description", "Raw answers".to_string()),
            ("data_type", "raw".to_string()),
            ("metadata", metadata.to_string()),
        ] {
            body.push_str(&format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            ));
        }
        body.push_str(&format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"answers.CSV\"\r\nContent-Type: text/csv\r\n\r\na,b\n1,2\r\n--{boundary}--\r\n"
        ));

        let request = Request::builder()
            .method("POST")
            .uri("/api/research/data/")
            .header("Authorization", format!("Token {}", token))
            .header("Content-Type", format!("multipart/form-data; boundary={}", boundary))
            .body(Body::from(body))
            .unwrap();
        let response = app(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn projects_visible_to_owner_collaborators_and_public() {
        let (state, _media) = test_state().await;
        let (_, owner) = create_user(&state, "owner", false).await;
        let (helper_id, helper) = create_user(&state, "helper", false).await;
        let (_, outsider) = create_user(&state, "outsider", false).await;

        let private = create_project(&state, &owner, "Sleep Study", false).await;
        create_project(&state, &owner, "Open Data", true).await;

        let (_, seen) = send(&state, "GET", "/api/research/projects/", Some(&outsider), None).await;
        assert_eq!(seen.as_array().unwrap().len(), 1);
        assert_eq!(seen[0]["slug"], "open-data");

        let uri = format!("/api/research/projects/{}/add_collaborator/", private);
        let (status, body) = send(&state, "POST", &uri, Some(&helper), Some(json!({}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "Not found.");

        let (status, body) = send(&state, "POST", &uri, Some(&owner), Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "user_id is required");

        let (status, body) = send(&state, "POST", &uri, Some(&owner), Some(json!({"user_id": 999}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "User not found");

        let (status, body) = send(&state, "POST", &uri, Some(&owner), Some(json!({"user_id": helper_id}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "collaborator added"}));

        let (_, seen) = send(&state, "GET", "/api/research/projects/?ordering=title", Some(&helper), None).await;
        assert_eq!(seen.as_array().unwrap().len(), 2);
        assert_eq!(seen[0]["title"], "Open Data");
        assert_eq!(seen[1]["collaborators"][0]["username"], "helper");

        let (status, body) = send(&state, "POST", &uri, Some(&helper), Some(json!({"user_id": helper_id}))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "Only project owner can add collaborators");

        let detail = format!("/api/research/projects/{}", private);
        let (status, _) = send(&state, "PATCH", &detail, Some(&helper), Some(json!({"status": "active"}))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, body) = send(&state, "PATCH", &detail, Some(&owner), Some(json!({"status": "active"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "active");
        assert_eq!(body["slug"], "sleep-study");
    }

    #[tokio::test]
    async fn duplicate_project_titles_get_distinct_slugs() {
        let (state, _media) = test_state().await;
        let (_, owner) = create_user(&state, "owner", false).await;
        create_project(&state, &owner, "Sleep Study", false).await;
        let second = create_project(&state, &owner, "Sleep Study", false).await;
        let (_, body) = send(&state, "GET", &format!("/api/research/projects/{}", second), Some(&owner), None).await;
        assert_eq!(body["slug"], "sleep-study-1");
    }

    #[tokio::test]
    async fn data_upload_stores_file_and_metadata() {
        let (state, media) = test_state().await;
        let (_, owner) = create_user(&state, "owner", false).await;
        let (_, outsider) = create_user(&state, "outsider", false).await;
        let project = create_project(&state, &owner, "Survey", true).await;

        let (status, errors) = upload(&state, &owner, project, "{not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(errors["metadata"][0], "Value must be valid JSON.");

        let (status, _) = upload(&state, &outsider, project, "{}").await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, data) = upload(&state, &owner, project, r#"{"rows": 2}"#).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(data["metadata"]["rows"], 2);
        assert_eq!(data["uploaded_by"]["username"], "owner");
        let file = data["file"].as_str().unwrap();
        assert!(file.starts_with("/media/research_data/"));
        assert!(file.ends_with(".csv"));
        let stored = media.path().join(file.trim_start_matches("/media/"));
        assert_eq!(std::fs::read_to_string(stored).unwrap(), "a,b\n1,2");

        let (_, listed) = send(&state, "GET", "/api/research/data/?data_type=raw", Some(&outsider), None).await;
        assert_eq!(listed.as_array().unwrap().len(), 1);
        let (_, listed) = send(&state, "GET", "/api/research/data/?data_type=processed", Some(&owner), None).await;
        assert_eq!(listed, json!([]));

        let uri = format!("/api/research/data/{}", data["id"]);
        let (status, _) = send(&state, "PATCH", &uri, Some(&outsider), Some(json!({"version": "2"}))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn only_failed_analyses_are_retried() {
        let (state, _media) = test_state().await;
        let (_, owner) = create_user(&state, "owner", false).await;
        let project = create_project(&state, &owner, "Survey", false).await;
        let (_, data) = upload(&state, &owner, project, "").await;
        assert_eq!(data["metadata"], json!({}));

        let (status, analysis) = send(
            &state,
            "POST",
            "/api/research/analyses/",
            Some(&owner),
            Some(json!({
                "project": project,
                "data": data["id"],
                "title": "Clustering",
                "description": "Group answers",
                "analysis_type": "clustering",
                "parameters": {"k": 3}
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(analysis["status"], "pending");
        assert_eq!(analysis["parameters"]["k"], 3);
        assert_eq!(analysis["results"], json!({}));

        let uri = format!("/api/research/analyses/{}/retry_analysis/", analysis["id"]);
        let (status, body) = send(&state, "POST", &uri, Some(&owner), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Only failed analyses can be retried");

        sqlx::query("UPDATE research_analyses SET status = 'failed', error_message = 'timeout'")
            .execute(&state.pool)
            .await
            .unwrap();
        let (status, body) = send(&state, "POST", &uri, Some(&owner), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "analysis queued"}));

        let (_, listed) = send(&state, "GET", "/api/research/analyses/?status=pending", Some(&owner), None).await;
        assert_eq!(listed[0]["error_message"], "");
    }

    #[tokio::test]
    async fn comments_filter_by_project_and_check_parent() {
        let (state, _media) = test_state().await;
        let (_, owner) = create_user(&state, "owner", false).await;
        let first = create_project(&state, &owner, "First", false).await;
        let second = create_project(&state, &owner, "Second", false).await;

        let (status, root) = send(
            &state,
            "POST",
            "/api/research/comments/",
            Some(&owner),
            Some(json!({"project": first, "content": "Kickoff notes"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, errors) = send(
            &state,
            "POST",
            "/api/research/comments/",
            Some(&owner),
            Some(json!({"project": second, "content": "Reply", "parent": root["id"]})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(errors["parent"].is_array());

        send(
            &state,
            "POST",
            "/api/research/comments/",
            Some(&owner),
            Some(json!({"project": second, "content": "Other"})),
        )
        .await;
        let (_, listed) = send(
            &state,
            "GET",
            &format!("/api/research/comments/?project={}", first),
            Some(&owner),
            None,
        )
        .await;
        assert_eq!(listed.as_array().unwrap().len(), 1);
        assert_eq!(listed[0]["author"]["username"], "owner");
        assert_eq!(count(&state.pool, "SELECT COUNT(*) FROM research_comments").await, 2);
    }

    #[tokio::test]
    async fn profiles_list_only_own_and_reject_foreign_edits() {
        let (state, _media) = test_state().await;
        let (ana_id, ana) = create_user(&state, "ana", false).await;
        let (bob_id, bob) = create_user(&state, "bob", false).await;
        for user_id in [ana_id, bob_id] {
            sqlx::query("INSERT INTO research_profiles (user_id, created_at, updated_at) VALUES (?, ?, ?)")
                .bind(user_id)
                .bind(chrono::Utc::now())
                .bind(chrono::Utc::now())
                .execute(&state.pool)
                .await
                .unwrap();
        }

        let (_, listed) = send(&state, "GET", "/api/research/profiles/", Some(&ana), None).await;
        assert_eq!(listed.as_array().unwrap().len(), 1);
        assert_eq!(listed[0]["user"]["username"], "ana");
        let ana_profile = listed[0]["id"].as_i64().unwrap();

        let uri = format!("/api/research/profiles/{}", ana_profile);
        let (status, _) = send(&state, "PATCH", &uri, Some(&bob), Some(json!({"bio": "hi"}))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, errors) = send(&state, "PATCH", &uri, Some(&ana), Some(json!({"bio": "x".repeat(501)}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(errors["bio"].is_array());

        let (status, body) = send(
            &state,
            "PATCH",
            &uri,
            Some(&ana),
            Some(json!({"institution": "MIT", "website": "https://ana.example.com"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["institution"], "MIT");
    }
}
