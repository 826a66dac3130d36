use axum::{
    Router,
    extract::{Json, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::IntoResponse,
    routing::{get, post},
};
use bcrypt::{DEFAULT_COST, hash, verify};
use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use super::{ApiError, FieldErrors, bad_request, forbidden, internal_error, unauthorized};
use crate::config::AppConfig;
use crate::models::{LoginUser, RegisterResponse, RegisterUser, TokenResponse, User, UserResponse};
use crate::state::AppState;

const MIN_PASSWORD_LENGTH: usize = 8;
const MAX_SIMILARITY: f64 = 0.7;

const COMMON_PASSWORDS: &[&str] = &[
    "123456", "123456789", "12345678", "password", "qwerty", "qwerty123", "111111",
    "12345", "1234567", "1234567890", "123123", "000000", "abc123", "password1",
    "password123", "iloveyou", "admin", "admin123", "welcome", "welcome1", "letmein",
    "monkey", "dragon", "football", "baseball", "sunshine", "princess", "master",
    "shadow", "superman", "trustno1", "passw0rd", "qwertyuiop", "1q2w3e4r",
    "zaq12wsx", "starwars", "whatever", "freedom", "michael", "jennifer",
];

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub ver: i64,
    pub exp: usize,
}

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(obtain_token))
        .route("/token/regenerate", post(regenerate_token))
        .route("/me", get(get_me))
}

// ============================
// Registration
// ============================

async fn register(
    State(state): State<AppState>,
    Json(input): Json<RegisterUser>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::info!("Registration attempt for username: {:?}", input.username);
    let pool = &state.pool;

    let mut errors = FieldErrors::new();
    errors.require("username", input.username.as_deref());
    errors.require("password", input.password.as_deref());
    errors.require("password2", input.password2.as_deref());
    errors.require("email", input.email.as_deref());
    errors.require("first_name", input.first_name.as_deref());
    errors.require("last_name", input.last_name.as_deref());

    let username = input.username.as_deref().unwrap_or_default().trim();
    let email = input.email.as_deref().unwrap_or_default().trim();
    let first_name = input.first_name.as_deref().unwrap_or_default().trim();
    let last_name = input.last_name.as_deref().unwrap_or_default().trim();
    let password = input.password.as_deref().unwrap_or_default();

    if !errors.has("username") && exists(pool, "username", username).await? {
        errors.add("username", "A user with this username already exists.");
    }
    if !errors.has("email") {
        if !is_valid_email(email) {
            errors.add("email", "Enter a valid email address.");
        } else if exists(pool, "email", email).await? {
            errors.add("email", "A user with this email already exists.");
        }
    }
    if !errors.has("password") {
        let attributes = [
            ("username", username),
            ("email address", email),
            ("first name", first_name),
            ("last name", last_name),
        ];
        for message in password_problems(password, &attributes) {
            errors.add("password", message);
        }
    }
    if errors.is_empty() && input.password != input.password2 {
        errors.add("password2", "The two password fields didn't match.");
    }
    errors.into_result()?;

    let hashed = hash(password, DEFAULT_COST).map_err(internal_error)?;
    let now = Utc::now();
    let user_id = sqlx::query(
        r#"INSERT INTO users (username, email, first_name, last_name, hashed_password, date_joined)
           VALUES (?, ?, ?, ?, ?, ?)"#,
    )
    .bind(username)
    .bind(email)
    .bind(first_name)
    .bind(last_name)
    .bind(&hashed)
    .bind(now)
    .execute(pool)
    .await
    .map_err(internal_error)?
    .last_insert_rowid();

    sqlx::query("INSERT OR IGNORE INTO research_profiles (user_id, created_at, updated_at) VALUES (?, ?, ?)")
        .bind(user_id)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .map_err(internal_error)?;

    let user = fetch_user(pool, user_id).await?;
    let token = issue_token(&state.config, user.id, user.token_version)?;
    tracing::info!("New user registered: {} (ID: {})", user.username, user.id);

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user: UserResponse::from(user),
            token,
        }),
    ))
}

async fn exists(pool: &SqlitePool, column: &str, value: &str) -> Result<bool, ApiError> {
    let sql = format!("SELECT COUNT(*) FROM users WHERE LOWER({}) = LOWER(?)", column);
    let (count,): (i64,) = sqlx::query_as(&sql)
        .bind(value)
        .fetch_one(pool)
        .await
        .map_err(internal_error)?;
    Ok(count > 0)
}

fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace)
        && domain.split('.').count() >= 2
        && domain.split('.').all(|part| !part.is_empty())
}

/// Messages for every password rule `password` breaks.
fn password_problems(password: &str, attributes: &[(&str, &str)]) -> Vec<String> {
    let mut problems = Vec::new();
    let lowered = password.to_lowercase();

    for (label, value) in attributes {
        let value = value.to_lowercase();
        if value.is_empty() {
            continue;
        }
        let mut parts: Vec<&str> = value
            .split(|ch: char| !ch.is_alphanumeric() && ch != '_')
            .filter(|part| !part.is_empty())
            .collect();
        parts.push(&value);
        if parts.iter().any(|part| similarity(&lowered, part) >= MAX_SIMILARITY) {
            problems.push(format!("The password is too similar to the {}.", label));
            break;
        }
    }
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        problems.push(format!(
            "This password is too short. It must contain at least {} characters.",
            MIN_PASSWORD_LENGTH
        ));
    }
    if COMMON_PASSWORDS.contains(&lowered.trim()) {
        problems.push("This password is too common.".to_string());
    }
    if !password.is_empty() && password.chars().all(|ch| ch.is_ascii_digit()) {
        problems.push("This password is entirely numeric.".to_string());
    }
    problems
}

/// `2 * matches / total` over recursively found longest common blocks.
fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matching_chars(&a, &b) as f64 / total as f64
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    let (mut best_len, mut best_a, mut best_b) = (0, 0, 0);
    let mut previous = vec![0usize; b.len() + 1];
    for i in 0..a.len() {
        let mut current = vec![0usize; b.len() + 1];
        for j in 0..b.len() {
            if a[i] == b[j] {
                current[j + 1] = previous[j] + 1;
                if current[j + 1] > best_len {
                    best_len = current[j + 1];
                    best_a = i + 1 - best_len;
                    best_b = j + 1 - best_len;
                }
            }
        }
        previous = current;
    }
    if best_len == 0 {
        return 0;
    }
    best_len
        + matching_chars(&a[..best_a], &b[..best_b])
        + matching_chars(&a[best_a + best_len..], &b[best_b + best_len..])
}

// ============================
// Tokens
// ============================

pub async fn obtain_token(
    State(state): State<AppState>,
    Json(input): Json<LoginUser>,
) -> Result<impl IntoResponse, ApiError> {
    let (Some(username), Some(password)) = (
        input.username.filter(|value| !value.is_empty()),
        input.password.filter(|value| !value.is_empty()),
    ) else {
        tracing::warn!("Missing username or password in token request");
        return Err(bad_request("Both username and password are required."));
    };

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
        .bind(&username)
        .fetch_optional(&state.pool)
        .await
        .map_err(internal_error)?;

    let authenticated = match &user {
        Some(user) if user.is_active => verify(&password, &user.hashed_password).unwrap_or(false),
        _ => false,
    };
    let Some(user) = user.filter(|_| authenticated) else {
        tracing::warn!("Failed authentication attempt for username {}", username);
        return Err(unauthorized("Unable to log in with provided credentials."));
    };

    let token = issue_token(&state.config, user.id, user.token_version)?;
    tracing::info!("Token issued for user {}", user.username);
    Ok(Json(TokenResponse { token }))
}

async fn regenerate_token(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user = extract_current_user(&state, &headers).await?;

    let (version,): (i64,) =
        sqlx::query_as("UPDATE users SET token_version = token_version + 1 WHERE id = ? RETURNING token_version")
            .bind(user.id)
            .fetch_one(&state.pool)
            .await
            .map_err(internal_error)?;

    let token = issue_token(&state.config, user.id, version)?;
    tracing::info!("Token regenerated for user {}", user.username);
    Ok(Json(TokenResponse { token }))
}

async fn get_me(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user = extract_current_user(&state, &headers).await?;
    Ok(Json(UserResponse::from(user)))
}

// ============================
// Helpers
// ============================

/// Raw token from `Authorization: Token <t>` or `Authorization: Bearer <t>`.
pub fn token_from_headers(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    value
        .strip_prefix("Token ")
        .or_else(|| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

pub fn issue_token(config: &AppConfig, user_id: i64, token_version: i64) -> Result<String, ApiError> {
    let expiration = Utc::now()
        .checked_add_signed(chrono::Duration::hours(config.token_ttl_hours))
        .ok_or_else(|| internal_error("token expiry out of range"))?
        .timestamp() as usize;

    let claims = Claims {
        sub: user_id.to_string(),
        ver: token_version,
        exp: expiration,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.secret_key.as_bytes()),
    )
    .map_err(internal_error)
}

/// Active user behind `token` whose token version still matches.
async fn user_for_token(state: &AppState, token: &str) -> Result<Option<User>, ApiError> {
    let Ok(token_data) = decode::<Claims>(
        token,
        &DecodingKey::from_secret(state.config.secret_key.as_bytes()),
        &Validation::default(),
    ) else {
        return Ok(None);
    };
    let Ok(user_id) = token_data.claims.sub.parse::<i64>() else {
        return Ok(None);
    };

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(&state.pool)
        .await
        .map_err(internal_error)?;

    Ok(user.filter(|user| user.is_active && user.token_version == token_data.claims.ver))
}

pub async fn extract_current_user(state: &AppState, headers: &HeaderMap) -> Result<User, ApiError> {
    let token = token_from_headers(headers)
        .ok_or_else(|| unauthorized("Authentication credentials were not provided."))?;
    user_for_token(state, token)
        .await?
        .ok_or_else(|| unauthorized("Invalid token."))
}

pub async fn extract_optional_user(state: &AppState, headers: &HeaderMap) -> Result<Option<User>, ApiError> {
    match token_from_headers(headers) {
        Some(token) => user_for_token(state, token).await,
        None => Ok(None),
    }
}

pub async fn extract_staff_user(state: &AppState, headers: &HeaderMap) -> Result<User, ApiError> {
    let user = extract_current_user(state, headers).await?;
    if !user.is_staff {
        return Err(forbidden("You do not have permission to perform this action."));
    }
    Ok(user)
}

async fn fetch_user(pool: &SqlitePool, user_id: i64) -> Result<User, ApiError> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_one(pool)
        .await
        .map_err(internal_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::{count, create_user, send, test_state};
    use serde_json::json;

    fn registration() -> serde_json::Value {
        json!({
            "username": "marie",
            "password": "radium-glow-1898",
            "password2": "radium-glow-1898",
            "email": "marie@example.com",
            "first_name": "Marie",
            "last_name": "Curie"
        })
    }

    #[tokio::test]
    async fn register_returns_user_token_and_profile() {
        let (state, _media) = test_state().await;
        let (status, body) = send(&state, "POST", "/api/auth/register/", None, Some(registration())).await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["user"]["username"], "marie");
        assert_eq!(body["user"]["last_name"], "Curie");
        assert!(body["token"].as_str().is_some());
        assert_eq!(count(&state.pool, "SELECT COUNT(*) FROM research_profiles").await, 1);

        let token = body["token"].as_str().unwrap();
        let (status, me) = send(&state, "GET", "/api/auth/me", Some(token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["email"], "marie@example.com");
    }

    #[tokio::test]
    async fn register_collects_field_errors() {
        let (state, _media) = test_state().await;
        create_user(&state, "marie", false).await;

        let mut input = registration();
        input["password"] = json!("12345678");
        input["password2"] = json!("different");
        input["first_name"] = json!("");
        let (status, body) = send(&state, "POST", "/api/auth/register", None, Some(input)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["username"][0], "A user with this username already exists.");
        assert_eq!(body["first_name"][0], "This field may not be blank.");
        let password: Vec<&str> = body["password"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert!(password.contains(&"This password is too common."));
        assert!(password.contains(&"This password is entirely numeric."));
    }

    #[tokio::test]
    async fn mismatched_passwords_flag_password2() {
        let (state, _media) = test_state().await;
        let mut input = registration();
        input["password2"] = json!("radium-glow-1899");
        let (status, body) = send(&state, "POST", "/api/auth/register", None, Some(input)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["password2"][0], "The two password fields didn't match.");
    }

    #[test]
    fn password_similar_to_username_is_rejected() {
        let problems = password_problems("marie1234", &[("username", "marie12")]);
        assert_eq!(problems, vec!["The password is too similar to the username."]);
        assert!(password_problems("radium-glow-1898", &[("username", "marie")]).is_empty());
        assert!(similarity("abcd", "abcd") > 0.99);
    }

    #[tokio::test]
    async fn login_paths() {
        let (state, _media) = test_state().await;
        create_user(&state, "ada", false).await;

        let (status, body) = send(&state, "POST", "/api/auth/login/", None, Some(json!({"username": "ada"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "Both username and password are required.");

        let (status, body) = send(
            &state,
            "POST",
            "/api/auth-token/",
            None,
            Some(json!({"username": "ada", "password": "wrong"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["detail"], "Unable to log in with provided credentials.");

        let (status, body) = send(
            &state,
            "POST",
            "/api/auth/login",
            None,
            Some(json!({"username": "ada", "password": "pass-word-123"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["token"].is_string());
    }

    #[tokio::test]
    async fn regenerate_invalidates_old_token() {
        let (state, _media) = test_state().await;
        let (_, old_token) = create_user(&state, "ada", false).await;

        let (status, body) = send(&state, "POST", "/api/auth/token/regenerate/", Some(&old_token), None).await;
        assert_eq!(status, StatusCode::OK);
        let new_token = body["token"].as_str().unwrap().to_string();

        let (status, _) = send(&state, "GET", "/api/auth/me", Some(&old_token), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = send(&state, "GET", "/api/auth/me", Some(&new_token), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[test]
    fn both_header_schemes_are_accepted() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Bearer abc".parse().unwrap());
        assert_eq!(token_from_headers(&headers), Some("abc"));
        headers.insert(AUTHORIZATION, "Token xyz".parse().unwrap());
        assert_eq!(token_from_headers(&headers), Some("xyz"));
        headers.insert(AUTHORIZATION, "Basic xyz".parse().unwrap());
        assert_eq!(token_from_headers(&headers), None);
    }
}
