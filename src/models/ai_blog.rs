use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

use super::blog::{Category, PostDetail, Tag};

pub const DEFAULT_BATCH_SIZE: i64 = 5;
pub const MAX_BATCH_SIZE: i64 = 20;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum GenerationStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct BlogRequest {
    pub id: i64,
    #[serde(rename = "user")]
    pub user_id: i64,
    pub prompt: String,
    pub topic: String,
    pub keywords: String,
    pub allow_web_search: bool,
    pub status: GenerationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error_message: Option<String>,
    #[serde(rename = "parent_batch")]
    pub parent_batch_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct BlogRequestSummary {
    pub id: i64,
    pub topic: String,
    pub status: GenerationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Default)]
pub struct BlogRequestInput {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub keywords: Option<String>,
    #[serde(default)]
    pub allow_web_search: Option<bool>,
}

#[derive(Debug, Clone, FromRow)]
pub struct Generation {
    pub id: i64,
    pub request_id: i64,
    pub blog_post_id: Option<i64>,
    pub title: String,
    pub content: String,
    pub excerpt: String,
    pub meta_title: String,
    pub meta_description: String,
    pub focus_keywords: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct GenerationResponse {
    pub id: i64,
    pub request: i64,
    pub blog_post: Option<PostDetail>,
    pub title: String,
    pub content: String,
    pub excerpt: String,
    pub meta_title: String,
    pub meta_description: String,
    pub suggested_categories: Vec<Category>,
    pub suggested_tags: Vec<Tag>,
    pub focus_keywords: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct BatchRequest {
    pub id: i64,
    pub user_id: i64,
    pub topic: String,
    pub description: String,
    pub prompt: String,
    pub keywords: String,
    pub num_posts: i64,
    pub allow_web_search: bool,
    pub status: GenerationStatus,
    pub generated_ideas: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error_message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchRequestResponse {
    pub id: i64,
    pub topic: String,
    pub description: String,
    pub prompt: String,
    pub keywords: String,
    pub num_posts: i64,
    pub allow_web_search: bool,
    pub status: GenerationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error_message: Option<String>,
    pub child_requests_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_requests: Option<Vec<BlogRequestSummary>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_ideas: Option<Value>,
}

impl BatchRequestResponse {
    pub fn new(batch: BatchRequest, child_requests_count: i64) -> Self {
        Self {
            id: batch.id,
            topic: batch.topic,
            description: batch.description,
            prompt: batch.prompt,
            keywords: batch.keywords,
            num_posts: batch.num_posts,
            allow_web_search: batch.allow_web_search,
            status: batch.status,
            created_at: batch.created_at,
            updated_at: batch.updated_at,
            error_message: batch.error_message,
            child_requests_count,
            child_requests: None,
            generated_ideas: None,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct BatchRequestInput {
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub keywords: Option<String>,
    #[serde(default)]
    pub num_posts: Option<i64>,
    #[serde(default)]
    pub allow_web_search: Option<bool>,
}

/// One post idea proposed for a batch series.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlogIdea {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
}

/// Parses stored `generated_ideas`, yielding an empty list for missing or broken JSON.
pub fn parse_generated_ideas(raw: Option<&str>) -> Value {
    raw.and_then(|text| serde_json::from_str::<Value>(text).ok())
        .filter(|value| value.is_array())
        .unwrap_or_else(|| Value::Array(Vec::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ideas_fall_back_to_empty_list() {
        assert_eq!(parse_generated_ideas(None), serde_json::json!([]));
        assert_eq!(parse_generated_ideas(Some("not json")), serde_json::json!([]));
        assert_eq!(
            parse_generated_ideas(Some(r#"[{"title":"A","description":"B"}]"#)),
            serde_json::json!([{"title": "A", "description": "B"}])
        );
    }
}
