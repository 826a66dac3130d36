use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

use super::user::UserResponse;

pub const MAX_BIO_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ProjectStatus {
    #[default]
    Draft,
    Active,
    Completed,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum DataType {
    Raw,
    Processed,
    Analysis,
    Visualization,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum AnalysisStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, FromRow)]
pub struct Profile {
    pub id: i64,
    pub user_id: i64,
    pub bio: String,
    pub institution: String,
    pub position: String,
    pub research_interests: String,
    pub website: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub id: i64,
    pub user: UserResponse,
    pub bio: String,
    pub institution: String,
    pub position: String,
    pub research_interests: String,
    pub website: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ProfileInput {
    pub bio: Option<String>,
    pub institution: Option<String>,
    pub position: Option<String>,
    pub research_interests: Option<String>,
    pub website: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct Project {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub description: String,
    pub owner_id: i64,
    pub status: ProjectStatus,
    pub is_public: bool,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ProjectResponse {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub description: String,
    pub owner: UserResponse,
    pub collaborators: Vec<UserResponse>,
    pub status: ProjectStatus,
    pub is_public: bool,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ProjectInput {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<ProjectStatus>,
    pub is_public: Option<bool>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ProjectQuery {
    pub status: Option<ProjectStatus>,
    pub is_public: Option<bool>,
    pub search: Option<String>,
    pub ordering: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddCollaborator {
    #[serde(default)]
    pub user_id: Option<i64>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DataSet {
    pub id: i64,
    pub project_id: i64,
    pub title: String,
    pub description: String,
    pub data_type: DataType,
    pub file_path: String,
    pub uploaded_by_id: Option<i64>,
    pub version: String,
    pub metadata: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct DataSetResponse {
    pub id: i64,
    pub project: i64,
    pub title: String,
    pub description: String,
    pub data_type: DataType,
    pub file: String,
    pub uploaded_by: Option<UserResponse>,
    pub version: String,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Default)]
pub struct DataSetQuery {
    pub data_type: Option<DataType>,
    pub project: Option<i64>,
    pub search: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct DataSetPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub data_type: Option<DataType>,
    pub version: Option<String>,
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, FromRow)]
pub struct Analysis {
    pub id: i64,
    pub project_id: i64,
    pub data_id: i64,
    pub title: String,
    pub description: String,
    pub analysis_type: String,
    pub parameters: String,
    pub results: String,
    pub status: AnalysisStatus,
    pub error_message: String,
    pub requested_by_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct AnalysisResponse {
    pub id: i64,
    pub project: i64,
    pub data: i64,
    pub title: String,
    pub description: String,
    pub analysis_type: String,
    pub parameters: Value,
    pub results: Value,
    pub status: AnalysisStatus,
    pub error_message: String,
    pub requested_by: Option<UserResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Default)]
pub struct AnalysisInput {
    pub project: Option<i64>,
    pub data: Option<i64>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub analysis_type: Option<String>,
    pub parameters: Option<Value>,
}

#[derive(Debug, Deserialize, Default)]
pub struct AnalysisQuery {
    pub status: Option<AnalysisStatus>,
    pub analysis_type: Option<String>,
    pub project: Option<i64>,
    pub search: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ResearchComment {
    pub id: i64,
    pub project_id: i64,
    pub author_id: i64,
    pub content: String,
    pub parent_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct CommentResponse {
    pub id: i64,
    pub project: i64,
    pub author: UserResponse,
    pub content: String,
    pub parent: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Default)]
pub struct CommentInput {
    pub project: Option<i64>,
    pub content: Option<String>,
    pub parent: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct CommentQuery {
    pub project: Option<i64>,
}

/// Parses a JSON column, yielding an empty object when the stored text is unreadable.
pub fn parse_json_object(raw: &str) -> Value {
    serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::Object(Default::default()))
}
