use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::user::AuthorSummary;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ContentFormat {
    #[default]
    Html,
    RichText,
    Markdown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum PostStatus {
    #[default]
    Draft,
    Published,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq, Eq)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq, Eq)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct Post {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub author_id: i64,
    pub content: String,
    pub content_format: ContentFormat,
    pub featured_image: Option<String>,
    pub excerpt: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub published_at: DateTime<Utc>,
    pub status: PostStatus,
    pub meta_title: String,
    pub meta_description: String,
    pub canonical_url: String,
    pub focus_keywords: String,
    pub internal_links_count: i64,
    pub external_links_count: i64,
    pub is_featured: bool,
}

impl Post {
    pub fn is_published(&self) -> bool {
        self.status == PostStatus::Published
    }
}

#[derive(Debug, Serialize)]
pub struct PostListItem {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub author: AuthorSummary,
    pub excerpt: String,
    pub featured_image: Option<String>,
    pub published_at: DateTime<Utc>,
    pub status: PostStatus,
    pub categories: Vec<Category>,
    pub tags: Vec<Tag>,
    pub is_featured: bool,
    pub meta_title: String,
    pub meta_description: String,
    pub canonical_url: String,
    pub focus_keywords: String,
    pub internal_links_count: i64,
    pub external_links_count: i64,
}

#[derive(Debug, Serialize)]
pub struct PostDetail {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub author: AuthorSummary,
    pub content: String,
    pub content_format: ContentFormat,
    pub excerpt: String,
    pub featured_image: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub published_at: DateTime<Utc>,
    pub status: PostStatus,
    pub categories: Vec<Category>,
    pub tags: Vec<Tag>,
    pub is_featured: bool,
    pub meta_title: String,
    pub meta_description: String,
    pub canonical_url: String,
    pub focus_keywords: String,
    pub internal_links_count: i64,
    pub external_links_count: i64,
}

impl PostDetail {
    pub fn new(post: Post, author: AuthorSummary, categories: Vec<Category>, tags: Vec<Tag>) -> Self {
        Self {
            id: post.id,
            title: post.title,
            slug: post.slug,
            author,
            content: post.content,
            content_format: post.content_format,
            excerpt: post.excerpt,
            featured_image: post.featured_image,
            created_at: post.created_at,
            updated_at: post.updated_at,
            published_at: post.published_at,
            status: post.status,
            categories,
            tags,
            is_featured: post.is_featured,
            meta_title: post.meta_title,
            meta_description: post.meta_description,
            canonical_url: post.canonical_url,
            focus_keywords: post.focus_keywords,
            internal_links_count: post.internal_links_count,
            external_links_count: post.external_links_count,
        }
    }
}

impl PostListItem {
    pub fn new(post: Post, author: AuthorSummary, categories: Vec<Category>, tags: Vec<Tag>) -> Self {
        Self {
            id: post.id,
            title: post.title,
            slug: post.slug,
            author,
            excerpt: post.excerpt,
            featured_image: post.featured_image,
            published_at: post.published_at,
            status: post.status,
            categories,
            tags,
            is_featured: post.is_featured,
            meta_title: post.meta_title,
            meta_description: post.meta_description,
            canonical_url: post.canonical_url,
            focus_keywords: post.focus_keywords,
            internal_links_count: post.internal_links_count,
            external_links_count: post.external_links_count,
        }
    }
}

/// Writable post fields. Absent fields keep their stored value on update.
#[derive(Debug, Deserialize, Default)]
pub struct PostInput {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub content_format: Option<ContentFormat>,
    #[serde(default)]
    pub excerpt: Option<String>,
    #[serde(default)]
    pub featured_image: Option<String>,
    #[serde(default)]
    pub status: Option<PostStatus>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub categories: Option<Vec<i64>>,
    #[serde(default)]
    pub tags: Option<Vec<i64>>,
    #[serde(default)]
    pub is_featured: Option<bool>,
    #[serde(default)]
    pub meta_title: Option<String>,
    #[serde(default)]
    pub meta_description: Option<String>,
    #[serde(default)]
    pub canonical_url: Option<String>,
    #[serde(default)]
    pub focus_keywords: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PostQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub search: Option<String>,
    pub ordering: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Paginated<T> {
    pub count: i64,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Vec<T>,
}

/// Create/update body shared by categories and tags. Tags ignore `description`.
#[derive(Debug, Deserialize, Default)]
pub struct TermInput {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}
