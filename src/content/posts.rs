use anyhow::Context;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use super::links::count_links;
use super::slug::{SlugTable, slugify, unique_slug};
use crate::models::{AuthorSummary, Category, ContentFormat, Post, PostDetail, PostListItem, PostStatus, Tag};

/// Post fields as written by a create or update.
#[derive(Debug, Clone)]
pub struct PostDraft {
    pub title: String,
    pub slug: String,
    pub content: String,
    pub content_format: ContentFormat,
    pub excerpt: String,
    pub featured_image: Option<String>,
    pub status: PostStatus,
    pub published_at: DateTime<Utc>,
    pub meta_title: String,
    pub meta_description: String,
    pub canonical_url: String,
    pub focus_keywords: String,
    pub is_featured: bool,
}

impl PostDraft {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            slug: String::new(),
            content: content.into(),
            content_format: ContentFormat::Html,
            excerpt: String::new(),
            featured_image: None,
            status: PostStatus::Draft,
            published_at: Utc::now(),
            meta_title: String::new(),
            meta_description: String::new(),
            canonical_url: String::new(),
            focus_keywords: String::new(),
            is_featured: false,
        }
    }
}

impl From<Post> for PostDraft {
    fn from(post: Post) -> Self {
        Self {
            title: post.title,
            slug: post.slug,
            content: post.content,
            content_format: post.content_format,
            excerpt: post.excerpt,
            featured_image: post.featured_image,
            status: post.status,
            published_at: post.published_at,
            meta_title: post.meta_title,
            meta_description: post.meta_description,
            canonical_url: post.canonical_url,
            focus_keywords: post.focus_keywords,
            is_featured: post.is_featured,
        }
    }
}

fn apply_defaults(draft: &mut PostDraft) {
    if draft.meta_title.is_empty() {
        draft.meta_title = draft.title.clone();
    }
    if draft.meta_description.is_empty() && !draft.excerpt.is_empty() {
        draft.meta_description = draft.excerpt.clone();
    }
}

async fn resolve_slug(pool: &SqlitePool, draft: &PostDraft, post_id: Option<i64>) -> anyhow::Result<String> {
    if !draft.slug.is_empty() {
        return Ok(draft.slug.clone());
    }
    let base = slugify(&draft.title);
    match unique_slug(pool, SlugTable::Posts, &base, post_id).await? {
        Some(slug) => Ok(slug),
        None => {
            let base = if base.is_empty() { "post".to_string() } else { base };
            let suffix = uuid::Uuid::new_v4().simple().to_string();
            Ok(format!("{}-{}", base, &suffix[..8]))
        }
    }
}

/// Inserts a post, filling slug, meta fields and link counts. Returns the new id.
pub async fn insert_post(
    pool: &SqlitePool,
    site_domain: Option<&str>,
    author_id: i64,
    mut draft: PostDraft,
) -> anyhow::Result<i64> {
    apply_defaults(&mut draft);
    let slug = resolve_slug(pool, &draft, None).await?;
    let (internal, external) = match draft.content_format {
        ContentFormat::Html => count_links(&draft.content, site_domain),
        _ => (0, 0),
    };
    let now = Utc::now();

    let result = sqlx::query(
        r#"
        INSERT INTO blog_posts (
            title, slug, author_id, content, content_format, featured_image, excerpt,
            created_at, updated_at, published_at, status, meta_title, meta_description,
            canonical_url, focus_keywords, internal_links_count, external_links_count, is_featured
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&draft.title)
    .bind(&slug)
    .bind(author_id)
    .bind(&draft.content)
    .bind(draft.content_format)
    .bind(&draft.featured_image)
    .bind(&draft.excerpt)
    .bind(now)
    .bind(now)
    .bind(draft.published_at)
    .bind(draft.status)
    .bind(&draft.meta_title)
    .bind(&draft.meta_description)
    .bind(&draft.canonical_url)
    .bind(&draft.focus_keywords)
    .bind(internal)
    .bind(external)
    .bind(draft.is_featured)
    .execute(pool)
    .await
    .context("Failed to insert blog post")?;

    Ok(result.last_insert_rowid())
}

/// Rewrites a post with the same save rules as [`insert_post`].
pub async fn update_post(
    pool: &SqlitePool,
    site_domain: Option<&str>,
    post_id: i64,
    mut draft: PostDraft,
) -> anyhow::Result<()> {
    apply_defaults(&mut draft);
    let slug = resolve_slug(pool, &draft, Some(post_id)).await?;
    let counts = match draft.content_format {
        ContentFormat::Html => Some(count_links(&draft.content, site_domain)),
        _ => None,
    };

    sqlx::query(
        r#"
        UPDATE blog_posts SET
            title = ?, slug = ?, content = ?, content_format = ?, featured_image = ?, excerpt = ?,
            updated_at = ?, published_at = ?, status = ?, meta_title = ?, meta_description = ?,
            canonical_url = ?, focus_keywords = ?,
            internal_links_count = COALESCE(?, internal_links_count),
            external_links_count = COALESCE(?, external_links_count),
            is_featured = ?
        WHERE id = ?
        "#,
    )
    .bind(&draft.title)
    .bind(&slug)
    .bind(&draft.content)
    .bind(draft.content_format)
    .bind(&draft.featured_image)
    .bind(&draft.excerpt)
    .bind(Utc::now())
    .bind(draft.published_at)
    .bind(draft.status)
    .bind(&draft.meta_title)
    .bind(&draft.meta_description)
    .bind(&draft.canonical_url)
    .bind(&draft.focus_keywords)
    .bind(counts.map(|(internal, _)| internal))
    .bind(counts.map(|(_, external)| external))
    .bind(draft.is_featured)
    .bind(post_id)
    .execute(pool)
    .await
    .context("Failed to update blog post")?;

    Ok(())
}

pub async fn set_post_status(pool: &SqlitePool, post_id: i64, status: PostStatus) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE blog_posts SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status)
        .bind(Utc::now())
        .bind(post_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Replaces a post's categories and tags. `None` leaves that side untouched.
pub async fn set_post_terms(
    pool: &SqlitePool,
    post_id: i64,
    categories: Option<&[i64]>,
    tags: Option<&[i64]>,
) -> Result<(), sqlx::Error> {
    if let Some(categories) = categories {
        sqlx::query("DELETE FROM blog_post_categories WHERE post_id = ?")
            .bind(post_id)
            .execute(pool)
            .await?;
        for category_id in categories {
            add_post_category(pool, post_id, *category_id).await?;
        }
    }
    if let Some(tags) = tags {
        sqlx::query("DELETE FROM blog_post_tags WHERE post_id = ?")
            .bind(post_id)
            .execute(pool)
            .await?;
        for tag_id in tags {
            add_post_tag(pool, post_id, *tag_id).await?;
        }
    }
    Ok(())
}

pub async fn add_post_category(pool: &SqlitePool, post_id: i64, category_id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT OR IGNORE INTO blog_post_categories (post_id, category_id) VALUES (?, ?)")
        .bind(post_id)
        .bind(category_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn add_post_tag(pool: &SqlitePool, post_id: i64, tag_id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT OR IGNORE INTO blog_post_tags (post_id, tag_id) VALUES (?, ?)")
        .bind(post_id)
        .bind(tag_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Ids among `ids` that have no row in `table`.
pub async fn missing_ids(pool: &SqlitePool, table: SlugTable, ids: &[i64]) -> Result<Vec<i64>, sqlx::Error> {
    let sql = format!("SELECT COUNT(*) FROM {} WHERE id = ?", table.table_name());
    let mut missing = Vec::new();
    for id in ids {
        let (count,): (i64,) = sqlx::query_as(&sql).bind(id).fetch_one(pool).await?;
        if count == 0 {
            missing.push(*id);
        }
    }
    Ok(missing)
}

pub async fn post_categories(pool: &SqlitePool, post_id: i64) -> Result<Vec<Category>, sqlx::Error> {
    sqlx::query_as::<_, Category>(
        r#"
        SELECT c.* FROM blog_categories c
        JOIN blog_post_categories pc ON pc.category_id = c.id
        WHERE pc.post_id = ?
        ORDER BY c.id
        "#,
    )
    .bind(post_id)
    .fetch_all(pool)
    .await
}

pub async fn post_tags(pool: &SqlitePool, post_id: i64) -> Result<Vec<Tag>, sqlx::Error> {
    sqlx::query_as::<_, Tag>(
        r#"
        SELECT t.* FROM blog_tags t
        JOIN blog_post_tags pt ON pt.tag_id = t.id
        WHERE pt.post_id = ?
        ORDER BY t.id
        "#,
    )
    .bind(post_id)
    .fetch_all(pool)
    .await
}

pub async fn author_summary(pool: &SqlitePool, user_id: i64) -> Result<AuthorSummary, sqlx::Error> {
    sqlx::query_as::<_, AuthorSummary>(
        "SELECT id, username, first_name, last_name FROM users WHERE id = ?",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await
}

pub async fn fetch_post(pool: &SqlitePool, post_id: i64) -> Result<Option<Post>, sqlx::Error> {
    sqlx::query_as::<_, Post>("SELECT * FROM blog_posts WHERE id = ?")
        .bind(post_id)
        .fetch_optional(pool)
        .await
}

pub async fn post_detail(pool: &SqlitePool, post: Post) -> Result<PostDetail, sqlx::Error> {
    let author = author_summary(pool, post.author_id).await?;
    let categories = post_categories(pool, post.id).await?;
    let tags = post_tags(pool, post.id).await?;
    Ok(PostDetail::new(post, author, categories, tags))
}

pub async fn post_list_item(pool: &SqlitePool, post: Post) -> Result<PostListItem, sqlx::Error> {
    let author = author_summary(pool, post.author_id).await?;
    let categories = post_categories(pool, post.id).await?;
    let tags = post_tags(pool, post.id).await?;
    Ok(PostListItem::new(post, author, categories, tags))
}
