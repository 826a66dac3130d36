use std::path::PathBuf;

use anyhow::{Context, anyhow};
use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::SqlitePool;

use super::extract::{extract_json_array, extract_json_object, string_field, string_list_field};
use super::llm::{DEFAULT_MAX_TOKENS, LlmClient};
use super::prompts::{self, PostContext};
use crate::config::AppConfig;
use crate::content::posts::{add_post_category, add_post_tag, insert_post};
use crate::content::{KeywordIndex, PostDraft, SlugTable, append_related_posts, slugify, unique_slug};
use crate::images::{PexelsClient, attach_featured_image};
use crate::models::{BatchRequest, BlogIdea, BlogRequest, GenerationStatus};

pub const UNTITLED_POST: &str = "Untitled Blog Post";
const META_DESCRIPTION_CHARS: usize = 155;
const IDEAS_MAX_TOKENS: u32 = 2000;
const GENERATED_POST_MAX_LINKS: usize = 5;

/// Counts reported by a finished batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    pub total: usize,
    pub failed: usize,
}

/// Runs AI blog requests end to end: prompt, parse, persist, enrich.
#[derive(Clone)]
pub struct BlogGenerator {
    pool: SqlitePool,
    llm: LlmClient,
    pexels: Option<PexelsClient>,
    media_root: PathBuf,
    site_domain: Option<String>,
    auto_publish: bool,
}

impl BlogGenerator {
    pub fn new(pool: SqlitePool, config: &AppConfig) -> anyhow::Result<Self> {
        let llm = LlmClient::new(config.llm.clone()).context("Failed to build LLM client")?;
        let pexels = PexelsClient::new(config.pexels.clone())
            .context("Failed to build Pexels client")?;
        Ok(Self {
            pool,
            llm,
            pexels: pexels.is_configured().then_some(pexels),
            media_root: config.media_root.clone(),
            site_domain: config.site_domain.clone(),
            auto_publish: config.auto_publish,
        })
    }

    /// Generates one request. The request row ends `completed` or `failed`; returns the generation id.
    pub async fn generate_blog_post(&self, request_id: i64) -> anyhow::Result<i64> {
        let request = fetch_request(&self.pool, request_id).await?;
        set_request_status(&self.pool, request_id, GenerationStatus::Processing, None).await?;

        match self.run_request(&request).await {
            Ok(generation_id) => Ok(generation_id),
            Err(error) => {
                let message = format!("{:#}", error);
                tracing::error!(request_id, "Error generating blog post: {}", message);
                set_request_status(&self.pool, request_id, GenerationStatus::Failed, Some(&message))
                    .await?;
                Err(error)
            }
        }
    }

    async fn run_request(&self, request: &BlogRequest) -> anyhow::Result<i64> {
        let search_results = if request.allow_web_search {
            prompts::search_web(&request.topic)
        } else {
            Vec::new()
        };
        let context = PostContext {
            topic: request.topic.clone(),
            prompt: request.prompt.clone(),
            keywords: request.keywords.clone(),
            search_results,
        };

        let reply = self
            .llm
            .complete(
                &prompts::post_system_message(self.llm.provider()),
                &prompts::post_user_message(&context),
                DEFAULT_MAX_TOKENS,
            )
            .await?;

        let data = extract_json_object(&reply)
            .filter(|data| !data.is_empty())
            .ok_or_else(|| anyhow!("Failed to generate blog post content"))?;

        self.process_generation_result(request, &data).await
    }

    /// Persists a parsed reply as a generation (and post when auto-publish is on).
    pub async fn process_generation_result(
        &self,
        request: &BlogRequest,
        data: &Map<String, Value>,
    ) -> anyhow::Result<i64> {
        let title = non_empty(string_field(data, "title")).unwrap_or_else(|| UNTITLED_POST.to_string());
        let content = string_field(data, "content").unwrap_or_default();
        let excerpt = string_field(data, "excerpt").unwrap_or_default();
        let meta_title = non_empty(string_field(data, "meta_title")).unwrap_or_else(|| title.clone());
        let meta_description = non_empty(string_field(data, "meta_description"))
            .unwrap_or_else(|| excerpt.chars().take(META_DESCRIPTION_CHARS).collect());
        let focus_keywords = focus_keywords_field(data);

        let post_id = if self.auto_publish {
            let mut draft = PostDraft::new(title.clone(), content.clone());
            draft.excerpt = excerpt.clone();
            draft.meta_title = meta_title.clone();
            draft.meta_description = meta_description.clone();
            draft.focus_keywords = focus_keywords.clone();
            let post_id = insert_post(&self.pool, self.site_domain.as_deref(), request.user_id, draft)
                .await?;
            tracing::info!(request_id = request.id, post_id, "Created draft blog post");
            Some(post_id)
        } else {
            None
        };

        let generation_id = sqlx::query(
            r#"
            INSERT INTO ai_blog_generations (
                request_id, blog_post_id, title, content, excerpt,
                meta_title, meta_description, focus_keywords, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(request.id)
        .bind(post_id)
        .bind(&title)
        .bind(&content)
        .bind(&excerpt)
        .bind(&meta_title)
        .bind(&meta_description)
        .bind(&focus_keywords)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .context("Failed to save generation")?
        .last_insert_rowid();

        for name in string_list_field(data, "categories") {
            let Some(category_id) = get_or_create_term(&self.pool, SlugTable::Categories, &name).await? else {
                continue;
            };
            sqlx::query("INSERT OR IGNORE INTO ai_generation_categories (generation_id, category_id) VALUES (?, ?)")
                .bind(generation_id)
                .bind(category_id)
                .execute(&self.pool)
                .await?;
            if let Some(post_id) = post_id {
                add_post_category(&self.pool, post_id, category_id).await?;
            }
        }

        for name in string_list_field(data, "tags") {
            let Some(tag_id) = get_or_create_term(&self.pool, SlugTable::Tags, &name).await? else {
                continue;
            };
            sqlx::query("INSERT OR IGNORE INTO ai_generation_tags (generation_id, tag_id) VALUES (?, ?)")
                .bind(generation_id)
                .bind(tag_id)
                .execute(&self.pool)
                .await?;
            if let Some(post_id) = post_id {
                add_post_tag(&self.pool, post_id, tag_id).await?;
            }
        }

        if let Some(post_id) = post_id {
            self.enrich_post(post_id).await;
        }

        set_request_status(&self.pool, request.id, GenerationStatus::Completed, None).await?;
        tracing::info!(request_id = request.id, generation_id, "Blog generation completed");
        Ok(generation_id)
    }

    /// Internal links, related posts and a featured image. Failures are logged only.
    async fn enrich_post(&self, post_id: i64) {
        match KeywordIndex::rebuild(&self.pool).await {
            Ok(index) => {
                if let Err(error) = index
                    .enhance_post_links(&self.pool, post_id, GENERATED_POST_MAX_LINKS)
                    .await
                {
                    tracing::error!(post_id, "Error enhancing blog post: {:#}", error);
                }
            }
            Err(error) => tracing::error!(post_id, "Error building keyword index: {:#}", error),
        }

        if let Err(error) = append_related_posts(&self.pool, post_id).await {
            tracing::error!(post_id, "Error adding related posts: {:#}", error);
        }

        let Some(pexels) = &self.pexels else {
            tracing::info!(post_id, "Pexels API key not configured; skipping featured image");
            return;
        };
        let llm = self.llm.is_configured().then_some(&self.llm);
        if let Err(error) = attach_featured_image(&self.pool, pexels, llm, &self.media_root, post_id).await {
            tracing::error!(post_id, "Error adding featured image: {:#}", error);
        }
    }

    pub async fn generate_blog_post_ideas(
        &self,
        topic: &str,
        description: &str,
        num_posts: i64,
    ) -> anyhow::Result<Vec<Value>> {
        let reply = self
            .llm
            .complete(
                prompts::ideas_system_message(),
                &prompts::ideas_user_message(topic, description, num_posts),
                IDEAS_MAX_TOKENS,
            )
            .await?;
        extract_json_array(&reply).ok_or_else(|| anyhow!("Could not parse blog post ideas"))
    }

    /// Generates a series: ideas first, then one child request per idea, sequentially.
    pub async fn generate_batch_blog_posts(&self, batch_id: i64) -> anyhow::Result<BatchOutcome> {
        let batch = fetch_batch(&self.pool, batch_id).await?;
        set_batch_status(&self.pool, batch_id, GenerationStatus::Processing, None).await?;

        match self.run_batch(&batch).await {
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                let message = format!("{:#}", error);
                tracing::error!(batch_id, "Error in batch generation: {}", message);
                set_batch_status(&self.pool, batch_id, GenerationStatus::Failed, Some(&message)).await?;
                Err(error)
            }
        }
    }

    async fn run_batch(&self, batch: &BatchRequest) -> anyhow::Result<BatchOutcome> {
        let ideas = match self
            .generate_blog_post_ideas(&batch.topic, &batch.description, batch.num_posts)
            .await
        {
            Ok(ideas) => ideas,
            Err(error) => {
                tracing::error!(batch_id = batch.id, "Error generating blog post ideas: {:#}", error);
                Vec::new()
            }
        };

        if ideas.is_empty() {
            set_batch_status(
                &self.pool,
                batch.id,
                GenerationStatus::Failed,
                Some("Failed to generate blog post ideas."),
            )
            .await?;
            return Ok(BatchOutcome { total: 0, failed: 0 });
        }

        sqlx::query("UPDATE ai_blog_batch_requests SET generated_ideas = ?, updated_at = ? WHERE id = ?")
            .bind(serde_json::to_string(&ideas)?)
            .bind(Utc::now())
            .bind(batch.id)
            .execute(&self.pool)
            .await?;

        let total = ideas.len();
        let mut failed = 0;
        for (position, raw) in ideas.into_iter().enumerate() {
            let idea = serde_json::from_value::<BlogIdea>(raw).unwrap_or(BlogIdea {
                title: String::new(),
                description: String::new(),
            });
            if idea.title.trim().is_empty() {
                tracing::error!(batch_id = batch.id, position, "Blog post idea has no title");
                failed += 1;
                continue;
            }

            let request_id = create_child_request(&self.pool, batch, &idea).await?;
            if let Err(error) = self.generate_blog_post(request_id).await {
                tracing::error!(
                    batch_id = batch.id,
                    request_id,
                    "Error generating post for idea {}: {:#}",
                    idea.title,
                    error
                );
                failed += 1;
            }
        }

        let (status, message) = if failed == total {
            (
                GenerationStatus::Failed,
                Some(format!("All {} blog post generations failed.", total)),
            )
        } else if failed > 0 {
            (
                GenerationStatus::Completed,
                Some(format!("{} out of {} blog post generations failed.", failed, total)),
            )
        } else {
            (GenerationStatus::Completed, None)
        };
        set_batch_status(&self.pool, batch.id, status, message.as_deref()).await?;

        tracing::info!(batch_id = batch.id, total, failed, "Batch generation finished");
        Ok(BatchOutcome { total, failed })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|text| !text.trim().is_empty())
}

/// `focus_keywords` as a comma separated string; list replies are joined.
fn focus_keywords_field(data: &Map<String, Value>) -> String {
    match data.get("focus_keywords") {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(_)) => string_list_field(data, "focus_keywords").join(", "),
        _ => String::new(),
    }
}

/// Category or tag id for `name`, created when missing. `None` for blank names.
pub async fn get_or_create_term(
    pool: &SqlitePool,
    table: SlugTable,
    name: &str,
) -> anyhow::Result<Option<i64>> {
    let name = name.trim();
    if name.is_empty() {
        return Ok(None);
    }
    let table_name = table.table_name();
    let base = slugify(name);

    let existing: Option<(i64,)> = sqlx::query_as(&format!("SELECT id FROM {} WHERE slug = ?", table_name))
        .bind(&base)
        .fetch_optional(pool)
        .await?;
    if let Some((id,)) = existing {
        return Ok(Some(id));
    }

    if let Some(slug) = unique_slug(pool, table, &base, None).await? {
        let id = sqlx::query(&format!("INSERT INTO {} (name, slug) VALUES (?, ?)", table_name))
            .bind(name)
            .bind(&slug)
            .execute(pool)
            .await
            .with_context(|| format!("Failed to create {} row for {}", table_name, name))?
            .last_insert_rowid();
        return Ok(Some(id));
    }

    tracing::warn!("Could not create unique slug for {}; reusing an existing row", name);
    let by_name: Option<(i64,)> =
        sqlx::query_as(&format!("SELECT id FROM {} WHERE LOWER(name) = LOWER(?) LIMIT 1", table_name))
            .bind(name)
            .fetch_optional(pool)
            .await?;
    if let Some((id,)) = by_name {
        return Ok(Some(id));
    }
    let first: Option<(i64,)> = sqlx::query_as(&format!("SELECT id FROM {} ORDER BY id LIMIT 1", table_name))
        .fetch_optional(pool)
        .await?;
    Ok(first.map(|(id,)| id))
}

async fn create_child_request(pool: &SqlitePool, batch: &BatchRequest, idea: &BlogIdea) -> anyhow::Result<i64> {
    let now = Utc::now();
    let id = sqlx::query(
        r#"
        INSERT INTO ai_blog_requests (
            user_id, prompt, topic, keywords, allow_web_search, status, created_at, updated_at, parent_batch_id
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(batch.user_id)
    .bind(prompts::batch_child_prompt(&batch.prompt, &batch.topic, &idea.description))
    .bind(&idea.title)
    .bind(&batch.keywords)
    .bind(batch.allow_web_search)
    .bind(GenerationStatus::Pending)
    .bind(now)
    .bind(now)
    .bind(batch.id)
    .execute(pool)
    .await
    .context("Failed to create child request")?
    .last_insert_rowid();
    Ok(id)
}

pub async fn fetch_request(pool: &SqlitePool, request_id: i64) -> anyhow::Result<BlogRequest> {
    sqlx::query_as::<_, BlogRequest>("SELECT * FROM ai_blog_requests WHERE id = ?")
        .bind(request_id)
        .fetch_optional(pool)
        .await?
        .with_context(|| format!("Blog request {} not found", request_id))
}

pub async fn fetch_batch(pool: &SqlitePool, batch_id: i64) -> anyhow::Result<BatchRequest> {
    sqlx::query_as::<_, BatchRequest>("SELECT * FROM ai_blog_batch_requests WHERE id = ?")
        .bind(batch_id)
        .fetch_optional(pool)
        .await?
        .with_context(|| format!("Batch request {} not found", batch_id))
}

pub async fn set_request_status(
    pool: &SqlitePool,
    request_id: i64,
    status: GenerationStatus,
    error_message: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE ai_blog_requests SET status = ?, error_message = ?, updated_at = ? WHERE id = ?")
        .bind(status)
        .bind(error_message)
        .bind(Utc::now())
        .bind(request_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_batch_status(
    pool: &SqlitePool,
    batch_id: i64,
    status: GenerationStatus,
    error_message: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE ai_blog_batch_requests SET status = ?, error_message = ?, updated_at = ? WHERE id = ?")
        .bind(status)
        .bind(error_message)
        .bind(Utc::now())
        .bind(batch_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Deletes a request's generation together with the post created from it.
pub async fn discard_generation(pool: &SqlitePool, request_id: i64) -> Result<(), sqlx::Error> {
    let post: Option<(Option<i64>,)> =
        sqlx::query_as("SELECT blog_post_id FROM ai_blog_generations WHERE request_id = ?")
            .bind(request_id)
            .fetch_optional(pool)
            .await?;
    if let Some((Some(post_id),)) = post {
        sqlx::query("DELETE FROM blog_posts WHERE id = ?")
            .bind(post_id)
            .execute(pool)
            .await?;
    }
    sqlx::query("DELETE FROM ai_blog_generations WHERE request_id = ?")
        .bind(request_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Deletes every child request of a batch, with their generations and posts.
pub async fn discard_batch_children(pool: &SqlitePool, batch_id: i64) -> Result<usize, sqlx::Error> {
    let children: Vec<(i64,)> = sqlx::query_as("SELECT id FROM ai_blog_requests WHERE parent_batch_id = ?")
        .bind(batch_id)
        .fetch_all(pool)
        .await?;
    for (request_id,) in &children {
        discard_generation(pool, *request_id).await?;
        sqlx::query("DELETE FROM ai_blog_requests WHERE id = ?")
            .bind(request_id)
            .execute(pool)
            .await?;
    }
    Ok(children.len())
}
