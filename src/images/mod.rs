use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use rand::seq::IndexedRandom;
use reqwest::StatusCode as HttpStatusCode;
use serde::Deserialize;
use sqlx::SqlitePool;

use crate::ai_blog::llm::LlmClient;
use crate::config::PexelsSettings;
use crate::content::slugify;

const SEARCH_RESULTS: u32 = 10;
const CURATED_RESULTS: u32 = 15;
const ALT_TEXT_MAX_TOKENS: u32 = 50;
const ALT_TEXT_SYSTEM: &str =
    "You are a helpful assistant that generates concise, descriptive alt text for blog post featured images.";
pub const FEATURED_IMAGE_DIR: &str = "blog/images";

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("No Pexels API key found. Set PEXELS_API_KEY.")]
    NotConfigured,
    #[error("Pexels request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Pexels API error: {status} - {body}")]
    Api { status: u16, body: String },
    #[error("No image URL available to download")]
    NoImageUrl,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct PhotoSources {
    #[serde(default)]
    pub original: Option<String>,
    #[serde(default)]
    pub large: Option<String>,
    #[serde(default)]
    pub medium: Option<String>,
    #[serde(default)]
    pub small: Option<String>,
    #[serde(default)]
    pub portrait: Option<String>,
    #[serde(default)]
    pub landscape: Option<String>,
    #[serde(default)]
    pub tiny: Option<String>,
}

impl PhotoSources {
    fn get(&self, size: &str) -> Option<&str> {
        let url = match size {
            "original" => &self.original,
            "large" => &self.large,
            "medium" => &self.medium,
            "small" => &self.small,
            "portrait" => &self.portrait,
            "landscape" => &self.landscape,
            "tiny" => &self.tiny,
            _ => &None,
        };
        url.as_deref().filter(|url| !url.is_empty())
    }

    /// Requested size, else large, medium, small, original.
    pub fn best(&self, size: &str) -> Option<&str> {
        self.get(size).or_else(|| {
            ["large", "medium", "small", "original"]
                .into_iter()
                .find_map(|fallback| self.get(fallback))
        })
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Photo {
    pub id: i64,
    #[serde(default)]
    pub width: Option<i64>,
    #[serde(default)]
    pub height: Option<i64>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub alt: Option<String>,
    #[serde(default)]
    pub photographer: String,
    #[serde(default)]
    pub photographer_url: String,
    #[serde(default)]
    pub src: PhotoSources,
}

#[derive(Debug, Deserialize)]
struct PhotoPage {
    #[serde(default)]
    photos: Vec<Photo>,
}

#[derive(Debug, Clone)]
pub struct PexelsClient {
    http: reqwest::Client,
    settings: PexelsSettings,
}

impl PexelsClient {
    pub fn new(settings: PexelsSettings) -> Result<Self, ImageError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        tracing::info!(
            "Pexels client initialized with API key: {}",
            if settings.api_key.is_some() { "Present" } else { "Missing" }
        );
        Ok(Self { http, settings })
    }

    pub fn is_configured(&self) -> bool {
        self.settings.api_key.is_some()
    }

    fn api_key(&self) -> Result<&str, ImageError> {
        self.settings.api_key.as_deref().ok_or(ImageError::NotConfigured)
    }

    async fn fetch_photos(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<Vec<Photo>, ImageError> {
        let url = format!("{}/{}", self.settings.base_url.trim_end_matches('/'), endpoint);
        let response = self
            .http
            .get(&url)
            .header(reqwest::header::AUTHORIZATION, self.api_key()?)
            .query(params)
            .send()
            .await?;

        let status = response.status();
        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .unwrap_or("-")
                .to_string()
        };
        let (limit, remaining, reset) = (
            header("X-Ratelimit-Limit"),
            header("X-Ratelimit-Remaining"),
            header("X-Ratelimit-Reset"),
        );

        let body = response.text().await?;
        if status != HttpStatusCode::OK {
            return Err(ImageError::Api {
                status: status.as_u16(),
                body,
            });
        }
        tracing::info!(
            "Pexels API rate limits - Limit: {}, Remaining: {}, Reset: {}",
            limit,
            remaining,
            reset
        );

        let page: PhotoPage = serde_json::from_str(&body).map_err(|error| ImageError::Api {
            status: status.as_u16(),
            body: format!("unreadable body: {}", error),
        })?;
        Ok(page.photos)
    }

    pub async fn search(
        &self,
        query: &str,
        count: u32,
        orientation: &str,
    ) -> Result<Vec<Photo>, ImageError> {
        self.fetch_photos(
            "search",
            &[
                ("query", query.to_string()),
                ("per_page", count.to_string()),
                ("orientation", orientation.to_string()),
            ],
        )
        .await
    }

    pub async fn curated(&self, count: u32) -> Result<Vec<Photo>, ImageError> {
        self.fetch_photos("curated", &[("per_page", count.to_string())])
            .await
    }

    /// Random search hit for `query`, falling back to a random curated photo.
    pub async fn random_image(&self, query: Option<&str>) -> Result<Option<Photo>, ImageError> {
        if let Some(query) = query.filter(|query| !query.trim().is_empty()) {
            match self.search(query, SEARCH_RESULTS, "landscape").await {
                Ok(photos) if !photos.is_empty() => return Ok(pick(&photos)),
                Ok(_) => tracing::info!("No Pexels results for '{}'; using curated photos", query),
                Err(ImageError::NotConfigured) => return Err(ImageError::NotConfigured),
                Err(error) => tracing::error!("Error searching Pexels images: {}", error),
            }
        }

        let photos = self.curated(CURATED_RESULTS).await?;
        Ok(pick(&photos))
    }

    pub async fn download(&self, photo: &Photo, size: &str) -> Result<Vec<u8>, ImageError> {
        let url = photo.src.best(size).ok_or(ImageError::NoImageUrl)?;
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if status != HttpStatusCode::OK {
            return Err(ImageError::Api {
                status: status.as_u16(),
                body: format!("image download failed for {}", url),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

fn pick(photos: &[Photo]) -> Option<Photo> {
    photos.choose(&mut rand::rng()).cloned()
}

/// Attribution block Pexels asks for under each used photo.
pub fn attribution_html(photo: &Photo) -> String {
    let mut html = String::from(r#"<div class="image-attribution">"#);
    if !photo.photographer.is_empty() && !photo.photographer_url.is_empty() {
        html.push_str(&format!(
            r#"Photo by <a href="{}" target="_blank" rel="noopener">{}</a> "#,
            photo.photographer_url, photo.photographer
        ));
    }
    html.push_str(&format!(
        r#"on <a href="{}" target="_blank" rel="noopener">Pexels</a>"#,
        photo.url
    ));
    html.push_str("</div>");
    html
}

/// Search term: first focus keyword, else first category, else a long title word, else the title.
pub fn image_search_term(title: &str, focus_keywords: &str, category_names: &[String]) -> String {
    let mut terms: Vec<String> = focus_keywords
        .split(',')
        .map(str::trim)
        .filter(|keyword| !keyword.is_empty())
        .map(ToString::to_string)
        .collect();
    terms.extend(category_names.iter().take(2).cloned());
    if terms.len() < 2 {
        terms.extend(
            title
                .split_whitespace()
                .filter(|word| word.chars().count() > 4)
                .take(2)
                .map(ToString::to_string),
        );
    }
    terms.into_iter().next().unwrap_or_else(|| title.to_string())
}

pub fn image_file_name(term: &str, photo_id: i64) -> String {
    format!("{}-{}.jpg", slugify(term), photo_id)
}

fn alt_text_prompt(title: &str, keywords: &[String]) -> String {
    let mut prompt = format!(
        "Generate a concise, descriptive alt text for a blog post titled '{}'. ",
        title
    );
    if !keywords.is_empty() {
        prompt.push_str(&format!("The main keywords are: {}. ", keywords.join(", ")));
    }
    prompt.push_str("The alt text should be clear, informative, and SEO-friendly, but not too long.");
    prompt
}

/// Photo alt, else model-written alt text, else `Featured image for {title}`.
pub async fn alt_text(llm: Option<&LlmClient>, photo: &Photo, title: &str, focus_keywords: &str) -> String {
    if let Some(alt) = photo.alt.as_deref().map(str::trim).filter(|alt| !alt.is_empty()) {
        return alt.to_string();
    }
    let fallback = format!("Featured image for {}", title);
    let Some(llm) = llm.filter(|llm| llm.is_configured()) else {
        return fallback;
    };

    let keywords: Vec<String> = focus_keywords
        .split(',')
        .map(str::trim)
        .filter(|keyword| !keyword.is_empty())
        .map(ToString::to_string)
        .collect();
    match llm
        .complete(ALT_TEXT_SYSTEM, &alt_text_prompt(title, &keywords), ALT_TEXT_MAX_TOKENS)
        .await
    {
        Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
        Ok(_) => fallback,
        Err(error) => {
            tracing::error!("Error generating alt text: {}", error);
            fallback
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachedImage {
    pub path: String,
    pub alt_text: String,
    pub search_term: String,
}

/// Finds, downloads and stores a featured image for a post, appending the attribution once.
pub async fn attach_featured_image(
    pool: &SqlitePool,
    pexels: &PexelsClient,
    llm: Option<&LlmClient>,
    media_root: &Path,
    post_id: i64,
) -> anyhow::Result<Option<AttachedImage>> {
    let (title, focus_keywords, content): (String, String, String) =
        sqlx::query_as("SELECT title, focus_keywords, content FROM blog_posts WHERE id = ?")
            .bind(post_id)
            .fetch_optional(pool)
            .await?
            .with_context(|| format!("Post {} not found", post_id))?;
    let categories: Vec<(String,)> = sqlx::query_as(
        r#"
        SELECT c.name FROM blog_categories c
        JOIN blog_post_categories pc ON pc.category_id = c.id
        WHERE pc.post_id = ?
        ORDER BY c.id
        "#,
    )
    .bind(post_id)
    .fetch_all(pool)
    .await?;
    let category_names: Vec<String> = categories.into_iter().map(|(name,)| name).collect();

    let search_term = image_search_term(&title, &focus_keywords, &category_names);
    tracing::info!(post_id, "Searching for image with term: {}", search_term);

    let Some(photo) = pexels.random_image(Some(&search_term)).await? else {
        tracing::warn!(post_id, "No image found for term: {}", search_term);
        return Ok(None);
    };

    let alt_text = alt_text(llm, &photo, &title, &focus_keywords).await;
    let bytes = pexels.download(&photo, "large").await?;

    let file_name = image_file_name(&search_term, photo.id);
    let directory = media_root.join(FEATURED_IMAGE_DIR);
    tokio::fs::create_dir_all(&directory)
        .await
        .with_context(|| format!("Failed to create {}", directory.display()))?;
    tokio::fs::write(directory.join(&file_name), &bytes)
        .await
        .context("Failed to write featured image")?;
    let path = format!("/media/{}/{}", FEATURED_IMAGE_DIR, file_name);

    let attribution = attribution_html(&photo);
    let content = if content.contains(&attribution) {
        content
    } else {
        format!("{}\n\n{}", content, attribution)
    };

    sqlx::query("UPDATE blog_posts SET featured_image = ?, content = ?, updated_at = ? WHERE id = ?")
        .bind(&path)
        .bind(&content)
        .bind(chrono::Utc::now())
        .bind(post_id)
        .execute(pool)
        .await?;

    tracing::info!(post_id, "Added featured image {} with alt text: {}", path, alt_text);
    Ok(Some(AttachedImage {
        path,
        alt_text,
        search_term,
    }))
}
