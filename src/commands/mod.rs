//! Command-line entry points: the HTTP server plus the maintenance tasks.

use std::path::Path;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use sqlx::SqlitePool;

use crate::ai_blog::LlmClient;
use crate::content::enhancer::{DEFAULT_MAX_LINKS, KeywordIndex, append_related_posts};
use crate::content::{SlugTable, slugify, unique_slug};
use crate::images::{PexelsClient, attach_featured_image};
use crate::models::{Post, PostStatus};
use crate::routes::settings::{ensure_seo_settings, ensure_site_settings};

const DEFAULT_CATEGORIES: &[(&str, &str)] = &[
    ("Technology", "Articles about technology and programming"),
    ("Business", "Business insights and tips"),
    ("Lifestyle", "Lifestyle articles and advice"),
    ("Health", "Health and wellness information"),
];

const DEFAULT_TAGS: &[&str] = &["React", "Next.js", "Django", "JavaScript", "Python", "Web Development"];

/// Blog CMS backend with AI post generation.
#[derive(Parser, Debug)]
#[command(name = "cms_backend")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute; defaults to `serve`
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start the HTTP server
    Serve,

    /// Create the schema and seed default settings, categories and tags
    InitDb {
        /// Username of a staff account to create
        #[arg(long, requires_all = ["admin_email", "admin_password"])]
        admin_username: Option<String>,

        #[arg(long)]
        admin_email: Option<String>,

        #[arg(long)]
        admin_password: Option<String>,
    },

    /// Publish AI-generated posts still in draft
    PublishAiPosts {
        /// List what would be published without changing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Add internal links and related posts sections to published posts
    EnhanceBlogLinks {
        /// Maximum internal links per post
        #[arg(long, default_value_t = DEFAULT_MAX_LINKS)]
        max_links: usize,

        /// Only process this post
        #[arg(long)]
        post_id: Option<i64>,

        #[arg(long)]
        dry_run: bool,
    },

    /// Attach Pexels featured images to published posts
    AddFeaturedImages {
        /// Only process this post
        #[arg(long)]
        post_id: Option<i64>,

        /// Replace existing featured images
        #[arg(long)]
        force: bool,

        #[arg(long)]
        dry_run: bool,
    },

    /// Run one AI blog request in the foreground
    GeneratePost {
        #[arg(long)]
        request_id: i64,
    },
}

// =============================================================================
// init-db
// =============================================================================

#[derive(Debug, Clone)]
pub struct AdminSeed {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct InitReport {
    pub categories_created: usize,
    pub tags_created: usize,
    pub admin_created: bool,
}

pub async fn init_db(pool: &SqlitePool, admin: Option<AdminSeed>) -> anyhow::Result<InitReport> {
    let mut report = InitReport::default();

    if let Some(admin) = admin {
        report.admin_created = create_admin(pool, &admin, bcrypt::DEFAULT_COST).await?;
    }
    ensure_site_settings(pool).await.context("Failed to seed site settings")?;
    ensure_seo_settings(pool).await.context("Failed to seed SEO settings")?;

    let (categories,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM blog_categories")
        .fetch_one(pool)
        .await?;
    if categories == 0 {
        for (name, description) in DEFAULT_CATEGORIES {
            let slug = seed_slug(pool, SlugTable::Categories, name).await?;
            sqlx::query("INSERT INTO blog_categories (name, slug, description) VALUES (?, ?, ?)")
                .bind(name)
                .bind(slug)
                .bind(description)
                .execute(pool)
                .await?;
            report.categories_created += 1;
        }
        tracing::info!("Created {} default categories", report.categories_created);
    } else {
        tracing::info!("Categories already exist, skipping creation");
    }

    let (tags,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM blog_tags")
        .fetch_one(pool)
        .await?;
    if tags == 0 {
        for name in DEFAULT_TAGS {
            let slug = seed_slug(pool, SlugTable::Tags, name).await?;
            sqlx::query("INSERT INTO blog_tags (name, slug) VALUES (?, ?)")
                .bind(name)
                .bind(slug)
                .execute(pool)
                .await?;
            report.tags_created += 1;
        }
        tracing::info!("Created {} default tags", report.tags_created);
    } else {
        tracing::info!("Tags already exist, skipping creation");
    }

    Ok(report)
}

async fn seed_slug(pool: &SqlitePool, table: SlugTable, name: &str) -> anyhow::Result<String> {
    unique_slug(pool, table, &slugify(name), None)
        .await?
        .with_context(|| format!("No free slug for {}", name))
}

async fn create_admin(pool: &SqlitePool, admin: &AdminSeed, cost: u32) -> anyhow::Result<bool> {
    let (existing,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE username = ?")
        .bind(&admin.username)
        .fetch_one(pool)
        .await?;
    if existing > 0 {
        tracing::info!("Admin user {} already exists, skipping creation", admin.username);
        return Ok(false);
    }

    let hashed = bcrypt::hash(&admin.password, cost).context("Failed to hash admin password")?;
    let now = Utc::now();
    let user_id = sqlx::query(
        "INSERT INTO users (username, email, hashed_password, is_staff, date_joined) VALUES (?, ?, ?, 1, ?)",
    )
    .bind(&admin.username)
    .bind(&admin.email)
    .bind(hashed)
    .bind(now)
    .execute(pool)
    .await
    .context("Failed to create admin user")?
    .last_insert_rowid();
    sqlx::query("INSERT OR IGNORE INTO research_profiles (user_id, created_at, updated_at) VALUES (?, ?, ?)")
        .bind(user_id)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;

    tracing::info!("Created admin user {}", admin.username);
    Ok(true)
}

// =============================================================================
// publish-ai-posts
// =============================================================================

#[derive(Debug, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub found: usize,
    pub published: usize,
}

pub async fn publish_ai_posts(pool: &SqlitePool, dry_run: bool) -> anyhow::Result<PublishReport> {
    let drafts: Vec<(i64, String, String)> = sqlx::query_as(
        r#"
        SELECT p.id, p.title, u.username FROM ai_blog_generations g
        JOIN blog_posts p ON p.id = g.blog_post_id
        JOIN ai_blog_requests r ON r.id = g.request_id
        JOIN users u ON u.id = r.user_id
        WHERE p.status = 'draft'
        ORDER BY p.id
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut report = PublishReport {
        found: drafts.len(),
        published: 0,
    };
    println!("Found {} AI-generated blog posts in draft status", report.found);

    for (post_id, title, username) in drafts {
        if dry_run {
            println!("Would publish: #{} \"{}\" by {}", post_id, title, username);
            continue;
        }
        let result = sqlx::query("UPDATE blog_posts SET status = ?, updated_at = ? WHERE id = ?")
            .bind(PostStatus::Published)
            .bind(Utc::now())
            .bind(post_id)
            .execute(pool)
            .await;
        match result {
            Ok(_) => {
                report.published += 1;
                println!("Published: \"{}\" (ID: {})", title, post_id);
            }
            Err(e) => {
                tracing::error!(post_id, "Error publishing post: {}", e);
                println!("Error publishing post {}: {}", post_id, e);
            }
        }
    }

    if dry_run {
        println!("DRY RUN: No changes were made");
    } else {
        println!("Successfully published {} blog posts", report.published);
    }
    Ok(report)
}

// =============================================================================
// enhance-blog-links
// =============================================================================

#[derive(Debug, Default, PartialEq, Eq)]
pub struct EnhanceReport {
    pub total: usize,
    pub enhanced: usize,
    pub related_added: usize,
    pub skipped: usize,
    pub errors: usize,
}

pub async fn enhance_blog_links(
    pool: &SqlitePool,
    max_links: usize,
    post_id: Option<i64>,
    dry_run: bool,
) -> anyhow::Result<EnhanceReport> {
    let posts: Vec<Post> = match post_id {
        Some(id) => {
            let post = sqlx::query_as::<_, Post>("SELECT * FROM blog_posts WHERE id = ?")
                .bind(id)
                .fetch_optional(pool)
                .await?;
            let Some(post) = post else {
                anyhow::bail!("Post with ID {} not found", id);
            };
            vec![post]
        }
        None => {
            sqlx::query_as::<_, Post>(
                "SELECT * FROM blog_posts WHERE status = 'published' AND internal_links_count < ? ORDER BY id",
            )
            .bind(max_links as i64)
            .fetch_all(pool)
            .await?
        }
    };

    let mut report = EnhanceReport {
        total: posts.len(),
        ..Default::default()
    };
    println!("Found {} posts to process", report.total);
    if dry_run {
        println!("DRY RUN - No changes will be made");
        for post in &posts {
            println!("Would process post {}: {}", post.id, post.title);
        }
        return Ok(report);
    }

    let index = KeywordIndex::rebuild(pool).await?;
    for post in posts {
        println!("Processing post {}: {}", post.id, post.title);
        let enhanced = match index.enhance_post_links(pool, post.id, max_links).await {
            Ok(enhanced) => enhanced,
            Err(e) => {
                report.errors += 1;
                tracing::error!(post_id = post.id, "Error enhancing post: {:#}", e);
                continue;
            }
        };
        match append_related_posts(pool, post.id).await {
            Ok(true) => {
                report.related_added += 1;
                println!("  Added related posts section");
            }
            Ok(false) => {}
            Err(e) => tracing::warn!(post_id = post.id, "Failed to add related posts: {:#}", e),
        }
        if enhanced {
            report.enhanced += 1;
            println!("  Enhanced with internal links");
        } else {
            report.skipped += 1;
            println!("  No new links added");
        }
    }

    println!(
        "Total posts processed: {}\nPosts enhanced: {}\nPosts skipped: {}\nErrors: {}",
        report.total, report.enhanced, report.skipped, report.errors
    );
    Ok(report)
}

// =============================================================================
// add-featured-images
// =============================================================================

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ImageReport {
    pub total: usize,
    pub processed: usize,
    pub skipped: usize,
    pub errors: usize,
}

pub struct ImageJob<'a> {
    pub pexels: &'a PexelsClient,
    pub llm: Option<&'a LlmClient>,
    pub media_root: &'a Path,
    pub post_id: Option<i64>,
    pub force: bool,
    pub dry_run: bool,
}

pub async fn add_featured_images(pool: &SqlitePool, job: ImageJob<'_>) -> anyhow::Result<ImageReport> {
    if !job.pexels.is_configured() {
        anyhow::bail!("No Pexels API key found. Please set PEXELS_API_KEY in the environment.");
    }

    let posts: Vec<Post> = match job.post_id {
        Some(id) => {
            let post = sqlx::query_as::<_, Post>("SELECT * FROM blog_posts WHERE id = ?")
                .bind(id)
                .fetch_optional(pool)
                .await?;
            let Some(post) = post else {
                anyhow::bail!("Post with ID {} not found", id);
            };
            vec![post]
        }
        None if job.force => {
            sqlx::query_as::<_, Post>("SELECT * FROM blog_posts WHERE status = 'published' ORDER BY id")
                .fetch_all(pool)
                .await?
        }
        None => {
            sqlx::query_as::<_, Post>(
                "SELECT * FROM blog_posts WHERE status = 'published' AND (featured_image IS NULL OR featured_image = '') ORDER BY id",
            )
            .fetch_all(pool)
            .await?
        }
    };

    let mut report = ImageReport {
        total: posts.len(),
        ..Default::default()
    };
    println!("Found {} posts to process", report.total);
    if job.dry_run {
        println!("DRY RUN - No changes will be made");
    }

    for post in posts {
        let has_image = post.featured_image.as_deref().is_some_and(|image| !image.is_empty());
        if has_image && !job.force {
            println!("Skipping post {}: {} (already has image)", post.id, post.title);
            report.skipped += 1;
            continue;
        }
        println!("Processing post {}: {}", post.id, post.title);
        if job.dry_run {
            report.processed += 1;
            continue;
        }

        match attach_featured_image(pool, job.pexels, job.llm, job.media_root, post.id).await {
            Ok(Some(image)) => {
                report.processed += 1;
                println!("  Added image: {} with alt text: {}", image.path, image.alt_text);
            }
            Ok(None) => {
                report.errors += 1;
                println!("  No image found for post {}", post.id);
            }
            Err(e) => {
                report.errors += 1;
                tracing::error!(post_id = post.id, "Error adding featured image: {:#}", e);
            }
        }
    }

    println!(
        "Total posts: {}\nImages added: {}\nPosts skipped: {}\nErrors: {}",
        report.total, report.processed, report.skipped, report.errors
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PexelsSettings;
    use crate::db::test_pool;

    async fn seed_author(pool: &SqlitePool) -> i64 {
        sqlx::query(
            "INSERT INTO users (username, email, hashed_password, date_joined) VALUES ('writer', 'writer@example.com', 'x', ?)",
        )
        .bind(Utc::now())
        .execute(pool)
        .await
        .unwrap()
        .last_insert_rowid()
    }

    async fn seed_post(pool: &SqlitePool, author: i64, slug: &str, status: &str, content: &str) -> i64 {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO blog_posts (title, slug, author_id, content, status, created_at, updated_at, published_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(slug.replace('-', " "))
        .bind(slug)
        .bind(author)
        .bind(content)
        .bind(status)
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .unwrap()
        .last_insert_rowid()
    }

    #[test]
    fn serve_is_the_default() {
        let cli = Cli::try_parse_from(["cms_backend"]).unwrap();
        assert_eq!(cli.command, None);

        let cli = Cli::try_parse_from(["cms_backend", "enhance-blog-links", "--post-id", "4"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Command::EnhanceBlogLinks {
                max_links: 5,
                post_id: Some(4),
                dry_run: false
            })
        );
        assert!(Cli::try_parse_from(["cms_backend", "init-db", "--admin-username", "root"]).is_err());
    }

    #[tokio::test]
    async fn init_db_seeds_once() {
        let pool = test_pool().await;
        let admin = AdminSeed {
            username: "root".to_string(),
            email: "root@example.com".to_string(),
            password: "pass-word-123".to_string(),
        };
        let report = init_db(&pool, Some(admin.clone())).await.unwrap();
        assert_eq!(report.categories_created, 4);
        assert_eq!(report.tags_created, 6);
        assert!(report.admin_created);

        let again = init_db(&pool, Some(admin)).await.unwrap();
        assert_eq!(again, InitReport::default());

        let (slug,): (String,) = sqlx::query_as("SELECT slug FROM blog_tags WHERE name = 'Next.js'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(slug, "nextjs");
        let (is_staff,): (bool,) = sqlx::query_as("SELECT is_staff FROM users WHERE username = 'root'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert!(is_staff);
        let (settings,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM site_settings")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(settings, 1);
    }

    #[tokio::test]
    async fn publish_ai_posts_respects_dry_run() {
        let pool = test_pool().await;
        let author = seed_author(&pool).await;
        let post_id = seed_post(&pool, author, "ai-draft", "draft", "<p>x</p>").await;
        seed_post(&pool, author, "manual-draft", "draft", "<p>y</p>").await;
        sqlx::query(
            "INSERT INTO ai_blog_requests (user_id, prompt, topic, status, created_at, updated_at) VALUES (?, 'p', 't', 'completed', ?, ?)",
        )
        .bind(author)
        .bind(Utc::now())
        .bind(Utc::now())
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO ai_blog_generations (request_id, blog_post_id, title, content, created_at) VALUES (1, ?, 'ai draft', '', ?)",
        )
        .bind(post_id)
        .bind(Utc::now())
        .execute(&pool)
        .await
        .unwrap();

        let report = publish_ai_posts(&pool, true).await.unwrap();
        assert_eq!(report, PublishReport { found: 1, published: 0 });

        let report = publish_ai_posts(&pool, false).await.unwrap();
        assert_eq!(report, PublishReport { found: 1, published: 1 });
        let (published,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM blog_posts WHERE status = 'published'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(published, 1);
    }

    #[tokio::test]
    async fn enhance_blog_links_reports_missing_post() {
        let pool = test_pool().await;
        let error = enhance_blog_links(&pool, 5, Some(42), false).await.unwrap_err();
        assert_eq!(error.to_string(), "Post with ID 42 not found");
    }

    #[tokio::test]
    async fn enhance_blog_links_dry_run_changes_nothing() {
        let pool = test_pool().await;
        let author = seed_author(&pool).await;
        seed_post(&pool, author, "rust-basics", "published", "<p>Intro to rust</p>").await;
        seed_post(&pool, author, "hidden-draft", "draft", "<p>Draft</p>").await;

        let report = enhance_blog_links(&pool, 5, None, true).await.unwrap();
        assert_eq!(report.total, 1);
        assert_eq!(report.enhanced, 0);
        let (content,): (String,) = sqlx::query_as("SELECT content FROM blog_posts WHERE slug = 'rust-basics'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(content, "<p>Intro to rust</p>");
    }

    #[tokio::test]
    async fn featured_images_require_pexels_key() {
        let pool = test_pool().await;
        let pexels = PexelsClient::new(PexelsSettings {
            api_key: None,
            base_url: "http://127.0.0.1:9".to_string(),
        })
        .unwrap();
        let media = tempfile::tempdir().unwrap();
        let job = ImageJob {
            pexels: &pexels,
            llm: None,
            media_root: media.path(),
            post_id: None,
            force: false,
            dry_run: true,
        };
        assert!(add_featured_images(&pool, job).await.is_err());
    }

    #[tokio::test]
    async fn featured_images_dry_run_skips_posts_with_images() {
        let pool = test_pool().await;
        let author = seed_author(&pool).await;
        let with_image = seed_post(&pool, author, "has-image", "published", "<p>a</p>").await;
        seed_post(&pool, author, "needs-image", "published", "<p>b</p>").await;
        sqlx::query("UPDATE blog_posts SET featured_image = '/media/blog/images/a.jpg' WHERE id = ?")
            .bind(with_image)
            .execute(&pool)
            .await
            .unwrap();

        let pexels = PexelsClient::new(PexelsSettings {
            api_key: Some("key".to_string()),
            base_url: "http://127.0.0.1:9".to_string(),
        })
        .unwrap();
        let media = tempfile::tempdir().unwrap();
        let job = ImageJob {
            pexels: &pexels,
            llm: None,
            media_root: media.path(),
            post_id: None,
            force: false,
            dry_run: true,
        };
        let report = add_featured_images(&pool, job).await.unwrap();
        assert_eq!(report, ImageReport { total: 1, processed: 1, skipped: 0, errors: 0 });
    }
}
