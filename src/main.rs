mod ai_blog;
mod commands;
mod config;
mod content;
mod db;
mod images;
mod models;
mod routes;
mod state;

use anyhow::Context;
use axum::{ServiceExt, extract::Request};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ai_blog::LlmClient;
use commands::{AdminSeed, Cli, Command, ImageJob};
use config::AppConfig;
use images::PexelsClient;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cms_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = AppConfig::from_env();

    let pool = db::init_db(&config.database_url).await?;
    tracing::info!("Database initialized at {}", config.database_url);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(pool, config).await,
        Command::InitDb {
            admin_username,
            admin_email,
            admin_password,
        } => {
            let admin = match (admin_username, admin_email, admin_password) {
                (Some(username), Some(email), Some(password)) => Some(AdminSeed {
                    username,
                    email,
                    password,
                }),
                _ => None,
            };
            let report = commands::init_db(&pool, admin).await?;
            println!(
                "Initialization complete: {} categories, {} tags created{}",
                report.categories_created,
                report.tags_created,
                if report.admin_created { ", admin user created" } else { "" }
            );
            Ok(())
        }
        Command::PublishAiPosts { dry_run } => {
            commands::publish_ai_posts(&pool, dry_run).await?;
            Ok(())
        }
        Command::EnhanceBlogLinks {
            max_links,
            post_id,
            dry_run,
        } => {
            commands::enhance_blog_links(&pool, max_links, post_id, dry_run).await?;
            Ok(())
        }
        Command::AddFeaturedImages {
            post_id,
            force,
            dry_run,
        } => {
            let pexels = PexelsClient::new(config.pexels.clone())?;
            let llm = LlmClient::new(config.llm.clone())?;
            let job = ImageJob {
                pexels: &pexels,
                llm: llm.is_configured().then_some(&llm),
                media_root: &config.media_root,
                post_id,
                force,
                dry_run,
            };
            commands::add_featured_images(&pool, job).await?;
            Ok(())
        }
        Command::GeneratePost { request_id } => {
            let generator = ai_blog::BlogGenerator::new(pool, &config)?;
            let generation_id = generator.generate_blog_post(request_id).await?;
            println!("Request {} completed with generation {}", request_id, generation_id);
            Ok(())
        }
    }
}

async fn serve(pool: sqlx::SqlitePool, config: AppConfig) -> anyhow::Result<()> {
    if config.secret_key.is_empty() {
        anyhow::bail!("SECRET_KEY must be set to serve the API");
    }
    if let Some(username) = &config.admin_username {
        if db::promote_admin(&pool, username).await? {
            tracing::info!("Promoted {} to staff", username);
        }
    }

    tokio::fs::create_dir_all(&config.media_root)
        .await
        .with_context(|| format!("Failed to create {}", config.media_root.display()))?;

    let addr = config.bind_addr.clone();
    let state = AppState::new(pool, config)?;
    let app = routes::app(state);

    tracing::info!("Server running on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, ServiceExt::<Request>::into_make_service(app)).await?;

    Ok(())
}
