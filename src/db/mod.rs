use std::str::FromStr;

use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT NOT NULL UNIQUE,
        email TEXT NOT NULL UNIQUE,
        first_name TEXT NOT NULL DEFAULT '',
        last_name TEXT NOT NULL DEFAULT '',
        hashed_password TEXT NOT NULL,
        is_staff INTEGER NOT NULL DEFAULT 0,
        is_active INTEGER NOT NULL DEFAULT 1,
        token_version INTEGER NOT NULL DEFAULT 1,
        date_joined TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS blog_categories (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        slug TEXT NOT NULL UNIQUE,
        description TEXT NOT NULL DEFAULT ''
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS blog_tags (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        slug TEXT NOT NULL UNIQUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS blog_posts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL,
        slug TEXT NOT NULL UNIQUE,
        author_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        content TEXT NOT NULL,
        content_format TEXT NOT NULL DEFAULT 'html'
            CHECK (content_format IN ('html', 'rich_text', 'markdown')),
        featured_image TEXT NULL,
        excerpt TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        published_at TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'draft' CHECK (status IN ('draft', 'published')),
        meta_title TEXT NOT NULL DEFAULT '',
        meta_description TEXT NOT NULL DEFAULT '',
        canonical_url TEXT NOT NULL DEFAULT '',
        focus_keywords TEXT NOT NULL DEFAULT '',
        internal_links_count INTEGER NOT NULL DEFAULT 0,
        external_links_count INTEGER NOT NULL DEFAULT 0,
        is_featured INTEGER NOT NULL DEFAULT 0
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_blog_posts_status_published ON blog_posts (status, published_at)",
    "CREATE INDEX IF NOT EXISTS idx_blog_posts_author ON blog_posts (author_id)",
    r#"
    CREATE TABLE IF NOT EXISTS blog_post_categories (
        post_id INTEGER NOT NULL REFERENCES blog_posts(id) ON DELETE CASCADE,
        category_id INTEGER NOT NULL REFERENCES blog_categories(id) ON DELETE CASCADE,
        PRIMARY KEY (post_id, category_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS blog_post_tags (
        post_id INTEGER NOT NULL REFERENCES blog_posts(id) ON DELETE CASCADE,
        tag_id INTEGER NOT NULL REFERENCES blog_tags(id) ON DELETE CASCADE,
        PRIMARY KEY (post_id, tag_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS site_settings (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        site_name TEXT NOT NULL,
        site_description TEXT NOT NULL DEFAULT '',
        logo TEXT NULL,
        favicon TEXT NULL,
        email TEXT NOT NULL DEFAULT '',
        phone TEXT NOT NULL DEFAULT '',
        address TEXT NOT NULL DEFAULT '',
        facebook TEXT NOT NULL DEFAULT '',
        twitter TEXT NOT NULL DEFAULT '',
        instagram TEXT NOT NULL DEFAULT '',
        linkedin TEXT NOT NULL DEFAULT '',
        footer_text TEXT NOT NULL DEFAULT '',
        copyright_text TEXT NOT NULL DEFAULT ''
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS seo_settings (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        default_meta_title TEXT NOT NULL,
        default_meta_description TEXT NOT NULL,
        default_meta_keywords TEXT NOT NULL DEFAULT '',
        og_image TEXT NULL,
        google_analytics_id TEXT NOT NULL DEFAULT '',
        google_tag_manager_id TEXT NOT NULL DEFAULT '',
        google_site_verification TEXT NOT NULL DEFAULT '',
        bing_site_verification TEXT NOT NULL DEFAULT '',
        robots_txt TEXT NOT NULL DEFAULT '',
        enable_structured_data INTEGER NOT NULL DEFAULT 1
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ai_blog_batch_requests (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        topic TEXT NOT NULL,
        description TEXT NOT NULL,
        prompt TEXT NOT NULL,
        keywords TEXT NOT NULL DEFAULT '',
        num_posts INTEGER NOT NULL DEFAULT 5,
        allow_web_search INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL DEFAULT 'pending',
        generated_ideas TEXT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        error_message TEXT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ai_blog_requests (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        prompt TEXT NOT NULL,
        topic TEXT NOT NULL,
        keywords TEXT NOT NULL DEFAULT '',
        allow_web_search INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL DEFAULT 'pending',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        error_message TEXT NULL,
        parent_batch_id INTEGER NULL REFERENCES ai_blog_batch_requests(id) ON DELETE SET NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_ai_blog_requests_user ON ai_blog_requests (user_id, created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS ai_blog_generations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        request_id INTEGER NOT NULL UNIQUE REFERENCES ai_blog_requests(id) ON DELETE CASCADE,
        blog_post_id INTEGER NULL UNIQUE REFERENCES blog_posts(id) ON DELETE SET NULL,
        title TEXT NOT NULL,
        content TEXT NOT NULL,
        excerpt TEXT NOT NULL DEFAULT '',
        meta_title TEXT NOT NULL DEFAULT '',
        meta_description TEXT NOT NULL DEFAULT '',
        focus_keywords TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ai_generation_categories (
        generation_id INTEGER NOT NULL REFERENCES ai_blog_generations(id) ON DELETE CASCADE,
        category_id INTEGER NOT NULL REFERENCES blog_categories(id) ON DELETE CASCADE,
        PRIMARY KEY (generation_id, category_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ai_generation_tags (
        generation_id INTEGER NOT NULL REFERENCES ai_blog_generations(id) ON DELETE CASCADE,
        tag_id INTEGER NOT NULL REFERENCES blog_tags(id) ON DELETE CASCADE,
        PRIMARY KEY (generation_id, tag_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS research_profiles (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL UNIQUE REFERENCES users(id) ON DELETE CASCADE,
        bio TEXT NOT NULL DEFAULT '',
        institution TEXT NOT NULL DEFAULT '',
        position TEXT NOT NULL DEFAULT '',
        research_interests TEXT NOT NULL DEFAULT '',
        website TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS research_projects (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL,
        slug TEXT NOT NULL UNIQUE,
        description TEXT NOT NULL,
        owner_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        status TEXT NOT NULL DEFAULT 'draft'
            CHECK (status IN ('draft', 'active', 'completed', 'archived')),
        is_public INTEGER NOT NULL DEFAULT 0,
        start_date TEXT NULL,
        end_date TEXT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS research_project_collaborators (
        project_id INTEGER NOT NULL REFERENCES research_projects(id) ON DELETE CASCADE,
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        PRIMARY KEY (project_id, user_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS research_data (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        project_id INTEGER NOT NULL REFERENCES research_projects(id) ON DELETE CASCADE,
        title TEXT NOT NULL,
        description TEXT NOT NULL,
        data_type TEXT NOT NULL
            CHECK (data_type IN ('raw', 'processed', 'analysis', 'visualization')),
        file_path TEXT NOT NULL,
        uploaded_by_id INTEGER NULL REFERENCES users(id) ON DELETE SET NULL,
        version TEXT NOT NULL DEFAULT '',
        metadata TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS research_analyses (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        project_id INTEGER NOT NULL REFERENCES research_projects(id) ON DELETE CASCADE,
        data_id INTEGER NOT NULL REFERENCES research_data(id) ON DELETE CASCADE,
        title TEXT NOT NULL,
        description TEXT NOT NULL,
        analysis_type TEXT NOT NULL,
        parameters TEXT NOT NULL DEFAULT '{}',
        results TEXT NOT NULL DEFAULT '{}',
        status TEXT NOT NULL DEFAULT 'pending'
            CHECK (status IN ('pending', 'processing', 'completed', 'failed')),
        error_message TEXT NOT NULL DEFAULT '',
        requested_by_id INTEGER NULL REFERENCES users(id) ON DELETE SET NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS research_comments (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        project_id INTEGER NOT NULL REFERENCES research_projects(id) ON DELETE CASCADE,
        author_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        content TEXT NOT NULL,
        parent_id INTEGER NULL REFERENCES research_comments(id) ON DELETE CASCADE,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
];

pub async fn init_db(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    init_pool(database_url, 10).await
}

pub async fn init_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        // In-memory databases vanish with their connection.
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    for statement in SCHEMA {
        sqlx::query(statement).execute(&pool).await?;
    }

    Ok(pool)
}

pub async fn promote_admin(pool: &SqlitePool, username: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE users SET is_staff = 1 WHERE username = ?")
        .bind(username)
        .execute(pool)
        .await?;
    tracing::info!("Admin promotion checked for username: {}", username);
    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    init_pool("sqlite::memory:", 1)
        .await
        .expect("in-memory database")
}
