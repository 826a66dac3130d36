use std::collections::HashMap;

use anyhow::Context;
use regex::RegexBuilder;
use sqlx::SqlitePool;

use super::links::LinkableHtml;
use crate::models::Post;

pub const DEFAULT_MAX_LINKS: usize = 5;
pub const DEFAULT_RELATED_POSTS: i64 = 3;
pub const RELATED_POSTS_MARKER: &str = r#"<div class="related-posts">"#;

const MIN_KEYWORD_CHARS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct LinkTarget {
    pub id: i64,
    pub title: String,
    pub slug: String,
}

#[derive(Debug, Clone)]
struct KeywordEntry {
    keyword: String,
    targets: Vec<LinkTarget>,
}

/// Keyword to post map over published posts, in first-seen keyword order.
#[derive(Debug, Clone, Default)]
pub struct KeywordIndex {
    entries: Vec<KeywordEntry>,
    positions: HashMap<String, usize>,
}

impl KeywordIndex {
    pub async fn rebuild(pool: &SqlitePool) -> anyhow::Result<Self> {
        let posts: Vec<(i64, String, String, String)> = sqlx::query_as(
            r#"
            SELECT id, title, slug, focus_keywords
            FROM blog_posts
            WHERE status = 'published' AND TRIM(focus_keywords) != ''
            ORDER BY published_at DESC, id DESC
            "#,
        )
        .fetch_all(pool)
        .await
        .context("Failed to load published posts for keyword index")?;

        let mut index = Self::default();
        for (id, title, slug, focus_keywords) in posts {
            let category_names = names_for_post(pool, "blog_categories", "blog_post_categories", "category_id", id).await?;
            let tag_names = names_for_post(pool, "blog_tags", "blog_post_tags", "tag_id", id).await?;

            let target = LinkTarget { id, title, slug };
            for keyword in post_keywords(&target.title, &focus_keywords, &category_names, &tag_names) {
                index.insert(keyword, target.clone());
            }
        }

        tracing::info!(
            "Blog link enhancer index rebuilt with {} keywords",
            index.entries.len()
        );
        Ok(index)
    }

    fn insert(&mut self, keyword: String, target: LinkTarget) {
        if let Some(&position) = self.positions.get(&keyword) {
            let targets = &mut self.entries[position].targets;
            if !targets.iter().any(|existing| existing.id == target.id) {
                targets.push(target);
            }
            return;
        }
        self.positions.insert(keyword.clone(), self.entries.len());
        self.entries.push(KeywordEntry {
            keyword,
            targets: vec![target],
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn targets(&self, keyword: &str) -> &[LinkTarget] {
        self.positions
            .get(keyword)
            .map(|&position| self.entries[position].targets.as_slice())
            .unwrap_or(&[])
    }

    /// Adds up to `max_links` internal links to a published post. Returns whether content changed.
    pub async fn enhance_post_links(
        &self,
        pool: &SqlitePool,
        post_id: i64,
        max_links: usize,
    ) -> anyhow::Result<bool> {
        let Some(post) = sqlx::query_as::<_, Post>("SELECT * FROM blog_posts WHERE id = ?")
            .bind(post_id)
            .fetch_optional(pool)
            .await?
        else {
            tracing::warn!(post_id, "Post not found for link enhancement");
            return Ok(false);
        };

        if !post.is_published() || post.internal_links_count >= max_links as i64 {
            return Ok(false);
        }
        if post.content.trim().is_empty() || post.content.contains("<html") {
            tracing::warn!(post_id, "Post has invalid content format for link enhancement");
            return Ok(false);
        }

        let (content, links_added) = self.link_keywords(&post.content, post_id, max_links);
        if links_added == 0 || content == post.content {
            return Ok(false);
        }

        sqlx::query(
            "UPDATE blog_posts SET content = ?, internal_links_count = internal_links_count + ? WHERE id = ?",
        )
        .bind(&content)
        .bind(links_added as i64)
        .bind(post_id)
        .execute(pool)
        .await
        .context("Failed to save enhanced post content")?;

        tracing::info!(post_id, links_added, "Enhanced post with internal links");
        Ok(true)
    }

    /// Pure rewrite step of [`Self::enhance_post_links`].
    pub fn link_keywords(&self, content: &str, post_id: i64, max_links: usize) -> (String, usize) {
        let Some(mut html) = LinkableHtml::parse(content) else {
            return (content.to_string(), 0);
        };
        let mut links_added = 0;

        for entry in &self.entries {
            if links_added >= max_links {
                break;
            }
            let Some(target) = entry.targets.iter().find(|target| target.id != post_id) else {
                continue;
            };
            let Ok(pattern) = RegexBuilder::new(&format!(r"\b{}\b", regex::escape(&entry.keyword)))
                .case_insensitive(true)
                .build()
            else {
                continue;
            };

            let href = format!("/blog/{}", target.slug);
            let added = html.link_first_matches(&pattern, &href, max_links - links_added);
            if added > 0 {
                tracing::debug!(
                    post_id,
                    target_id = target.id,
                    keyword = %entry.keyword,
                    added,
                    "Added internal links"
                );
            }
            links_added += added;
        }

        if links_added == 0 {
            return (content.to_string(), 0);
        }
        (html.into_html(), links_added)
    }
}

fn post_keywords(
    title: &str,
    focus_keywords: &str,
    category_names: &[String],
    tag_names: &[String],
) -> Vec<String> {
    let mut keywords: Vec<String> = focus_keywords
        .split(',')
        .map(|keyword| keyword.trim().to_lowercase())
        .filter(|keyword| !keyword.is_empty())
        .collect();
    keywords.extend(category_names.iter().map(|name| name.to_lowercase()));
    keywords.extend(tag_names.iter().map(|name| name.to_lowercase()));

    for word in title.split_whitespace() {
        let word = word.to_lowercase();
        if word.chars().count() > MIN_KEYWORD_CHARS && !keywords.contains(&word) {
            keywords.push(word);
        }
    }

    keywords.retain(|keyword| keyword.chars().count() > MIN_KEYWORD_CHARS);
    keywords
}

async fn names_for_post(
    pool: &SqlitePool,
    table: &str,
    join_table: &str,
    join_column: &str,
    post_id: i64,
) -> anyhow::Result<Vec<String>> {
    let sql = format!(
        "SELECT t.name FROM {table} t JOIN {join_table} j ON j.{join_column} = t.id WHERE j.post_id = ? ORDER BY t.id"
    );
    let rows: Vec<(String,)> = sqlx::query_as(&sql).bind(post_id).fetch_all(pool).await?;
    Ok(rows.into_iter().map(|(name,)| name).collect())
}

/// Published posts sharing a category, topped up with posts sharing a tag.
pub async fn related_posts(
    pool: &SqlitePool,
    post_id: i64,
    max_posts: i64,
) -> anyhow::Result<Vec<LinkTarget>> {
    let mut related: Vec<LinkTarget> = sqlx::query_as(
        r#"
        SELECT DISTINCT p.id, p.title, p.slug
        FROM blog_posts p
        JOIN blog_post_categories pc ON pc.post_id = p.id
        WHERE p.status = 'published'
          AND p.id != ?
          AND pc.category_id IN (SELECT category_id FROM blog_post_categories WHERE post_id = ?)
        ORDER BY p.published_at DESC, p.id DESC
        "#,
    )
    .bind(post_id)
    .bind(post_id)
    .fetch_all(pool)
    .await?;

    if (related.len() as i64) < max_posts {
        let by_tag: Vec<LinkTarget> = sqlx::query_as(
            r#"
            SELECT DISTINCT p.id, p.title, p.slug
            FROM blog_posts p
            JOIN blog_post_tags pt ON pt.post_id = p.id
            WHERE p.status = 'published'
              AND p.id != ?
              AND pt.tag_id IN (SELECT tag_id FROM blog_post_tags WHERE post_id = ?)
            ORDER BY p.published_at DESC, p.id DESC
            "#,
        )
        .bind(post_id)
        .bind(post_id)
        .fetch_all(pool)
        .await?;

        for post in by_tag {
            if !related.iter().any(|existing| existing.id == post.id) {
                related.push(post);
            }
        }
    }

    related.truncate(max_posts.max(0) as usize);
    Ok(related)
}

pub fn render_related_posts(posts: &[LinkTarget]) -> String {
    if posts.is_empty() {
        return String::new();
    }
    let mut html = String::from("<div class=\"related-posts\">\n");
    html.push_str("  <h3>You Might Also Like</h3>\n");
    html.push_str("  <ul class=\"related-posts-list\">\n");
    for post in posts {
        html.push_str(&format!(
            "    <li><a href=\"/blog/{}\">{}</a></li>\n",
            post.slug, post.title
        ));
    }
    html.push_str("  </ul>\n");
    html.push_str("</div>");
    html
}

/// Related posts block for a post, or an empty string when nothing relates.
pub async fn generate_related_posts_html(
    pool: &SqlitePool,
    post_id: i64,
    max_posts: i64,
) -> anyhow::Result<String> {
    let posts = related_posts(pool, post_id, max_posts).await?;
    Ok(render_related_posts(&posts))
}

/// Appends the related posts block unless the content already carries one.
pub async fn append_related_posts(pool: &SqlitePool, post_id: i64) -> anyhow::Result<bool> {
    let Some((content,)): Option<(String,)> =
        sqlx::query_as("SELECT content FROM blog_posts WHERE id = ?")
            .bind(post_id)
            .fetch_optional(pool)
            .await?
    else {
        return Ok(false);
    };
    if content.contains(RELATED_POSTS_MARKER) {
        return Ok(false);
    }

    let html = generate_related_posts_html(pool, post_id, DEFAULT_RELATED_POSTS).await?;
    if html.is_empty() {
        return Ok(false);
    }

    sqlx::query("UPDATE blog_posts SET content = ? WHERE id = ?")
        .bind(format!("{}\n\n{}", content, html))
        .bind(post_id)
        .execute(pool)
        .await?;
    tracing::info!(post_id, "Added related posts section");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use chrono::Utc;

    async fn seed_user(pool: &SqlitePool) {
        sqlx::query(
            "INSERT INTO users (username, email, hashed_password, date_joined) VALUES ('writer', 'w@example.com', 'x', ?)",
        )
        .bind(Utc::now())
        .execute(pool)
        .await
        .unwrap();
    }

    async fn seed_post(pool: &SqlitePool, title: &str, slug: &str, status: &str, keywords: &str, content: &str) -> i64 {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO blog_posts (title, slug, author_id, content, status, focus_keywords, created_at, updated_at, published_at)
            VALUES (?, ?, 1, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(title)
        .bind(slug)
        .bind(content)
        .bind(status)
        .bind(keywords)
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .unwrap()
        .last_insert_rowid()
    }

    fn target(id: i64, slug: &str) -> LinkTarget {
        LinkTarget {
            id,
            title: slug.to_string(),
            slug: slug.to_string(),
        }
    }

    #[test]
    fn post_keywords_keep_long_words_only() {
        let keywords = post_keywords(
            "Mastering Async Rust Today",
            "tokio, io, Async Runtime",
            &["Programming".to_string()],
            &["Web".to_string()],
        );
        assert_eq!(
            keywords,
            vec!["tokio", "async runtime", "programming", "mastering", "async", "today"]
        );
    }

    #[test]
    fn link_keywords_skips_existing_anchors_and_self_links() {
        let mut index = KeywordIndex::default();
        index.insert("tokio".to_string(), target(1, "self"));
        index.insert("tokio".to_string(), target(2, "tokio-guide"));
        index.insert("serde".to_string(), target(3, "serde-basics"));

        let html = r#"<p>Read about <a href="/x">Tokio</a> and Tokio again, plus Serde.</p>"#;
        let (content, added) = index.link_keywords(html, 1, 5);

        assert_eq!(added, 2);
        assert_eq!(
            content,
            r#"<p>Read about <a href="/x">Tokio</a> and <a href="/blog/tokio-guide" class="internal-link">Tokio</a> again, plus <a href="/blog/serde-basics" class="internal-link">Serde</a>.</p>"#
        );
    }

    #[test]
    fn link_keywords_respects_word_boundaries_and_cap() {
        let mut index = KeywordIndex::default();
        index.insert("rust".to_string(), target(2, "rust"));
        index.insert("cargo".to_string(), target(3, "cargo"));

        let (content, added) = index.link_keywords("<p>rusty code</p><p>cargo cargo</p>", 1, 1);
        assert_eq!(added, 1);
        assert_eq!(
            content,
            r#"<p>rusty code</p><p><a href="/blog/cargo" class="internal-link">cargo</a> cargo</p>"#
        );
    }

    #[test]
    fn link_keywords_never_touch_attribute_values() {
        let mut index = KeywordIndex::default();
        index.insert("programming".to_string(), target(2, "target"));

        let html = r#"<img alt="x > programming tips" src="/a.png">"#;
        let (content, added) = index.link_keywords(html, 1, 5);
        assert_eq!(added, 0);
        assert_eq!(content, html);

        let html = r#"<p title="a > programming">Programming in practice</p>"#;
        let (content, added) = index.link_keywords(html, 1, 5);
        assert_eq!(added, 1);
        assert_eq!(
            content,
            r#"<p title="a > programming"><a href="/blog/target" class="internal-link">Programming</a> in practice</p>"#
        );
    }

    #[test]
    fn insertion_order_is_preserved() {
        let mut index = KeywordIndex::default();
        for keyword in ["zeta", "alpha", "mid"] {
            index.insert(keyword.to_string(), target(1, keyword));
        }
        let order: Vec<&str> = index.entries.iter().map(|entry| entry.keyword.as_str()).collect();
        assert_eq!(order, vec!["zeta", "alpha", "mid"]);
        assert_eq!(index.targets("alpha").len(), 1);
        assert!(index.targets("missing").is_empty());
    }

    #[tokio::test]
    async fn rebuild_and_enhance_against_database() {
        let pool = test_pool().await;
        seed_user(&pool).await;
        let target_id = seed_post(&pool, "Ownership Explained", "ownership", "published", "borrowing", "<p>x</p>").await;
        let draft_id = seed_post(&pool, "Hidden Draft", "hidden", "draft", "secret", "<p>x</p>").await;
        let post_id = seed_post(
            &pool,
            "Intro",
            "intro",
            "published",
            "",
            "<p>Borrowing rules matter. Ownership too.</p>",
        )
        .await;

        let index = KeywordIndex::rebuild(&pool).await.unwrap();
        assert_eq!(index.targets("borrowing")[0].id, target_id);
        assert_eq!(index.targets("ownership")[0].id, target_id);
        assert!(index.targets("secret").is_empty());

        assert!(index.enhance_post_links(&pool, post_id, 5).await.unwrap());
        assert!(!index.enhance_post_links(&pool, draft_id, 5).await.unwrap());

        let (content, internal): (String, i64) =
            sqlx::query_as("SELECT content, internal_links_count FROM blog_posts WHERE id = ?")
                .bind(post_id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(internal, 2);
        assert!(content.contains(r#"<a href="/blog/ownership" class="internal-link">Borrowing</a>"#));
        assert!(content.contains(r#"<a href="/blog/ownership" class="internal-link">Ownership</a>"#));
    }

    #[tokio::test]
    async fn related_posts_prefer_categories_then_tags() {
        let pool = test_pool().await;
        seed_user(&pool).await;
        let main = seed_post(&pool, "Main", "main", "published", "", "<p>main</p>").await;
        let by_category = seed_post(&pool, "Cat Mate", "cat-mate", "published", "", "").await;
        let by_tag = seed_post(&pool, "Tag Mate", "tag-mate", "published", "", "").await;
        let draft = seed_post(&pool, "Draft Mate", "draft-mate", "draft", "", "").await;

        sqlx::query("INSERT INTO blog_categories (name, slug) VALUES ('Tech', 'tech')")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO blog_tags (name, slug) VALUES ('Rust', 'rust')")
            .execute(&pool)
            .await
            .unwrap();
        for post in [main, by_category, draft] {
            sqlx::query("INSERT INTO blog_post_categories (post_id, category_id) VALUES (?, 1)")
                .bind(post)
                .execute(&pool)
                .await
                .unwrap();
        }
        for post in [main, by_tag] {
            sqlx::query("INSERT INTO blog_post_tags (post_id, tag_id) VALUES (?, 1)")
                .bind(post)
                .execute(&pool)
                .await
                .unwrap();
        }

        let related = related_posts(&pool, main, 3).await.unwrap();
        let slugs: Vec<&str> = related.iter().map(|post| post.slug.as_str()).collect();
        assert_eq!(slugs, vec!["cat-mate", "tag-mate"]);

        assert!(append_related_posts(&pool, main).await.unwrap());
        assert!(!append_related_posts(&pool, main).await.unwrap());
        let (content,): (String,) = sqlx::query_as("SELECT content FROM blog_posts WHERE id = ?")
            .bind(main)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(
            content,
            "<p>main</p>\n\n<div class=\"related-posts\">\n  <h3>You Might Also Like</h3>\n  <ul class=\"related-posts-list\">\n    <li><a href=\"/blog/cat-mate\">Cat Mate</a></li>\n    <li><a href=\"/blog/tag-mate\">Tag Mate</a></li>\n  </ul>\n</div>"
        );
    }
}
