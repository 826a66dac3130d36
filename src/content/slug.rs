use sqlx::SqlitePool;
use unicode_normalization::UnicodeNormalization;

pub const MAX_SLUG_SUFFIX: u32 = 10;

/// Tables whose rows carry a unique `slug` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlugTable {
    Posts,
    Categories,
    Tags,
    Projects,
}

impl SlugTable {
    pub(crate) fn table_name(self) -> &'static str {
        match self {
            Self::Posts => "blog_posts",
            Self::Categories => "blog_categories",
            Self::Tags => "blog_tags",
            Self::Projects => "research_projects",
        }
    }

    fn fallback(self) -> &'static str {
        match self {
            Self::Posts => "post",
            _ => "item",
        }
    }
}

/// URL slug: ASCII-folded, lowercase, words joined by single hyphens.
pub fn slugify(input: &str) -> String {
    let folded: String = input
        .nfkd()
        .filter(|ch| ch.is_ascii())
        .filter(|ch| ch.is_ascii_alphanumeric() || *ch == '_' || *ch == '-' || ch.is_whitespace())
        .collect::<String>()
        .to_lowercase();

    let mut slug = String::with_capacity(folded.len());
    let mut pending_dash = false;
    for ch in folded.trim().chars() {
        if ch == '-' || ch.is_whitespace() {
            pending_dash = true;
            continue;
        }
        if pending_dash {
            slug.push('-');
            pending_dash = false;
        }
        slug.push(ch);
    }

    slug.trim_matches(|ch| ch == '-' || ch == '_').to_string()
}

pub async fn slug_exists(
    pool: &SqlitePool,
    table: SlugTable,
    slug: &str,
    exclude_id: Option<i64>,
) -> Result<bool, sqlx::Error> {
    let sql = format!(
        "SELECT COUNT(*) FROM {} WHERE slug = ? AND id != ?",
        table.table_name()
    );
    let (count,): (i64,) = sqlx::query_as(&sql)
        .bind(slug)
        .bind(exclude_id.unwrap_or(-1))
        .fetch_one(pool)
        .await?;
    Ok(count > 0)
}

/// First free slug among `base`, `base-1` .. `base-10`. `None` once every candidate is taken.
pub async fn unique_slug(
    pool: &SqlitePool,
    table: SlugTable,
    base: &str,
    exclude_id: Option<i64>,
) -> Result<Option<String>, sqlx::Error> {
    let base = if base.is_empty() {
        table.fallback().to_string()
    } else {
        base.to_string()
    };

    if !slug_exists(pool, table, &base, exclude_id).await? {
        return Ok(Some(base));
    }

    for suffix in 1..=MAX_SLUG_SUFFIX {
        let candidate = format!("{}-{}", base, suffix);
        if !slug_exists(pool, table, &candidate, exclude_id).await? {
            return Ok(Some(candidate));
        }
    }

    tracing::warn!(
        table = table.table_name(),
        base = %base,
        "No free slug after {} suffixes",
        MAX_SLUG_SUFFIX
    );
    Ok(None)
}
