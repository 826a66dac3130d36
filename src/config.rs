use std::path::PathBuf;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://cms.db";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";
pub const DEFAULT_MEDIA_ROOT: &str = "media";
pub const DEFAULT_TOKEN_TTL_HOURS: i64 = 720;

pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const GROQ_MODEL: &str = "deepseek-r1-distill-llama-70b";
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const OPENAI_MODEL: &str = "gpt-4o";
pub const PEXELS_BASE_URL: &str = "https://api.pexels.com/v1";

pub const DEFAULT_LLM_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_LLM_MAX_RETRIES: u32 = 2;
pub const DEFAULT_LLM_RETRY_BASE_MS: u64 = 1500;
pub const DEFAULT_LLM_RETRY_MAX_MS: u64 = 12_000;
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    Groq,
    OpenAi,
}

impl LlmProvider {
    pub fn label(self) -> &'static str {
        match self {
            Self::Groq => "Groq",
            Self::OpenAi => "OpenAI",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub provider: LlmProvider,
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
}

#[derive(Debug, Clone)]
pub struct PexelsSettings {
    pub api_key: Option<String>,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub secret_key: String,
    pub bind_addr: String,
    pub media_root: PathBuf,
    pub site_domain: Option<String>,
    pub token_ttl_hours: i64,
    pub admin_username: Option<String>,
    pub llm: LlmSettings,
    pub pexels: PexelsSettings,
    pub auto_publish: bool,
    pub background_jobs: bool,
    pub max_concurrent_jobs: usize,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let groq_key = env_string("GROQ_API_KEY");
        let openai_key = env_string("OPENAI_API_KEY");

        // Groq wins whenever its key is present.
        let (provider, default_base, default_model) = if groq_key.is_some() {
            (LlmProvider::Groq, GROQ_BASE_URL, GROQ_MODEL)
        } else {
            (LlmProvider::OpenAi, OPENAI_BASE_URL, OPENAI_MODEL)
        };

        let retry_base_ms = env_parse("LLM_RETRY_BASE_MS")
            .filter(|value: &u64| *value > 0)
            .unwrap_or(DEFAULT_LLM_RETRY_BASE_MS);

        let llm = LlmSettings {
            provider,
            api_key: groq_key.or(openai_key),
            base_url: env_string("LLM_BASE_URL").unwrap_or_else(|| default_base.to_string()),
            model: env_string("LLM_MODEL").unwrap_or_else(|| default_model.to_string()),
            timeout_secs: env_parse("LLM_TIMEOUT_SECS").unwrap_or(DEFAULT_LLM_TIMEOUT_SECS),
            max_retries: env_parse("LLM_MAX_RETRIES")
                .map(|value: u32| value.min(10))
                .unwrap_or(DEFAULT_LLM_MAX_RETRIES),
            retry_base_ms,
            retry_max_ms: env_parse("LLM_RETRY_MAX_MS")
                .filter(|value: &u64| *value > 0)
                .unwrap_or(DEFAULT_LLM_RETRY_MAX_MS)
                .max(retry_base_ms),
        };

        Self {
            database_url: env_string("DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            secret_key: env_string("SECRET_KEY").unwrap_or_default(),
            bind_addr: env_string("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            media_root: PathBuf::from(
                env_string("MEDIA_ROOT").unwrap_or_else(|| DEFAULT_MEDIA_ROOT.to_string()),
            ),
            site_domain: env_string("SITE_DOMAIN"),
            token_ttl_hours: env_parse("TOKEN_TTL_HOURS")
                .filter(|value: &i64| *value > 0)
                .unwrap_or(DEFAULT_TOKEN_TTL_HOURS),
            admin_username: env_string("ADMIN_USERNAME"),
            llm,
            pexels: PexelsSettings {
                api_key: env_string("PEXELS_API_KEY"),
                base_url: env_string("PEXELS_BASE_URL")
                    .unwrap_or_else(|| PEXELS_BASE_URL.to_string()),
            },
            auto_publish: env_bool("AI_AUTO_PUBLISH_POSTS").unwrap_or(true),
            background_jobs: env_bool("AI_BACKGROUND_JOBS").unwrap_or(true),
            max_concurrent_jobs: env_parse("AI_MAX_CONCURRENT_JOBS")
                .filter(|value: &usize| *value > 0)
                .unwrap_or(DEFAULT_MAX_CONCURRENT_JOBS),
        }
    }

    /// Configuration for tests: in-memory database, no outbound keys, no background jobs.
    #[cfg(test)]
    pub fn for_tests(media_root: PathBuf) -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            secret_key: "test-secret".to_string(),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            media_root,
            site_domain: Some("example.com".to_string()),
            token_ttl_hours: DEFAULT_TOKEN_TTL_HOURS,
            admin_username: None,
            llm: LlmSettings {
                provider: LlmProvider::OpenAi,
                api_key: None,
                base_url: OPENAI_BASE_URL.to_string(),
                model: OPENAI_MODEL.to_string(),
                timeout_secs: 5,
                max_retries: 0,
                retry_base_ms: 1,
                retry_max_ms: 1,
            },
            pexels: PexelsSettings {
                api_key: None,
                base_url: PEXELS_BASE_URL.to_string(),
            },
            auto_publish: true,
            background_jobs: false,
            max_concurrent_jobs: 1,
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|raw| raw.parse::<T>().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    env_string(key).and_then(|raw| parse_bool(&raw))
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
