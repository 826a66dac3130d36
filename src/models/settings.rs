use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const DEFAULT_SITE_NAME: &str = "My Website";
pub const DEFAULT_META_DESCRIPTION: &str = "Welcome to my website";
pub const DEFAULT_ROBOTS_TXT: &str = "User-agent: *\nAllow: /";

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SiteSettings {
    pub id: i64,
    pub site_name: String,
    pub site_description: String,
    pub logo: Option<String>,
    pub favicon: Option<String>,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub facebook: String,
    pub twitter: String,
    pub instagram: String,
    pub linkedin: String,
    pub footer_text: String,
    pub copyright_text: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct SiteSettingsPatch {
    pub site_name: Option<String>,
    pub site_description: Option<String>,
    pub logo: Option<String>,
    pub favicon: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub facebook: Option<String>,
    pub twitter: Option<String>,
    pub instagram: Option<String>,
    pub linkedin: Option<String>,
    pub footer_text: Option<String>,
    pub copyright_text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SeoSettings {
    pub id: i64,
    pub default_meta_title: String,
    pub default_meta_description: String,
    pub default_meta_keywords: String,
    pub og_image: Option<String>,
    pub google_analytics_id: String,
    pub google_tag_manager_id: String,
    pub google_site_verification: String,
    pub bing_site_verification: String,
    pub robots_txt: String,
    pub enable_structured_data: bool,
}

#[derive(Debug, Deserialize, Default)]
pub struct SeoSettingsPatch {
    pub default_meta_title: Option<String>,
    pub default_meta_description: Option<String>,
    pub default_meta_keywords: Option<String>,
    pub og_image: Option<String>,
    pub google_analytics_id: Option<String>,
    pub google_tag_manager_id: Option<String>,
    pub google_site_verification: Option<String>,
    pub bing_site_verification: Option<String>,
    pub robots_txt: Option<String>,
    pub enable_structured_data: Option<bool>,
}
