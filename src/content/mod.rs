pub mod enhancer;
pub mod links;
pub mod posts;
pub mod slug;

pub use enhancer::{KeywordIndex, append_related_posts, generate_related_posts_html};
pub use links::count_links;
pub use posts::PostDraft;
pub use slug::{SlugTable, slugify, unique_slug};
