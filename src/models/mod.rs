pub mod ai_blog;
pub mod blog;
pub mod research;
pub mod settings;
pub mod user;

pub use ai_blog::*;
pub use blog::*;
pub use research::*;
pub use settings::*;
pub use user::*;
