//! Message templates: parsing, caching and rendering
//!
//! A template such as `"User {UserId} logged in from {@Request}"` is parsed
//! once into [`Token`]s and shared through a [`TemplateCache`].

pub mod cache;
pub mod parser;
pub mod render;
pub mod token;

pub use cache::{TemplateCache, DEFAULT_TEMPLATE_CACHE_CAPACITY};
pub use parser::ParsedTemplate;
pub use render::format_value;
pub use token::{Alignment, CaptureHint, PropertyToken, TextToken, Token};
