pub mod cli;
pub mod dom;
pub mod fetcher;
pub mod pipeline;
pub mod resource_localizer;
pub mod sanitizer;
pub mod style_extractor;
pub mod writer;

// Re-export main types for convenience
pub use cli::CloneCommand;
pub use fetcher::{FetchError, Fetcher};
pub use pipeline::PageCloner;
pub use resource_localizer::{ResourceLocalizer, ResourceRecord};
pub use sanitizer::sanitize;
pub use style_extractor::StyleExtractor;
