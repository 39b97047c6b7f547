//! Client query handling.

pub mod rewrite;
pub(crate) mod transform;

pub use rewrite::RewrittenQuery;
pub use rewrite::rewrite;
pub use rewrite::rewrite_document;
