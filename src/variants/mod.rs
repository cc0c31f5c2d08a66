//! Per-product color-variant discovery and extraction.

mod discover;
mod extract;

pub(crate) use discover::{compile_code_pattern, extract_codes, with_query_param};
pub use discover::{merge_refs, numeric_anchor, VariantDiscoverer};
pub use extract::VariantExtractor;
