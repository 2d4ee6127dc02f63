//! Diff parsing and query/symbol extraction (spec component 4.1).

pub mod description;
pub mod parser;
pub mod queries;

pub use description::{analyze_description, DescriptionAnalysis};
pub use parser::parse_unified_diff;
pub use queries::{extract_queries, extract_symbols, is_function_like};
