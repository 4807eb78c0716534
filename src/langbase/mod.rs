//! Langbase Pipes client.
//!
//! Used by the REASONING evidence source when an API key is configured.

mod client;
mod types;

pub use client::{extract_json_from_completion, LangbaseClient};
pub use types::*;
