//! Run summary output.

mod generator;

pub use generator::{generate_json_summary, generate_markdown_summary, write_summary};
