#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::assigning_clones,
    clippy::bool_to_int_with_if,
    clippy::case_sensitive_file_extension_comparisons,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::doc_markdown,
    clippy::field_reassign_with_default,
    clippy::float_cmp,
    clippy::implicit_clone,
    clippy::items_after_statements,
    clippy::map_unwrap_or,
    clippy::manual_let_else,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::new_without_default,
    clippy::needless_pass_by_value,
    clippy::needless_raw_string_hashes,
    clippy::redundant_closure_for_method_calls,
    clippy::return_self_not_must_use,
    clippy::similar_names,
    clippy::single_match_else,
    clippy::struct_field_names,
    clippy::too_many_lines,
    clippy::uninlined_format_args,
    clippy::unnecessary_cast,
    clippy::unnecessary_lazy_evaluations,
    clippy::unnecessary_literal_bound,
    clippy::unnecessary_map_or,
    clippy::unused_self,
    clippy::cast_precision_loss,
    clippy::unnecessary_wraps,
    dead_code
)]

use clap::Subcommand;
use serde::{Deserialize, Serialize};

pub mod agent;
pub mod catalog;
pub mod channels;
pub mod config;
pub mod gateway;
pub mod health;
pub mod media;
pub mod providers;
pub(crate) mod security;
pub mod sessions;

pub use config::Config;

/// Product catalog subcommands
#[derive(Subcommand, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum CatalogCommands {
    /// Print every product in the catalog
    Show {
        /// Print the JSON embedded in assistant prompts instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Import products from a JSON file (array of products)
    #[command(long_about = "\
Import products from a JSON file.

The file holds a JSON array of products. Each product is written in a \
single transaction together with its category, tags, testimonials, \
ebook or training details and downloadable files. Importing a product \
id that already exists replaces it.

Examples:
  shopwise catalog import products.json")]
    Import {
        /// Path to the JSON file
        path: std::path::PathBuf,
    },
}

/// Configuration subcommands
#[derive(Subcommand, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConfigCommands {
    /// Dump the full configuration JSON Schema to stdout
    Schema,
}
