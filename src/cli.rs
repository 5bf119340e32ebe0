use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the HTTP API
    Serve {
        /// Override the listen address from config
        #[clap(short, long)]
        listen: Option<String>,
    },

    /// Embed the catalog and warm the embedding cache
    Index {},

    /// Search the catalog with free text
    Search {
        query: String,

        /// Comma separated categories, e.g. "ring,necklace"
        #[clap(short, long)]
        categories: Option<String>,

        /// Number of results
        #[clap(short = 'k', long)]
        top_k: Option<usize>,

        /// Candidates fetched before filtering
        #[clap(long)]
        semantic_top_k: Option<usize>,

        /// Reject candidates at least this close to a decoration phrase
        #[clap(long)]
        max_decoration_score: Option<f32>,

        /// Require candidates closer than this to a plain phrase
        #[clap(long)]
        min_plain_score: Option<f32>,
    },

    /// Items similar to a catalog item
    Recommend {
        id: u64,

        #[clap(short = 'k', long)]
        top_k: Option<usize>,
    },

    /// Search with an image file
    Upload {
        file: PathBuf,

        /// Text to combine with the image
        #[clap(short, long)]
        text: Option<String>,

        #[clap(short = 'k', long)]
        top_k: Option<usize>,
    },

    /// Show a catalog item with its description
    Product { id: u64 },
}

pub fn parse_categories(categories: &str) -> Vec<String> {
    categories
        .split(',')
        .map(|c| c.trim().to_lowercase())
        .filter(|c| !c.is_empty())
        .collect()
}
