use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod errors;
mod handlers;
mod validation;

pub use handlers::*;

#[derive(Parser, Debug)]
#[command(version, about = "Local audio and text embedding index", long_about = None)]
pub struct Args {
    /// Data directory (default: $AUDEX_BASE_PATH or ~/.local/share/audex)
    #[clap(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Debug logging (RUST_LOG takes precedence)
    #[clap(short, long, global = true, default_value = "false")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create or open the vector store
    Init {},

    /// Load the text and audio encoders, downloading weights if needed
    LoadModels {},

    /// Embed every audio file in a folder
    EmbedFolder {
        /// Folder (or single file) to index
        path: PathBuf,

        /// Walk subfolders too
        #[clap(short, long, default_value = "false")]
        recursive: bool,

        /// Extra tags for every record, comma separated
        #[clap(short = 'g', long, allow_hyphen_values = true)]
        tags: Option<String>,
    },

    /// Index a piece of text
    AddText {
        text: String,

        /// Extra tags, comma separated
        #[clap(short = 'g', long, allow_hyphen_values = true)]
        tags: Option<String>,
    },

    /// Rank stored records against a text query
    SearchText {
        query: String,

        /// Number of results (default from config)
        #[clap(short, long)]
        k: Option<usize>,

        /// Only records carrying all of these tags
        #[clap(short = 'g', long, allow_hyphen_values = true)]
        tags: Option<String>,

        /// Print results as JSON
        #[clap(long, default_value = "false")]
        json: bool,
    },

    /// Rank stored records against an audio file
    SearchAudio {
        path: PathBuf,

        /// Number of results (default from config)
        #[clap(short, long)]
        k: Option<usize>,

        /// Only records carrying all of these tags
        #[clap(short = 'g', long, allow_hyphen_values = true)]
        tags: Option<String>,

        /// Print results as JSON
        #[clap(long, default_value = "false")]
        json: bool,
    },

    /// Delete every record in the store
    Clear {
        /// Skip confirmation
        #[clap(short, long, default_value = "false")]
        yes: bool,
    },

    /// Show store and encoder state
    Status {
        #[clap(long, default_value = "false")]
        json: bool,
    },

    /// Print every stored record
    List {
        #[clap(long, default_value = "false")]
        json: bool,
    },
}
