use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod audio;
mod cli;
mod config;
mod encoders;
mod lock;
mod pipeline;
#[cfg(test)]
mod tests;
mod vectors;

use cli::Command;
use config::Config;
use pipeline::{Controller, PipelineContext, SearchInput};

fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();

    let log_level = if args.verbose { "audex=debug" } else { "audex=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let base_path = match args.data_dir {
        Some(path) => path,
        None => config::default_base_path()?,
    };
    let config = Config::load_with(&base_path)
        .with_context(|| format!("Failed to load config from {}", base_path.display()))?;

    let context = PipelineContext::from_config(&config)?;
    let controller = Controller::new(context);

    match args.command {
        Command::Init {} => cli::handle_init(&controller),
        Command::LoadModels {} => cli::handle_load_models(&controller),
        Command::EmbedFolder {
            path,
            recursive,
            tags,
        } => cli::handle_embed_folder(&controller, path, recursive, tags),
        Command::AddText { text, tags } => cli::handle_add_text(&controller, text, tags),
        Command::SearchText {
            query,
            k,
            tags,
            json,
        } => cli::handle_search(&controller, &config, SearchInput::Text(query), k, tags, json),
        Command::SearchAudio {
            path,
            k,
            tags,
            json,
        } => cli::handle_search(&controller, &config, SearchInput::Audio(path), k, tags, json),
        Command::Clear { yes } => cli::handle_clear(&controller, yes),
        Command::Status { json } => cli::handle_status(&controller, json),
        Command::List { json } => cli::handle_list(&controller, json),
    }
}
