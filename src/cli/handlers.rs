use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::cli::errors::CliError;
use crate::cli::validation;
use crate::config::Config;
use crate::encoders::{EncoderKind, LoadProgress, ModelState};
use crate::pipeline::{collect_files, Controller, SearchInput};
use crate::vectors::{QueryResult, SearchFilter};

fn bar_style(template: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, CliError> {
    Ok(serde_json::to_string_pretty(value)?)
}

fn state_label(state: &ModelState) -> Result<String, CliError> {
    Ok(serde_json::to_string(state)?)
}

fn tags_arg(tags: Option<String>) -> Result<BTreeSet<String>, CliError> {
    match tags {
        Some(tags) => {
            validation::validate_tags(&tags)?;
            Ok(validation::parse_tags(&tags))
        }
        None => Ok(BTreeSet::new()),
    }
}

/// Open the store and load the encoders a command needs.
pub fn prepare(controller: &Controller, kinds: &[EncoderKind]) -> Result<()> {
    controller.init_store().map_err(CliError::from)?;

    if !kinds.is_empty() {
        load_with_progress(controller, kinds)?;
    }
    Ok(())
}

fn load_with_progress(controller: &Controller, kinds: &[EncoderKind]) -> Result<(), CliError> {
    let pb = ProgressBar::new(100);
    pb.set_style(bar_style("{msg:24} [{bar:40.cyan/blue}] {pos:>3}%"));

    let result = controller.load_models(kinds, &mut |kind: EncoderKind, p: LoadProgress| {
        pb.set_message(format!("{kind}: {}", p.resource));
        pb.set_position((p.fraction * 100.0).round() as u64);
    });

    pb.finish_and_clear();
    Ok(result?)
}

pub fn handle_init(controller: &Controller) -> Result<()> {
    let status = controller.init_store().map_err(CliError::from)?;

    println!(
        "store '{}' ready at {} ({} records, {})",
        status.name,
        status.path.display(),
        status.records,
        status
            .dimensions
            .map(|d| format!("{d} dimensions"))
            .unwrap_or_else(|| "dimensions not set".to_string())
    );
    Ok(())
}

pub fn handle_load_models(controller: &Controller) -> Result<()> {
    prepare(controller, &[EncoderKind::Text, EncoderKind::Audio])?;

    for encoder in controller.status().encoders {
        println!(
            "{} encoder '{}': {}",
            encoder.kind,
            encoder.name,
            state_label(&encoder.state)?
        );
    }
    Ok(())
}

pub fn handle_embed_folder(
    controller: &Controller,
    path: PathBuf,
    recursive: bool,
    tags: Option<String>,
) -> Result<()> {
    validation::validate_existing_path("path", &path)?;
    let tags = tags_arg(tags)?;

    prepare(controller, &[EncoderKind::Audio])?;

    let files = collect_files(&path, recursive).map_err(CliError::from)?;
    if files.is_empty() {
        println!("no files in {}", path.display());
        return Ok(());
    }

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(bar_style(
        "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {wide_msg}",
    ));

    let summary = controller
        .run_batch_embed(&files, &tags, &mut |progress| {
            pb.set_length(progress.total as u64);
            pb.set_position(progress.index as u64);
            pb.set_message(file_label(progress.file));
        })
        .map_err(CliError::from)?;
    pb.finish_and_clear();

    println!(
        "{} processed, {} skipped, {} failed",
        summary.processed,
        summary.skipped,
        summary.errors.len()
    );
    for (file, err) in &summary.errors {
        eprintln!("  {}: {err}", file.display());
    }

    Ok(())
}

pub fn handle_add_text(controller: &Controller, text: String, tags: Option<String>) -> Result<()> {
    validation::validate_text("text", &text)?;
    let tags = tags_arg(tags)?;

    prepare(controller, &[EncoderKind::Text])?;

    let key = controller
        .run_insert_text(&text, &tags)
        .map_err(CliError::from)?;
    println!("added record {key}");
    Ok(())
}

pub fn handle_search(
    controller: &Controller,
    config: &Config,
    input: SearchInput,
    k: Option<usize>,
    tags: Option<String>,
    json: bool,
) -> Result<()> {
    let k = k.unwrap_or(config.search.default_k);
    validation::validate_k(k)?;

    let kind = match &input {
        SearchInput::Text(query) => {
            validation::validate_text("query", query)?;
            EncoderKind::Text
        }
        SearchInput::Audio(path) => {
            validation::validate_existing_path("path", path)?;
            EncoderKind::Audio
        }
    };

    let filter = SearchFilter {
        tags: tags_arg(tags)?,
        min_similarity: config.search.min_similarity,
    };

    prepare(controller, &[kind])?;

    let results = controller
        .run_search(&input, k, &filter)
        .map_err(CliError::from)?;

    if json {
        println!("{}", to_json(&results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("no results");
        return Ok(());
    }

    print_results(&results);
    Ok(())
}

fn print_results(results: &[QueryResult]) {
    for (rank, result) in results.iter().enumerate() {
        let tags = result.tags.iter().cloned().collect::<Vec<_>>().join(",");
        println!(
            "{:>3}. {:.4}  {}  [{}]",
            rank + 1,
            result.similarity,
            result.content,
            tags
        );
    }
}

pub fn handle_clear(controller: &Controller, yes: bool) -> Result<()> {
    controller.init_store().map_err(CliError::from)?;
    let count = controller.status().store.records;

    if !yes {
        match inquire::prompt_confirmation(format!(
            "Delete all {count} records? This cannot be undone (y/n)"
        )) {
            inquire::error::InquireResult::Ok(true) => {}
            inquire::error::InquireResult::Ok(false) => return Ok(()),
            inquire::error::InquireResult::Err(err) => {
                return Err(CliError::invalid_input(err.to_string()).into())
            }
        }
    }

    controller.run_clear().map_err(CliError::from)?;
    println!("cleared {count} records");
    Ok(())
}

pub fn handle_status(controller: &Controller, json: bool) -> Result<()> {
    // a store that cannot be opened is still worth reporting on
    if let Err(err) = controller.init_store() {
        log::warn!("{err}");
    }

    let status = controller.status();
    if json {
        println!("{}", to_json(&status)?);
        return Ok(());
    }

    let store = &status.store;
    println!("store:      {} ({})", store.name, store.path.display());
    println!("open:       {}", store.initialized);
    println!("records:    {}", store.records);
    println!(
        "dimensions: {}",
        store
            .dimensions
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    for encoder in &status.encoders {
        println!(
            "{:<11} {} {}",
            format!("{}:", encoder.kind),
            encoder.name,
            state_label(&encoder.state)?
        );
    }
    println!("model id:   {}", status.text_model_id);
    Ok(())
}

pub fn handle_list(controller: &Controller, json: bool) -> Result<()> {
    controller.init_store().map_err(CliError::from)?;
    let records = controller.records().map_err(CliError::from)?;

    if json {
        let rows: Vec<_> = records
            .iter()
            .map(|r| {
                serde_json::json!({
                    "key": r.key,
                    "content": r.content,
                    "tags": r.tags,
                    "dimensions": r.embedding.len(),
                })
            })
            .collect();
        println!("{}", to_json(&rows)?);
        return Ok(());
    }

    for record in &records {
        let tags = record.tags.iter().cloned().collect::<Vec<_>>().join(",");
        println!("{:>6}  {}  [{}]", record.key, record.content, tags);
    }
    Ok(())
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}
