use std::collections::BTreeSet;
use std::path::Path;

use crate::cli::errors::{CliError, CliResult};

const MAX_TAG_LEN: usize = 50;
const MAX_QUERY_LEN: usize = 2000;

/// Split a comma or space separated tag list, lowercased.
pub fn parse_tags(tags: &str) -> BTreeSet<String> {
    tags.split(',')
        .flat_map(|value| value.split(' ').filter(|value| !value.is_empty()))
        .map(|s| s.to_lowercase())
        .collect()
}

/// Validates tag format
pub fn validate_tags(tags: &str) -> CliResult<()> {
    for tag in parse_tags(tags) {
        if tag.chars().count() > MAX_TAG_LEN {
            return Err(CliError::validation(
                "tags",
                format!("Individual tags cannot exceed {MAX_TAG_LEN} characters"),
            ));
        }
    }

    Ok(())
}

/// Validates text used as a query or record
pub fn validate_text(field: &str, text: &str) -> CliResult<()> {
    if text.trim().is_empty() {
        return Err(CliError::validation(field, "cannot be empty"));
    }

    if text.chars().count() > MAX_QUERY_LEN {
        return Err(CliError::validation(
            field,
            format!("cannot exceed {MAX_QUERY_LEN} characters"),
        ));
    }

    Ok(())
}

/// Validates the number of results requested
pub fn validate_k(k: usize) -> CliResult<()> {
    if k == 0 {
        return Err(CliError::validation("k", "must be at least 1"));
    }
    Ok(())
}

pub fn validate_existing_path(field: &str, path: &Path) -> CliResult<()> {
    if !path.exists() {
        return Err(CliError::validation(
            field,
            format!("{} does not exist", path.display()),
        ));
    }
    Ok(())
}
