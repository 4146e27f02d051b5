use std::{fs, path::Path};

use anyhow::Context;

/// One url per line; blank lines are skipped and surrounding whitespace trimmed.
pub fn parse_url_list(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

pub fn read_url_list(path: &Path) -> anyhow::Result<Vec<String>> {
    let contents =
        fs::read_to_string(path).context(format!("could not read url list {:?}", path))?;
    Ok(parse_url_list(&contents))
}
