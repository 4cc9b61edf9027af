//! On-disk persistence of alias records.
//!
//! Each alias is one JSON file named after the alias inside the user's
//! config directory.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};

use warren_types::AliasRecord;

fn store_dir() -> Result<PathBuf> {
    let base = dirs::config_dir()
        .or_else(dirs::home_dir)
        .context("could not determine a configuration directory")?;
    Ok(base.join("warren").join("aliases"))
}

fn record_path(name: &str) -> Result<PathBuf> {
    if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
        bail!("invalid alias name: {name:?}");
    }
    Ok(store_dir()?.join(format!("{name}.json")))
}

/// Persist `record` under `name`, replacing any previous definition.
pub fn save(name: &str, record: &AliasRecord) -> Result<()> {
    let path = record_path(name)?;
    let dir = path.parent().expect("record path has a parent");
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let json = serde_json::to_string_pretty(record)?;
    fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

/// Load the record saved under `name`.
pub fn load(name: &str) -> Result<AliasRecord> {
    let path = record_path(name)?;
    let json = fs::read_to_string(&path)
        .with_context(|| format!("alias {name} not found at {}", path.display()))?;
    let record = serde_json::from_str(&json)
        .with_context(|| format!("alias {name} at {} is malformed", path.display()))?;
    Ok(record)
}

/// Delete the record saved under `name`.
pub fn remove(name: &str) -> Result<()> {
    let path = record_path(name)?;
    fs::remove_file(&path).with_context(|| format!("alias {name} not found"))?;
    Ok(())
}

/// Names of all saved aliases, sorted.
pub fn list() -> Result<Vec<String>> {
    let dir = store_dir()?;
    let mut names = Vec::new();
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(names),
        Err(err) => return Err(err).with_context(|| format!("reading {}", dir.display())),
    };
    for entry in entries {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "json")
            && let Some(stem) = path.file_stem()
        {
            names.push(stem.to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_path_traversal_names() {
        assert!(record_path("../evil").is_err());
        assert!(record_path("").is_err());
        assert!(record_path(".hidden").is_err());
        assert!(record_path("staging-db").is_ok());
    }
}
