use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::config::VaultConfig;
use crate::error::IngestionError;

/// A file admitted by the include/exclude filters, not yet parsed.
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    /// Path relative to the vault root, with forward slashes.
    pub relative_path: String,
    pub modified_at: DateTime<Utc>,
}

/// Walk the vault and return every file passing the extension allow-list
/// and folder deny-list, sorted by relative path for deterministic runs.
///
/// Excluded files never reach the parser.
pub fn scan_vault(root: &Path, config: &VaultConfig) -> Result<Vec<DiscoveredFile>, IngestionError> {
    if !root.exists() {
        return Err(IngestionError::Vault(format!(
            "vault path does not exist: {}",
            root.display()
        )));
    }

    let include_set = extension_globset(&config.file_extensions)?;
    let exclude_set = folder_globset(&config.exclude_folders)?;

    let mut files = Vec::new();

    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| IngestionError::Vault(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if exclude_set.is_match(&rel_str) {
            continue;
        }
        if !include_set.is_match(&rel_str) {
            continue;
        }

        let metadata = entry
            .metadata()
            .map_err(|e| IngestionError::Vault(e.to_string()))?;
        let modified_secs = metadata
            .modified()
            .ok()
            .and_then(|m| m.duration_since(std::time::SystemTime::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        files.push(DiscoveredFile {
            path: path.to_path_buf(),
            relative_path: rel_str,
            modified_at: Utc
                .timestamp_opt(modified_secs, 0)
                .single()
                .unwrap_or_else(Utc::now),
        });
    }

    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

    Ok(files)
}

fn extension_globset(extensions: &[String]) -> Result<GlobSet, IngestionError> {
    let mut builder = GlobSetBuilder::new();
    for ext in extensions {
        let ext = ext.trim_start_matches('.');
        let pattern = format!("**/*.{ext}");
        builder.add(Glob::new(&pattern).map_err(|e| IngestionError::Vault(e.to_string()))?);
    }
    builder
        .build()
        .map_err(|e| IngestionError::Vault(e.to_string()))
}

fn folder_globset(folders: &[String]) -> Result<GlobSet, IngestionError> {
    let mut builder = GlobSetBuilder::new();
    for folder in folders {
        for pattern in [format!("{folder}/**"), format!("**/{folder}/**")] {
            builder.add(Glob::new(&pattern).map_err(|e| IngestionError::Vault(e.to_string()))?);
        }
    }
    builder
        .build()
        .map_err(|e| IngestionError::Vault(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn test_config() -> VaultConfig {
        VaultConfig {
            path: PathBuf::from("/unused"),
            file_extensions: vec![".md".to_string(), ".markdown".to_string()],
            exclude_folders: vec![".obsidian".to_string(), "templates".to_string()],
        }
    }

    #[test]
    fn filters_by_extension_and_folder() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("notes")).unwrap();
        fs::create_dir_all(root.join(".obsidian")).unwrap();
        fs::create_dir_all(root.join("notes/templates")).unwrap();
        fs::write(root.join("notes/a.md"), "alpha").unwrap();
        fs::write(root.join("notes/b.markdown"), "beta").unwrap();
        fs::write(root.join("notes/c.txt"), "gamma").unwrap();
        fs::write(root.join(".obsidian/workspace.md"), "config").unwrap();
        fs::write(root.join("notes/templates/daily.md"), "template").unwrap();

        let files = scan_vault(root, &test_config()).unwrap();
        let rels: Vec<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(rels, vec!["notes/a.md", "notes/b.markdown"]);
    }

    #[test]
    fn output_is_sorted_and_deterministic() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fs::write(root.join("z.md"), "z").unwrap();
        fs::write(root.join("a.md"), "a").unwrap();
        fs::write(root.join("m.md"), "m").unwrap();

        let first = scan_vault(root, &test_config()).unwrap();
        let second = scan_vault(root, &test_config()).unwrap();
        let rels: Vec<&str> = first.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(rels, vec!["a.md", "m.md", "z.md"]);
        assert_eq!(
            rels,
            second
                .iter()
                .map(|f| f.relative_path.as_str())
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn missing_root_is_an_error() {
        let err = scan_vault(Path::new("/definitely/not/here"), &test_config()).unwrap_err();
        assert!(matches!(err, IngestionError::Vault(_)));
    }
}
