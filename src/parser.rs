//! Vault note parser.
//!
//! Reads a markdown file into a normalized [`Document`]: strips the BOM,
//! normalizes line endings (so content hashes are stable across platforms),
//! splits off the optional YAML frontmatter block, and extracts wikilinks,
//! tags, and a title.
//!
//! Frontmatter handling is governed by a strictness flag: in strict mode a
//! malformed block fails the file with [`ParseError::MalformedHeader`]; in
//! lenient mode the file is ingested with empty metadata and a warning.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::ParseError;
use crate::models::{Document, MetaValue, Metadata};
use crate::vault::DiscoveredFile;

/// `[[Target]]`, `[[Target|alias]]`, `[[Target#Section]]`.
static WIKILINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[([^\]|]+)(?:\|[^\]]*)?\]\]").unwrap());

/// Inline `#tag` tokens: `#project`, `#area/sub`, `#todo-later`.
static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|\s)#([A-Za-z0-9/_-]+)").unwrap());

/// Derive the stable document identifier from a vault-relative path.
///
/// The id is a truncated SHA-256 of the relative path, so it survives
/// re-ingestion as long as the file does not move.
pub fn document_id(relative_path: &str) -> String {
    let digest = Sha256::digest(relative_path.as_bytes());
    let hex = format!("{digest:x}");
    hex[..16].to_string()
}

/// Parse a discovered vault file into a [`Document`].
pub fn parse_document(file: &DiscoveredFile, strict: bool) -> Result<Document, ParseError> {
    let raw = std::fs::read(&file.path).map_err(|source| ParseError::UnreadableFile {
        path: file.path.clone(),
        source,
    })?;

    let text = decode_utf8(raw, file)?;
    let normalized = normalize_line_endings(&text);

    // Hash the full normalized text (metadata block included) so the hash
    // changes iff the file contents change.
    let content_hash = format!("{:x}", Sha256::digest(normalized.as_bytes()));

    let (metadata, body) = split_frontmatter(&normalized, &file.relative_path, strict)?;

    let links = extract_wikilinks(body);
    let tags = extract_tags(body, &metadata);

    let title = metadata
        .get("title")
        .and_then(MetaValue::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| file_stem(&file.relative_path));

    Ok(Document {
        id: document_id(&file.relative_path),
        path: file.path.clone(),
        relative_path: file.relative_path.clone(),
        title,
        body: body.to_string(),
        metadata,
        links,
        tags,
        content_hash,
        modified_at: file.modified_at,
    })
}

fn decode_utf8(mut raw: Vec<u8>, file: &DiscoveredFile) -> Result<String, ParseError> {
    // UTF-8 BOM
    if raw.starts_with(&[0xEF, 0xBB, 0xBF]) {
        raw.drain(..3);
    }
    String::from_utf8(raw).map_err(|_| ParseError::UnsupportedEncoding {
        path: file.path.clone(),
    })
}

fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Split an optional leading `---` fenced YAML block from the body.
///
/// Returns the parsed metadata and the remaining body text. Malformed
/// blocks either fail the file (strict) or degrade to empty metadata
/// (lenient).
fn split_frontmatter<'a>(
    text: &'a str,
    relative_path: &str,
    strict: bool,
) -> Result<(Metadata, &'a str), ParseError> {
    let Some(rest) = text.strip_prefix("---\n") else {
        return Ok((Metadata::new(), text));
    };

    let (block, body) = match rest.find("\n---\n") {
        Some(end) => (&rest[..end], &rest[end + 5..]),
        // Closing fence at end-of-file without a trailing newline.
        None => match rest.strip_suffix("\n---") {
            Some(block) => (block, ""),
            None => {
                return malformed(
                    relative_path,
                    text,
                    "unterminated frontmatter fence",
                    strict,
                );
            }
        },
    };

    match serde_yaml::from_str::<serde_yaml::Value>(block) {
        Ok(value) => Ok((yaml_to_metadata(value, relative_path), body)),
        Err(err) => malformed(relative_path, body, &err.to_string(), strict),
    }
}

fn malformed<'a>(
    relative_path: &str,
    body: &'a str,
    reason: &str,
    strict: bool,
) -> Result<(Metadata, &'a str), ParseError> {
    if strict {
        Err(ParseError::MalformedHeader {
            path: relative_path.into(),
            reason: reason.to_string(),
        })
    } else {
        warn!(path = relative_path, reason, "ignoring malformed frontmatter");
        Ok((Metadata::new(), body))
    }
}

fn yaml_to_metadata(value: serde_yaml::Value, relative_path: &str) -> Metadata {
    let mut metadata = BTreeMap::new();
    let serde_yaml::Value::Mapping(mapping) = value else {
        if !matches!(value, serde_yaml::Value::Null) {
            warn!(path = relative_path, "frontmatter is not a mapping, ignoring");
        }
        return metadata;
    };

    for (key, val) in mapping {
        let Some(key) = key.as_str().map(str::to_string) else {
            continue;
        };
        match yaml_to_meta_value(val) {
            Some(meta) => {
                metadata.insert(key, meta);
            }
            None => warn!(path = relative_path, key = %key, "dropping unsupported frontmatter value"),
        }
    }
    metadata
}

fn yaml_to_meta_value(value: serde_yaml::Value) -> Option<MetaValue> {
    match value {
        serde_yaml::Value::String(s) => Some(MetaValue::String(s)),
        serde_yaml::Value::Number(n) => n.as_f64().map(MetaValue::Number),
        serde_yaml::Value::Bool(b) => Some(MetaValue::Bool(b)),
        serde_yaml::Value::Sequence(items) => {
            let strings = items
                .into_iter()
                .filter_map(|item| match item {
                    serde_yaml::Value::String(s) => Some(s),
                    serde_yaml::Value::Number(n) => Some(n.to_string()),
                    serde_yaml::Value::Bool(b) => Some(b.to_string()),
                    _ => None,
                })
                .collect();
            Some(MetaValue::List(strings))
        }
        _ => None,
    }
}

/// Extract outbound wikilink targets. Section anchors and display aliases
/// are stripped; self and broken references are kept (resolution happens
/// against the index, not here).
fn extract_wikilinks(body: &str) -> BTreeSet<String> {
    WIKILINK
        .captures_iter(body)
        .filter_map(|caps| {
            let target = caps[1].split('#').next().unwrap_or("").trim();
            (!target.is_empty()).then(|| target.to_string())
        })
        .collect()
}

fn extract_tags(body: &str, metadata: &Metadata) -> BTreeSet<String> {
    let mut tags: BTreeSet<String> = TAG
        .captures_iter(body)
        .map(|caps| caps[2].to_string())
        .collect();

    match metadata.get("tags") {
        Some(MetaValue::String(tag)) => {
            tags.insert(tag.trim_start_matches('#').to_string());
        }
        Some(MetaValue::List(items)) => {
            for tag in items {
                tags.insert(tag.trim_start_matches('#').to_string());
            }
        }
        _ => {}
    }

    tags
}

fn file_stem(relative_path: &str) -> String {
    let name = relative_path.rsplit('/').next().unwrap_or(relative_path);
    name.rsplit_once('.')
        .map(|(stem, _)| stem.to_string())
        .unwrap_or_else(|| name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::path::PathBuf;

    fn write_note(dir: &std::path::Path, rel: &str, contents: &[u8]) -> DiscoveredFile {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, contents).unwrap();
        DiscoveredFile {
            path,
            relative_path: rel.to_string(),
            modified_at: Utc::now(),
        }
    }

    #[test]
    fn parses_frontmatter_links_and_tags() {
        let tmp = tempfile::tempdir().unwrap();
        let note = write_note(
            tmp.path(),
            "notes/rust.md",
            b"---\ntitle: Rust Notes\ntags: [lang, systems]\nrating: 5\ndraft: false\n---\nSee [[Ownership]] and [[Borrowing|the borrow checker]].\nAlso #async and #rust/tokio.\n",
        );

        let doc = parse_document(&note, true).unwrap();
        assert_eq!(doc.title, "Rust Notes");
        assert_eq!(doc.id, document_id("notes/rust.md"));
        assert_eq!(
            doc.metadata.get("rating"),
            Some(&MetaValue::Number(5.0))
        );
        assert_eq!(doc.metadata.get("draft"), Some(&MetaValue::Bool(false)));
        assert!(doc.links.contains("Ownership"));
        assert!(doc.links.contains("Borrowing"));
        assert!(doc.tags.contains("lang"));
        assert!(doc.tags.contains("async"));
        assert!(doc.tags.contains("rust/tokio"));
        assert!(doc.body.starts_with("See [[Ownership]]"));
    }

    #[test]
    fn section_anchors_are_stripped_from_links() {
        let tmp = tempfile::tempdir().unwrap();
        let note = write_note(tmp.path(), "a.md", b"Link to [[Target#Heading|text]].");
        let doc = parse_document(&note, true).unwrap();
        assert_eq!(doc.links.iter().collect::<Vec<_>>(), vec!["Target"]);
    }

    #[test]
    fn content_hash_is_stable_across_line_endings_and_bom() {
        let tmp = tempfile::tempdir().unwrap();
        let unix = write_note(tmp.path(), "unix.md", b"alpha\nbeta\n");
        let dos = write_note(tmp.path(), "dos.md", b"\xEF\xBB\xBFalpha\r\nbeta\r\n");

        let unix_doc = parse_document(&unix, true).unwrap();
        let dos_doc = parse_document(&dos, true).unwrap();
        assert_eq!(unix_doc.content_hash, dos_doc.content_hash);
        assert_eq!(unix_doc.body, dos_doc.body);
    }

    #[test]
    fn malformed_frontmatter_strict_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let note = write_note(tmp.path(), "bad.md", b"---\ntitle: [unclosed\n---\nbody\n");
        let err = parse_document(&note, true).unwrap_err();
        assert!(matches!(err, ParseError::MalformedHeader { .. }));
    }

    #[test]
    fn malformed_frontmatter_lenient_yields_empty_metadata() {
        let tmp = tempfile::tempdir().unwrap();
        let note = write_note(tmp.path(), "bad.md", b"---\ntitle: [unclosed\n---\nbody\n");
        let doc = parse_document(&note, false).unwrap();
        assert!(doc.metadata.is_empty());
        assert_eq!(doc.body, "body\n");
        // Falls back to the file stem when frontmatter is unusable.
        assert_eq!(doc.title, "bad");
    }

    #[test]
    fn unterminated_fence_strict_vs_lenient() {
        let tmp = tempfile::tempdir().unwrap();
        let note = write_note(tmp.path(), "open.md", b"---\ntitle: x\nno closing fence");
        assert!(matches!(
            parse_document(&note, true),
            Err(ParseError::MalformedHeader { .. })
        ));
        let doc = parse_document(&note, false).unwrap();
        assert!(doc.metadata.is_empty());
        // Lenient mode keeps the whole file as body.
        assert!(doc.body.starts_with("---\n"));
    }

    #[test]
    fn missing_file_is_unreadable() {
        let file = DiscoveredFile {
            path: PathBuf::from("/no/such/file.md"),
            relative_path: "file.md".to_string(),
            modified_at: Utc::now(),
        };
        assert!(matches!(
            parse_document(&file, true),
            Err(ParseError::UnreadableFile { .. })
        ));
    }

    #[test]
    fn non_utf8_is_unsupported_encoding() {
        let tmp = tempfile::tempdir().unwrap();
        let note = write_note(tmp.path(), "latin1.md", b"caf\xE9 notes");
        assert!(matches!(
            parse_document(&note, true),
            Err(ParseError::UnsupportedEncoding { .. })
        ));
    }

    #[test]
    fn document_id_is_path_stable() {
        assert_eq!(document_id("notes/a.md"), document_id("notes/a.md"));
        assert_ne!(document_id("notes/a.md"), document_id("notes/b.md"));
        assert_eq!(document_id("notes/a.md").len(), 16);
    }
}
