//! SDK index parsing.
//!
//! A remote SDK listing may arrive in one of four shapes: a plain text
//! table, a cloud-storage bucket XML listing, a JSON document or the HTML
//! download page. [`find_records`] runs an ordered list of parser
//! functions and keeps the first non-empty result. No parser ever fails
//! loudly; a document it does not understand simply yields `None`.

use regex::Regex;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::debug;
use url::Url;

use super::checksum::ChecksumKind;
use super::types::{SdkFile, SdkRecord};

/// A parser turning `(base_uri, text)` into records, or `None` when the
/// text does not have the shape it understands.
pub type IndexStrategy = fn(&str, &str) -> Option<Vec<SdkRecord>>;

/// Parsers in the order they are tried.
pub const STRATEGIES: &[(&str, IndexStrategy)] = &[
    ("plain text", parse_plain_text),
    ("bucket xml", parse_bucket_xml),
    ("json", parse_json),
    ("html", parse_html),
];

// ============================================================================
// Entry Point
// ============================================================================

/// Parses an SDK listing, trying every known format in turn.
///
/// Returns `None` when no format yields at least one record. The returned
/// records are sorted by name and grouped by version.
pub fn find_records(base_uri: &str, text: &str) -> Option<Vec<SdkRecord>> {
    for (name, strategy) in STRATEGIES {
        match strategy(base_uri, text) {
            Some(records) if !records.is_empty() => {
                debug!("Parsed SDK index as {}: {} records", name, records.len());
                return Some(records);
            }
            _ => debug!("SDK index is not {}", name),
        }
    }
    None
}

/// Extracts the SDK version prefix from a file name, e.g. `go1.10.1` from
/// `go1.10.1.linux-amd64.tar.gz`.
pub fn extract_version(name: &str) -> Option<String> {
    version_pattern()
        .captures(name.trim())
        .map(|caps| caps[1].to_string())
}

/// Resolves `link` against `base_uri` unless the link is already absolute.
pub fn concat_url(base_uri: &str, link: &str) -> String {
    let trimmed = link.trim();
    let lower = trimmed.to_lowercase();
    if base_uri.trim().is_empty()
        || lower.starts_with("file:")
        || lower.starts_with("http:")
        || lower.starts_with("https:")
    {
        return trimmed.to_string();
    }

    match Url::parse(base_uri.trim()).and_then(|base| base.join(trimmed)) {
        Ok(resolved) => resolved.to_string(),
        Err(_) => trimmed.to_string(),
    }
}

// ============================================================================
// Shared Helpers
// ============================================================================

fn version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([A-Za-z0-9]+(?:\.[0-9]+)+)").expect("version pattern is valid")
    })
}

fn is_hex_of_len(text: &str, len: usize) -> bool {
    text.len() == len && text.chars().all(|c| c.is_ascii_hexdigit())
}

/// Groups files by version and emits them sorted by version name.
#[derive(Default)]
struct RecordSet {
    by_version: BTreeMap<String, Vec<SdkFile>>,
}

impl RecordSet {
    fn add(&mut self, version: String, file: SdkFile) {
        self.by_version.entry(version).or_default().push(file);
    }

    fn into_records(self) -> Vec<SdkRecord> {
        self.by_version
            .into_iter()
            .map(|(name, files)| SdkRecord { name, files })
            .collect()
    }
}

fn unescape_entities(text: &str) -> String {
    text.replace("&quot;", "\"")
        .replace("&#34;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn strip_tags(html: &str) -> String {
    static TAG: OnceLock<Regex> = OnceLock::new();
    let tag = TAG.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("tag pattern is valid"));
    unescape_entities(&tag.replace_all(html, ""))
}

// ============================================================================
// Plain Text
// ============================================================================

/// Parses `fileName,link[,checksum]` lines.
///
/// Blank lines and `#` comments are skipped. Any malformed line rejects
/// the whole document. A 64 hex digit checksum is SHA-256 and a 32 hex
/// digit one is MD5.
pub fn parse_plain_text(base_uri: &str, text: &str) -> Option<Vec<SdkRecord>> {
    let mut records = RecordSet::default();

    for line in text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
    {
        let parts: Vec<&str> = line.split(',').map(str::trim).collect();
        let (file_name, link, checksum) = match parts.as_slice() {
            [name, link] => (*name, *link, None),
            [name, link, checksum] => (*name, *link, Some(*checksum)),
            _ => return None,
        };

        if link.is_empty() {
            return None;
        }
        let version = extract_version(file_name)?;

        let mut checksums = BTreeMap::new();
        if let Some(checksum) = checksum {
            let kind = if is_hex_of_len(checksum, 64) {
                ChecksumKind::Sha256
            } else if is_hex_of_len(checksum, 32) {
                ChecksumKind::Md5
            } else {
                return None;
            };
            checksums.insert(kind, checksum.to_string());
        }

        records.add(
            version,
            SdkFile::new(file_name, concat_url(base_uri, link), checksums),
        );
    }

    Some(records.into_records())
}

// ============================================================================
// Bucket XML
// ============================================================================

/// Parses a cloud-storage `ListBucketResult` document.
///
/// Each `<Contents>` element contributes its `<Key>` as file name and its
/// `<ETag>`, with quotes stripped, as MD5.
pub fn parse_bucket_xml(base_uri: &str, text: &str) -> Option<Vec<SdkRecord>> {
    static ROOT: OnceLock<Regex> = OnceLock::new();
    static CONTENTS: OnceLock<Regex> = OnceLock::new();
    static KEY: OnceLock<Regex> = OnceLock::new();
    static ETAG: OnceLock<Regex> = OnceLock::new();

    let root = ROOT.get_or_init(|| {
        Regex::new(r"(?s)^\s*(?:<\?xml.*?\?>\s*)?(?:<!--.*?-->\s*)*<ListBucketResult[\s>/]")
            .expect("root pattern is valid")
    });
    let contents = CONTENTS.get_or_init(|| {
        Regex::new(r"(?s)<Contents>(.*?)</Contents>").expect("contents pattern is valid")
    });
    let key = KEY.get_or_init(|| Regex::new(r"(?s)<Key>(.*?)</Key>").expect("key pattern is valid"));
    let etag =
        ETAG.get_or_init(|| Regex::new(r"(?s)<ETag>(.*?)</ETag>").expect("etag pattern is valid"));

    let text = text.trim_start_matches('\u{feff}');
    if !root.is_match(text) {
        return None;
    }

    let mut records = RecordSet::default();
    for entry in contents.captures_iter(text) {
        let body = &entry[1];
        let Some(key_text) = key.captures(body).map(|c| unescape_entities(c[1].trim())) else {
            continue;
        };
        let Some(version) = extract_version(&key_text) else {
            continue;
        };

        let mut checksums = BTreeMap::new();
        if let Some(tag) = etag.captures(body) {
            let md5 = unescape_entities(tag[1].trim());
            let md5 = md5.trim_start_matches('"').trim_end_matches('"');
            if !md5.is_empty() {
                checksums.insert(ChecksumKind::Md5, md5.to_string());
            }
        }

        let link = concat_url(base_uri, &key_text);
        records.add(version, SdkFile::new(key_text, link, checksums));
    }

    Some(records.into_records())
}

// ============================================================================
// JSON
// ============================================================================

/// Parses `{sdk: {file: "link" | {link, checksum: {kind: hex}}}}`.
///
/// Unknown checksum kinds are ignored; any other value shape rejects the
/// document.
pub fn parse_json(base_uri: &str, text: &str) -> Option<Vec<SdkRecord>> {
    let root: JsonValue = serde_json::from_str(text).ok()?;

    let mut records = Vec::new();
    for (sdk_name, files_value) in root.as_object()? {
        let mut files = Vec::new();
        for (file_name, data) in files_value.as_object()? {
            let file = match data {
                JsonValue::String(link) => {
                    SdkFile::new(file_name.as_str(), concat_url(base_uri, link), BTreeMap::new())
                }
                JsonValue::Object(object) => {
                    let link = object.get("link")?.as_str()?;
                    let mut checksums = BTreeMap::new();
                    if let Some(checksum) = object.get("checksum") {
                        for (kind_name, value) in checksum.as_object()? {
                            if let Some(kind) = ChecksumKind::find(kind_name) {
                                checksums.insert(kind, value.as_str()?.trim().to_string());
                            }
                        }
                    }
                    SdkFile::new(file_name.as_str(), concat_url(base_uri, link), checksums)
                }
                _ => return None,
            };
            files.push(file);
        }
        records.push(SdkRecord {
            name: sdk_name.clone(),
            files,
        });
    }

    records.sort_by(|a, b| a.name.cmp(&b.name));
    Some(records)
}

// ============================================================================
// HTML
// ============================================================================

/// Parses the HTML download page.
///
/// A table row becomes a file when one of its cells holds an anchor whose
/// text starts with an SDK version and another cell holds a 64 hex digit
/// SHA-256 token. Other rows are skipped.
pub fn parse_html(base_uri: &str, text: &str) -> Option<Vec<SdkRecord>> {
    static SHAPE: OnceLock<Regex> = OnceLock::new();
    static ROW: OnceLock<Regex> = OnceLock::new();
    static CELL_START: OnceLock<Regex> = OnceLock::new();
    static CELL_END: OnceLock<Regex> = OnceLock::new();
    static ANCHOR: OnceLock<Regex> = OnceLock::new();
    static HREF: OnceLock<Regex> = OnceLock::new();

    let shape = SHAPE.get_or_init(|| {
        Regex::new(r"(?i)<(?:!doctype\s+html|html|table|tr)\b").expect("shape pattern is valid")
    });
    let row =
        ROW.get_or_init(|| Regex::new(r"(?is)<tr\b[^>]*>(.*?)</tr>").expect("row pattern is valid"));
    let cell_start = CELL_START
        .get_or_init(|| Regex::new(r"(?i)<td\b[^>]*>").expect("cell pattern is valid"));
    let cell_end =
        CELL_END.get_or_init(|| Regex::new(r"(?i)</td\s*>").expect("cell end pattern is valid"));
    let anchor = ANCHOR.get_or_init(|| {
        Regex::new(r"(?is)<a\b([^>]*)>(.*?)</a\s*>").expect("anchor pattern is valid")
    });
    let href = HREF.get_or_init(|| {
        Regex::new(r#"(?i)\bhref\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#)
            .expect("href pattern is valid")
    });

    if !shape.is_match(text) {
        return None;
    }

    let mut records = RecordSet::default();
    for row_caps in row.captures_iter(text) {
        let row_body = &row_caps[1];

        let mut found: Option<(String, String, String)> = None;
        let mut sha256: Option<String> = None;

        // The first split segment precedes any <td> and is not a cell.
        for segment in cell_start.split(row_body).skip(1) {
            let cell = cell_end.split(segment).next().unwrap_or(segment);

            let cell_text = strip_tags(cell);
            let cell_text = cell_text.trim();
            if is_hex_of_len(cell_text, 64) {
                sha256 = Some(cell_text.to_string());
            }

            for anchor_caps in anchor.captures_iter(cell) {
                let anchor_text = strip_tags(&anchor_caps[2]).trim().to_string();
                let Some(version) = extract_version(&anchor_text) else {
                    continue;
                };
                let Some(link) = href.captures(&anchor_caps[1]).and_then(|c| {
                    c.get(1)
                        .or_else(|| c.get(2))
                        .or_else(|| c.get(3))
                        .map(|m| unescape_entities(m.as_str()))
                }) else {
                    continue;
                };
                found = Some((version, anchor_text, concat_url(base_uri, &link)));
            }
        }

        if let (Some((version, file_name, link)), Some(sha)) = (found, sha256) {
            let mut checksums = BTreeMap::new();
            checksums.insert(ChecksumKind::Sha256, sha);
            records.add(version, SdkFile::new(file_name, link, checksums));
        }
    }

    Some(records.into_records())
}
