//! Parsing of `key;url;checksum;version;architecture` records.

use reqwest::Url;
use thiserror::Error;

use super::PackageSource;

/// Why a registry record was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("expected at least 5 ';'-separated fields, found {0}")]
    FieldCount(usize),

    #[error("empty package key")]
    EmptyKey,

    #[error("package key {0:?} is not usable as a cache directory name")]
    InvalidKey(String),

    #[error("URL contains an unresolved placeholder: {0}")]
    Placeholder(String),

    #[error("URL is not absolute and well-formed: {0}")]
    InvalidUrl(String),

    #[error("unsupported URL scheme {0:?}")]
    UnsupportedScheme(String),

    #[error("checksum is not a SHA-256 hex digest: {0}")]
    InvalidChecksum(String),

    #[error("architecture {arch} does not match host architecture {host}")]
    ForeignArch { arch: String, host: String },

    #[error("duplicate declaration of {0}")]
    DuplicateKey(String),
}

/// Tokens that mark a URL template which was never filled in.
const PLACEHOLDER_TOKENS: &[&str] = &["@VERSION@", "%VERSION%", "@PKGVER@", "%PKGVER%"];

/// Characters that only appear in unexpanded templates.
const PLACEHOLDER_CHARS: &[char] = &['$', '{', '}', '<', '>'];

/// Parses one registry line into a typed source.
///
/// The optional sixth field is a human readable display name; it defaults to
/// the key.
pub fn parse_record(line: &str) -> Result<PackageSource, RecordError> {
    let fields: Vec<&str> = line.split(';').map(str::trim).collect();
    if fields.len() < 5 {
        return Err(RecordError::FieldCount(fields.len()));
    }

    let key = fields[0];
    if key.is_empty() {
        return Err(RecordError::EmptyKey);
    }
    if !is_valid_key(key) {
        return Err(RecordError::InvalidKey(key.to_string()));
    }

    let url = validate_url(fields[1])?;
    let checksum = parse_checksum(fields[2])?;
    let display_name = fields
        .get(5)
        .filter(|name| !name.is_empty())
        .unwrap_or(&key)
        .to_string();

    Ok(PackageSource {
        key: key.to_string(),
        display_name,
        url,
        checksum,
        version: fields[3].to_string(),
        arch: fields[4].to_string(),
    })
}

/// Keys name a directory under the cache root.
fn is_valid_key(key: &str) -> bool {
    key != "."
        && key != ".."
        && !key.contains(|c: char| c.is_whitespace() || c == '/' || c == '\\')
}

/// Accepts only absolute http(s) URLs without template leftovers.
pub fn validate_url(raw: &str) -> Result<Url, RecordError> {
    if has_placeholder(raw) {
        return Err(RecordError::Placeholder(raw.to_string()));
    }

    let url = Url::parse(raw).map_err(|_| RecordError::InvalidUrl(raw.to_string()))?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(RecordError::UnsupportedScheme(other.to_string())),
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(RecordError::InvalidUrl(raw.to_string()));
    }

    Ok(url)
}

fn has_placeholder(raw: &str) -> bool {
    raw.contains(PLACEHOLDER_CHARS) || PLACEHOLDER_TOKENS.iter().any(|t| raw.contains(t))
}

fn parse_checksum(raw: &str) -> Result<Option<String>, RecordError> {
    if raw.is_empty() || raw == "-" {
        return Ok(None);
    }
    let digest = raw.strip_prefix("sha256:").unwrap_or(raw);
    if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(RecordError::InvalidChecksum(raw.to_string()));
    }
    Ok(Some(digest.to_ascii_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn test_parse_record_full() {
        let line = format!(
            "zfs-utils;https://mirror.example.org/zfs-utils-2.2.7-1-x86_64.pkg.tar.zst;{};2.2.7-1;x86_64;ZFS userland",
            DIGEST.to_uppercase()
        );
        let source = parse_record(&line).unwrap();

        assert_eq!(source.key, "zfs-utils");
        assert_eq!(source.display_name, "ZFS userland");
        assert_eq!(source.url.host_str(), Some("mirror.example.org"));
        assert_eq!(source.checksum.as_deref(), Some(DIGEST));
        assert_eq!(source.version, "2.2.7-1");
        assert_eq!(source.arch, "x86_64");
    }

    #[test]
    fn test_parse_record_empty_checksum_and_default_name() {
        let source =
            parse_record(" efibootmgr ; https://example.org/efibootmgr.tar.gz ; ; 18 ; any ")
                .unwrap();
        assert_eq!(source.key, "efibootmgr");
        assert_eq!(source.display_name, "efibootmgr");
        assert_eq!(source.checksum, None);

        let source = parse_record("a;https://example.org/a.tar.gz;-;1;any").unwrap();
        assert_eq!(source.checksum, None);
    }

    #[test]
    fn test_parse_record_prefixed_checksum() {
        let source =
            parse_record(&format!("a;https://example.org/a.tar.gz;sha256:{};1;any", DIGEST))
                .unwrap();
        assert_eq!(source.checksum.as_deref(), Some(DIGEST));
    }

    #[test]
    fn test_parse_record_too_few_fields() {
        assert_eq!(
            parse_record("a;https://example.org/a.tar.gz;;1"),
            Err(RecordError::FieldCount(4))
        );
    }

    #[test]
    fn test_parse_record_bad_key() {
        assert_eq!(
            parse_record(";https://example.org/a;;1;any"),
            Err(RecordError::EmptyKey)
        );
        for line in [
            "zfs utils;https://example.org/a;;1;any",
            "../etc;https://example.org/a;;1;any",
            "..;https://example.org/a;;1;any",
            "a\\b;https://example.org/a;;1;any",
        ] {
            assert!(
                matches!(parse_record(line), Err(RecordError::InvalidKey(_))),
                "{line} should be rejected"
            );
        }
    }

    #[test]
    fn test_placeholder_urls_rejected() {
        for url in [
            "https://example.org/zfs-${version}.pkg",
            "https://example.org/zfs-{version}.pkg",
            "https://example.org/zfs-<ver>.pkg",
            "https://example.org/zfs-@VERSION@.pkg",
            "https://example.org/zfs-%PKGVER%-x86_64.pkg",
        ] {
            assert!(
                matches!(validate_url(url), Err(RecordError::Placeholder(_))),
                "{url} should be rejected"
            );
        }
    }

    #[test]
    fn test_version_words_in_urls_accepted() {
        for url in [
            "https://example.org/RELEASE_VERSIONS/zfs-2.2.7.pkg",
            "https://example.org/PKGVER/zfs.pkg",
        ] {
            assert!(validate_url(url).is_ok(), "{url} should be accepted");
        }
    }

    #[test]
    fn test_malformed_urls_rejected() {
        assert!(matches!(
            validate_url("example.org/a.pkg"),
            Err(RecordError::InvalidUrl(_))
        ));
        assert!(matches!(
            validate_url("/var/cache/a.pkg"),
            Err(RecordError::InvalidUrl(_))
        ));
        assert!(matches!(
            validate_url("ftp://example.org/a.pkg"),
            Err(RecordError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn test_invalid_checksum_rejected() {
        assert!(matches!(
            parse_record("a;https://example.org/a.pkg;abc123;1;any"),
            Err(RecordError::InvalidChecksum(_))
        ));
        let not_hex = "z".repeat(64);
        assert!(matches!(
            parse_record(&format!("a;https://example.org/a.pkg;{};1;any", not_hex)),
            Err(RecordError::InvalidChecksum(_))
        ));
    }
}
