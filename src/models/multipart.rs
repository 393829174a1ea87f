//! Multipart upload sessions and their staged parts, as persisted by the backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use sqlx::FromRow;
use url::Url;
use uuid::Uuid;

/// Highest part number a session accepts (S3 compatible).
pub const MAX_PART_NUMBER: i32 = 10_000;

/// A multipart upload session, opened before any part is staged.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct MultipartUpload {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Parent bucket ID.
    pub bucket_id: Uuid,

    /// Object key the assembled parts will be stored under.
    pub key: String,

    /// Opaque upload ID handed to clients.
    pub upload_id: String,

    /// Content type recorded at session creation.
    pub content_type: Option<String>,

    /// Original file name supplied by the client.
    pub filename: String,

    /// Timestamp when the session was opened.
    pub initiated_at: DateTime<Utc>,

    /// Set once the session has been assembled into an object.
    pub completed: bool,
}

/// One staged part of a multipart session.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct MultipartPart {
    pub id: Uuid,

    /// Internal id of the owning session (not the client-facing upload id).
    pub upload_id: Uuid,

    /// Part number (1-based).
    pub part_number: i32,

    pub size_bytes: i64,

    /// Hex MD5 of the part body, unquoted.
    pub etag: String,

    pub uploaded_at: DateTime<Utc>,
}

/// A `(part number, etag)` pair submitted to complete a session.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: i32,
    pub etag: String,
}

/// Characters left bare in a key segment; everything else is escaped.
const KEY_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Relative targets are resolved against this before parsing.
const RELATIVE_BASE: &str = "http://localhost/";

/// Address of `key` in `bucket`, each path segment percent-encoded.
///
/// An empty `base` yields a path relative to the serving host.
pub fn object_url(base: &str, bucket: &str, key: &str) -> String {
    let key = key
        .split('/')
        .map(|segment| utf8_percent_encode(segment, KEY_SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/");
    format!(
        "{}/{}/{}",
        base.trim_end_matches('/'),
        utf8_percent_encode(bucket, KEY_SEGMENT),
        key
    )
}

/// Build the address a client PUTs a part body to.
pub fn part_target_url(base: &str, bucket: &str, key: &str, upload_id: &str, part_number: u32) -> String {
    format!(
        "{}?partNumber={}&uploadId={}",
        object_url(base, bucket, key),
        part_number,
        utf8_percent_encode(upload_id, KEY_SEGMENT)
    )
}

/// Extract `(upload_id, part_number)` from a URL built by [`part_target_url`].
/// Accepts absolute and host-relative URLs.
pub fn parse_part_target_url(target: &str) -> Option<(String, u32)> {
    let url = match Url::parse(target) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(RELATIVE_BASE).ok()?.join(target).ok()?,
        Err(_) => return None,
    };

    let mut upload_id = None;
    let mut part_number = None;
    for (name, value) in url.query_pairs() {
        match name.as_ref() {
            "uploadId" if !value.is_empty() => upload_id = Some(value.into_owned()),
            "partNumber" => part_number = value.parse::<u32>().ok(),
            _ => {}
        }
    }
    Some((upload_id?, part_number?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_target_url_parses_back() {
        let url = part_target_url("http://localhost:3000/", "uploads", "a/b.bin", "abc-123", 7);
        assert_eq!(
            url,
            "http://localhost:3000/uploads/a/b.bin?partNumber=7&uploadId=abc-123"
        );
        assert_eq!(parse_part_target_url(&url), Some(("abc-123".to_string(), 7)));
    }

    #[test]
    fn relative_target_url() {
        let url = part_target_url("", "uploads", "x", "u1", 1);
        assert_eq!(url, "/uploads/x?partNumber=1&uploadId=u1");
    }

    #[test]
    fn malformed_target_urls_are_rejected() {
        assert_eq!(parse_part_target_url("/uploads/x"), None);
        assert_eq!(parse_part_target_url("/uploads/x?partNumber=1"), None);
        assert_eq!(parse_part_target_url("/uploads/x?uploadId=u1&partNumber=zero"), None);
        assert_eq!(parse_part_target_url("/uploads/x?uploadId=&partNumber=2"), None);
    }

    #[test]
    fn reserved_characters_in_keys_are_escaped() {
        let keys = ["why?.txt", "50% off #1.txt", "a b/c d.bin", "x?uploadId=other&partNumber=9"];
        for key in keys {
            let url = part_target_url("http://localhost:3000", "uploads", key, "abc-123", 3);
            assert_eq!(url.matches('?').count(), 1, "{}", url);
            assert!(!url.contains('#') && !url.contains(' '), "{}", url);
            assert_eq!(parse_part_target_url(&url), Some(("abc-123".to_string(), 3)), "{}", url);

            let relative = part_target_url("", "uploads", key, "abc-123", 3);
            assert_eq!(parse_part_target_url(&relative), Some(("abc-123".to_string(), 3)));

            let parsed = Url::parse(&url).unwrap();
            let decoded = percent_encoding::percent_decode_str(parsed.path())
                .decode_utf8()
                .unwrap()
                .into_owned();
            assert_eq!(decoded, format!("/uploads/{}", key));
        }
    }

    #[test]
    fn object_url_keeps_separators() {
        assert_eq!(
            object_url("", "uploads", "a b/why?#%.txt"),
            "/uploads/a%20b/why%3F%23%25.txt"
        );
        assert_eq!(
            object_url("http://localhost:3000/", "uploads", "alice/docs/a.bin"),
            "http://localhost:3000/uploads/alice/docs/a.bin"
        );
    }
}
