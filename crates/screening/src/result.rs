//! Adverse-media hits and their dedup hashes.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use mediawatch_core::{JobId, ResultId, TenantId};

use crate::subject::Subject;

/// Which hash governs duplicate suppression for a tenant.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupMode {
    /// Same article, same publish date ⇒ duplicate.
    #[default]
    Standard,
    /// Republished copies of the same article are the same hit (publish date ignored).
    HideRevisions,
}

impl DedupMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DedupMode::Standard => "standard",
            DedupMode::HideRevisions => "hide_revisions",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "standard" => Some(DedupMode::Standard),
            "hide_revisions" => Some(DedupMode::HideRevisions),
            _ => None,
        }
    }
}

/// Both dedup hashes of a hit, computed once at insert time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHashes {
    /// hash(publishedDate, url, title)
    pub full: String,
    /// hash(url, title)
    pub no_publish: String,
}

const FIELD_SEP: &[u8] = &[0x1f];

impl ContentHashes {
    pub fn compute(published_date: Option<NaiveDate>, url: &str, title: &str) -> Self {
        let date = published_date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        let url = url.trim();
        let title = title.trim();

        Self {
            full: digest(&[date.as_bytes(), url.as_bytes(), title.as_bytes()]),
            no_publish: digest(&[url.as_bytes(), title.as_bytes()]),
        }
    }

    pub fn for_mode(&self, mode: DedupMode) -> &str {
        match mode {
            DedupMode::Standard => &self.full,
            DedupMode::HideRevisions => &self.no_publish,
        }
    }
}

fn digest(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(FIELD_SEP);
        }
        hasher.update(part);
    }
    hex::encode(hasher.finalize())
}

/// A validated hit from a provider callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub published_date: Option<NaiveDate>,
    pub relevance: f64,
}

impl Hit {
    pub fn hashes(&self) -> ContentHashes {
        ContentHashes::compute(self.published_date, &self.url, &self.title)
    }
}

/// A result record about to be inserted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewResultRecord {
    pub tenant_id: TenantId,
    pub job_id: JobId,
    pub subject: Subject,
    pub hit: Hit,
    pub hashes: ContentHashes,
}

impl NewResultRecord {
    pub fn new(tenant_id: TenantId, job_id: JobId, subject: Subject, hit: Hit) -> Self {
        let hashes = hit.hashes();
        Self {
            tenant_id,
            job_id,
            subject,
            hit,
            hashes,
        }
    }

    pub fn into_record(self, id: ResultId, now: DateTime<Utc>) -> ResultRecord {
        ResultRecord {
            id,
            tenant_id: self.tenant_id,
            job_id: self.job_id,
            subject: self.subject,
            title: self.hit.title,
            url: self.hit.url,
            snippet: self.hit.snippet,
            published_date: self.hit.published_date,
            relevance: self.hit.relevance,
            content_hash: self.hashes.full,
            content_hash_no_publish: self.hashes.no_publish,
            deleted: false,
            created_at: now,
        }
    }
}

/// One persisted adverse-media hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub id: ResultId,
    pub tenant_id: TenantId,
    pub job_id: JobId,
    pub subject: Subject,
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub published_date: Option<NaiveDate>,
    pub relevance: f64,
    pub content_hash: String,
    pub content_hash_no_publish: String,
    /// Soft delete for out-of-band corrections.
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
}

impl ResultRecord {
    pub fn dedup_hash(&self, mode: DedupMode) -> &str {
        match mode {
            DedupMode::Standard => &self.content_hash,
            DedupMode::HideRevisions => &self.content_hash_no_publish,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn date(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(y, m, d)
    }

    #[test]
    fn publish_date_only_affects_full_hash() {
        let a = ContentHashes::compute(date(2024, 1, 1), "http://a", "X");
        let b = ContentHashes::compute(date(2024, 3, 9), "http://a", "X");

        assert_ne!(a.full, b.full);
        assert_eq!(a.no_publish, b.no_publish);
        assert_eq!(a.for_mode(DedupMode::HideRevisions), b.for_mode(DedupMode::HideRevisions));
        assert_ne!(a.for_mode(DedupMode::Standard), b.for_mode(DedupMode::Standard));
    }

    #[test]
    fn field_boundaries_are_not_ambiguous() {
        let a = ContentHashes::compute(None, "http://a/b", "c");
        let b = ContentHashes::compute(None, "http://a/", "bc");
        assert_ne!(a.no_publish, b.no_publish);
    }

    #[test]
    fn hashes_are_hex_sha256() {
        let h = ContentHashes::compute(None, "http://a", "X");
        assert_eq!(h.full.len(), 64);
        assert!(h.full.chars().all(|c| c.is_ascii_hexdigit()));
    }

    proptest! {
        /// Property: surrounding whitespace never changes either hash.
        #[test]
        fn hashes_ignore_surrounding_whitespace(url in "[a-z:/.]{1,30}", title in "[A-Za-z ]{1,30}") {
            let plain = ContentHashes::compute(None, &url, &title);
            let padded = ContentHashes::compute(None, &format!("  {url}\t"), &format!(" {title} "));
            prop_assert_eq!(plain, padded);
        }
    }
}
