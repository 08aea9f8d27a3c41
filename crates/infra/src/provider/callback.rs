//! Inbound provider callback payloads.

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use mediawatch_core::{CorrelationId, TenantId};
use mediawatch_screening::Hit;

/// A malformed callback. The whole payload is rejected; nothing is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallbackError {
    #[error("hit {index}: missing {field}")]
    MissingField { index: usize, field: &'static str },
    #[error("hit {index}: unparseable publishedDate '{value}'")]
    BadDate { index: usize, value: String },
    #[error("hit {index}: relevance is not a finite number")]
    BadRelevance { index: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackPayload {
    pub correlation_id: CorrelationId,
    pub tenant_id: TenantId,
    #[serde(default)]
    pub hits: Vec<CallbackHit>,
}

/// Raw hit as sent by the provider; every field is checked by [`CallbackPayload::validate`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackHit {
    pub title: Option<String>,
    pub url: Option<String>,
    pub snippet: Option<String>,
    pub published_date: Option<String>,
    pub relevance: Option<f64>,
}

impl CallbackPayload {
    pub fn validate(&self) -> Result<Vec<Hit>, CallbackError> {
        self.hits
            .iter()
            .enumerate()
            .map(|(index, raw)| raw.validate(index))
            .collect()
    }
}

impl CallbackHit {
    fn validate(&self, index: usize) -> Result<Hit, CallbackError> {
        let required = |value: &Option<String>, field| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or(CallbackError::MissingField { index, field })
        };

        let relevance = self.relevance.unwrap_or(0.0);
        if !relevance.is_finite() {
            return Err(CallbackError::BadRelevance { index });
        }

        Ok(Hit {
            title: required(&self.title, "title")?,
            url: required(&self.url, "url")?,
            snippet: self.snippet.clone().unwrap_or_default(),
            published_date: parse_published(self.published_date.as_deref(), index)?,
            relevance,
        })
    }
}

/// Accepts `YYYY-MM-DD` or an RFC 3339 timestamp (date part kept).
fn parse_published(raw: Option<&str>, index: usize) -> Result<Option<NaiveDate>, CallbackError> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(Some(date));
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| Some(ts.date_naive()))
        .map_err(|_| CallbackError::BadDate {
            index,
            value: raw.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(hits: serde_json::Value) -> CallbackPayload {
        serde_json::from_value(serde_json::json!({
            "correlationId": 77,
            "tenantId": "0191d5a0-0000-7000-8000-000000000001",
            "hits": hits,
        }))
        .unwrap()
    }

    #[test]
    fn minimal_hit_is_accepted() {
        let hits = payload(serde_json::json!([{ "title": "X", "url": "http://a" }]))
            .validate()
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].published_date, None);
        assert_eq!(hits[0].relevance, 0.0);
    }

    #[test]
    fn timestamps_keep_the_date() {
        let hits = payload(serde_json::json!([
            { "title": "X", "url": "http://a", "publishedDate": "2024-03-09T22:10:00+00:00" }
        ]))
        .validate()
        .unwrap();
        assert_eq!(hits[0].published_date, NaiveDate::from_ymd_opt(2024, 3, 9));
    }

    #[test]
    fn one_bad_hit_rejects_the_whole_payload() {
        let err = payload(serde_json::json!([
            { "title": "X", "url": "http://a" },
            { "title": "Y", "url": "  " }
        ]))
        .validate()
        .unwrap_err();
        assert_eq!(err, CallbackError::MissingField { index: 1, field: "url" });

        let err = payload(serde_json::json!([
            { "title": "X", "url": "http://a", "publishedDate": "last week" }
        ]))
        .validate()
        .unwrap_err();
        assert!(matches!(err, CallbackError::BadDate { index: 0, .. }));
    }
}
