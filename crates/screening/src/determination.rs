//! Human/system adjudication of result records.
//!
//! Determinations are append-only: a correction is a newer determination, and only
//! the most recent one per result (by `decided_at`, ties broken by append order) counts.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mediawatch_core::{ReasonId, ResultId, ScreeningId, TenantId, UserId};

/// Classification of a result.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Verdict {
    Match,
    FalsePositive,
    Undetermined,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Match => "match",
            Verdict::FalsePositive => "falsePositive",
            Verdict::Undetermined => "undetermined",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "match" => Some(Verdict::Match),
            "falsePositive" => Some(Verdict::FalsePositive),
            "undetermined" => Some(Verdict::Undetermined),
            _ => None,
        }
    }
}

/// Input for appending a determination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDetermination {
    pub tenant_id: TenantId,
    pub result_id: ResultId,
    pub screening_id: ScreeningId,
    pub verdict: Verdict,
    pub reason_id: Option<ReasonId>,
    /// Whether remediation for a true match has been carried out.
    pub remediation: bool,
    pub decided_by: Option<UserId>,
}

impl NewDetermination {
    pub fn into_determination(self, decided_at: DateTime<Utc>) -> Determination {
        Determination {
            tenant_id: self.tenant_id,
            result_id: self.result_id,
            screening_id: self.screening_id,
            verdict: self.verdict,
            reason_id: self.reason_id,
            remediation: self.remediation,
            decided_by: self.decided_by,
            decided_at,
        }
    }
}

/// One immutable adjudication entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Determination {
    pub tenant_id: TenantId,
    pub result_id: ResultId,
    pub screening_id: ScreeningId,
    pub verdict: Verdict,
    pub reason_id: Option<ReasonId>,
    pub remediation: bool,
    pub decided_by: Option<UserId>,
    pub decided_at: DateTime<Utc>,
}

/// Pick the authoritative determination out of a result's history.
///
/// Later entries win ties, so pass the history in append order.
pub fn latest<'a, I>(history: I) -> Option<&'a Determination>
where
    I: IntoIterator<Item = &'a Determination>,
{
    history.into_iter().max_by_key(|d| d.decided_at)
}

/// Per-subject adjudication summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjudicationCounts {
    pub undetermined: u32,
    pub false_positive: u32,
    #[serde(rename = "match")]
    pub matched: u32,
    /// Matches whose reason requires remediation that has not been done yet.
    pub remediation: u32,
}

impl AdjudicationCounts {
    /// Classify each result by its latest determination.
    ///
    /// A result with no determination counts as undetermined.
    pub fn tally(
        results: &[ResultId],
        latest: &HashMap<ResultId, Determination>,
        remediation_reasons: &HashSet<ReasonId>,
    ) -> Self {
        let mut counts = Self::default();
        for id in results {
            match latest.get(id) {
                None => counts.undetermined += 1,
                Some(d) => match d.verdict {
                    Verdict::Undetermined => counts.undetermined += 1,
                    Verdict::FalsePositive => counts.false_positive += 1,
                    Verdict::Match => {
                        counts.matched += 1;
                        let needs_remediation = d
                            .reason_id
                            .is_some_and(|r| remediation_reasons.contains(&r));
                        if needs_remediation && !d.remediation {
                            counts.remediation += 1;
                        }
                    }
                },
            }
        }
        counts
    }

    pub fn total(&self) -> u32 {
        self.undetermined + self.false_positive + self.matched
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(result: i64, verdict: Verdict, at: DateTime<Utc>) -> Determination {
        NewDetermination {
            tenant_id: TenantId::new(),
            result_id: ResultId::new(result),
            screening_id: ScreeningId::new(1),
            verdict,
            reason_id: None,
            remediation: false,
            decided_by: None,
        }
        .into_determination(at)
    }

    #[test]
    fn latest_prefers_newest_then_last_appended() {
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(5);
        let history = vec![
            det(1, Verdict::Match, t1),
            det(1, Verdict::FalsePositive, t0),
            det(1, Verdict::Undetermined, t1),
        ];
        assert_eq!(latest(&history).unwrap().verdict, Verdict::Undetermined);
        assert!(latest(&Vec::<Determination>::new()).is_none());
    }

    #[test]
    fn tally_counts_each_classification() {
        let now = Utc::now();
        let results = vec![ResultId::new(1), ResultId::new(2), ResultId::new(3)];
        let mut latest = HashMap::new();
        latest.insert(ResultId::new(1), det(1, Verdict::Match, now));
        latest.insert(ResultId::new(2), det(2, Verdict::Undetermined, now));
        latest.insert(ResultId::new(3), det(3, Verdict::FalsePositive, now));

        let counts = AdjudicationCounts::tally(&results, &latest, &HashSet::new());
        assert_eq!(
            counts,
            AdjudicationCounts {
                undetermined: 1,
                false_positive: 1,
                matched: 1,
                remediation: 0,
            }
        );
    }

    #[test]
    fn missing_determination_is_undetermined() {
        let counts =
            AdjudicationCounts::tally(&[ResultId::new(8)], &HashMap::new(), &HashSet::new());
        assert_eq!(counts.undetermined, 1);
        assert_eq!(counts.total(), 1);
    }

    #[test]
    fn remediation_requires_flagged_reason_and_open_remediation() {
        let now = Utc::now();
        let flagged = ReasonId::new(10);
        let mut pending = det(1, Verdict::Match, now);
        pending.reason_id = Some(flagged);
        let mut done = det(2, Verdict::Match, now);
        done.reason_id = Some(flagged);
        done.remediation = true;
        let mut unflagged = det(3, Verdict::Match, now);
        unflagged.reason_id = Some(ReasonId::new(11));

        let latest: HashMap<_, _> = [pending, done, unflagged]
            .into_iter()
            .map(|d| (d.result_id, d))
            .collect();
        let ids: Vec<_> = latest.keys().copied().collect();
        let reasons: HashSet<_> = [flagged].into_iter().collect();

        let counts = AdjudicationCounts::tally(&ids, &latest, &reasons);
        assert_eq!(counts.matched, 3);
        assert_eq!(counts.remediation, 1);
    }

    #[test]
    fn counts_serialize_with_wire_names() {
        let json = serde_json::to_value(AdjudicationCounts {
            undetermined: 1,
            false_positive: 2,
            matched: 3,
            remediation: 0,
        })
        .unwrap();
        assert_eq!(json["match"], 3);
        assert_eq!(json["falsePositive"], 2);
    }
}
