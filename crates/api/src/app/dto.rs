use serde::Deserialize;

use mediawatch_core::{
    CorrelationId, FilterId, JobId, ReasonId, ScreeningId, TenantId, UserId,
};
use mediawatch_infra::filter::{Candidate, FilterAssignment};
use mediawatch_screening::{
    EnqueueRequest, NameOrigin, NewDetermination, Priority, Subject, SubjectKind, Verdict,
};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueSearchRequest {
    pub subject_kind: SubjectKind,
    pub subject_id: i64,
    pub term: String,
    #[serde(default)]
    pub term_origin: Option<NameOrigin>,
    #[serde(default)]
    pub refinement_term: Option<String>,
    #[serde(default)]
    pub date_start: Option<String>,
    #[serde(default)]
    pub date_end: Option<String>,
    #[serde(default)]
    pub provider_tenant_id: Option<TenantId>,
    #[serde(default)]
    pub exempt: bool,
}

impl EnqueueSearchRequest {
    pub fn into_request(self, tenant_id: TenantId) -> EnqueueRequest {
        EnqueueRequest {
            tenant_id,
            provider_tenant_id: self.provider_tenant_id,
            subject: Subject::from_parts(self.subject_kind, self.subject_id),
            name_origin: self.term_origin.unwrap_or(NameOrigin::Manual),
            search_term: self.term,
            refinement_term: self.refinement_term,
            date_start: self.date_start,
            date_end: self.date_end,
            priority: Priority::Interactive,
            filter_id: None,
            exempt: self.exempt,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachRefinementRequest {
    pub correlation_id: CorrelationId,
    #[serde(flatten)]
    pub search: EnqueueSearchRequest,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitRequest {
    pub job_ids: Vec<JobId>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeterminationRequest {
    pub screening_id: ScreeningId,
    pub verdict: Verdict,
    #[serde(default)]
    pub reason_id: Option<ReasonId>,
    #[serde(default)]
    pub remediation: bool,
    #[serde(default)]
    pub decided_by: Option<UserId>,
}

impl DeterminationRequest {
    pub fn into_determination(
        self,
        tenant_id: TenantId,
        result_id: mediawatch_core::ResultId,
    ) -> NewDetermination {
        NewDetermination {
            tenant_id,
            result_id,
            screening_id: self.screening_id,
            verdict: self.verdict,
            reason_id: self.reason_id,
            remediation: self.remediation,
            decided_by: self.decided_by,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SetDeletedRequest {
    pub deleted: bool,
}

#[derive(Debug, Deserialize)]
pub struct RemediationFlagRequest {
    pub required: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateDto {
    pub subject_id: i64,
    pub id_type: SubjectKind,
    pub term: String,
    #[serde(default)]
    pub term_origin: Option<NameOrigin>,
    #[serde(default)]
    pub record_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleFilterRequest {
    #[serde(default)]
    pub provider_tenant_id: Option<TenantId>,
    #[serde(default)]
    pub refinement_term: Option<String>,
    #[serde(default)]
    pub date_start: Option<String>,
    #[serde(default)]
    pub date_end: Option<String>,
    #[serde(default)]
    pub only_new: bool,
    #[serde(default)]
    pub exempt: bool,
    pub candidates: Vec<CandidateDto>,
}

impl ScheduleFilterRequest {
    pub fn into_parts(
        self,
        tenant_id: TenantId,
        filter_id: FilterId,
    ) -> (FilterAssignment, Vec<Candidate>) {
        let assignment = FilterAssignment {
            tenant_id,
            provider_tenant_id: self.provider_tenant_id,
            filter_id,
            refinement_term: self.refinement_term,
            date_start: self.date_start,
            date_end: self.date_end,
            priority: Priority::Background,
            only_new: self.only_new,
            exempt: self.exempt,
        };
        let candidates = self
            .candidates
            .into_iter()
            .enumerate()
            .map(|(i, c)| Candidate {
                cursor: i as i64 + 1,
                subject_id: c.subject_id,
                id_type: c.id_type,
                term: c.term,
                term_origin: c.term_origin.unwrap_or(NameOrigin::Name),
                record_type: c.record_type,
            })
            .collect();
        (assignment, candidates)
    }
}

// -------------------------
// Query DTOs
// -------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountsQuery {
    pub screening_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsQuery {
    #[serde(default)]
    pub include_deleted: bool,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct UsageQuery {
    pub since: chrono::DateTime<chrono::Utc>,
}
