//! Request and response bodies for every sched-daemon HTTP endpoint.
//!
//! These types are `Serialize`/`Deserialize` only; no business logic
//! lives here. Domain types that are already wire-shaped (`QueueItem`,
//! `Run`) are returned directly by handlers instead of being wrapped.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// GET /health, GET /ready
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub queue_depth: i64,
}

// ---------------------------------------------------------------------------
// GET /assignment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct AssignmentQuery {
    pub worker: String,
    /// Comma-separated codebase hosts this worker cannot build against;
    /// mapped onto `AssignmentFilter::exclude_hosts`.
    pub capabilities: Option<String>,
    pub campaign: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssignmentBundleResponse {
    pub run_id: Uuid,
    pub queue_item_id: Uuid,
    pub candidate_id: Uuid,
    pub codebase_id: Uuid,
    pub campaign_id: Uuid,
    pub command: String,
    pub branch_url: String,
    pub subpath: Option<String>,
    pub vcs_kind: String,
    pub revision_hint: Option<String>,
    pub build_environment: HashMap<String, String>,
    pub resume_from_run_id: Option<Uuid>,
    pub lease_expires_at: DateTime<Utc>,
    pub log_upload_token: String,
}

impl From<sched_assign::AssignmentBundle> for AssignmentBundleResponse {
    fn from(b: sched_assign::AssignmentBundle) -> Self {
        AssignmentBundleResponse {
            run_id: b.run_id,
            queue_item_id: b.queue_item_id,
            candidate_id: b.candidate_id,
            codebase_id: b.codebase_id,
            campaign_id: b.campaign_id,
            command: b.command,
            branch_url: b.branch_url,
            subpath: b.subpath,
            vcs_kind: b.vcs_kind,
            revision_hint: b.revision_hint,
            build_environment: b.build_environment,
            resume_from_run_id: b.resume_from_run_id,
            lease_expires_at: b.lease_expires_at,
            log_upload_token: b.log_upload_token,
        }
    }
}

// ---------------------------------------------------------------------------
// POST /assignment/{run_id}/result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ResultBranchPayload {
    pub role: String,
    pub revision: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultReportRequest {
    pub result_code: String,
    pub failure_stage: Option<String>,
    pub failure_transient: Option<bool>,
    pub result: Option<String>,
    #[serde(default)]
    pub result_branches: Vec<ResultBranchPayload>,
    #[serde(default)]
    pub logs: Vec<String>,
    pub value: Option<f64>,
    pub finish_time: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Admin / control
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ManualEnqueueRequest {
    pub codebase_id: Uuid,
    pub campaign_id: Uuid,
    pub change_set_id: Option<Uuid>,
    pub context: Option<String>,
    pub value: Option<f64>,
    pub priority: i64,
    pub estimated_duration_seconds: Option<i64>,
    pub success_probability: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnqueueResponse {
    pub queue_item_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PriorityUpdateRequest {
    pub priority: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueListQuery {
    pub campaign: Option<Uuid>,
    pub bucket: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CandidateResponse {
    pub id: Uuid,
    pub codebase_id: Uuid,
    pub campaign_id: Uuid,
    pub change_set_id: Option<Uuid>,
    pub context: Option<String>,
    pub value: Option<f64>,
    pub success_chance: Option<f64>,
    pub bucket: &'static str,
    pub requested_at: DateTime<Utc>,
}

impl From<sched_db::CandidateRecord> for CandidateResponse {
    fn from(c: sched_db::CandidateRecord) -> Self {
        CandidateResponse {
            id: c.id,
            codebase_id: c.codebase_id,
            campaign_id: c.campaign_id,
            change_set_id: c.change_set_id,
            context: c.context,
            value: c.value,
            success_chance: c.success_chance,
            bucket: c.bucket.as_str(),
            requested_at: c.requested_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
}
