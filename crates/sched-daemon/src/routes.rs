//! Axum router and all HTTP handlers for sched-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and
//! attaches middleware layers. Handlers are `pub(crate)` so scenario
//! tests can compose the router directly without going through a
//! bound TCP socket.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;
use futures_util::{Stream, StreamExt};
use sched_assign::{AssignmentFilter, NoWork};
use sched_db::{CandidateFilter, NewCandidate, NewResultBranch};
use sched_ingest::ResultReport;
use sched_schemas::{Bucket, SchedulerError};
use sched_supervisor::BusMsg;
use tokio_stream::wrappers::BroadcastStream;
use tracing::info;
use uuid::Uuid;

use crate::api_types::{
    AssignmentBundleResponse, AssignmentQuery, CandidateResponse, EnqueueResponse, ErrorResponse,
    HealthResponse, ManualEnqueueRequest, PriorityUpdateRequest, QueueListQuery, ReadyResponse,
    ResultReportRequest,
};
use crate::state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/assignment", get(request_assignment))
        .route("/assignment/:run_id/heartbeat", post(heartbeat))
        .route("/assignment/:run_id/result", post(submit_result))
        .route("/assignment/:run_id/abandon", post(abandon))
        .route("/queue", post(manual_enqueue))
        .route("/queue", get(list_queue))
        .route("/queue/:id/priority", post(update_priority))
        .route("/queue/:id", delete(remove_queue_item))
        .route("/queue/stream", get(stream))
        .route("/runs/:id", get(get_run))
        .route("/candidates/:codebase/:campaign", get(list_candidates))
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .with_state(state)
}

fn error_response(e: &SchedulerError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match e {
        SchedulerError::NotFound(_) => StatusCode::NOT_FOUND,
        SchedulerError::Conflict(_) => StatusCode::CONFLICT,
        SchedulerError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
        SchedulerError::Permanent(_) => StatusCode::UNPROCESSABLE_ENTITY,
        SchedulerError::Stale(_) => StatusCode::GONE,
        SchedulerError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
        SchedulerError::Db(sqlx::Error::RowNotFound) => StatusCode::NOT_FOUND,
        SchedulerError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
            kind: e.kind().to_string(),
        }),
    )
}

// ---------------------------------------------------------------------------
// Worker protocol
// ---------------------------------------------------------------------------

pub(crate) async fn request_assignment(
    State(st): State<Arc<AppState>>,
    Query(q): Query<AssignmentQuery>,
) -> Response {
    let config = st.config.current().await;
    let filter = AssignmentFilter {
        campaign_id: q.campaign,
        exclude_campaigns: Vec::new(),
        exclude_hosts: q
            .capabilities
            .map(|c| c.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect())
            .unwrap_or_default(),
    };

    let requested_at = Utc::now();
    match st.assignment.request_assignment(&config, &q.worker, filter).await {
        Ok(Ok(bundle)) => {
            let wait = (Utc::now() - requested_at).num_milliseconds() as f64 / 1000.0;
            st.metrics.record_assignment(wait);
            let _ = st.bus.send(BusMsg::Popped {
                queue_item_id: bundle.queue_item_id,
                worker: q.worker,
            });
            (StatusCode::OK, Json(AssignmentBundleResponse::from(bundle))).into_response()
        }
        Ok(Err(NoWork { retry_after_seconds })) => {
            st.metrics.record_no_work();
            let mut headers = HeaderMap::new();
            if let Ok(v) = HeaderValue::from_str(&retry_after_seconds.to_string()) {
                headers.insert("Retry-After", v);
            }
            (StatusCode::NO_CONTENT, headers).into_response()
        }
        Err(e) => error_response(&e).into_response(),
    }
}

pub(crate) async fn heartbeat(State(st): State<Arc<AppState>>, Path(run_id): Path<Uuid>) -> Response {
    let config = st.config.current().await;
    match sched_db::find_by_reserved_run(&st.pool, run_id).await {
        Ok(Some(reserved)) => {
            let new_expiry = Utc::now() + chrono::Duration::seconds(config.min_lease_seconds);
            match st.queue.extend_lease(reserved.id, new_expiry).await {
                Ok(()) => StatusCode::NO_CONTENT.into_response(),
                Err(e) => error_response(&e).into_response(),
            }
        }
        Ok(None) => error_response(&SchedulerError::Stale(format!("no active reservation for run {run_id}")))
            .into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

pub(crate) async fn submit_result(
    State(st): State<Arc<AppState>>,
    Path(run_id): Path<Uuid>,
    Json(body): Json<ResultReportRequest>,
) -> Response {
    let config = st.config.current().await;
    let result_code = body.result_code.clone();
    let report = ResultReport {
        run_id,
        result_code: body.result_code,
        failure_stage: body.failure_stage,
        failure_transient: body.failure_transient,
        result: body.result,
        result_branches: body
            .result_branches
            .into_iter()
            .map(|b| NewResultBranch {
                role: b.role,
                revision: b.revision,
            })
            .collect(),
        logs: body.logs,
        value: body.value,
        finish_time: body.finish_time,
    };

    match sched_ingest::ingest_result(&st.pool, &config, report).await {
        Ok(run) => {
            let duration = run.duration_seconds().map(|d| d as f64);
            st.metrics.record_result(&result_code, duration);
            let _ = st.bus.send(BusMsg::TerminalRun { run_id: run.id });
            (StatusCode::CREATED, Json(run)).into_response()
        }
        Err(e) => error_response(&e).into_response(),
    }
}

pub(crate) async fn abandon(State(st): State<Arc<AppState>>, Path(run_id): Path<Uuid>) -> Response {
    match sched_db::find_by_reserved_run(&st.pool, run_id).await {
        Ok(Some(reserved)) => match st.assignment.cancel_assignment(reserved.id).await {
            Ok(()) => StatusCode::NO_CONTENT.into_response(),
            Err(e) => error_response(&e).into_response(),
        },
        Ok(None) => error_response(&SchedulerError::Stale(format!("no active reservation for run {run_id}")))
            .into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

// ---------------------------------------------------------------------------
// Admin / control
// ---------------------------------------------------------------------------

pub(crate) async fn manual_enqueue(
    State(st): State<Arc<AppState>>,
    Json(body): Json<ManualEnqueueRequest>,
) -> Response {
    let config = st.config.current().await;

    let candidate = match sched_db::upsert_candidate(
        &st.pool,
        &NewCandidate {
            codebase_id: body.codebase_id,
            campaign_id: body.campaign_id,
            change_set_id: body.change_set_id,
            context: body.context,
            value: body.value,
            success_chance: body.success_probability,
            bucket: Bucket::Manual,
        },
    )
    .await
    {
        Ok(c) => c,
        Err(e) => return error_response(&e).into_response(),
    };

    let item = sched_db::NewQueueItem {
        candidate_id: candidate.id,
        codebase_id: body.codebase_id,
        campaign_id: body.campaign_id,
        change_set_id: body.change_set_id,
        bucket: Bucket::Manual,
        priority: body.priority,
        estimated_duration_secs: body
            .estimated_duration_seconds
            .unwrap_or((config.default_duration_minutes * 60.0) as i64),
        success_probability: body.success_probability.unwrap_or(config.campaign_default_success_chance),
        earliest_start: None,
    };

    match sched_db::enqueue(&st.pool, &item).await {
        Ok(queue_item_id) => {
            let _ = st.bus.send(BusMsg::Enqueued { queue_item_id });
            (StatusCode::CREATED, Json(EnqueueResponse { queue_item_id })).into_response()
        }
        Err(e) => error_response(&e).into_response(),
    }
}

pub(crate) async fn update_priority(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<PriorityUpdateRequest>,
) -> Response {
    match st.queue.reprioritize(id, body.priority).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

pub(crate) async fn remove_queue_item(State(st): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Response {
    match st.queue.remove(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

pub(crate) async fn list_queue(State(st): State<Arc<AppState>>, Query(q): Query<QueueListQuery>) -> Response {
    let bucket = q.bucket.as_deref().and_then(parse_bucket_query);
    match st
        .queue
        .list(q.campaign, bucket, q.limit.unwrap_or(100), q.offset.unwrap_or(0))
        .await
    {
        Ok(items) => Json(items).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

fn parse_bucket_query(s: &str) -> Option<Bucket> {
    match s {
        "control" => Some(Bucket::Control),
        "hook" => Some(Bucket::Hook),
        "manual" => Some(Bucket::Manual),
        "update-existing-mp" => Some(Bucket::UpdateExistingMp),
        "update-new-mp" => Some(Bucket::UpdateNewMp),
        "reschedule" => Some(Bucket::Reschedule),
        "missing-deps" => Some(Bucket::MissingDeps),
        "default" => Some(Bucket::Default),
        _ => None,
    }
}

pub(crate) async fn get_run(State(st): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Response {
    match sched_db::fetch_run(&st.pool, id).await {
        Ok(Some(run)) => Json(run).into_response(),
        Ok(None) => error_response(&SchedulerError::NotFound(format!("run {id}"))).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

pub(crate) async fn list_candidates(
    State(st): State<Arc<AppState>>,
    Path((codebase, campaign)): Path<(Uuid, Uuid)>,
) -> Response {
    match sched_db::candidates(
        &st.pool,
        &CandidateFilter {
            active_codebases_only: false,
            campaign_id: Some(campaign),
            codebase_id: Some(codebase),
        },
    )
    .await
    {
        Ok(candidates) => {
            let out: Vec<CandidateResponse> = candidates.into_iter().map(CandidateResponse::from).collect();
            Json(out).into_response()
        }
        Err(e) => error_response(&e).into_response(),
    }
}

// ---------------------------------------------------------------------------
// Observability
// ---------------------------------------------------------------------------

const ALL_BUCKETS: [Bucket; 8] = [
    Bucket::Control,
    Bucket::Hook,
    Bucket::Manual,
    Bucket::UpdateExistingMp,
    Bucket::UpdateNewMp,
    Bucket::Reschedule,
    Bucket::MissingDeps,
    Bucket::Default,
];

pub(crate) async fn metrics(State(st): State<Arc<AppState>>) -> Response {
    let mut by_bucket = Vec::with_capacity(ALL_BUCKETS.len());
    for bucket in ALL_BUCKETS {
        match st.queue.list(None, Some(bucket), i64::MAX, 0).await {
            Ok(items) => by_bucket.push((bucket.as_str().to_string(), items.len() as i64)),
            Err(e) => return error_response(&e).into_response(),
        }
    }
    (StatusCode::OK, st.metrics.render(&by_bucket)).into_response()
}

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        ok: true,
        service: st.build.service,
        version: st.build.version,
        uptime_seconds: st.uptime_seconds(),
    })
}

pub(crate) async fn ready(State(st): State<Arc<AppState>>) -> Response {
    match sched_db::status(&st.pool).await {
        Ok(status) => (
            StatusCode::OK,
            Json(ReadyResponse {
                ready: status.reachable,
                queue_depth: status.queue_depth,
            }),
        )
            .into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "readiness probe failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadyResponse {
                    ready: false,
                    queue_depth: 0,
                }),
            )
                .into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// GET /queue/stream (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(State(st): State<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let rx = st.bus.subscribe();
    info!("client subscribed to queue stream");
    let events = broadcast_to_sse(rx);
    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn broadcast_to_sse(
    rx: tokio::sync::broadcast::Receiver<BusMsg>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(m) => {
                let event_name = match &m {
                    BusMsg::Enqueued { .. } => "enqueued",
                    BusMsg::Popped { .. } => "popped",
                    BusMsg::Requeued { .. } => "requeued",
                    BusMsg::TerminalRun { .. } => "terminal_run",
                    BusMsg::LeaseExpired { .. } => "lease_expired",
                    BusMsg::StuckItem { .. } => "stuck_item",
                    BusMsg::TickCompleted(_) => "tick_completed",
                };
                let data = serde_json::to_string(&m).ok()?;
                Some(Ok(Event::default().event(event_name).data(data)))
            }
            Err(_) => None,
        }
    })
}
