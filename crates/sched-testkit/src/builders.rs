use chrono::{DateTime, Utc};
use sched_schemas::{Bucket, Candidate, ResultClassification, Run};
use uuid::Uuid;

/// Builds a [`Run`] with sensible defaults, overriding only what a test
/// cares about.
#[derive(Debug, Clone)]
pub struct NewRunBuilder {
    run: Run,
}

impl Default for NewRunBuilder {
    fn default() -> Self {
        let now = Utc::now();
        NewRunBuilder {
            run: Run {
                id: Uuid::new_v4(),
                candidate_id: Uuid::new_v4(),
                codebase_id: Uuid::new_v4(),
                campaign_id: Uuid::new_v4(),
                worker: "test-worker".to_string(),
                started_at: now - chrono::Duration::minutes(5),
                finished_at: Some(now),
                result_code: Some("success".to_string()),
                classification: Some(ResultClassification::Success),
                description: None,
            },
        }
    }
}

impl NewRunBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn candidate_id(mut self, id: Uuid) -> Self {
        self.run.candidate_id = id;
        self
    }

    pub fn codebase_campaign(mut self, codebase_id: Uuid, campaign_id: Uuid) -> Self {
        self.run.codebase_id = codebase_id;
        self.run.campaign_id = campaign_id;
        self
    }

    pub fn classification(mut self, c: ResultClassification) -> Self {
        self.run.classification = Some(c);
        self
    }

    pub fn result_code(mut self, code: &str) -> Self {
        self.run.result_code = Some(code.to_string());
        self
    }

    pub fn finished_at(mut self, finished_at: DateTime<Utc>) -> Self {
        self.run.finished_at = Some(finished_at);
        self
    }

    pub fn started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.run.started_at = started_at;
        self
    }

    pub fn duration_seconds(mut self, seconds: i64) -> Self {
        let finished = self.run.finished_at.unwrap_or_else(Utc::now);
        self.run.started_at = finished - chrono::Duration::seconds(seconds);
        self
    }

    pub fn build(self) -> Run {
        self.run
    }
}

#[derive(Debug, Clone)]
pub struct NewCandidateBuilder {
    candidate: Candidate,
}

impl Default for NewCandidateBuilder {
    fn default() -> Self {
        NewCandidateBuilder {
            candidate: Candidate {
                id: Uuid::new_v4(),
                campaign_id: Uuid::new_v4(),
                codebase_id: Uuid::new_v4(),
                context: None,
                value: 10.0,
                bucket: Bucket::Default,
                requested_at: Utc::now(),
            },
        }
    }
}

impl NewCandidateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bucket(mut self, bucket: Bucket) -> Self {
        self.candidate.bucket = bucket;
        self
    }

    pub fn value(mut self, value: f64) -> Self {
        self.candidate.value = value;
        self
    }

    pub fn build(self) -> Candidate {
        self.candidate
    }
}
