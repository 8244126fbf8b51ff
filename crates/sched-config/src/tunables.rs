use std::collections::HashMap;

use sched_schemas::{PublishMode, ResultClassification};
use serde::{Deserialize, Serialize};

/// Immutable snapshot of every tunable the scheduling core reads.
///
/// Built once per config reload (see [`crate::SchedulerConfigHandle`]) and
/// shared via `Arc` so in-flight scoring/selection work never observes a
/// torn read across a reload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    pub stats_window_days: i64,
    pub stats_max_runs: usize,
    pub transient_decay_tau_days: f64,
    pub ignore_recent_transient_days: i64,
    pub min_data_points: usize,
    pub campaign_default_success_chance: f64,

    pub default_duration_minutes: f64,

    pub first_run_bonus: f64,
    pub epsilon_seconds: f64,
    pub publish_bonus: PublishBonusTable,

    pub transient_penalty: i64,
    pub transient_cooldown_seconds: i64,

    /// Priority assigned to a refresh candidate enqueued directly into
    /// `update-existing-mp` when a closed/rejected merge proposal's
    /// target branch has diverged (§4.9) — bypasses scoring entirely,
    /// the same way `control`/`hook`/`manual` items are injected.
    pub update_existing_mp_priority: i64,

    pub min_lease_seconds: i64,
    pub max_lease_seconds: i64,

    pub supervisor_tick_seconds: u64,
    /// An unreserved queue item sitting with no priority/bucket movement
    /// for longer than this is reported as stuck (§4.8).
    pub stuck_item_stall_seconds: i64,

    pub slow_start_initial_cap: u32,
    pub slow_start_growth_per_success: u32,
    pub slow_start_halving_streak: u32,

    /// Result code -> classification overrides on top of the built-in table.
    pub result_code_overrides: HashMap<String, ResultClassification>,
    /// If true, an unrecognized result code is a hard ingestion error
    /// instead of falling back to `Permanent`.
    pub strict_result_codes: bool,

    pub retry_base_ms: u64,
    pub retry_factor: f64,
    pub retry_cap_ms: u64,
    pub retry_max_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PublishBonusTable {
    pub skip: f64,
    pub build_only: f64,
    pub bts: f64,
    pub propose: f64,
    pub attempt_push: f64,
    pub push: f64,
    pub push_derived: f64,
}

impl Default for PublishBonusTable {
    fn default() -> Self {
        PublishBonusTable {
            skip: 0.0,
            build_only: 0.0,
            bts: 100.0,
            propose: 400.0,
            attempt_push: 450.0,
            push: 500.0,
            push_derived: 450.0,
        }
    }
}

impl PublishBonusTable {
    pub fn get(&self, mode: PublishMode) -> f64 {
        match mode {
            PublishMode::Skip => self.skip,
            PublishMode::BuildOnly => self.build_only,
            PublishMode::Bts => self.bts,
            PublishMode::Propose => self.propose,
            PublishMode::AttemptPush => self.attempt_push,
            PublishMode::Push => self.push,
            PublishMode::PushDerived => self.push_derived,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            stats_window_days: 30,
            stats_max_runs: 100,
            transient_decay_tau_days: 7.0,
            ignore_recent_transient_days: 1,
            min_data_points: 5,
            campaign_default_success_chance: 0.5,

            default_duration_minutes: 15.0,

            first_run_bonus: 100.0,
            epsilon_seconds: 1.0,
            publish_bonus: PublishBonusTable::default(),

            transient_penalty: 100,
            transient_cooldown_seconds: 300,
            update_existing_mp_priority: -1_000,

            min_lease_seconds: 600,
            max_lease_seconds: 86_400,

            supervisor_tick_seconds: 30,
            stuck_item_stall_seconds: 3600,

            slow_start_initial_cap: 1,
            slow_start_growth_per_success: 1,
            slow_start_halving_streak: 3,

            result_code_overrides: HashMap::new(),
            strict_result_codes: false,

            retry_base_ms: 100,
            retry_factor: 2.0,
            retry_cap_ms: 30_000,
            retry_max_attempts: 5,
        }
    }
}

impl SchedulerConfig {
    /// Built-in result-code classification, overridable per deployment.
    ///
    /// Anything not listed here and not in `result_code_overrides` falls
    /// back to `Permanent` unless `strict_result_codes` is set, in which
    /// case classification itself returns an error (see `sched-ingest`).
    pub fn classify_result_code(&self, code: &str) -> Option<ResultClassification> {
        if let Some(c) = self.result_code_overrides.get(code) {
            return Some(*c);
        }
        built_in_classification(code)
    }
}

fn built_in_classification(code: &str) -> Option<ResultClassification> {
    match code {
        "success" => Some(ResultClassification::Success),
        "nothing-to-do" | "nothing-new-to-do" => Some(ResultClassification::NoOp),
        "timeout" | "worker-failure" | "502" | "503" | "504" | "install-deps-failure" => {
            Some(ResultClassification::Transient)
        }
        "build-failed" | "test-failed" | "unsupported" | "codebase-not-found" => {
            Some(ResultClassification::Permanent)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.stats_window_days, 30);
        assert_eq!(cfg.min_data_points, 5);
        assert_eq!(cfg.transient_penalty, 100);
        assert_eq!(cfg.transient_cooldown_seconds, 300);
        assert_eq!(cfg.publish_bonus.push, 500.0);
        assert_eq!(cfg.publish_bonus.get(PublishMode::Push), 500.0);
    }

    #[test]
    fn override_takes_precedence_over_built_in() {
        let mut cfg = SchedulerConfig::default();
        cfg.result_code_overrides
            .insert("timeout".to_string(), ResultClassification::Permanent);
        assert_eq!(
            cfg.classify_result_code("timeout"),
            Some(ResultClassification::Permanent)
        );
    }

    #[test]
    fn unknown_code_is_none_by_default() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.classify_result_code("something-new"), None);
    }
}
