use chrono::{DateTime, Utc};
use sched_config::SchedulerConfig;
use sched_schemas::{ResultClassification, Run};

/// Estimate the probability that the next run of a candidate succeeds.
///
/// Pure function over an already-fetched run history; the caller (the
/// persistence layer) is responsible for producing the right slice and for
/// deciding the `now` anchor, so this stays deterministic and easy to test.
///
/// Steps:
/// 1. Keep only runs within the configured window, most recent
///    `stats_max_runs` of those.
/// 2. Discard no-op runs; they carry no signal about success likelihood.
/// 3. Transient failures younger than `ignore_recent_transient_days` are
///    dropped outright (still-resolving flakiness shouldn't count yet);
///    older transient failures are weighted by `exp(-age_days / tau)`.
/// 4. Success and permanent-failure runs always weigh 1.0.
/// 5. If the total weight is below `min_data_points`, fall back to the
///    candidate's explicit success chance, else the campaign default.
/// 6. Clamp to [0, 1].
pub fn success_probability(
    runs: &[Run],
    candidate_success_chance: Option<f64>,
    config: &SchedulerConfig,
    now: DateTime<Utc>,
) -> f64 {
    let window_start = now - chrono::Duration::days(config.stats_window_days);

    let mut windowed: Vec<&Run> = runs
        .iter()
        .filter(|r| r.finished_at.map(|f| f >= window_start).unwrap_or(false))
        .collect();
    windowed.sort_by_key(|r| std::cmp::Reverse(r.finished_at));
    windowed.truncate(config.stats_max_runs);

    let ignore_recent_transient_before =
        now - chrono::Duration::days(config.ignore_recent_transient_days);
    let tau = config.transient_decay_tau_days.max(f64::EPSILON);

    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;

    for run in &windowed {
        let finished = match run.finished_at {
            Some(f) => f,
            None => continue,
        };
        let weight = match run.classification {
            Some(ResultClassification::NoOp) | None => continue,
            Some(ResultClassification::Transient) => {
                if finished >= ignore_recent_transient_before {
                    continue;
                }
                let age_days = (now - finished).num_seconds() as f64 / 86_400.0;
                (-age_days.max(0.0) / tau).exp()
            }
            Some(ResultClassification::Success) | Some(ResultClassification::Permanent) => 1.0,
        };
        let indicator = if run.classification == Some(ResultClassification::Success) {
            1.0
        } else {
            0.0
        };
        weighted_sum += weight * indicator;
        weight_total += weight;
    }

    if weight_total < config.min_data_points as f64 {
        return candidate_success_chance.unwrap_or(config.campaign_default_success_chance);
    }

    (weighted_sum / weight_total).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sched_schemas::ResultClassification as RC;
    use uuid::Uuid;

    fn run_at(finished_days_ago: i64, classification: RC) -> Run {
        let now = Utc::now();
        Run {
            id: Uuid::new_v4(),
            candidate_id: Uuid::new_v4(),
            codebase_id: Uuid::new_v4(),
            campaign_id: Uuid::new_v4(),
            worker: "w1".to_string(),
            started_at: now - chrono::Duration::days(finished_days_ago) - chrono::Duration::minutes(5),
            finished_at: Some(now - chrono::Duration::days(finished_days_ago)),
            result_code: Some("success".to_string()),
            classification: Some(classification),
            description: None,
        }
    }

    #[test]
    fn falls_back_to_candidate_success_chance_below_min_data_points() {
        let config = SchedulerConfig::default();
        let runs = vec![run_at(1, RC::Success), run_at(2, RC::Success)];
        let p = success_probability(&runs, Some(0.7), &config, Utc::now());
        assert_eq!(p, 0.7);
    }

    #[test]
    fn falls_back_to_campaign_default_when_no_candidate_chance_given() {
        let config = SchedulerConfig::default();
        let runs = vec![run_at(1, RC::Success)];
        let p = success_probability(&runs, None, &config, Utc::now());
        assert_eq!(p, config.campaign_default_success_chance);
    }

    #[test]
    fn all_successes_above_min_data_points_yields_probability_one() {
        let config = SchedulerConfig::default();
        let runs: Vec<Run> = (0..6).map(|i| run_at(i, RC::Success)).collect();
        let p = success_probability(&runs, None, &config, Utc::now());
        assert!((p - 1.0).abs() < 1e-9);
    }

    #[test]
    fn old_transient_failures_weigh_less_than_recent_permanent_ones() {
        let config = SchedulerConfig::default();
        let mut with_old_transient: Vec<Run> = (2..8).map(|i| run_at(i, RC::Success)).collect();
        with_old_transient.push(run_at(20, RC::Transient));
        let p_old_transient = success_probability(&with_old_transient, None, &config, Utc::now());

        let mut with_permanent: Vec<Run> = (2..8).map(|i| run_at(i, RC::Success)).collect();
        with_permanent.push(run_at(20, RC::Permanent));
        let p_permanent = success_probability(&with_permanent, None, &config, Utc::now());

        assert!(p_old_transient > p_permanent);
    }

    #[test]
    fn recent_transient_failures_are_ignored_outright() {
        let config = SchedulerConfig::default();
        let mut runs: Vec<Run> = (1..7).map(|i| run_at(i, RC::Success)).collect();
        runs.push(run_at(0, RC::Transient));
        let p = success_probability(&runs, None, &config, Utc::now());
        assert!((p - 1.0).abs() < 1e-9);
    }

    #[test]
    fn no_op_runs_are_discarded_from_data_points() {
        let config = SchedulerConfig::default();
        let mut runs: Vec<Run> = (0..6).map(|i| run_at(i, RC::Success)).collect();
        for i in 0..20 {
            runs.push(run_at(i, RC::NoOp));
        }
        let p = success_probability(&runs, None, &config, Utc::now());
        assert!((p - 1.0).abs() < 1e-9);
    }
}
