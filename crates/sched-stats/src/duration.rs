use sched_config::SchedulerConfig;
use sched_schemas::Run;

/// `(codebase, campaign)` median if it has at least `min_data_points`
/// finished runs; else campaign-wide median; else the campaign's configured
/// default; else the global default.
pub fn estimate_duration_seconds(
    codebase_campaign_runs: &[Run],
    campaign_runs: &[Run],
    campaign_default_seconds: Option<i64>,
    config: &SchedulerConfig,
) -> i64 {
    if let Some(d) = median_duration_at_least(codebase_campaign_runs, config.min_data_points) {
        return d;
    }
    if let Some(d) = median_duration_at_least(campaign_runs, 1) {
        return d;
    }
    if let Some(d) = campaign_default_seconds {
        return d;
    }
    (config.default_duration_minutes * 60.0).round() as i64
}

fn median_duration_at_least(runs: &[Run], min_count: usize) -> Option<i64> {
    let mut durations: Vec<i64> = runs
        .iter()
        .filter_map(|r| r.duration_seconds())
        .filter(|d| *d > 0)
        .collect();
    if durations.len() < min_count.max(1) {
        return None;
    }
    durations.sort_unstable();
    let mid = durations.len() / 2;
    if durations.len() % 2 == 0 {
        Some((durations[mid - 1] + durations[mid]) / 2)
    } else {
        Some(durations[mid])
    }
}
