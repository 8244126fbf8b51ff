use sched_config::SchedulerConfig;
use sched_schemas::PublishMode;

/// Inputs the scoring formula needs for a single candidate, already
/// resolved by the caller (Candidate Selector) from the statistics engine
/// and the candidate/campaign records.
#[derive(Debug, Clone, Copy)]
pub struct ScoringInput {
    pub base_value: f64,
    pub publish_mode: PublishMode,
    pub is_first_run: bool,
    pub success_probability: f64,
    pub estimated_duration_seconds: i64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score {
    pub value: f64,
    pub priority: i64,
}

/// `score = (base_value + publish_bonus + first_run_bonus) * success_probability
///           / max(estimated_duration, epsilon)`
///
/// Higher score is more urgent; priority is its negated, scaled, rounded
/// form so that ascending priority order matches descending score order
/// (queue pop sorts priority ascending).
pub fn score(input: &ScoringInput, config: &SchedulerConfig) -> Score {
    let publish_bonus = config.publish_bonus.get(input.publish_mode);
    let first_run_bonus = if input.is_first_run {
        config.first_run_bonus
    } else {
        0.0
    };

    let numerator = (input.base_value + publish_bonus + first_run_bonus) * input.success_probability;
    let duration = (input.estimated_duration_seconds as f64).max(config.epsilon_seconds);
    let value = numerator / duration;
    let priority = -(value * 1000.0).round() as i64;

    Score { value, priority }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_first_run_candidate_worked_example() {
        // base_value=10, push bonus=500, first_run_bonus=100, success_probability=0.5,
        // duration=900s (global default for a candidate with no prior runs).
        let config = SchedulerConfig::default();
        let input = ScoringInput {
            base_value: 10.0,
            publish_mode: PublishMode::Push,
            is_first_run: true,
            success_probability: 0.5,
            estimated_duration_seconds: 900,
        };
        let s = score(&input, &config);
        assert!((s.value - 0.3389).abs() < 0.001);
    }

    #[test]
    fn higher_success_probability_increases_score() {
        let config = SchedulerConfig::default();
        let mut input = ScoringInput {
            base_value: 10.0,
            publish_mode: PublishMode::Push,
            is_first_run: false,
            success_probability: 0.2,
            estimated_duration_seconds: 600,
        };
        let low = score(&input, &config);
        input.success_probability = 0.9;
        let high = score(&input, &config);
        assert!(high.value > low.value);
        assert!(high.priority < low.priority);
    }

    #[test]
    fn zero_duration_is_clamped_by_epsilon_not_division_by_zero() {
        let config = SchedulerConfig::default();
        let input = ScoringInput {
            base_value: 10.0,
            publish_mode: PublishMode::Push,
            is_first_run: false,
            success_probability: 1.0,
            estimated_duration_seconds: 0,
        };
        let s = score(&input, &config);
        assert!(s.value.is_finite());
    }

    #[test]
    fn first_run_bonus_increases_score_over_identical_non_first_run() {
        let config = SchedulerConfig::default();
        let mut input = ScoringInput {
            base_value: 10.0,
            publish_mode: PublishMode::Bts,
            is_first_run: false,
            success_probability: 0.8,
            estimated_duration_seconds: 300,
        };
        let without_bonus = score(&input, &config);
        input.is_first_run = true;
        let with_bonus = score(&input, &config);
        assert!(with_bonus.value > without_bonus.value);
    }
}
