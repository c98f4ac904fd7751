use std::collections::BTreeSet;

use crate::params::HighResolution;

/// Steps at which the trainer stops to evaluate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalSchedule {
    /// Fixed cadence; zero disables it
    every: usize,
    /// Extra early steps
    high_resolution: BTreeSet<usize>,
}

impl EvalSchedule {
    pub fn new(every: usize, high_resolution: impl IntoIterator<Item = usize>) -> Self {
        Self {
            every,
            high_resolution: high_resolution.into_iter().collect(),
        }
    }

    /// Resolve the high-resolution policy against the length of the start prefix, if any.
    pub fn from_policy(policy: &HighResolution, every: usize, start_mbs: Option<usize>) -> Self {
        let steps: Vec<usize> = match (policy, start_mbs) {
            (HighResolution::Fixed { steps }, _) => steps.clone(),
            (
                HighResolution::StartPrefix { num_checkpoints, .. },
                Some(start_mbs),
            ) if start_mbs > 0 => {
                let stride = (start_mbs / (*num_checkpoints).max(1)).max(1);
                (0..start_mbs).step_by(stride).collect()
            }
            (HighResolution::StartPrefix { fallback, .. }, _) => fallback.clone(),
        };
        Self::new(every, steps)
    }

    pub fn should_evaluate(&self, step: usize) -> bool {
        (self.every > 0 && step % self.every == 0) || self.high_resolution.contains(&step)
    }

    pub fn high_resolution(&self) -> &BTreeSet<usize> {
        &self.high_resolution
    }

    /// Every checkpoint among steps `0..num_steps`
    pub fn checkpoints(&self, num_steps: usize) -> Vec<usize> {
        (0..num_steps).filter(|&step| self.should_evaluate(step)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cadence_plus_early_steps() {
        let schedule = EvalSchedule::new(5, [0, 1, 2]);
        assert_eq!(schedule.checkpoints(12), vec![0, 1, 2, 5, 10]);
    }

    #[test]
    fn test_start_prefix_policy() {
        let policy = HighResolution::default();
        let schedule = EvalSchedule::from_policy(&policy, 10000, Some(50));
        assert_eq!(
            schedule.high_resolution().iter().copied().collect::<Vec<_>>(),
            vec![0, 5, 10, 15, 20, 25, 30, 35, 40, 45]
        );

        // fewer start batches than checkpoints
        let schedule = EvalSchedule::from_policy(&policy, 10000, Some(3));
        assert_eq!(schedule.high_resolution().len(), 3);
    }

    #[test]
    fn test_fallback_without_start() {
        let schedule = EvalSchedule::from_policy(&HighResolution::default(), 10000, None);
        assert_eq!(schedule.checkpoints(20000), vec![0, 10000]);
    }

    #[test]
    fn test_fixed_policy_ignores_start() {
        let policy = HighResolution::Fixed { steps: vec![3, 7] };
        let schedule = EvalSchedule::from_policy(&policy, 0, Some(100));
        assert_eq!(schedule.checkpoints(10), vec![3, 7]);
    }
}
