use std::time::Duration;

const DEFAULT_MAX_PARALLEL_SECTIONS: usize = 4;
const DEFAULT_SECTION_TIMEOUT: Duration = Duration::from_secs(300);

/// Per-composition knobs supplied by the caller.
#[derive(Clone, Debug, PartialEq)]
pub struct CompositionOptions {
    /// Hard cap on sections generating at once.
    pub max_parallel_sections: usize,
    /// Pause between successive task creations. Capped by the orchestrator.
    pub delay_between_task_starts: Duration,
    pub per_section_timeout: Duration,
}

impl Default for CompositionOptions {
    fn default() -> Self {
        Self {
            max_parallel_sections: DEFAULT_MAX_PARALLEL_SECTIONS,
            delay_between_task_starts: Duration::ZERO,
            per_section_timeout: DEFAULT_SECTION_TIMEOUT,
        }
    }
}

/// Aggregate progress: `base + range * (completed + w * in_progress) / total`.
///
/// In-progress sections earn partial credit `w` so the bar keeps moving while
/// long sections are still generating.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProgressModel {
    pub base: f64,
    pub range: f64,
    pub in_progress_weight: f64,
}

impl Default for ProgressModel {
    fn default() -> Self {
        Self {
            base: 10.0,
            range: 85.0,
            in_progress_weight: 0.5,
        }
    }
}

impl ProgressModel {
    pub fn compute(&self, completed: usize, in_progress: usize, total: usize) -> f64 {
        if total == 0 {
            return self.base;
        }
        let done = completed as f64 + self.in_progress_weight * in_progress as f64;
        let fraction = (done / total as f64).clamp(0.0, 1.0);
        self.base + self.range * fraction
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let opts = CompositionOptions::default();
        assert_eq!(opts.max_parallel_sections, 4);
        assert_eq!(opts.per_section_timeout, Duration::from_secs(300));
        assert_eq!(opts.delay_between_task_starts, Duration::ZERO);
    }

    #[test]
    fn progress_starts_at_base_and_ends_at_base_plus_range() {
        let model = ProgressModel::default();
        assert!((model.compute(0, 0, 5) - 10.0).abs() < f64::EPSILON);
        assert!((model.compute(5, 0, 5) - 95.0).abs() < f64::EPSILON);
    }

    #[test]
    fn in_progress_sections_count_half() {
        let model = ProgressModel {
            base: 0.0,
            range: 100.0,
            in_progress_weight: 0.5,
        };
        // 1 done + 2 half-done out of 4 → 50%
        assert!((model.compute(1, 2, 4) - 50.0).abs() < 1e-9);
    }

    #[test]
    fn progress_is_clamped() {
        let model = ProgressModel::default();
        assert!((model.compute(10, 10, 2) - 95.0).abs() < f64::EPSILON);
        assert!((model.compute(0, 0, 0) - 10.0).abs() < f64::EPSILON);
    }
}
