use rand::Rng;

use crate::composition::Role;

/// Bounded onset jitter. Non-deterministic per call: only the bound is a contract.
#[derive(Debug, Clone, Copy)]
pub struct Humanizer {
    window: f64,
}

impl Humanizer {
    /// `window` is the half-width in seconds
    pub fn new(window: f64) -> Self {
        Self {
            window: if window.is_finite() { window.max(0.0) } else { 0.0 },
        }
    }

    pub fn window(&self) -> f64 {
        self.window
    }

    pub fn humanize(&self, time: f64, role: Role) -> f64 {
        if !role.is_humanized() || self.window == 0.0 {
            return time.max(0.0);
        }
        let offset = rand::thread_rng().gen_range(-self.window..=self.window);
        (time + offset).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stays_within_the_window() {
        let humanizer = Humanizer::new(0.0075);
        for _ in 0..1000 {
            for role in [Role::Chord, Role::Melody] {
                let t = humanizer.humanize(2.0, role);
                assert!((t - 2.0).abs() <= 0.0075 + 1e-12);
            }
        }
    }

    #[test]
    fn bass_is_untouched() {
        let humanizer = Humanizer::new(0.0075);
        for _ in 0..100 {
            assert_eq!(humanizer.humanize(1.25, Role::Bass), 1.25);
        }
    }

    #[test]
    fn never_negative() {
        let humanizer = Humanizer::new(0.0075);
        for _ in 0..1000 {
            assert!(humanizer.humanize(0.0, Role::Melody) >= 0.0);
        }
    }

    #[test]
    fn zero_window_is_exact() {
        let humanizer = Humanizer::new(0.0);
        assert_eq!(humanizer.humanize(0.5, Role::Chord), 0.5);
        assert_eq!(Humanizer::new(-1.0).window(), 0.0);
    }
}
