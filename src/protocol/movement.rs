/// Linear glide of a remote player towards the position of its latest
/// movement message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interpolation {
    pub from: (f64, f64),
    pub to: (f64, f64),
    /// Local receipt time of the movement message, in ms.
    pub started_at: u64,
    pub duration: u64,
}

impl Interpolation {
    pub fn new(from: (f64, f64), to: (f64, f64), started_at: u64, duration: u64) -> Self {
        Self {
            from,
            to,
            started_at,
            duration,
        }
    }

    /// Fraction of the glide covered at `now`, in `0.0..=1.0`.
    pub fn progress(&self, now: u64) -> f64 {
        if self.duration == 0 {
            return 1.0;
        }
        let elapsed = now.saturating_sub(self.started_at) as f64;
        (elapsed / self.duration as f64).min(1.0)
    }

    pub fn position(&self, now: u64) -> (f64, f64) {
        let t = self.progress(now);
        (
            self.from.0 + (self.to.0 - self.from.0) * t,
            self.from.1 + (self.to.1 - self.from.1) * t,
        )
    }

    pub fn is_finished(&self, now: u64) -> bool {
        self.progress(now) >= 1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glide_is_linear_and_saturates() {
        let glide = Interpolation::new((0.0, 0.0), (100.0, 0.0), 1_000, 50);
        assert_eq!(glide.position(1_000), (0.0, 0.0));
        let (x, _) = glide.position(1_025);
        assert!((x - 50.0).abs() < 1e-9);
        assert!(!glide.is_finished(1_049));
        assert_eq!(glide.position(1_050), (100.0, 0.0));
        assert_eq!(glide.position(9_999), (100.0, 0.0));
        assert!(glide.is_finished(1_050));
    }

    #[test]
    fn zero_duration_jumps() {
        let glide = Interpolation::new((0.0, 0.0), (4.0, 8.0), 10, 0);
        assert_eq!(glide.position(10), (4.0, 8.0));
    }
}
