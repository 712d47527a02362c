use serde::{Deserialize, Serialize};

pub const MIN_PWM: u16 = 1000;
pub const MAX_PWM: u16 = 2000;
pub const NEUTRAL_PWM: u16 = 1500;

/// A pulse width in microseconds, always inside [MIN_PWM, MAX_PWM].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "u16")]
pub struct Pwm(u16);

impl Pwm {
    pub const MIN: Pwm = Pwm(MIN_PWM);
    pub const MAX: Pwm = Pwm(MAX_PWM);
    pub const NEUTRAL: Pwm = Pwm(NEUTRAL_PWM);

    /// Out-of-range values are pulled to the nearest limit, never rejected.
    pub fn clamp(value: i64) -> Pwm {
        Pwm(value.clamp(MIN_PWM as i64, MAX_PWM as i64) as u16)
    }

    pub fn get(self) -> u16 {
        self.0
    }

    /// Shift by a signed amount, clamped.
    pub fn offset(self, delta: i64) -> Pwm {
        Pwm::clamp(self.0 as i64 + delta)
    }
}

impl Default for Pwm {
    fn default() -> Self {
        Pwm::NEUTRAL
    }
}

impl From<i64> for Pwm {
    fn from(v: i64) -> Self {
        Pwm::clamp(v)
    }
}

impl From<Pwm> for u16 {
    fn from(p: Pwm) -> Self {
        p.0
    }
}

impl std::fmt::Display for Pwm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

pub fn clamp(value: i64) -> Pwm {
    Pwm::clamp(value)
}

/// Symmetric pulse pair around neutral for a commanded rate.
///
/// `factor` converts deg/s into PWM units (see `calibration`). Each side is clamped
/// independently, so a large rate saturates at the actuator limits.
pub fn pwm_offsets(rate_deg_per_s: f64, factor: f64) -> (Pwm, Pwm) {
    let mut offset = rate_deg_per_s * factor;
    if offset.is_nan() {
        offset = 0.0;
    }
    // f64 -> i64 casts saturate, so infinities land on the limits
    let offset = offset.round() as i64;
    let n = NEUTRAL_PWM as i64;
    (Pwm::clamp(n.saturating_sub(offset)), Pwm::clamp(n.saturating_add(offset)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_inside_range_are_exact() {
        assert_eq!(pwm_offsets(20.0, 10.0), (Pwm::clamp(1300), Pwm::clamp(1700)));
    }

    #[test]
    fn offsets_saturate_at_limits() {
        let (low, high) = pwm_offsets(100.0, 10.0);
        assert_eq!(low, Pwm::MIN);
        assert_eq!(low.get(), 1000);
        assert_eq!(high, Pwm::MAX);
    }

    #[test]
    fn zero_factor_is_neutral() {
        for rate in [0.0, 1.0, 45.0, 360.0, 1e9] {
            assert_eq!(pwm_offsets(rate, 0.0), (Pwm::NEUTRAL, Pwm::NEUTRAL));
        }
    }

    #[test]
    fn offsets_bracket_neutral_for_non_negative_inputs() {
        let rates = [0.0, 0.4, 1.0, 7.5, 20.0, 90.0, 180.0, 720.0];
        let factors = [0.0, 0.5, 1.0, 2.777, 10.0, 50.0];
        for r in rates {
            for f in factors {
                let (low, high) = pwm_offsets(r, f);
                assert!(low <= Pwm::NEUTRAL && Pwm::NEUTRAL <= high, "rate={} factor={}", r, f);
                assert!(low >= Pwm::MIN && high <= Pwm::MAX);
                assert_eq!(Pwm::clamp(low.get() as i64), low);
                assert_eq!(Pwm::clamp(high.get() as i64), high);
            }
        }
    }

    #[test]
    fn nan_and_infinite_products_stay_in_range() {
        assert_eq!(pwm_offsets(f64::NAN, 10.0), (Pwm::NEUTRAL, Pwm::NEUTRAL));
        assert_eq!(pwm_offsets(f64::INFINITY, 1.0), (Pwm::MIN, Pwm::MAX));
    }

    #[test]
    fn clamp_limits() {
        assert_eq!(clamp(-5).get(), 1000);
        assert_eq!(clamp(1499).get(), 1499);
        assert_eq!(clamp(99_999).get(), 2000);
        assert_eq!(Pwm::NEUTRAL.offset(-700).get(), 1000);
    }
}
