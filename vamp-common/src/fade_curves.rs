//! Fade curve implementations for seam crossfades and patch envelopes
//!
//! Provides five fade curve types. The loop seam uses a complementary pair
//! (fade-out on the slice tail, fade-in on the audio leading into the head),
//! so the choice of curve decides what stays constant across the overlap:
//! - Linear / SCurve: gains sum to exactly 1.0 (constant amplitude for
//!   correlated material, which a loop seam almost always is)
//! - EqualPower: squared gains sum to 1.0 (constant power for uncorrelated
//!   material)
//!
//! Every curve is exactly 0.0 or 1.0 at the window edges, so the faded
//! region joins the unfaded audio without a gain step.

use serde::{Deserialize, Serialize};
use std::f32::consts::{FRAC_PI_2, PI};
use std::str::FromStr;

/// Fade curve types
///
/// - Linear: Constant rate of change (precise, predictable)
/// - Exponential: Slow start, fast finish (natural-sounding fade-in)
/// - Logarithmic: Fast start, slow finish (natural-sounding fade-out)
/// - SCurve: Smooth acceleration and deceleration (gentle, musical)
/// - EqualPower: Constant perceived loudness during crossfade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FadeCurve {
    /// Linear: v(t) = t
    Linear,

    /// Exponential: v(t) = t²
    Exponential,

    /// Logarithmic: v(t) = (1-t)² (for fade-out)
    Logarithmic,

    /// S-Curve: v(t) = 0.5 × (1 - cos(π × t))
    SCurve,

    /// Equal-Power: v(t) = sin(t × π/2)
    EqualPower,
}

impl FadeCurve {
    /// Calculate fade-in multiplier at given position
    ///
    /// # Arguments
    /// * `position` - Normalized position through fade (0.0 to 1.0)
    ///
    /// # Returns
    /// Volume multiplier to apply to sample (0.0 = silence, 1.0 = full volume)
    pub fn calculate_fade_in(&self, position: f32) -> f32 {
        let t = position.clamp(0.0, 1.0);

        match self {
            FadeCurve::Linear => t,
            FadeCurve::Exponential => t * t,
            // Logarithmic is a fade-out shape; as a fade-in use the inverse
            FadeCurve::Logarithmic => t.sqrt(),
            FadeCurve::SCurve => 0.5 * (1.0 - (PI * t).cos()),
            FadeCurve::EqualPower => {
                if t >= 1.0 {
                    1.0
                } else {
                    (t * FRAC_PI_2).sin()
                }
            }
        }
    }

    /// Calculate fade-out multiplier at given position
    ///
    /// # Arguments
    /// * `position` - Normalized position through fade (0.0 to 1.0)
    ///
    /// # Returns
    /// Volume multiplier to apply to sample (1.0 = full volume, 0.0 = silence)
    pub fn calculate_fade_out(&self, position: f32) -> f32 {
        let t = position.clamp(0.0, 1.0);

        match self {
            FadeCurve::Linear => 1.0 - t,
            FadeCurve::Exponential | FadeCurve::Logarithmic => {
                let inv = 1.0 - t;
                inv * inv
            }
            FadeCurve::SCurve => 0.5 * (1.0 + (PI * t).cos()),
            FadeCurve::EqualPower => {
                if t >= 1.0 {
                    0.0
                } else {
                    (t * FRAC_PI_2).cos()
                }
            }
        }
    }

    /// Gains for one sample of a crossfade window: `(fade_out, fade_in)`
    ///
    /// `index` runs `0..len`. Positions are `(index + 1) / len`, so the last
    /// sample of the window is fully on the incoming side; the sample just
    /// before the window is implicitly `(1.0, 0.0)`.
    pub fn window_gains(&self, index: usize, len: usize) -> (f32, f32) {
        if len == 0 {
            return (0.0, 1.0);
        }
        let t = (index + 1) as f32 / len as f32;
        (self.calculate_fade_out(t), self.calculate_fade_in(t))
    }

    /// Whether fade-in and fade-out gains of this curve sum to 1.0
    pub fn is_amplitude_complementary(&self) -> bool {
        matches!(self, FadeCurve::Linear | FadeCurve::SCurve)
    }

    /// Whether a crossfade with this curve keeps loudness constant
    ///
    /// Exponential and Logarithmic pairs sum below 1.0 in both amplitude
    /// and power mid-window; they suit one-sided fades only.
    pub fn is_crossfade_safe(&self) -> bool {
        matches!(
            self,
            FadeCurve::Linear | FadeCurve::SCurve | FadeCurve::EqualPower
        )
    }

    /// Configuration string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            FadeCurve::Linear => "linear",
            FadeCurve::Exponential => "exponential",
            FadeCurve::Logarithmic => "logarithmic",
            FadeCurve::SCurve => "s_curve",
            FadeCurve::EqualPower => "equal_power",
        }
    }
}

impl FromStr for FadeCurve {
    type Err = String;

    /// Accepts the configuration names plus the usual aliases
    /// (`cosine`, `s-curve`, `equalpower`)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "linear" => Ok(FadeCurve::Linear),
            "exponential" => Ok(FadeCurve::Exponential),
            "logarithmic" => Ok(FadeCurve::Logarithmic),
            "cosine" | "scurve" | "s-curve" | "s_curve" => Ok(FadeCurve::SCurve),
            "equal_power" | "equalpower" => Ok(FadeCurve::EqualPower),
            other => Err(format!("unknown fade curve '{}'", other)),
        }
    }
}

impl Default for FadeCurve {
    /// Linear: the seam crossfade blends two views of the same recording,
    /// which are correlated, so constant amplitude is the right invariant
    fn default() -> Self {
        FadeCurve::Linear
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [FadeCurve; 5] = [
        FadeCurve::Linear,
        FadeCurve::Exponential,
        FadeCurve::Logarithmic,
        FadeCurve::SCurve,
        FadeCurve::EqualPower,
    ];

    #[test]
    fn test_linear_fade_in_out() {
        let curve = FadeCurve::Linear;

        assert_eq!(curve.calculate_fade_in(0.0), 0.0);
        assert!((curve.calculate_fade_in(0.25) - 0.25).abs() < 0.001);
        assert_eq!(curve.calculate_fade_in(1.0), 1.0);

        assert_eq!(curve.calculate_fade_out(0.0), 1.0);
        assert!((curve.calculate_fade_out(0.75) - 0.25).abs() < 0.001);
        assert_eq!(curve.calculate_fade_out(1.0), 0.0);
    }

    #[test]
    fn test_all_curves_hit_exact_edges() {
        for curve in ALL {
            assert_eq!(curve.calculate_fade_in(0.0), 0.0, "{:?} fade-in start", curve);
            assert_eq!(curve.calculate_fade_in(1.0), 1.0, "{:?} fade-in end", curve);
            assert_eq!(curve.calculate_fade_out(0.0), 1.0, "{:?} fade-out start", curve);
            assert_eq!(curve.calculate_fade_out(1.0), 0.0, "{:?} fade-out end", curve);
        }
    }

    #[test]
    fn test_complementary_curves_sum_to_one() {
        for curve in [FadeCurve::Linear, FadeCurve::SCurve] {
            assert!(curve.is_amplitude_complementary());
            for i in 0..=100 {
                let t = i as f32 / 100.0;
                let sum = curve.calculate_fade_in(t) + curve.calculate_fade_out(t);
                assert!((sum - 1.0).abs() < 1e-5, "{:?} at {}: {}", curve, t, sum);
            }
        }
    }

    #[test]
    fn test_equal_power_constant_power() {
        let curve = FadeCurve::EqualPower;
        assert!(!curve.is_amplitude_complementary());

        for i in 0..=10 {
            let t = i as f32 / 10.0;
            let fade_in = curve.calculate_fade_in(t);
            let fade_out = curve.calculate_fade_out(t);
            assert!((fade_in * fade_in + fade_out * fade_out - 1.0).abs() < 0.001);
        }
    }

    #[test]
    fn test_window_gains_end_fully_incoming() {
        let curve = FadeCurve::Linear;
        let len = 4;

        assert_eq!(curve.window_gains(0, len), (0.75, 0.25));
        assert_eq!(curve.window_gains(len - 1, len), (0.0, 1.0));
        assert_eq!(curve.window_gains(0, 0), (0.0, 1.0));
    }

    #[test]
    fn test_clamping() {
        let curve = FadeCurve::Linear;

        assert_eq!(curve.calculate_fade_in(-0.5), 0.0);
        assert_eq!(curve.calculate_fade_in(1.5), 1.0);
        assert_eq!(curve.calculate_fade_out(-0.5), 1.0);
        assert_eq!(curve.calculate_fade_out(1.5), 0.0);
    }

    #[test]
    fn test_dipping_curves_are_not_crossfade_safe() {
        for curve in ALL {
            let (out, inc) = (curve.calculate_fade_out(0.5), curve.calculate_fade_in(0.5));
            let holds = (out + inc - 1.0).abs() < 1e-5 || (out * out + inc * inc - 1.0).abs() < 1e-5;
            assert_eq!(curve.is_crossfade_safe(), holds, "{:?}", curve);
        }
    }

    #[test]
    fn test_parse_and_as_str() {
        for curve in ALL {
            assert_eq!(curve.as_str().parse::<FadeCurve>(), Ok(curve));
        }
        assert_eq!("cosine".parse::<FadeCurve>(), Ok(FadeCurve::SCurve));
        assert!("wobble".parse::<FadeCurve>().is_err());
    }

    #[test]
    fn test_serde_names_match_config_strings() {
        let json = serde_json::to_string(&FadeCurve::EqualPower).unwrap();
        assert_eq!(json, "\"equal_power\"");
        let parsed: FadeCurve = serde_json::from_str("\"s_curve\"").unwrap();
        assert_eq!(parsed, FadeCurve::SCurve);
    }

    #[test]
    fn test_default() {
        assert_eq!(FadeCurve::default(), FadeCurve::Linear);
    }
}
