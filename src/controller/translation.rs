//! # Translation Module
//!
//! Maps an analog stick position to emulated directional buttons.
//!
//! ## Deflection
//!
//! Deflection is the signed distance of an axis sample from the rest value:
//! `deflection = sample - center`. An axis contributes a direction once its
//! deflection crosses the threshold, `threshold = margin + margin_offset`.
//!
//! ## Policies
//!
//! | Policy | Positive side | Negative side | Default threshold |
//! |--------|---------------|---------------|-------------------|
//! | [`AsymmetricDeflection`] | `d > t` | `d <= -t` | 37 + 23 = 60 |
//! | [`SymmetricDeflection`] | `d > t` | `d < -t` | 64 |
//!
//! The asymmetric test keeps a stick resting on a biased center from
//! chattering on the boundary.
//!
//! Within one axis the two tests are complementary, so UP/DOWN (and
//! LEFT/RIGHT) are never reported together. Across axes they are
//! independent, so diagonals report two bits.
//!
//! ## Usage
//!
//! ```
//! use pad_emulator::controller::sample::Buttons;
//! use pad_emulator::controller::translation::{AsymmetricDeflection, TranslationPolicy};
//!
//! let policy = AsymmetricDeflection::default();
//!
//! assert_eq!(policy.directions(250, 128), Buttons::RIGHT);
//! assert_eq!(policy.directions(128, 60), Buttons::UP);
//! assert_eq!(policy.directions(128, 128), Buttons::empty());
//! ```

use std::sync::Arc;

use serde::Deserialize;

use super::sample::{Buttons, ANALOG_CENTER};

/// Default threshold margin.
pub const DEFAULT_MARGIN: u8 = 37;

/// Default value added to the margin to form the threshold.
pub const DEFAULT_MARGIN_OFFSET: u8 = 23;

/// Threshold of the timer-driven translation.
pub const SYMMETRIC_THRESHOLD: u8 = 64;

/// Center and threshold constants for one stick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    /// Axis rest value.
    pub center: u8,
    /// Base margin around the center.
    pub margin: u8,
    /// Fixed amount added to `margin`.
    pub margin_offset: u8,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            center: ANALOG_CENTER,
            margin: DEFAULT_MARGIN,
            margin_offset: DEFAULT_MARGIN_OFFSET,
        }
    }
}

impl Thresholds {
    /// Creates thresholds from explicit constants.
    #[must_use]
    pub fn new(center: u8, margin: u8, margin_offset: u8) -> Self {
        Self {
            center,
            margin,
            margin_offset,
        }
    }

    /// Effective deflection threshold.
    ///
    /// # Examples
    ///
    /// ```
    /// use pad_emulator::controller::translation::Thresholds;
    ///
    /// assert_eq!(Thresholds::default().threshold(), 60);
    /// ```
    #[must_use]
    pub fn threshold(&self) -> i32 {
        i32::from(self.margin) + i32::from(self.margin_offset)
    }

    /// Signed deflection of `sample` from the center.
    #[must_use]
    pub fn deflection(&self, sample: u8) -> i32 {
        i32::from(sample) - i32::from(self.center)
    }
}

/// Stateless mapping from stick position to emulated output.
///
/// Implementations run inside the host polling loop, so they must not block
/// or allocate.
pub trait TranslationPolicy: Send + Sync + std::fmt::Debug {
    /// Directional buttons for a stick at `(x, y)`.
    fn directions(&self, x: u8, y: u8) -> Buttons;

    /// Secondary stick output for a primary stick at `(x, y)`.
    ///
    /// The default mirrors the primary stick through the center.
    fn secondary_stick(&self, x: u8, y: u8) -> (u8, u8) {
        (u8::MAX - x, u8::MAX - y)
    }
}

/// Deflection test with an inclusive negative bound.
///
/// RIGHT iff `x - c > t`, LEFT iff `x - c <= -t`; DOWN and UP likewise on Y.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AsymmetricDeflection {
    thresholds: Thresholds,
}

impl AsymmetricDeflection {
    /// Creates the policy with the given thresholds.
    #[must_use]
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    /// Returns the configured thresholds.
    #[must_use]
    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    fn axis(&self, sample: u8, positive: Buttons, negative: Buttons) -> Buttons {
        let deflection = self.thresholds.deflection(sample);
        let threshold = self.thresholds.threshold();

        if deflection > threshold {
            positive
        } else if deflection <= -threshold {
            negative
        } else {
            Buttons::empty()
        }
    }
}

impl TranslationPolicy for AsymmetricDeflection {
    fn directions(&self, x: u8, y: u8) -> Buttons {
        self.axis(x, Buttons::RIGHT, Buttons::LEFT) | self.axis(y, Buttons::DOWN, Buttons::UP)
    }
}

/// Deflection test that is strict on both sides.
///
/// RIGHT iff `x > c + t`, LEFT iff `x < c - t`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymmetricDeflection {
    thresholds: Thresholds,
}

impl Default for SymmetricDeflection {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::new(ANALOG_CENTER, SYMMETRIC_THRESHOLD, 0),
        }
    }
}

impl SymmetricDeflection {
    /// Creates the policy with the given thresholds.
    #[must_use]
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    fn axis(&self, sample: u8, positive: Buttons, negative: Buttons) -> Buttons {
        let deflection = self.thresholds.deflection(sample);
        let threshold = self.thresholds.threshold();

        if deflection > threshold {
            positive
        } else if deflection < -threshold {
            negative
        } else {
            Buttons::empty()
        }
    }
}

impl TranslationPolicy for SymmetricDeflection {
    fn directions(&self, x: u8, y: u8) -> Buttons {
        self.axis(x, Buttons::RIGHT, Buttons::LEFT) | self.axis(y, Buttons::DOWN, Buttons::UP)
    }
}

/// Policy selector used by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    /// [`AsymmetricDeflection`].
    #[default]
    Asymmetric,
    /// [`SymmetricDeflection`].
    Symmetric,
}

impl PolicyKind {
    /// `(margin, margin_offset)` used when configuration leaves them unset.
    #[must_use]
    pub fn default_margins(self) -> (u8, u8) {
        match self {
            PolicyKind::Asymmetric => (DEFAULT_MARGIN, DEFAULT_MARGIN_OFFSET),
            PolicyKind::Symmetric => (SYMMETRIC_THRESHOLD, 0),
        }
    }
}

/// Builds the policy selected by `kind`.
///
/// # Examples
///
/// ```
/// use pad_emulator::controller::sample::Buttons;
/// use pad_emulator::controller::translation::{build_policy, PolicyKind, Thresholds};
///
/// let policy = build_policy(PolicyKind::Symmetric, Thresholds::new(128, 64, 0));
/// assert_eq!(policy.directions(64, 128), Buttons::empty());
/// assert_eq!(policy.directions(63, 128), Buttons::LEFT);
/// ```
#[must_use]
pub fn build_policy(kind: PolicyKind, thresholds: Thresholds) -> Arc<dyn TranslationPolicy> {
    match kind {
        PolicyKind::Asymmetric => Arc::new(AsymmetricDeflection::new(thresholds)),
        PolicyKind::Symmetric => Arc::new(SymmetricDeflection::new(thresholds)),
    }
}
