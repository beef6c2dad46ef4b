//! Host-facing speech settings and the rate→speed mapping.

/// Default host rate. Maps to a synthesis speed of about 1.05, the
/// engine's sweet spot: `0.7 + (27 / 100) * 1.3 = 1.051`.
pub const DEFAULT_RATE: u8 = 27;

/// Default diffusion step count.
pub const DEFAULT_QUALITY: u32 = 5;

/// Speech settings exposed to the host.
///
/// `rate` and `quality` use the host's numeric scales; the engine-facing
/// speed is derived via [`SpeechSettings::speed`] at enqueue time, so a
/// settings change affects the next utterance, never one mid-flight.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SpeechSettings {
    /// Voice style identifier (e.g., `"M1"`).
    pub voice: String,

    /// Host rate on a 0–100 scale.
    pub rate: u8,

    /// Quality as a diffusion step count.
    pub quality: u32,
}

impl SpeechSettings {
    /// Synthesis speed for the current rate.
    ///
    /// Linear map from host rate `0..=100` onto the engine's supported
    /// speed range `0.7..=2.0`.
    #[must_use]
    pub fn speed(&self) -> f32 {
        let rate = f32::from(self.rate.min(100));
        (rate / 100.0).mul_add(2.0 - 0.7, 0.7)
    }
}

impl Default for SpeechSettings {
    fn default() -> Self {
        Self {
            voice: String::new(),
            rate: DEFAULT_RATE,
            quality: DEFAULT_QUALITY,
        }
    }
}
