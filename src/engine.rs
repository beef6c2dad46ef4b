//! Synthesis engine seam — the contract the speech pipeline consumes.
//!
//! This module defines the [`SynthesisEngine`] trait that abstracts over the
//! concrete Supertonic inference stack. The pipeline operates on a trait
//! object (`Arc<dyn SynthesisEngine>`) so that engines can be swapped (and
//! mocked in tests) without touching the queueing or alignment logic.
//!
//! The contract is deliberately synchronous: Supertonic inference is an
//! opaque blocking call that cannot be preempted mid-flight. The pipeline
//! accounts for that by running it on a dedicated worker thread and
//! checkpointing cancellation before and after the call.

use crate::error::SpeechError;

// ── Shared types ───────────────────────────────────────────────────

/// Audio plus alignment data produced by one synthesis call.
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    /// Mono PCM f32 samples in `[-1.0, 1.0]`.
    pub samples: Vec<f32>,

    /// Seconds of speech attributed to each input character, in input
    /// order. Invariant: one entry per character of the synthesized text.
    pub durations: Vec<f32>,
}

impl SynthesizedAudio {
    /// Empty audio (used for empty input text).
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            samples: Vec::new(),
            durations: Vec::new(),
        }
    }

    /// Total speech duration in seconds, from the alignment data.
    #[must_use]
    pub fn duration_secs(&self) -> f32 {
        self.durations.iter().sum()
    }
}

/// Information about an available voice style.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceStyle {
    /// Style identifier (e.g., `"M1"`), as declared by the engine's
    /// voice-style bank.
    pub id: String,

    /// Human-readable display name.
    pub name: String,
}

/// Per-call synthesis options.
///
/// `voice` and `speed` come from [`SpeechSettings`](crate::settings::SpeechSettings)
/// at enqueue time; the chunking hint and silence gap are driver constants
/// carried through to the engine.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SynthesisOptions {
    /// Voice style identifier (e.g., `"M1"`).
    pub voice: String,

    /// Synthesis speed multiplier (0.7–2.0).
    pub speed: f32,

    /// Diffusion step count — higher is slower but cleaner.
    pub quality_steps: u32,

    /// Soft cap on characters per internal engine chunk. Kept high so a
    /// typical utterance stays in one chunk and alignment data is
    /// contiguous.
    pub max_chunk_chars: usize,

    /// Silence inserted between engine chunks, in seconds.
    pub silence_gap_secs: f32,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            voice: String::new(),
            speed: 1.0,
            quality_steps: 5,
            max_chunk_chars: 100,
            silence_gap_secs: 0.1,
        }
    }
}

// ── Engine trait ───────────────────────────────────────────────────

/// The external text-to-speech engine consumed by the pipeline.
///
/// Implementations must be `Send + Sync`; the pipeline shares the engine
/// between the control path (voice enumeration, text validation) and the
/// worker thread (synthesis).
///
/// `synthesize` blocks for the full inference duration and is not
/// cancellable mid-call. It is only ever invoked from the pipeline's
/// worker thread.
pub trait SynthesisEngine: Send + Sync {
    /// Synthesize text to audio with per-character alignment data.
    ///
    /// An empty `text` must produce [`SynthesizedAudio::empty`] rather
    /// than an error.
    fn synthesize(
        &self,
        text: &str,
        options: &SynthesisOptions,
    ) -> Result<SynthesizedAudio, SpeechError>;

    /// Whether the engine's text frontend accepts this character.
    ///
    /// Characters rejected here are stripped by the sanitizer before
    /// synthesis; marker offsets are remapped accordingly.
    fn is_valid_char(&self, c: char) -> bool;

    /// Output sample rate in Hz.
    fn sample_rate(&self) -> u32;

    /// Enumerate the available voice styles.
    fn voices(&self) -> Vec<VoiceStyle>;
}
