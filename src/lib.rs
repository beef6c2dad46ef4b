//! Asynchronous speech pipeline for the Supertonic TTS engine.
//!
//! Turns a host's text-plus-marker request into a stream of PCM chunks
//! delivered to a playback sink, keeping text-position "index" markers
//! correctly interleaved with the audio and allowing any queued or
//! in-flight utterance to be cancelled instantly.
//!
//! The heavy lifting lives in three places:
//!
//! - [`pipeline`] — the single-worker job queue with generation-token
//!   cancellation and the playback bridge;
//! - [`text`] — sanitization that keeps marker offsets valid after
//!   engine-rejected characters are stripped;
//! - [`align`] — per-character durations → byte offsets → grouped
//!   delivery units.
//!
//! The synthesis engine and the audio device are collaborators behind the
//! [`engine::SynthesisEngine`] and [`sink::PlaybackSink`] traits;
//! [`sink_local`] provides the rodio-backed local sink.

#![deny(unused_crate_dependencies)]

pub mod align;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod settings;
pub mod sink;
pub mod sink_local;
pub mod text;

// Re-export key types for convenience
pub use align::{BYTES_PER_SAMPLE, DeliveryUnit, MarkerId};
pub use engine::{SynthesisEngine, SynthesisOptions, SynthesizedAudio, VoiceStyle};
pub use error::SpeechError;
pub use pipeline::{SpeechEvent, SpeechItem, SpeechPipeline};
pub use settings::SpeechSettings;
pub use sink::{FeedDoneCallback, PlaybackSink};
pub use sink_local::LocalPlaybackSink;

// Silence unused dev-dependency warnings; the async test helpers are only
// pulled in by the integration suite.
#[cfg(test)]
use tokio_test as _;
