//! `PlaybackSink` — the audio output seam consumed by the playback bridge.
//!
//! The trait decouples the pipeline from any specific output backend so
//! that different sinks can be injected at runtime (local rodio playback,
//! a recording sink in tests). It is **object-safe** (`Arc<dyn
//! PlaybackSink>`); all methods take `&self` and interior mutability
//! (channels, atomics) handles state changes inside each implementation.

use crate::error::SpeechError;

/// One-shot callback fired when a fed chunk has finished *playing* (not
/// merely been queued). Must be `Send + 'static` because sinks dispatch it
/// from a background playback thread.
pub type FeedDoneCallback = Box<dyn FnOnce() + Send + 'static>;

/// Abstraction over the audio output device.
///
/// Feeding never blocks; only [`drain`](PlaybackSink::drain) does. The
/// control path calls [`stop`](PlaybackSink::stop) /
/// [`pause`](PlaybackSink::pause) / [`close`](PlaybackSink::close)
/// concurrently with the worker feeding, so implementations must tolerate
/// any interleaving of the two.
pub trait PlaybackSink: Send + Sync {
    /// Queue a chunk of 16-bit signed little-endian mono PCM for playback.
    ///
    /// If `on_played` is given it fires when this chunk's last sample has
    /// been played. Chunks stopped before they play may never fire their
    /// callback.
    fn feed(&self, pcm: Vec<u8>, on_played: Option<FeedDoneCallback>) -> Result<(), SpeechError>;

    /// Block until all fed audio has played (or playback was stopped).
    fn drain(&self) -> Result<(), SpeechError>;

    /// Discard all queued audio and silence the device immediately.
    fn stop(&self);

    /// Pause or resume playback without discarding queued audio.
    fn pause(&self, paused: bool);

    /// Release the output device. The sink accepts no audio afterwards.
    fn close(&self);
}
