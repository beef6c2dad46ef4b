//! Speech pipeline error types.

/// Errors that can occur in the speech pipeline.
#[derive(Debug, thiserror::Error)]
pub enum SpeechError {
    /// Failed to open the audio output stream or device.
    #[error("Failed to open audio output stream: {0}")]
    OutputStreamError(String),

    /// Failed to initialise the synthesis engine.
    #[error("Failed to initialise synthesis engine '{name}': {source}")]
    EngineInit {
        /// Engine or model identifier.
        name: String,
        /// Underlying engine error.
        source: anyhow::Error,
    },

    /// The engine failed to synthesize a request.
    #[error("Speech synthesis failed: {0}")]
    SynthesisError(String),

    /// The engine returned malformed alignment data.
    #[error("Alignment data mismatch: {durations} durations for {chars} characters")]
    AlignmentMismatch {
        /// Number of per-character durations returned by the engine.
        durations: usize,
        /// Number of characters in the sanitized text.
        chars: usize,
    },

    /// The worker thread could not be spawned.
    #[error("Failed to spawn speech worker: {0}")]
    WorkerSpawnError(String),

    /// The dedicated audio thread has died.
    #[error("Audio thread is not responding")]
    AudioThreadDied,

    /// IO error (engine model files, device handles).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
