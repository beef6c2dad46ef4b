//! Local playback sink — rodio output confined to a dedicated OS thread.
//!
//! `rodio::OutputStream` is `!Send` on some platforms, so rather than
//! `unsafe impl Send` the stream is owned by a single named audio thread
//! and every operation is routed through an [`mpsc`] command channel. The
//! public [`LocalPlaybackSink`] is the `Send + Sync` proxy the pipeline
//! holds.
//!
//! Chunk-completion callbacks are realised with [`EmptyCallback`] sources
//! appended directly after each PCM chunk: rodio invokes them when the
//! playback position reaches them, which is exactly the "fires on playback
//! completion, not on feed submission" contract the bridge needs. A
//! stopped sink discards its queue, so callbacks behind the stop point are
//! dropped with the audio.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use rodio::buffer::SamplesBuffer;
use rodio::source::EmptyCallback;
use rodio::{OutputStream, OutputStreamHandle, Sink};

use crate::error::SpeechError;
use crate::sink::{FeedDoneCallback, PlaybackSink};

// ── Commands ───────────────────────────────────────────────────────

/// A command sent from the pipeline to the audio thread.
enum SinkCommand {
    /// Queue a PCM chunk, with an optional played-through callback.
    Feed {
        pcm: Vec<u8>,
        on_played: Option<FeedDoneCallback>,
    },

    /// Reply once all queued audio has played (or playback was stopped).
    Drain { reply: mpsc::Sender<()> },

    /// Discard queued audio and silence the device (fire-and-forget).
    Stop,

    /// Pause or resume playback.
    Pause(bool),

    /// Shut down the audio thread, releasing the output device.
    Close,
}

// ── Proxy handle ───────────────────────────────────────────────────

/// `Send + Sync` handle to the dedicated audio output thread.
///
/// All methods take `&self`; the underlying `mpsc::Sender` supports shared
/// access, so the worker can feed while the control path stops or pauses.
pub struct LocalPlaybackSink {
    cmd_tx: mpsc::Sender<SinkCommand>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl LocalPlaybackSink {
    /// Spawn the audio thread and open the default output device at the
    /// given sample rate (16-bit mono).
    ///
    /// Device errors are propagated back through a one-shot init channel,
    /// so a missing output device fails construction instead of surfacing
    /// later mid-utterance.
    pub fn new(sample_rate: u32) -> Result<Self, SpeechError> {
        let (cmd_tx, cmd_rx) = mpsc::channel::<SinkCommand>();
        let (init_tx, init_rx) = mpsc::channel::<Result<(), SpeechError>>();

        let thread = thread::Builder::new()
            .name("supertonic-audio".into())
            .spawn(move || {
                run(sample_rate, &cmd_rx, &init_tx);
            })
            .map_err(|e| {
                SpeechError::OutputStreamError(format!("failed to spawn audio thread: {e}"))
            })?;

        // Wait for the audio thread to finish opening the device.
        init_rx.recv().map_err(|_| SpeechError::AudioThreadDied)??;

        Ok(Self {
            cmd_tx,
            thread: Mutex::new(Some(thread)),
        })
    }
}

impl PlaybackSink for LocalPlaybackSink {
    fn feed(&self, pcm: Vec<u8>, on_played: Option<FeedDoneCallback>) -> Result<(), SpeechError> {
        self.cmd_tx
            .send(SinkCommand::Feed { pcm, on_played })
            .map_err(|_| SpeechError::AudioThreadDied)
    }

    fn drain(&self) -> Result<(), SpeechError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.cmd_tx
            .send(SinkCommand::Drain { reply: reply_tx })
            .map_err(|_| SpeechError::AudioThreadDied)?;
        reply_rx.recv().map_err(|_| SpeechError::AudioThreadDied)
    }

    fn stop(&self) {
        let _ = self.cmd_tx.send(SinkCommand::Stop);
    }

    fn pause(&self, paused: bool) {
        let _ = self.cmd_tx.send(SinkCommand::Pause(paused));
    }

    fn close(&self) {
        let _ = self.cmd_tx.send(SinkCommand::Close);
    }
}

impl Drop for LocalPlaybackSink {
    fn drop(&mut self) {
        // Best-effort shutdown; the thread may already have closed.
        let _ = self.cmd_tx.send(SinkCommand::Close);
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

// ── Audio thread event loop ────────────────────────────────────────

/// Actor state owned by the audio thread.
struct SinkState {
    stream_handle: OutputStreamHandle,
    sample_rate: u32,
    /// Current playback sink. Recreated lazily after a stop, matching the
    /// queue-per-utterance lifecycle.
    sink: Option<Arc<Sink>>,
    paused: bool,
}

impl SinkState {
    /// Get the current sink, creating a fresh one if none is active.
    fn active_sink(&mut self) -> Result<&Arc<Sink>, SpeechError> {
        if self.sink.is_none() {
            let sink = Sink::try_new(&self.stream_handle)
                .map_err(|e| SpeechError::OutputStreamError(e.to_string()))?;
            if self.paused {
                sink.pause();
            }
            self.sink = Some(Arc::new(sink));
        }
        Ok(self.sink.as_ref().expect("sink just created"))
    }

    fn feed(&mut self, pcm: &[u8], on_played: Option<FeedDoneCallback>) {
        let samples: Vec<i16> = pcm
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();

        if samples.is_empty() {
            // Nothing to play ahead of the callback.
            if let Some(cb) = on_played {
                cb();
            }
            return;
        }

        let sample_rate = self.sample_rate;
        let sink = match self.active_sink() {
            Ok(sink) => sink,
            Err(e) => {
                tracing::error!(error = %e, "Dropping audio chunk: no playback sink");
                return;
            }
        };

        sink.append(SamplesBuffer::new(1, sample_rate, samples));

        if let Some(cb) = on_played {
            // EmptyCallback wants `Fn`; adapt the one-shot callback.
            let cell = Mutex::new(Some(cb));
            sink.append(EmptyCallback::<i16>::new(Box::new(move || {
                if let Some(cb) = cell
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .take()
                {
                    cb();
                }
            })));
        }
    }

    fn drain(&self, reply: mpsc::Sender<()>) {
        match &self.sink {
            Some(sink) if !sink.empty() => {
                // Block on a watcher thread, not the actor: the command
                // loop must stay responsive so Stop can interrupt the
                // drain. `sleep_until_end` returns early when the sink is
                // stopped.
                let sink = Arc::clone(sink);
                thread::spawn(move || {
                    sink.sleep_until_end();
                    let _ = reply.send(());
                });
            }
            _ => {
                let _ = reply.send(());
            }
        }
    }

    fn stop(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.stop();
        }
        tracing::debug!("Playback stopped");
    }

    fn pause(&mut self, paused: bool) {
        self.paused = paused;
        if let Some(sink) = &self.sink {
            if paused {
                sink.pause();
            } else {
                sink.play();
            }
        }
    }
}

/// Body of the dedicated audio thread. Owns the `OutputStream` for its
/// entire lifetime; it never crosses a thread boundary.
fn run(
    sample_rate: u32,
    cmd_rx: &mpsc::Receiver<SinkCommand>,
    init_tx: &mpsc::Sender<Result<(), SpeechError>>,
) {
    let (stream, stream_handle) = match OutputStream::try_default() {
        Ok(pair) => pair,
        Err(e) => {
            let _ = init_tx.send(Err(SpeechError::OutputStreamError(e.to_string())));
            return;
        }
    };
    // Keep the stream alive for the lifetime of the loop.
    let _stream = stream;

    if init_tx.send(Ok(())).is_err() {
        // Caller dropped before init completed.
        return;
    }

    tracing::info!(sample_rate, "Audio output opened on default device");

    let mut state = SinkState {
        stream_handle,
        sample_rate,
        sink: None,
        paused: false,
    };

    while let Ok(cmd) = cmd_rx.recv() {
        match cmd {
            SinkCommand::Feed { pcm, on_played } => state.feed(&pcm, on_played),
            SinkCommand::Drain { reply } => state.drain(reply),
            SinkCommand::Stop => state.stop(),
            SinkCommand::Pause(paused) => state.pause(paused),
            SinkCommand::Close => break,
        }
    }

    state.stop();
    tracing::debug!("Audio thread shutting down");
}
