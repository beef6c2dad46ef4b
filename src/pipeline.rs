//! Speech pipeline orchestrator — queue, worker loop, and playback bridge.
//!
//! ```text
//!   speak() ──▶ job queue ──▶ worker thread ──▶ sanitize ──▶ synthesize
//!                                                   │
//!   events  ◀── playback bridge ◀── delivery units ◀┘
//! ```
//!
//! The caller-facing surface (`speak` / `cancel` / `pause` / `terminate`)
//! runs on the host's thread and returns in well under a millisecond; all
//! audio-producing work happens on one dedicated worker thread, so at most
//! one job is ever mid-pipeline. Cancellation is cooperative: `cancel`
//! bumps a generation counter, purges the queue, and stops the sink; the
//! worker compares its job's generation at checkpoints and unwinds on
//! mismatch. There is no preemption of the blocking synthesis call, so
//! cancellation latency is bounded by one engine call in the worst case.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::align::{self, MarkerId};
use crate::engine::{SynthesisEngine, SynthesisOptions, VoiceStyle};
use crate::error::SpeechError;
use crate::settings::SpeechSettings;
use crate::sink::{FeedDoneCallback, PlaybackSink};
use crate::text;

/// How long the worker waits on an empty queue before re-checking the
/// shutdown flag.
const QUEUE_POLL: Duration = Duration::from_millis(100);

// ── Caller input ───────────────────────────────────────────────────

/// One element of a speak request: literal text or a position marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechItem {
    /// A literal text segment.
    Text(String),

    /// A marker bound to the character position where it appears in the
    /// sequence; echoed back as [`SpeechEvent::IndexReached`] when
    /// playback gets there.
    Marker(MarkerId),
}

// ── Events emitted to the host ─────────────────────────────────────

/// Notifications delivered to the host, in playback order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechEvent {
    /// Playback reached the position of this marker.
    IndexReached(MarkerId),

    /// The current utterance finished (or was abandoned after a per-job
    /// failure). Not emitted for cancelled jobs.
    SpeakingFinished,
}

// ── Job + shared state ─────────────────────────────────────────────

/// A queued synthesis request. Immutable once enqueued; consumed exactly
/// once by the worker or discarded as stale.
struct SpeechJob {
    generation: u64,
    text: String,
    /// `(char_offset, marker_id)` pairs in submission order.
    markers: Vec<(usize, MarkerId)>,
    options: SynthesisOptions,
}

/// State shared between the control path and the worker. The generation
/// counter and the queue live under one mutex with strictly bounded
/// critical sections; no synthesis or I/O happens while it is held.
struct Shared {
    /// Current cancellation epoch. Bumped once per `cancel`; a queued or
    /// in-flight job whose tag differs is abandoned at the next checkpoint.
    generation: u64,
    queue: VecDeque<SpeechJob>,
    shutdown: bool,
}

fn lock_shared(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Pipeline ───────────────────────────────────────────────────────

/// The speech pipeline: owns the job queue, the worker thread, and the
/// event channel to the host.
pub struct SpeechPipeline {
    engine: Arc<dyn SynthesisEngine>,
    sink: Arc<dyn PlaybackSink>,
    shared: Arc<(Mutex<Shared>, Condvar)>,
    /// Host-visible settings, captured into each job at enqueue time.
    /// A std lock is fine: it is only touched in sync context, never
    /// across an await point.
    settings: RwLock<SpeechSettings>,
    event_tx: mpsc::UnboundedSender<SpeechEvent>,
    terminated: AtomicBool,
    /// Kept so the thread is not detached silently; `terminate` does not
    /// join it (the worker may be inside an opaque synthesis call).
    _worker: thread::JoinHandle<()>,
}

impl SpeechPipeline {
    /// Create the pipeline and spawn its worker thread.
    ///
    /// Returns the pipeline and the receiver for [`SpeechEvent`]s. The
    /// default voice is the engine's first enumerated style.
    pub fn new(
        engine: Arc<dyn SynthesisEngine>,
        sink: Arc<dyn PlaybackSink>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SpeechEvent>), SpeechError> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let shared = Arc::new((
            Mutex::new(Shared {
                generation: 0,
                queue: VecDeque::new(),
                shutdown: false,
            }),
            Condvar::new(),
        ));

        let default_voice = engine
            .voices()
            .first()
            .map_or_else(|| "M1".to_string(), |v| v.id.clone());

        let worker = {
            let engine = Arc::clone(&engine);
            let sink = Arc::clone(&sink);
            let shared = Arc::clone(&shared);
            let event_tx = event_tx.clone();
            thread::Builder::new()
                .name("supertonic-speech".into())
                .spawn(move || worker_loop(&*engine, &*sink, &shared, &event_tx))
                .map_err(|e| SpeechError::WorkerSpawnError(e.to_string()))?
        };

        tracing::info!(voice = %default_voice, "Speech pipeline started");

        let pipeline = Self {
            engine,
            sink,
            shared,
            settings: RwLock::new(SpeechSettings {
                voice: default_voice,
                ..SpeechSettings::default()
            }),
            event_tx,
            terminated: AtomicBool::new(false),
            _worker: worker,
        };

        Ok((pipeline, event_rx))
    }

    // ── Control surface ────────────────────────────────────────────

    /// Enqueue an utterance. Never blocks and never fails.
    ///
    /// Text that is empty after trimming short-circuits: nothing is
    /// enqueued and [`SpeechEvent::SpeakingFinished`] fires synchronously
    /// so the host's state machine is not left waiting.
    pub fn speak(&self, items: impl IntoIterator<Item = SpeechItem>) {
        let mut utterance = String::new();
        let mut char_count = 0usize;
        let mut markers: Vec<(usize, MarkerId)> = Vec::new();

        for item in items {
            match item {
                SpeechItem::Text(segment) => {
                    char_count += segment.chars().count();
                    utterance.push_str(&segment);
                }
                SpeechItem::Marker(id) => markers.push((char_count, id)),
            }
        }

        if utterance.trim().is_empty() {
            tracing::debug!("Empty utterance, finishing immediately");
            self.emit(SpeechEvent::SpeakingFinished);
            return;
        }

        let options = {
            let settings = self
                .settings
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            SynthesisOptions {
                voice: settings.voice.clone(),
                speed: settings.speed(),
                quality_steps: settings.quality,
                ..SynthesisOptions::default()
            }
        };

        let (mutex, wakeup) = &*self.shared;
        let mut shared = lock_shared(mutex);
        if shared.shutdown {
            tracing::debug!("speak after terminate, finishing immediately");
            drop(shared);
            self.emit(SpeechEvent::SpeakingFinished);
            return;
        }
        let job = SpeechJob {
            generation: shared.generation,
            text: utterance,
            markers,
            options,
        };
        tracing::debug!(
            generation = job.generation,
            chars = char_count,
            markers = job.markers.len(),
            "Utterance enqueued"
        );
        shared.queue.push_back(job);
        drop(shared);
        wakeup.notify_one();
    }

    /// Invalidate all queued and in-flight work and silence the sink.
    ///
    /// Returns immediately; the in-flight job (if any) unwinds at its
    /// next checkpoint. Marker callbacks already attached to fed audio
    /// are not retracted, but the sink stop discards them with the audio.
    pub fn cancel(&self) {
        let (mutex, _) = &*self.shared;
        {
            let mut shared = lock_shared(mutex);
            shared.generation += 1;
            let purged = shared.queue.len();
            shared.queue.clear();
            tracing::debug!(generation = shared.generation, purged, "Speech cancelled");
        }
        self.sink.stop();
    }

    /// Pause or resume playback without discarding queued audio.
    pub fn pause(&self, paused: bool) {
        self.sink.pause(paused);
    }

    /// Stop the worker and release the sink. Idempotent.
    ///
    /// Does not join the worker thread: it may be blocked inside the
    /// engine and will observe the shutdown flag at its next bounded
    /// wait.
    pub fn terminate(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        let (mutex, wakeup) = &*self.shared;
        {
            let mut shared = lock_shared(mutex);
            shared.shutdown = true;
            shared.generation += 1;
            shared.queue.clear();
        }
        wakeup.notify_one();
        self.sink.stop();
        self.sink.close();
        tracing::info!("Speech pipeline terminated");
    }

    // ── Settings ───────────────────────────────────────────────────

    /// Current settings snapshot.
    pub fn settings(&self) -> SpeechSettings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Change the voice style used for subsequent utterances.
    pub fn set_voice(&self, voice: impl Into<String>) {
        self.write_settings(|s| s.voice = voice.into());
    }

    /// Change the host rate (0–100) used for subsequent utterances.
    pub fn set_rate(&self, rate: u8) {
        self.write_settings(|s| s.rate = rate.min(100));
    }

    /// Change the quality step count used for subsequent utterances.
    pub fn set_quality(&self, quality: u32) {
        self.write_settings(|s| s.quality = quality);
    }

    /// Enumerate the engine's available voice styles.
    pub fn voices(&self) -> Vec<VoiceStyle> {
        self.engine.voices()
    }

    // ── Internal helpers ───────────────────────────────────────────

    fn write_settings(&self, f: impl FnOnce(&mut SpeechSettings)) {
        let mut settings = self
            .settings
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut settings);
    }

    /// Emit an event (best-effort; the host may have dropped the receiver).
    fn emit(&self, event: SpeechEvent) {
        if self.event_tx.send(event).is_err() {
            tracing::warn!("Speech event receiver dropped");
        }
    }
}

impl Drop for SpeechPipeline {
    fn drop(&mut self) {
        self.terminate();
    }
}

// ── Worker loop ────────────────────────────────────────────────────

/// Body of the dedicated worker thread: dequeue, drop stale jobs, drive
/// the per-job pipeline serially.
fn worker_loop(
    engine: &dyn SynthesisEngine,
    sink: &dyn PlaybackSink,
    shared: &(Mutex<Shared>, Condvar),
    event_tx: &mpsc::UnboundedSender<SpeechEvent>,
) {
    while let Some(job) = next_job(shared) {
        process_job(engine, sink, shared, event_tx, &job);
    }
    tracing::debug!("Speech worker shutting down");
}

/// Block (with a bounded wait, so shutdown is observed) until a current
/// job is available. Stale jobs are discarded here without any side
/// effects. Returns `None` on shutdown.
fn next_job(shared: &(Mutex<Shared>, Condvar)) -> Option<SpeechJob> {
    let (mutex, wakeup) = shared;
    let mut guard = lock_shared(mutex);
    loop {
        if guard.shutdown {
            return None;
        }
        if let Some(job) = guard.queue.pop_front() {
            if job.generation == guard.generation {
                return Some(job);
            }
            tracing::trace!(
                job_generation = job.generation,
                current = guard.generation,
                "Dropping stale job"
            );
            continue;
        }
        guard = wakeup
            .wait_timeout(guard, QUEUE_POLL)
            .unwrap_or_else(PoisonError::into_inner)
            .0;
    }
}

/// Whether `generation` has been superseded. Read under the shared lock —
/// this is the checkpoint every stage of the per-job pipeline re-reads.
fn is_stale(shared: &(Mutex<Shared>, Condvar), generation: u64) -> bool {
    let guard = lock_shared(&shared.0);
    guard.generation != generation || guard.shutdown
}

/// Best-effort event emission from the worker.
fn emit(event_tx: &mpsc::UnboundedSender<SpeechEvent>, event: SpeechEvent) {
    if event_tx.send(event).is_err() {
        tracing::warn!("Speech event receiver dropped");
    }
}

/// Drive one job through sanitize → synthesize → align → playback.
///
/// Per-job failures are fail-open: logged, degraded to a
/// `SpeakingFinished` event, and the worker moves on. Stale-generation
/// abandonment is silent.
fn process_job(
    engine: &dyn SynthesisEngine,
    sink: &dyn PlaybackSink,
    shared: &(Mutex<Shared>, Condvar),
    event_tx: &mpsc::UnboundedSender<SpeechEvent>,
    job: &SpeechJob,
) {
    let sanitized = text::sanitize(&job.text, |c| engine.is_valid_char(c));
    let markers: Vec<(usize, MarkerId)> = job
        .markers
        .iter()
        .map(|&(offset, id)| (sanitized.remap_offset(offset), id))
        .collect();

    // Checkpoint before committing to the expensive blocking call.
    if is_stale(shared, job.generation) {
        return;
    }

    let audio = match engine.synthesize(&sanitized.text, &job.options) {
        Ok(audio) => audio,
        Err(e) => {
            tracing::error!(error = %e, "Synthesis failed, abandoning utterance");
            emit(event_tx, SpeechEvent::SpeakingFinished);
            return;
        }
    };

    if audio.durations.len() != sanitized.char_count() {
        let e = SpeechError::AlignmentMismatch {
            durations: audio.durations.len(),
            chars: sanitized.char_count(),
        };
        tracing::error!(error = %e, "Engine returned malformed alignment data");
        emit(event_tx, SpeechEvent::SpeakingFinished);
        return;
    }

    if is_stale(shared, job.generation) {
        return;
    }

    let pcm = samples_to_pcm16(&audio.samples);
    let units = align::build_delivery_units(
        &audio.durations,
        engine.sample_rate(),
        &markers,
        pcm.len(),
    );

    tracing::debug!(
        generation = job.generation,
        pcm_bytes = pcm.len(),
        units = units.len(),
        duration_secs = audio.duration_secs(),
        "Feeding utterance"
    );

    deliver(sink, shared, event_tx, job.generation, &pcm, units);
}

/// The playback bridge: feed audio slices in delivery order with marker
/// callbacks bound to each slice's playback completion, then wait for the
/// sink to drain.
fn deliver(
    sink: &dyn PlaybackSink,
    shared: &(Mutex<Shared>, Condvar),
    event_tx: &mpsc::UnboundedSender<SpeechEvent>,
    generation: u64,
    pcm: &[u8],
    units: Vec<align::DeliveryUnit>,
) {
    let mut cursor = 0usize;

    for unit in units {
        // Re-read the generation before every feed; cancel() may have
        // stopped the sink while we were queueing.
        if is_stale(shared, generation) {
            return;
        }

        if unit.byte_offset <= cursor {
            // No audio precedes these markers (offset 0): fire now.
            for id in unit.markers {
                emit(event_tx, SpeechEvent::IndexReached(id));
            }
            continue;
        }

        let chunk = pcm[cursor..unit.byte_offset].to_vec();
        let on_played = marker_callback(event_tx.clone(), unit.markers);
        if let Err(e) = sink.feed(chunk, Some(on_played)) {
            tracing::error!(error = %e, "Sink rejected audio, abandoning utterance");
            emit(event_tx, SpeechEvent::SpeakingFinished);
            return;
        }
        cursor = unit.byte_offset;
    }

    if is_stale(shared, generation) {
        return;
    }

    // Trailing audio past the last marker, no callback attached.
    if cursor < pcm.len() {
        if let Err(e) = sink.feed(pcm[cursor..].to_vec(), None) {
            tracing::error!(error = %e, "Sink rejected audio, abandoning utterance");
            emit(event_tx, SpeechEvent::SpeakingFinished);
            return;
        }
    }

    if let Err(e) = sink.drain() {
        tracing::error!(error = %e, "Sink drain failed");
        emit(event_tx, SpeechEvent::SpeakingFinished);
        return;
    }

    // Cancelled while draining: cancel() already silenced the sink and the
    // host is not owed a finish notification.
    if is_stale(shared, generation) {
        return;
    }

    emit(event_tx, SpeechEvent::SpeakingFinished);
}

/// Callback firing one delivery unit's markers, in submission order.
fn marker_callback(
    event_tx: mpsc::UnboundedSender<SpeechEvent>,
    markers: Vec<MarkerId>,
) -> FeedDoneCallback {
    Box::new(move || {
        for id in markers {
            if event_tx.send(SpeechEvent::IndexReached(id)).is_err() {
                tracing::warn!("Speech event receiver dropped");
            }
        }
    })
}

/// Convert engine f32 samples in `[-1, 1]` to 16-bit little-endian PCM.
fn samples_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut pcm = Vec::with_capacity(samples.len() * align::BYTES_PER_SAMPLE);
    for s in samples {
        #[allow(clippy::cast_possible_truncation)]
        let v = (f64::from(*s) * 32767.0).clamp(-32768.0, 32767.0) as i16;
        pcm.extend_from_slice(&v.to_le_bytes());
    }
    pcm
}
