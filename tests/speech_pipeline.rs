//! Integration tests for the speech pipeline.
//!
//! These drive the full queue → worker → sanitize → synthesize → align →
//! playback path using a mock engine and a recording sink. No real audio
//! hardware or model files are required; the mock engine produces a fixed
//! number of samples per character so byte offsets are exact.
//!
//! # What is tested
//!
//! - Empty / whitespace-only utterances short-circuit with a synchronous
//!   finish event and enqueue nothing
//! - Marker byte offsets match the per-character durations (the
//!   `"AB"` / 0.5 s / 100 Hz worked example)
//! - Markers sharing a character offset fire together, in order
//! - Offset-0 markers fire with no audio fed at all
//! - Cancellation mid-synthesis stops the sink and suppresses all further
//!   events; queued jobs are purged without ever reaching the engine
//! - A failing engine degrades to a finish event and the worker survives
//! - `pause` and `terminate` reach the sink

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use supertonic_speech::{
    FeedDoneCallback, PlaybackSink, SpeechError, SpeechEvent, SpeechItem, SpeechPipeline,
    SynthesisEngine, SynthesisOptions, SynthesizedAudio, VoiceStyle,
};

// ── Mock engine ────────────────────────────────────────────────────

/// Sample rate chosen so byte offsets come out as round numbers:
/// 0.5 s per character → 50 samples → 100 bytes.
const TEST_SAMPLE_RATE: u32 = 100;

/// Seconds of speech attributed to every character.
const SECS_PER_CHAR: f32 = 0.5;

/// A deterministic engine: rejects ASCII digits, produces `SECS_PER_CHAR`
/// of silence per retained character, and records every synthesize call.
struct MockEngine {
    calls: Arc<Mutex<Vec<String>>>,
    /// Artificial inference latency, for cancellation-timing tests.
    latency: Duration,
    /// When set, every synthesize call fails.
    failing: bool,
}

impl MockEngine {
    fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            latency: Duration::ZERO,
            failing: false,
        }
    }

    fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::new()
        }
    }

    fn failing() -> Self {
        Self {
            failing: true,
            ..Self::new()
        }
    }

    fn calls(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.calls)
    }
}

impl SynthesisEngine for MockEngine {
    fn synthesize(
        &self,
        text: &str,
        _options: &SynthesisOptions,
    ) -> Result<SynthesizedAudio, SpeechError> {
        self.calls.lock().unwrap().push(text.to_string());
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        if self.failing {
            return Err(SpeechError::SynthesisError("mock failure".to_string()));
        }

        let chars = text.chars().count();
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let samples_per_char = (SECS_PER_CHAR * TEST_SAMPLE_RATE as f32) as usize;
        Ok(SynthesizedAudio {
            samples: vec![0.25; chars * samples_per_char],
            durations: vec![SECS_PER_CHAR; chars],
        })
    }

    fn is_valid_char(&self, c: char) -> bool {
        !c.is_ascii_digit()
    }

    fn sample_rate(&self) -> u32 {
        TEST_SAMPLE_RATE
    }

    fn voices(&self) -> Vec<VoiceStyle> {
        vec![
            VoiceStyle {
                id: "M1".to_string(),
                name: "M1".to_string(),
            },
            VoiceStyle {
                id: "F1".to_string(),
                name: "F1".to_string(),
            },
        ]
    }
}

// ── Recording sink ─────────────────────────────────────────────────

/// A sink that records every interaction and "plays" audio instantly:
/// chunk callbacks fire synchronously on feed, so event ordering reflects
/// delivery order exactly.
#[derive(Default)]
struct RecordingSink {
    feeds: Mutex<Vec<Vec<u8>>>,
    stops: AtomicUsize,
    closes: AtomicUsize,
    paused: AtomicBool,
}

impl RecordingSink {
    fn fed_chunk_lens(&self) -> Vec<usize> {
        self.feeds.lock().unwrap().iter().map(Vec::len).collect()
    }

    fn fed_bytes(&self) -> usize {
        self.feeds.lock().unwrap().iter().map(Vec::len).sum()
    }
}

impl PlaybackSink for RecordingSink {
    fn feed(&self, pcm: Vec<u8>, on_played: Option<FeedDoneCallback>) -> Result<(), SpeechError> {
        self.feeds.lock().unwrap().push(pcm);
        if let Some(cb) = on_played {
            cb();
        }
        Ok(())
    }

    fn drain(&self) -> Result<(), SpeechError> {
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn pause(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Helpers ────────────────────────────────────────────────────────

type EventRx = tokio::sync::mpsc::UnboundedReceiver<SpeechEvent>;

fn new_pipeline(engine: MockEngine) -> (SpeechPipeline, EventRx, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let sink_dyn: Arc<dyn PlaybackSink> = sink.clone();
    let (pipeline, rx) =
        SpeechPipeline::new(Arc::new(engine), sink_dyn).expect("pipeline construction");
    (pipeline, rx, sink)
}

/// Collect events until `SpeakingFinished` arrives (inclusive) or the
/// timeout expires.
fn collect_until_finished(rx: &mut EventRx, timeout: Duration) -> Vec<SpeechEvent> {
    let deadline = Instant::now() + timeout;
    let mut events = Vec::new();
    while Instant::now() < deadline {
        match rx.try_recv() {
            Ok(event) => {
                let done = event == SpeechEvent::SpeakingFinished;
                events.push(event);
                if done {
                    return events;
                }
            }
            Err(_) => std::thread::sleep(Duration::from_millis(5)),
        }
    }
    events
}

/// Drain whatever is pending right now.
fn drain_events(rx: &mut EventRx) -> Vec<SpeechEvent> {
    let mut events = Vec::new();
    while let Ok(e) = rx.try_recv() {
        events.push(e);
    }
    events
}

fn text(s: &str) -> SpeechItem {
    SpeechItem::Text(s.to_string())
}

// ── Tests ──────────────────────────────────────────────────────────

#[test]
fn whitespace_only_utterance_short_circuits() {
    let engine = MockEngine::new();
    let calls = engine.calls();
    let (pipeline, mut rx, sink) = new_pipeline(engine);

    pipeline.speak([text("  "), SpeechItem::Marker(1), text("\t\n")]);

    // The finish event is synchronous; nothing reaches the engine or sink.
    assert_eq!(drain_events(&mut rx), vec![SpeechEvent::SpeakingFinished]);
    assert!(calls.lock().unwrap().is_empty());
    assert_eq!(sink.fed_bytes(), 0);
}

#[test]
fn marker_byte_offsets_follow_durations() {
    // The worked example: "AB", marker between the characters, 0.5 s per
    // character at 100 Hz → the split lands exactly at byte 100.
    let (pipeline, mut rx, sink) = new_pipeline(MockEngine::new());

    pipeline.speak([text("A"), SpeechItem::Marker(7), text("B")]);

    let events = collect_until_finished(&mut rx, Duration::from_secs(2));
    assert_eq!(
        events,
        vec![
            SpeechEvent::IndexReached(7),
            SpeechEvent::SpeakingFinished,
        ]
    );
    // One 100-byte slice before the marker, one 100-byte trailing slice.
    assert_eq!(sink.fed_chunk_lens(), vec![100, 100]);
}

#[test]
fn coinciding_markers_fire_together_in_submission_order() {
    let (pipeline, mut rx, sink) = new_pipeline(MockEngine::new());

    pipeline.speak([
        text("A"),
        SpeechItem::Marker(5),
        SpeechItem::Marker(6),
        text("B"),
    ]);

    let events = collect_until_finished(&mut rx, Duration::from_secs(2));
    assert_eq!(
        events,
        vec![
            SpeechEvent::IndexReached(5),
            SpeechEvent::IndexReached(6),
            SpeechEvent::SpeakingFinished,
        ]
    );
    // Grouping produced a single split, not two.
    assert_eq!(sink.fed_chunk_lens(), vec![100, 100]);
}

#[test]
fn leading_marker_fires_before_any_audio() {
    let (pipeline, mut rx, sink) = new_pipeline(MockEngine::new());

    pipeline.speak([SpeechItem::Marker(1), text("AB"), SpeechItem::Marker(2)]);

    let events = collect_until_finished(&mut rx, Duration::from_secs(2));
    assert_eq!(
        events,
        vec![
            SpeechEvent::IndexReached(1),
            SpeechEvent::IndexReached(2),
            SpeechEvent::SpeakingFinished,
        ]
    );
    // The leading marker caused no split; the trailing marker snapped to
    // the end of the buffer, so everything went out as one slice.
    assert_eq!(sink.fed_chunk_lens(), vec![200]);
}

#[test]
fn stripped_characters_shift_marker_offsets() {
    // Digits are invalid to the mock engine. "A1B" sanitizes to "AB" and a
    // marker sitting on the digit collapses onto 'B' (offset 1 → byte 100).
    let engine = MockEngine::new();
    let calls = engine.calls();
    let (pipeline, mut rx, sink) = new_pipeline(engine);

    pipeline.speak([text("A1"), SpeechItem::Marker(9), text("B")]);

    let events = collect_until_finished(&mut rx, Duration::from_secs(2));
    assert_eq!(
        events,
        vec![
            SpeechEvent::IndexReached(9),
            SpeechEvent::SpeakingFinished,
        ]
    );
    assert_eq!(calls.lock().unwrap().as_slice(), ["AB"]);
    assert_eq!(sink.fed_chunk_lens(), vec![100, 100]);
}

#[test]
fn all_invalid_text_fires_markers_with_no_audio() {
    let (pipeline, mut rx, sink) = new_pipeline(MockEngine::new());

    pipeline.speak([SpeechItem::Marker(1), text("123"), SpeechItem::Marker(2)]);

    let events = collect_until_finished(&mut rx, Duration::from_secs(2));
    assert_eq!(
        events,
        vec![
            SpeechEvent::IndexReached(1),
            SpeechEvent::IndexReached(2),
            SpeechEvent::SpeakingFinished,
        ]
    );
    assert_eq!(sink.fed_bytes(), 0);
}

#[test]
fn cancel_mid_synthesis_suppresses_all_output() {
    let (pipeline, mut rx, sink) =
        new_pipeline(MockEngine::with_latency(Duration::from_millis(300)));

    pipeline.speak([text("A"), SpeechItem::Marker(1), text("B")]);

    // Let the worker enter the blocking synthesis call, then cancel.
    std::thread::sleep(Duration::from_millis(100));
    pipeline.cancel();
    assert!(sink.stops.load(Ordering::SeqCst) >= 1);

    // Wait past the synthesis latency: the worker resumes, observes the
    // stale generation at its checkpoint, and unwinds silently.
    std::thread::sleep(Duration::from_millis(400));
    assert_eq!(drain_events(&mut rx), vec![]);
    assert_eq!(sink.fed_bytes(), 0);
}

#[test]
fn cancel_purges_queued_jobs_before_they_reach_the_engine() {
    let engine = MockEngine::with_latency(Duration::from_millis(300));
    let calls = engine.calls();
    let (pipeline, mut rx, sink) = new_pipeline(engine);

    // First job occupies the worker; the second sits in the queue.
    pipeline.speak([text("AB")]);
    std::thread::sleep(Duration::from_millis(100));
    pipeline.speak([text("CD")]);
    pipeline.cancel();

    std::thread::sleep(Duration::from_millis(400));
    // Only the in-flight job ever reached the engine; the queued one was
    // purged without synthesis, audio, or events.
    assert_eq!(calls.lock().unwrap().as_slice(), ["AB"]);
    assert_eq!(sink.fed_bytes(), 0);
    assert_eq!(drain_events(&mut rx), vec![]);
}

#[test]
fn engine_failure_degrades_to_finished_and_worker_survives() {
    let (pipeline, mut rx, sink) = new_pipeline(MockEngine::failing());

    pipeline.speak([text("AB")]);
    let events = collect_until_finished(&mut rx, Duration::from_secs(2));
    assert_eq!(events, vec![SpeechEvent::SpeakingFinished]);
    assert_eq!(sink.fed_bytes(), 0);

    // The loop is not wedged: the next utterance also completes.
    pipeline.speak([text("CD")]);
    let events = collect_until_finished(&mut rx, Duration::from_secs(2));
    assert_eq!(events, vec![SpeechEvent::SpeakingFinished]);
}

#[test]
fn pause_and_terminate_reach_the_sink() {
    let (pipeline, _rx, sink) = new_pipeline(MockEngine::new());

    pipeline.pause(true);
    assert!(sink.paused.load(Ordering::SeqCst));
    pipeline.pause(false);
    assert!(!sink.paused.load(Ordering::SeqCst));

    pipeline.terminate();
    assert_eq!(sink.stops.load(Ordering::SeqCst), 1);
    assert_eq!(sink.closes.load(Ordering::SeqCst), 1);

    // terminate is idempotent (Drop runs it again harmlessly).
    pipeline.terminate();
    assert_eq!(sink.closes.load(Ordering::SeqCst), 1);
}

#[test]
fn events_can_be_consumed_from_async_hosts() {
    let (pipeline, mut rx, _sink) = new_pipeline(MockEngine::new());

    pipeline.speak([text("AB")]);

    let event = tokio_test::block_on(async { rx.recv().await });
    assert_eq!(event, Some(SpeechEvent::SpeakingFinished));
}

#[test]
fn voice_enumeration_passes_through_and_seeds_default() {
    let (pipeline, _rx, _sink) = new_pipeline(MockEngine::new());

    let ids: Vec<String> = pipeline.voices().into_iter().map(|v| v.id).collect();
    assert_eq!(ids, ["M1", "F1"]);
    assert_eq!(pipeline.settings().voice, "M1");
}
