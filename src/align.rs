//! Alignment scheduler — maps marker character offsets onto the PCM buffer.
//!
//! The engine reports how many seconds of speech each character produced.
//! A running sum of those durations gives the time at which each character
//! boundary is reached; multiplying by the byte rate gives the position in
//! the 16-bit PCM buffer where a marker should fire. Markers that resolve
//! to the same byte offset are grouped into a single [`DeliveryUnit`] so
//! that coinciding word and sentence boundaries fire together instead of
//! splitting the audio into zero-length chunks.

/// Opaque position token supplied by the caller and echoed back when
/// playback reaches its position.
pub type MarkerId = u32;

/// Width of one 16-bit mono PCM sample, in bytes.
pub const BYTES_PER_SAMPLE: usize = 2;

/// A group of markers sharing one target byte offset, ordered ascending
/// within a job's schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryUnit {
    /// Offset into the job's PCM buffer, always a multiple of
    /// [`BYTES_PER_SAMPLE`] and never past the end of the buffer.
    pub byte_offset: usize,

    /// Marker ids to fire when playback reaches `byte_offset`, in
    /// submission order.
    pub markers: Vec<MarkerId>,
}

/// Build the ordered delivery schedule for one job.
///
/// * `durations` — seconds of speech per sanitized character.
/// * `sample_rate` — engine output rate in Hz.
/// * `markers` — `(char_offset, marker_id)` pairs, offsets already
///   remapped into the sanitized text.
/// * `audio_byte_len` — length of the PCM buffer the offsets index into.
///
/// A marker at character offset 0 targets time 0.0 (before any audio); a
/// marker at or past the last character snaps to the end of the audio;
/// any other marker fires at the boundary *before* its character, which
/// is the natural "about to speak this character" position.
#[must_use]
pub fn build_delivery_units(
    durations: &[f32],
    sample_rate: u32,
    markers: &[(usize, MarkerId)],
    audio_byte_len: usize,
) -> Vec<DeliveryUnit> {
    let char_count = durations.len();

    // Cumulative time reached after speaking each character.
    let mut cumulative = Vec::with_capacity(char_count);
    let mut total = 0.0f64;
    for d in durations {
        total += f64::from(*d);
        cumulative.push(total);
    }

    // Stable sort by character offset so that units come out ascending and
    // markers sharing an offset keep their submission order.
    let mut ordered: Vec<(usize, MarkerId)> = markers.to_vec();
    ordered.sort_by_key(|&(char_offset, _)| char_offset);

    let bytes_per_sec = f64::from(sample_rate) * BYTES_PER_SAMPLE as f64;

    let mut units: Vec<DeliveryUnit> = Vec::new();
    for (char_offset, marker) in ordered {
        let target_time = if char_offset == 0 || char_count == 0 {
            0.0
        } else if char_offset >= char_count {
            cumulative[char_count - 1]
        } else {
            cumulative[char_offset - 1]
        };

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let mut byte_offset = (target_time * bytes_per_sec).floor() as usize;
        // Never split a sample across a chunk boundary.
        byte_offset -= byte_offset % BYTES_PER_SAMPLE;
        byte_offset = byte_offset.min(audio_byte_len);

        match units.last_mut() {
            Some(unit) if unit.byte_offset == byte_offset => unit.markers.push(marker),
            _ => units.push(DeliveryUnit {
                byte_offset,
                markers: vec![marker],
            }),
        }
    }

    units
}
