//! Text sanitization and marker-offset remapping.
//!
//! The engine's text frontend rejects some characters outright. Stripping
//! them before synthesis would silently shift every caller-supplied marker
//! offset, so the sanitizer records, for every original character position,
//! how long the sanitized output was at that point. Marker offsets are then
//! translated through that table and stay pinned to the character they
//! preceded (or to the next retained character, if theirs was stripped).
//!
//! All offsets here are *character* offsets, not byte offsets — the host
//! addresses text by character position and the engine reports one duration
//! per character.

/// Sanitized text plus the offset remap table derived from one input.
#[derive(Debug, Clone)]
pub struct SanitizedText {
    /// The input with all engine-rejected characters removed.
    pub text: String,

    /// `remap[i]` = sanitized length (in chars) after processing original
    /// chars `[0, i)`. One terminal sentinel entry resolves end-of-text
    /// offsets, so `remap.len() == original char count + 1`.
    remap: Vec<usize>,

    /// Character count of `text`, cached so lookups stay O(1).
    sanitized_chars: usize,
}

impl SanitizedText {
    /// Translate an original-text character offset to a sanitized-text
    /// character offset.
    ///
    /// Out-of-range offsets are clamped to the end of the input rather
    /// than rejected; a malformed marker must never take down the job.
    #[must_use]
    pub fn remap_offset(&self, char_offset: usize) -> usize {
        let clamped = char_offset.min(self.remap.len() - 1);
        self.remap[clamped]
    }

    /// Character count of the sanitized text.
    #[must_use]
    pub const fn char_count(&self) -> usize {
        self.sanitized_chars
    }
}

/// Strip characters rejected by `is_valid` and build the remap table.
///
/// Single left-to-right pass: the table entry for each original index is
/// recorded *before* the character is considered, so a marker pointing at a
/// stripped character collapses onto the next retained character's offset
/// (or end-of-string if none follows).
pub fn sanitize<F>(text: &str, is_valid: F) -> SanitizedText
where
    F: Fn(char) -> bool,
{
    let mut out = String::with_capacity(text.len());
    let mut remap = Vec::with_capacity(text.chars().count() + 1);
    let mut out_chars = 0usize;

    for c in text.chars() {
        remap.push(out_chars);
        if is_valid(c) {
            out.push(c);
            out_chars += 1;
        }
    }
    // Terminal sentinel: lets an end-of-text marker resolve to the end of
    // the sanitized output.
    remap.push(out_chars);

    SanitizedText {
        text: out,
        remap,
        sanitized_chars: out_chars,
    }
}
