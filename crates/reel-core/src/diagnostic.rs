//! Diagnostic extraction from renderer output.
//!
//! Best-effort: the renderer prints a Python traceback among progress bars and
//! log noise. The extractor keeps the error body and drops the rest so that
//! the repair prompt stays small. Multi-exception output may be under- or
//! over-captured; nothing stronger than "contains the tail of the error" is
//! guaranteed.

/// Maximum number of captured lines kept in a diagnostic.
pub const MAX_DIAGNOSTIC_LINES: usize = 30;

/// Maximum characters of raw output used when no error marker is found.
pub const FALLBACK_CHARS: usize = 2000;

/// Markers that start a captured block.
const BLOCK_MARKERS: [&str; 3] = ["Traceback", "Error", "Exception"];

/// Runtime-error markers captured even outside a block.
const RUNTIME_MARKERS: [&str; 3] = ["AttributeError:", "TypeError:", "NameError:"];

/// Reduce combined renderer output to a compact diagnostic.
///
/// Capturing starts at the first line containing a block marker and runs to
/// the end of the output. Lines with a runtime-error marker are captured even
/// before that point. Only the last [`MAX_DIAGNOSTIC_LINES`] captured lines are
/// kept. Without any marker, the last [`FALLBACK_CHARS`] characters of the
/// combined output are returned.
pub fn extract_diagnostic(stderr: &str, stdout: &str) -> String {
    let combined = format!("{stderr}\n{stdout}");

    let mut captured: Vec<&str> = Vec::new();
    let mut capturing = false;

    for line in combined.trim_end().lines() {
        if BLOCK_MARKERS.iter().any(|m| line.contains(m)) {
            capturing = true;
        }
        if capturing || RUNTIME_MARKERS.iter().any(|m| line.contains(m)) {
            captured.push(line);
        }
    }

    if captured.is_empty() {
        return tail_chars(combined.trim_end(), FALLBACK_CHARS).to_string();
    }

    let start = captured.len().saturating_sub(MAX_DIAGNOSTIC_LINES);
    captured[start..].join("\n")
}

/// Last `max_chars` characters of `s`, on a char boundary.
pub fn tail_chars(s: &str, max_chars: usize) -> &str {
    let count = s.chars().count();
    if count <= max_chars {
        return s;
    }
    let skip = count - max_chars;
    let byte_idx = s.char_indices().nth(skip).map_or(s.len(), |(i, _)| i);
    &s[byte_idx..]
}
