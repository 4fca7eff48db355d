//! Markdown code-fence stripping for model output.
//!
//! Models often wrap code in a fenced block even when told not to. Only a
//! fence at the very start and one at the very end are removed; fences in the
//! middle of the text are part of the program (docstrings, comments) and stay.

/// Fence marker.
const FENCE: &str = "```";

/// Strip a leading and a trailing code fence from model output.
///
/// The leading fence may carry a language tag (```` ```python ````). The
/// result is trimmed. Stripping repeats until nothing changes, which makes the
/// function idempotent even for doubly fenced output.
///
/// # Example
/// ```
/// use reel_core::fence::strip_code_fences;
///
/// assert_eq!(strip_code_fences("```python\nprint(1)\n```"), "print(1)");
/// assert_eq!(strip_code_fences("print(1)"), "print(1)");
/// ```
pub fn strip_code_fences(raw: &str) -> String {
    let mut current = raw.trim();
    loop {
        let next = strip_once(current);
        if next.len() == current.len() {
            return current.to_string();
        }
        current = next;
    }
}

/// One pass: leading fence line, then trailing fence, then trim.
fn strip_once(text: &str) -> &str {
    let mut text = text.trim();

    if let Some(rest) = text.strip_prefix(FENCE) {
        let (first_line, remainder) = match rest.split_once('\n') {
            Some((line, remainder)) => (line, remainder),
            None => (rest, ""),
        };
        text = if is_language_tag(first_line.trim_end()) {
            remainder
        } else {
            rest
        };
    }

    if let Some(rest) = text.strip_suffix(FENCE) {
        text = rest;
    }

    text.trim()
}

/// Whether the text after an opening fence is a (possibly empty) language tag.
fn is_language_tag(s: &str) -> bool {
    s.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '#' | '.' | '_' | '-'))
}
