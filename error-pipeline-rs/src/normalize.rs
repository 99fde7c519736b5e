//! # Message Normalization
//!
//! Chat clients collapse leading whitespace and reflow long dumps. Structural
//! markers from stack traces and nested dumps are compacted, and every
//! indentation run is halved and rebuilt from glyphs the client leaves alone.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Zero-width marker placed after each newline so the indent is not stripped
pub const WORD_JOINER: char = '\u{2060}';

/// Glyph used to rebuild indentation
pub const INDENT_GLYPH: char = '\u{2007}';

// Applied in order; later pairs see the output of earlier ones.
const SUBSTITUTIONS: &[(&str, &str)] = &[
    ("Stack trace", "STACK TRACE"),
    ("Array\n", "Array "),
    ("\n)", ")"),
    ("\n#", "\n\n#"),
    ("): ", "): \n"),
];

static INDENT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n *").unwrap());

// Only ASCII whitespace is trimmed so existing glyph indentation survives.
fn is_trimmable(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\r' | '\0' | '\x0B')
}

/// Compacts a multi-line dump for chat display.
///
/// Not idempotent: normalized text still contains newlines (and possibly
/// `"): "`), so a second pass inserts further markers. Apply exactly once per
/// value.
pub fn normalize(text: &str) -> String {
    let substituted = SUBSTITUTIONS
        .iter()
        .fold(text.to_string(), |acc, (from, to)| acc.replace(from, to));

    INDENT_RUN
        .replace_all(substituted.trim_matches(is_trimmable), |caps: &Captures| {
            let spaces = caps[0].len() - 1;
            let indent_size = (spaces + 1) / 2;
            let mut out = String::with_capacity(2 + indent_size * 3);
            out.push('\n');
            out.push(WORD_JOINER);
            out.extend(std::iter::repeat(INDENT_GLYPH).take(indent_size));
            out
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indent(n: usize) -> String {
        std::iter::repeat(INDENT_GLYPH).take(n).collect()
    }

    #[test]
    fn test_indentation_halved_rounding_up() {
        let out = normalize("root\n    four\n   three\nzero");
        let expected = format!(
            "root\n{wj}{}four\n{wj}{}three\n{wj}zero",
            indent(2),
            indent(2),
            wj = WORD_JOINER
        );
        assert_eq!(out, expected);
    }

    #[test]
    fn test_trimmed_before_indenting() {
        let out = normalize("  \n  message  \n ");
        assert_eq!(out, "message");
    }

    #[test]
    fn test_unicode_spacing_kept_at_edges() {
        let text = format!("{g}{g}nested value\u{a0}", g = INDENT_GLYPH);
        assert_eq!(normalize(&format!(" \t{}\r\n", text)), text);
    }

    #[test]
    fn test_structural_markers() {
        assert_eq!(normalize("Stack trace"), "STACK TRACE");
        assert_eq!(normalize("Array\n(x\n)"), "Array (x)");

        let out = normalize("a\n#1 b");
        assert_eq!(out, format!("a\n{wj}\n{wj}#1 b", wj = WORD_JOINER));

        let out = normalize("f(): boom");
        assert_eq!(out, format!("f(): \n{wj}boom", wj = WORD_JOINER));
    }

    #[test]
    fn test_not_idempotent() {
        let input = "outer\n    inner\n        deeper";
        let once = normalize(input);
        let twice = normalize(&once);
        assert_ne!(once, twice);
    }

    #[test]
    fn test_plain_text_unchanged() {
        assert_eq!(normalize("disk low"), "disk low");
    }
}
