use regex::Regex;
use std::sync::OnceLock;
use unicode_normalization::UnicodeNormalization;

fn horizontal_space_run() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[ \t]+").expect("literal pattern"))
}

fn blank_line_run() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{2,}").expect("literal pattern"))
}

/// Canonicalizes extracted text before chunking.
///
/// NFC composition, then non-printable characters dropped (whitespace is
/// kept), runs of spaces/tabs collapsed to one space, runs of newlines
/// collapsed to a single blank line, and the ends trimmed. The result is a
/// fixed point: normalizing it again returns it unchanged.
pub fn normalize_text(text: &str) -> String {
    let composed: String = text.nfc().collect();
    let mut printable: String = composed.chars().filter(|c| is_kept(*c)).collect();

    // Dropping a character can leave a base letter next to a combining mark.
    if printable.len() != composed.len() {
        printable = printable.nfc().collect();
    }

    let spaced = horizontal_space_run().replace_all(&printable, " ");
    let paragraphs = blank_line_run().replace_all(&spaced, "\n\n");
    paragraphs.trim().to_string()
}

fn is_kept(c: char) -> bool {
    c.is_whitespace() || is_printable(c)
}

/// Drops control characters, the format (Cf) characters, private-use
/// characters and noncharacters. Unassigned code points are kept, since no
/// Unicode age table is consulted.
fn is_printable(c: char) -> bool {
    if c.is_control() {
        return false;
    }

    !matches!(
        c,
        '\u{00ad}'
            | '\u{0600}'..='\u{0605}'
            | '\u{061c}'
            | '\u{06dd}'
            | '\u{070f}'
            | '\u{0890}'..='\u{0891}'
            | '\u{08e2}'
            | '\u{180e}'
            | '\u{200b}'..='\u{200f}'
            | '\u{202a}'..='\u{202e}'
            | '\u{2060}'..='\u{2064}'
            | '\u{2066}'..='\u{206f}'
            | '\u{fdd0}'..='\u{fdef}'
            | '\u{feff}'
            | '\u{fff9}'..='\u{fffb}'
            | '\u{fffe}'..='\u{ffff}'
            | '\u{110bd}'
            | '\u{110cd}'
            | '\u{13430}'..='\u{1343f}'
            | '\u{1bca0}'..='\u{1bca3}'
            | '\u{1d173}'..='\u{1d17a}'
            | '\u{e0001}'
            | '\u{e0020}'..='\u{e007f}'
            | '\u{e000}'..='\u{f8ff}'
            | '\u{f0000}'..='\u{ffffd}'
            | '\u{100000}'..='\u{10fffd}'
    )
}

#[cfg(test)]
mod tests {
    use super::normalize_text;
    use proptest::prelude::*;

    #[test]
    fn spaces_and_tabs_collapse_to_one_space() {
        assert_eq!(normalize_text("A  \t  lot of\t\tspacing"), "A lot of spacing");
    }

    #[test]
    fn blank_line_runs_collapse_to_one_paragraph_break() {
        assert_eq!(normalize_text("first\n\n\n\nsecond\nthird"), "first\n\nsecond\nthird");
    }

    #[test]
    fn control_and_format_characters_are_dropped() {
        assert_eq!(normalize_text("in\u{0007}voice\u{200b} total\u{feff}"), "invoice total");
    }

    #[test]
    fn prepended_arabic_marks_and_tag_characters_are_dropped() {
        assert_eq!(
            normalize_text("\u{0600}12\u{06dd}3 flag\u{e0001}\u{e0067}\u{e007f} \u{110bd}ok"),
            "123 flag ok"
        );
    }

    #[test]
    fn decomposed_letters_are_composed() {
        assert_eq!(normalize_text("cafe\u{0301}"), "caf\u{00e9}");
    }

    #[test]
    fn removed_control_does_not_block_composition() {
        let once = normalize_text("e\u{0007}\u{0301}");
        assert_eq!(once, "\u{00e9}");
        assert_eq!(normalize_text(&once), once);
    }

    #[test]
    fn surrounding_whitespace_is_trimmed() {
        assert_eq!(normalize_text("\n\n  Page one  \n"), "Page one");
        assert_eq!(normalize_text(""), "");
        assert_eq!(normalize_text(" \t\n "), "");
    }

    proptest! {
        #[test]
        fn normalization_is_idempotent(text in any::<String>()) {
            let once = normalize_text(&text);
            prop_assert_eq!(normalize_text(&once), once);
        }

        #[test]
        fn normalization_is_idempotent_on_pdf_like_text(text in "[a-zA-Z .!?\t\n\u{0301}\u{00a0}\u{0007}]{0,200}") {
            let once = normalize_text(&text);
            prop_assert_eq!(normalize_text(&once), once);
        }
    }
}
