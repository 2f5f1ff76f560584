//! Ack-token normalization.
//!
//! Agents answer a heartbeat with [`HEARTBEAT_OK`] when nothing needs
//! attention, but models decorate it: `<b>HEARTBEAT_OK</b>`,
//! `**HEARTBEAT_OK**`, `HEARTBEAT_OK - all quiet`, `Done. HEARTBEAT_OK`.
//! Every decorated form is stripped before deciding whether a reply is
//! worth delivering.

use std::sync::LazyLock;

use regex::Regex;

use super::HEARTBEAT_OK;

/// `<tag ...>HEARTBEAT_OK</tag>`
static TAGGED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<[A-Za-z][\w-]*[^<>]*>\s*HEARTBEAT_OK\s*</[A-Za-z][\w-]*\s*>").unwrap()
});

/// `<HEARTBEAT_OK>`, `<HEARTBEAT_OK/>`, `</HEARTBEAT_OK>`
static AS_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</?\s*HEARTBEAT_OK\s*/?>").unwrap());

/// `**HEARTBEAT_OK**`, `__HEARTBEAT_OK__`, `*HEARTBEAT_OK*`
static EMPHASIS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\*{1,2}|_{2})\s*HEARTBEAT_OK\s*(\*{1,2}|_{2})").unwrap());

/// Bare token at the start, with trailing punctuation.
static PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*HEARTBEAT_OK\b[\s:;.,!\-]*").unwrap());

/// Bare token at the end, with surrounding punctuation.
static SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s:;,\-]*\bHEARTBEAT_OK[.!]?\s*$").unwrap());

/// A reply with every decorated ack token removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrippedReply {
    /// At least one ack token was present.
    pub had_token: bool,
    /// The remaining text, trimmed.
    pub text: String,
}

/// Strip all decorated forms of the ack token from `reply`.
pub fn strip_ack_token(reply: &str) -> StrippedReply {
    let mut had_token = false;
    let mut text = reply.to_string();

    for pattern in [&*TAGGED, &*AS_TAG, &*EMPHASIS, &*PREFIX, &*SUFFIX] {
        if pattern.is_match(&text) {
            had_token = true;
            text = pattern.replace_all(&text, "").into_owned();
        }
    }

    // Anything left that is only the bare token (e.g. "HEARTBEAT_OK HEARTBEAT_OK").
    if text.split_whitespace().all(|word| word == HEARTBEAT_OK) && !text.trim().is_empty() {
        had_token = true;
        text.clear();
    }

    StrippedReply {
        had_token,
        text: text.trim().to_string(),
    }
}

/// Whether a stripped reply should be treated as a silent acknowledgement:
/// the token was present and at most `max_chars` of other text remain, or
/// nothing remains at all.
pub fn is_silent_ack(reply: &StrippedReply, max_chars: usize) -> bool {
    reply.text.is_empty() || (reply.had_token && reply.text.chars().count() <= max_chars)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_token() {
        let r = strip_ack_token("HEARTBEAT_OK");
        assert!(r.had_token);
        assert_eq!(r.text, "");
    }

    #[test]
    fn test_markup_wrapped() {
        for input in [
            "<b>HEARTBEAT_OK</b>",
            "<code> HEARTBEAT_OK </code>",
            "<span class=\"ok\">HEARTBEAT_OK</span>",
            "<HEARTBEAT_OK/>",
        ] {
            let r = strip_ack_token(input);
            assert!(r.had_token, "{input}");
            assert_eq!(r.text, "", "{input}");
        }
    }

    #[test]
    fn test_emphasis_wrapped() {
        for input in ["**HEARTBEAT_OK**", "__HEARTBEAT_OK__", "*HEARTBEAT_OK*"] {
            let r = strip_ack_token(input);
            assert!(r.had_token, "{input}");
            assert_eq!(r.text, "", "{input}");
        }
    }

    #[test]
    fn test_prefix_and_suffix() {
        let r = strip_ack_token("HEARTBEAT_OK - nothing new since the last check.");
        assert!(r.had_token);
        assert_eq!(r.text, "nothing new since the last check.");

        let r = strip_ack_token("All builds green. HEARTBEAT_OK");
        assert!(r.had_token);
        assert_eq!(r.text, "All builds green.");
    }

    #[test]
    fn test_no_token() {
        let r = strip_ack_token("The deploy job failed with exit code 2.");
        assert!(!r.had_token);
        assert_eq!(r.text, "The deploy job failed with exit code 2.");
    }

    #[test]
    fn test_token_in_the_middle_is_not_stripped() {
        let r = strip_ack_token("Do not reply HEARTBEAT_OK yet, the job is stuck");
        assert!(!r.had_token);
    }

    #[test]
    fn test_silence_threshold() {
        let short = strip_ack_token("HEARTBEAT_OK all quiet");
        assert!(is_silent_ack(&short, 300));
        assert!(!is_silent_ack(&short, 5));

        let report = strip_ack_token("Disk is at 95% on /var");
        assert!(!is_silent_ack(&report, 300));

        let empty = strip_ack_token("   ");
        assert!(is_silent_ack(&empty, 0));
    }
}
