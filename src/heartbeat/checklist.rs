//! Heartbeat checklist handling.
//!
//! An agent's heartbeat instructions are a markdown checklist, e.g.
//!
//! ```markdown
//! # Heartbeat Checklist
//!
//! - [ ] Check on background builds
//! - [ ] Review failed jobs
//! ```
//!
//! A checklist with no real items produces no prompt, which skips the tick
//! without calling the agent runtime.

use super::HEARTBEAT_OK;

/// Build the heartbeat prompt for a checklist, or `None` if the checklist
/// is effectively empty.
pub fn build_prompt(checklist: &str) -> Option<String> {
    if is_effectively_empty(checklist) {
        return None;
    }
    Some(format!(
        "Read the heartbeat checklist below and follow it strictly. \
         Do not infer or repeat old tasks. Check each item and report findings.\n\
         \n\
         If nothing needs attention, reply EXACTLY with: {HEARTBEAT_OK}\n\
         \n\
         If something needs attention, provide a concise summary of what needs action.\n\
         \n\
         ## Checklist\n\
         \n\
         {}",
        checklist.trim()
    ))
}

/// Check if heartbeat content is effectively empty.
///
/// Returns true if the content contains only:
/// - Whitespace
/// - Markdown headers (lines starting with #)
/// - HTML comments (`<!-- ... -->`)
/// - Empty list items (`- [ ]`, `- [x]`, `-`, `*`)
pub fn is_effectively_empty(content: &str) -> bool {
    let without_comments = strip_html_comments(content);

    without_comments.lines().all(|line| {
        let trimmed = line.trim();
        trimmed.is_empty()
            || trimmed.starts_with('#')
            || trimmed == "- [ ]"
            || trimmed == "- [x]"
            || trimmed == "-"
            || trimmed == "*"
    })
}

/// Remove HTML comments from content.
fn strip_html_comments(content: &str) -> String {
    let mut result = String::with_capacity(content.len());
    let mut rest = content;
    while let Some(start) = rest.find("<!--") {
        result.push_str(&rest[..start]);
        match rest[start..].find("-->") {
            Some(end) => rest = &rest[start + end + 3..],
            None => return result, // unclosed comment, treat rest as comment
        }
    }
    result.push_str(rest);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_html_comments_multiple() {
        let input = "a<!-- 1 -->b<!-- 2 -->c";
        assert_eq!(strip_html_comments(input), "abc");
    }

    #[test]
    fn test_strip_html_comments_multiline() {
        let input = "# Title\n<!-- multi\nline\ncomment -->\nreal content";
        assert_eq!(strip_html_comments(input), "# Title\n\nreal content");
    }

    #[test]
    fn test_strip_html_comments_unclosed() {
        assert_eq!(strip_html_comments("before<!-- never closed"), "before");
    }

    #[test]
    fn test_effectively_empty_scaffolding() {
        assert!(is_effectively_empty(""));
        assert!(is_effectively_empty("   \n\n  "));
        assert!(is_effectively_empty("# Title\n## Subtitle"));
        assert!(is_effectively_empty("<!-- add items here -->"));
        assert!(is_effectively_empty("# Checklist\n- [ ]\n- [x]\n-\n*"));
    }

    #[test]
    fn test_not_empty_with_real_item() {
        assert!(!is_effectively_empty("# Checklist\n- [ ] Check the nightly build"));
        assert!(!is_effectively_empty("<!-- note -->\nsummarize finished jobs"));
    }

    #[test]
    fn test_build_prompt() {
        assert!(build_prompt("# Nothing yet\n- [ ]").is_none());

        let prompt = build_prompt("- [ ] Review failed jobs\n").unwrap();
        assert!(prompt.contains("reply EXACTLY with: HEARTBEAT_OK"));
        assert!(prompt.ends_with("- [ ] Review failed jobs"));
    }
}
