//! Extraction of JSON fragments from noisy model output.
//!
//! Small local models wrap their JSON in chatter ("Here is your question:"),
//! markdown fences, and the odd horizontal rule, and they regularly produce
//! trailing commas or doubled quotes. [`sanitize`] pulls out the first
//! balanced bracketed region and patches the common defects. It is a fixed
//! set of heuristics, not a JSON repair engine: anything it cannot fix is left
//! for the parser to reject.

/// Line prefixes treated as conversational filler.
///
/// A line is only dropped when it carries no opening bracket or brace, so a
/// lead-in that shares its line with the payload survives.
const FILLER_PREFIXES: &[&str] = &[
    "Please", "I need", "I will", "Here", "Let me", "First", "Now", "Then", "This", "The",
    "To", "And", "For", "With", "In", "On", "At", "By", "Sure", "Certainly", "Okay", "json",
    "JSON", "```", "---", "***", "___",
];

/// Extract and normalize the first balanced `[...]` or `{...}` region.
///
/// Returns `None` when there is no opening bracket or the first region is
/// never closed (truncated output).
pub fn sanitize(raw: &str) -> Option<String> {
    let kept = strip_filler(raw);
    let fragment = first_balanced(&kept)?;
    Some(normalize(fragment))
}

/// Like [`sanitize`], but passes already well-formed JSON through untouched.
///
/// The normalization step in [`sanitize`] removes escaped quotes, which would
/// damage a response that was valid JSON to begin with.
pub fn extract(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.starts_with(['[', '{'])
        && serde_json::from_str::<serde_json::Value>(trimmed).is_ok()
    {
        return Some(trimmed.to_string());
    }
    sanitize(raw)
}

fn is_filler(line: &str) -> bool {
    if line.contains(['[', '{']) {
        return false;
    }
    let trimmed = line.trim_start();
    FILLER_PREFIXES.iter().any(|p| trimmed.starts_with(p))
}

fn strip_filler(raw: &str) -> String {
    raw.lines()
        .filter(|line| !is_filler(line))
        .collect::<Vec<_>>()
        .join("\n")
}

fn first_balanced(text: &str) -> Option<&str> {
    let start = text.find(['[', '{'])?;
    let mut depth = 0usize;

    // Brackets are ASCII, so byte offsets are valid char boundaries here.
    for (offset, byte) in text.as_bytes()[start..].iter().enumerate() {
        match byte {
            b'[' | b'{' => depth += 1,
            b']' | b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }

    None
}

fn normalize(fragment: &str) -> String {
    let flattened = fragment.replace('\r', "").replace('\n', " ");
    let unquoted = flattened.replace("\\\"", "\"").replace("\"\"", "\"");
    strip_trailing_commas(&unquoted)
}

fn strip_trailing_commas(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for (i, c) in text.char_indices() {
        if c == ',' {
            let next = text[i + 1..].trim_start().chars().next();
            if matches!(next, Some(']' | '}')) {
                continue;
            }
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_region_after_lead_in() {
        let raw = "Here you go: [{\"a\":1}] trailing junk";
        assert_eq!(sanitize(raw).as_deref(), Some("[{\"a\":1}]"));
    }

    #[test]
    fn unbalanced_input_is_empty() {
        assert_eq!(sanitize("[{\"a\":1}"), None);
    }

    #[test]
    fn no_bracket_is_empty() {
        assert_eq!(sanitize("I could not think of a question, sorry."), None);
        assert_eq!(sanitize(""), None);
    }

    #[test]
    fn drops_fences_and_filler_lines() {
        let raw = "Sure! Let me help.\n```json\n{\n  \"question\": \"Why?\",\n  \"answer\": \"Because.\"\n}\n```\n---";
        assert_eq!(
            sanitize(raw).as_deref(),
            Some("{   \"question\": \"Why?\",   \"answer\": \"Because.\" }")
        );
    }

    #[test]
    fn filler_word_inside_a_bracket_line_is_kept() {
        let raw = "The result is {\"x\": \"y\"}";
        assert_eq!(sanitize(raw).as_deref(), Some("{\"x\": \"y\"}"));
    }

    #[test]
    fn only_first_region_is_returned() {
        let raw = "{\"a\": 1} and then {\"b\": 2}";
        assert_eq!(sanitize(raw).as_deref(), Some("{\"a\": 1}"));
    }

    #[test]
    fn nested_brackets_balance() {
        let raw = "out: {\"list\": [1, [2, 3]], \"o\": {\"k\": []}} tail";
        assert_eq!(
            sanitize(raw).as_deref(),
            Some("{\"list\": [1, [2, 3]], \"o\": {\"k\": []}}")
        );
    }

    #[test]
    fn strips_trailing_commas() {
        assert_eq!(sanitize("[1, 2,]").as_deref(), Some("[1, 2]"));
        assert_eq!(sanitize("{\"a\": 1,\n}").as_deref(), Some("{\"a\": 1 }"));
    }

    #[test]
    fn fixes_escaped_and_doubled_quotes() {
        assert_eq!(
            sanitize(r#"{\"a\": ""b""}"#).as_deref(),
            Some(r#"{"a": "b"}"#)
        );
    }

    #[test]
    fn carriage_returns_are_removed() {
        assert_eq!(sanitize("{\"a\":\r\n1}").as_deref(), Some("{\"a\": 1}"));
    }

    #[test]
    fn extract_keeps_valid_json_verbatim() {
        let raw = r#"  {"question": "What does \"FYI\" mean?"}  "#;
        assert_eq!(
            extract(raw).as_deref(),
            Some(r#"{"question": "What does \"FYI\" mean?"}"#)
        );
    }

    #[test]
    fn extract_falls_back_to_sanitize() {
        let raw = "Here is the JSON:\n{\"a\": 1,}";
        assert_eq!(extract(raw).as_deref(), Some("{\"a\": 1}"));
    }
}
