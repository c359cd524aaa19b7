use std::fmt;

use serde_json::Value;
use thiserror::Error;

const FENCE: &str = "```";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadSource {
    /// The whole reply was a document.
    Direct,
    Fenced,
    /// First parseable balanced region inside prose.
    Embedded,
}

impl PayloadSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadSource::Direct => "direct",
            PayloadSource::Fenced => "fenced",
            PayloadSource::Embedded => "embedded",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPayload {
    pub document: Value,
    /// Exact slice of the reply the document was read from.
    pub consumed: String,
    pub source: PayloadSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseReason {
    EmptyResponse,
    NoStructuredPayload,
    TrailingContent,
}

impl ParseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseReason::EmptyResponse => "empty_response",
            ParseReason::NoStructuredPayload => "no_structured_payload",
            ParseReason::TrailingContent => "trailing_content",
        }
    }
}

impl fmt::Display for ParseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{reason}: {detail}")]
pub struct ParseError {
    pub reason: ParseReason,
    pub detail: String,
}

impl ParseError {
    fn new(reason: ParseReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }
}

/// Extracts the structured document from a model reply.
///
/// Order: whole reply, then the first fenced block, then the first balanced
/// `{...}`/`[...]` region that parses. A fenced document followed by extra
/// content inside the same fence is an error rather than a silent truncation,
/// and so is prose that carries more than one parseable region.
pub fn parse_payload(text: &str) -> Result<ParsedPayload, ParseError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ParseError::new(
            ParseReason::EmptyResponse,
            "model reply was empty",
        ));
    }

    if let Ok(document) = serde_json::from_str::<Value>(trimmed) {
        return Ok(ParsedPayload {
            document,
            consumed: trimmed.to_string(),
            source: PayloadSource::Direct,
        });
    }

    let mut fence_error = None;
    if let Some(body) = first_fenced_block(text) {
        match parse_exact(body) {
            Ok(Some(document)) => {
                return Ok(ParsedPayload {
                    document,
                    consumed: body.trim().to_string(),
                    source: PayloadSource::Fenced,
                })
            }
            Ok(None) => {}
            Err(err) => fence_error = Some(err),
        }
    }

    let mut regions = BalancedRegions::new(text);
    while let Some((start, end)) = regions.next() {
        let candidate = &text[start..end];
        if let Ok(document) = serde_json::from_str::<Value>(candidate) {
            if let Some(err) = fence_error {
                return Err(err);
            }
            if let Some((next, next_end)) = regions.find(|&(from, to)| parses(&text[from..to])) {
                let preview: String = text[next..next_end].chars().take(40).collect();
                return Err(ParseError::new(
                    ParseReason::TrailingContent,
                    format!("reply holds a second document at byte {next}: '{preview}'"),
                ));
            }
            return Ok(ParsedPayload {
                document,
                consumed: candidate.to_string(),
                source: PayloadSource::Embedded,
            });
        }
    }

    Err(fence_error.unwrap_or_else(|| {
        ParseError::new(
            ParseReason::NoStructuredPayload,
            "no fenced block or balanced JSON object/array could be parsed",
        )
    }))
}

fn parses(candidate: &str) -> bool {
    serde_json::from_str::<Value>(candidate).is_ok()
}

/// `Ok(None)` when the block holds no document at all; `Err` when a
/// document is followed by more content.
fn parse_exact(body: &str) -> Result<Option<Value>, ParseError> {
    let body = body.trim();
    if body.is_empty() {
        return Ok(None);
    }
    let mut stream = serde_json::Deserializer::from_str(body).into_iter::<Value>();
    let Some(Ok(document)) = stream.next() else {
        return Ok(None);
    };
    let offset = stream.byte_offset();
    let rest = body[offset..].trim();
    if rest.is_empty() {
        return Ok(Some(document));
    }
    let preview: String = rest.chars().take(40).collect();
    Err(ParseError::new(
        ParseReason::TrailingContent,
        format!("fenced block continues after the document at byte {offset}: '{preview}'"),
    ))
}

/// Body of the first fenced block tagged `json` or untagged.
fn first_fenced_block(text: &str) -> Option<&str> {
    let mut cursor = 0;
    while let Some(open) = text[cursor..].find(FENCE) {
        let after_open = cursor + open + FENCE.len();
        let line_end = text[after_open..]
            .find('\n')
            .map(|idx| after_open + idx)
            .unwrap_or(text.len());
        let tag = text[after_open..line_end].trim();
        let body_start = (line_end + 1).min(text.len());
        let close = text[body_start..].find(FENCE)? + body_start;
        if tag.is_empty() || tag.eq_ignore_ascii_case("json") {
            return Some(&text[body_start..close]);
        }
        cursor = close + FENCE.len();
    }
    None
}

/// Iterator over top-level balanced bracket regions, string-literal aware.
struct BalancedRegions<'a> {
    text: &'a str,
    cursor: usize,
}

impl<'a> BalancedRegions<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, cursor: 0 }
    }
}

impl Iterator for BalancedRegions<'_> {
    type Item = (usize, usize);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let rest = &self.text[self.cursor..];
            let offset = rest.find(['{', '['])?;
            let start = self.cursor + offset;
            match region_end(&self.text[start..]) {
                Some(len) => {
                    self.cursor = start + len;
                    return Some((start, start + len));
                }
                None => self.cursor = start + 1,
            }
        }
    }
}

fn region_end(text: &str) -> Option<usize> {
    let mut closers = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for (idx, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => closers.push('}'),
            '[' => closers.push(']'),
            '}' | ']' => {
                if closers.pop() != Some(ch) {
                    return None;
                }
                if closers.is_empty() {
                    return Some(idx + ch.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn direct_document_is_consumed_whole() {
        let parsed = parse_payload("  {\"actions\": []}\n").unwrap();
        assert_eq!(parsed.document, json!({"actions": []}));
        assert_eq!(parsed.consumed, "{\"actions\": []}");
        assert_eq!(parsed.source, PayloadSource::Direct);
    }

    #[test]
    fn fenced_block_is_recovered_byte_identical() {
        let doc = "{\"actions\": [{\"op\": \"split\", \"args\": {\"axis\": \"x\", \"ratio\": 0.5}}]}";
        let reply = format!("Here is the plan:\n```json\n{doc}\n```\nGood luck.");
        let parsed = parse_payload(&reply).unwrap();
        assert_eq!(parsed.consumed, doc);
        assert_eq!(parsed.source, PayloadSource::Fenced);
        assert_eq!(parsed.document["actions"][0]["args"]["ratio"], json!(0.5));
    }

    #[test]
    fn untagged_fence_is_accepted_and_other_languages_skipped() {
        let reply = "```python\nprint(1)\n```\n```\n[1, 2]\n```";
        let parsed = parse_payload(reply).unwrap();
        assert_eq!(parsed.document, json!([1, 2]));
        assert_eq!(parsed.source, PayloadSource::Fenced);
    }

    #[test]
    fn embedded_region_ignores_braces_inside_strings() {
        let doc = r#"{"steps": [{"binding": null, "call": "bind", "args": ["a } b"]}]}"#;
        let reply = format!("Sure {{not json}} then {doc} trailing words");
        let parsed = parse_payload(&reply).unwrap();
        assert_eq!(parsed.consumed, doc);
        assert_eq!(parsed.source, PayloadSource::Embedded);
        assert_eq!(parsed.document["steps"][0]["args"][0], "a } b");
    }

    #[test]
    fn trailing_content_inside_fence_is_surfaced() {
        let reply = "```json\n{\"actions\": []} {\"actions\": [1]}\n```";
        let err = parse_payload(reply).unwrap_err();
        assert_eq!(err.reason, ParseReason::TrailingContent);
    }

    #[test]
    fn second_document_in_prose_is_trailing_content() {
        let reply = "First {\"actions\": []} and also {\"actions\": [1]} please.";
        let err = parse_payload(reply).unwrap_err();
        assert_eq!(err.reason, ParseReason::TrailingContent);
        assert!(err.detail.contains("{\"actions\": [1]}"), "{}", err.detail);

        let parsed = parse_payload("Plan: {\"actions\": []} and {not json} after.").unwrap();
        assert_eq!(parsed.consumed, "{\"actions\": []}");
    }

    #[test]
    fn garbage_only_text_has_no_payload() {
        for reply in ["I cannot solve this puzzle.", "{ unbalanced", "[1, 2", "} ] {"] {
            let err = parse_payload(reply).unwrap_err();
            assert_eq!(err.reason, ParseReason::NoStructuredPayload, "{reply}");
        }
        assert_eq!(
            parse_payload("   ").unwrap_err().reason,
            ParseReason::EmptyResponse
        );
    }
}
