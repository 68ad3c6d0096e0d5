//! JSON extraction utilities for parsing LLM responses.
//!
//! Completion services asked for a JSON object do not always return a bare
//! object: answers may be fenced in markdown, preceded by reasoning text, or
//! cut off by a token limit. The extraction tries, in order:
//! 1. ```json fenced blocks
//! 2. generic ``` fenced blocks
//! 3. the whole (trimmed) content when it starts with '{'
//! 4. the largest valid object anywhere in the content, preferring later ones
//!
//! # Example
//!
//! ```
//! use evo_forge::utils::json_extraction::try_extract_json_object;
//!
//! let response = "Sure! ```json\n{\"code\": \"print(1)\"}\n```";
//! let json = try_extract_json_object(response).into_result().unwrap();
//! assert_eq!(json, "{\"code\": \"print(1)\"}");
//! ```

use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

/// Error type for JSON extraction failures
#[derive(Debug, Clone, Error, PartialEq)]
pub enum JsonExtractionError {
    #[error("JSON appears truncated: {unclosed_braces} unclosed braces, {unclosed_brackets} unclosed brackets. Partial: {partial_preview}...")]
    Truncated {
        partial_preview: String,
        unclosed_braces: usize,
        unclosed_brackets: usize,
    },
    #[error("No JSON content found in response. Content starts with: '{content_preview}'")]
    NotFound { content_preview: String },
    #[error("Response JSON is not an object")]
    NotAnObject,
}

/// Result of JSON extraction attempt
#[derive(Debug, Clone, PartialEq)]
pub enum JsonExtractionResult {
    /// Successfully extracted a valid JSON object
    Success(String),
    /// JSON appears to be truncated (started but didn't complete)
    Truncated {
        partial_json: String,
        unclosed_braces: usize,
        unclosed_brackets: usize,
    },
    /// No JSON-like content found in response
    NotFound { content_preview: String },
}

impl JsonExtractionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, JsonExtractionResult::Success(_))
    }

    pub fn is_truncated(&self) -> bool {
        matches!(self, JsonExtractionResult::Truncated { .. })
    }

    /// Converts the result to a Result with a descriptive error
    pub fn into_result(self) -> Result<String, JsonExtractionError> {
        match self {
            JsonExtractionResult::Success(json) => Ok(json),
            JsonExtractionResult::Truncated {
                partial_json,
                unclosed_braces,
                unclosed_brackets,
            } => Err(JsonExtractionError::Truncated {
                partial_preview: preview(&partial_json, 100),
                unclosed_braces,
                unclosed_brackets,
            }),
            JsonExtractionResult::NotFound { content_preview } => {
                Err(JsonExtractionError::NotFound { content_preview })
            }
        }
    }
}

/// Analysis result for JSON structure
#[derive(Debug, Clone, PartialEq)]
pub struct JsonStructureAnalysis {
    /// Number of unclosed braces ('{' without matching '}')
    pub unclosed_braces: usize,
    /// Number of unclosed brackets ('[' without matching ']')
    pub unclosed_brackets: usize,
    /// Whether we ended inside a string literal
    pub in_string: bool,
    /// The position where JSON-like content starts (first '{' or '[')
    pub json_start: Option<usize>,
}

impl JsonStructureAnalysis {
    pub fn is_truncated(&self) -> bool {
        self.unclosed_braces > 0 || self.unclosed_brackets > 0 || self.in_string
    }
}

/// Scans `s` tracking brace/bracket depth outside string literals.
pub fn analyze_json_structure(s: &str) -> JsonStructureAnalysis {
    let mut brace_depth: isize = 0;
    let mut bracket_depth: isize = 0;
    let mut in_string = false;
    let mut escape_next = false;
    let mut json_start: Option<usize> = None;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => {
                json_start.get_or_insert(i);
                brace_depth += 1;
            }
            '}' if !in_string => brace_depth -= 1,
            '[' if !in_string => {
                json_start.get_or_insert(i);
                bracket_depth += 1;
            }
            ']' if !in_string => bracket_depth -= 1,
            _ => {}
        }
    }

    JsonStructureAnalysis {
        unclosed_braces: brace_depth.max(0) as usize,
        unclosed_brackets: bracket_depth.max(0) as usize,
        in_string,
        json_start,
    }
}

/// Finds the index of the '}' closing the object that `s` starts with.
///
/// String literals and escape sequences are skipped.
pub fn find_matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}

/// Extract the object from a ```json ... ``` code block.
pub fn extract_from_json_code_block(content: &str) -> Option<String> {
    let re = Regex::new(r"```json\s*\n?([\s\S]*?)\n?```").ok()?;
    let caps = re.captures(content)?;
    first_object(caps.get(1)?.as_str())
}

/// Extract the object from a generic ``` ... ``` code block.
pub fn extract_from_generic_code_block(content: &str) -> Option<String> {
    let re = Regex::new(r"```(?:\w+)?\s*\n?([\s\S]*?)\n?```").ok()?;
    let caps = re.captures(content)?;
    first_object(caps.get(1)?.as_str())
}

/// Largest valid JSON object in `content`; ties go to the later occurrence.
///
/// Reasoning models often emit example fragments before the real answer,
/// which is usually both the biggest object and the last one.
pub fn extract_last_valid_json_object(content: &str) -> Option<String> {
    content
        .char_indices()
        .filter(|(_, c)| *c == '{')
        .filter_map(|(start, _)| {
            let substr = &content[start..];
            let end = find_matching_brace(substr)?;
            let candidate = &substr[..=end];
            is_valid_object(candidate).then(|| (start, candidate))
        })
        .max_by(|(pos_a, a), (pos_b, b)| a.len().cmp(&b.len()).then(pos_a.cmp(pos_b)))
        .map(|(_, json)| json.to_string())
}

/// Attempts to extract a JSON object from an LLM response.
pub fn try_extract_json_object(content: &str) -> JsonExtractionResult {
    let trimmed = content.trim();

    let fenced = extract_from_json_code_block(trimmed)
        .filter(|json| is_valid_object(json))
        .or_else(|| extract_from_generic_code_block(trimmed).filter(|json| is_valid_object(json)));
    if let Some(json) = fenced {
        return JsonExtractionResult::Success(json);
    }

    if trimmed.starts_with('{') {
        if let Some(end) = find_matching_brace(trimmed) {
            let candidate = &trimmed[..=end];
            if is_valid_object(candidate) {
                return JsonExtractionResult::Success(candidate.to_string());
            }
        }
    }

    if let Some(json) = extract_last_valid_json_object(trimmed) {
        return JsonExtractionResult::Success(json);
    }

    let analysis = analyze_json_structure(trimmed);
    if let Some(start) = analysis.json_start {
        if analysis.is_truncated() {
            return JsonExtractionResult::Truncated {
                partial_json: trimmed[start..].to_string(),
                unclosed_braces: analysis.unclosed_braces,
                unclosed_brackets: analysis.unclosed_brackets,
            };
        }
    }

    JsonExtractionResult::NotFound {
        content_preview: preview(trimmed, 50),
    }
}

/// Extracts and parses the JSON object in an LLM response.
pub fn parse_json_object(content: &str) -> Result<Map<String, Value>, JsonExtractionError> {
    let json = try_extract_json_object(content).into_result()?;
    match serde_json::from_str::<Value>(&json) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(JsonExtractionError::NotAnObject),
    }
}

fn first_object(block: &str) -> Option<String> {
    let block = block.trim();
    let start = block.find('{')?;
    let end = find_matching_brace(&block[start..])?;
    Some(block[start..=start + end].to_string())
}

fn is_valid_object(candidate: &str) -> bool {
    matches!(
        serde_json::from_str::<Value>(candidate),
        Ok(Value::Object(_))
    )
}

fn preview(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
