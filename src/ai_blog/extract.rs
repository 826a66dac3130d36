use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

static OBJECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{[\s\S]*\}").expect("object pattern"));
static ARRAY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[\s\S]*\]").expect("array pattern"));

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";

#[derive(Clone, Copy)]
enum Stage {
    AfterThink,
    Whole,
    Regex,
}

/// First JSON object recoverable from a model reply.
pub fn extract_json_object(text: &str) -> Option<Map<String, Value>> {
    match extract(text, &OBJECT_RE, |value, _| value.is_object())? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// First JSON array recoverable from a model reply. The regex pass only accepts non-empty arrays.
pub fn extract_json_array(text: &str) -> Option<Vec<Value>> {
    let accept = |value: &Value, stage: Stage| match (value.as_array(), stage) {
        (Some(items), Stage::Regex) => !items.is_empty(),
        (Some(_), _) => true,
        (None, _) => false,
    };
    match extract(text, &ARRAY_RE, accept)? {
        Value::Array(items) => Some(items),
        _ => None,
    }
}

fn extract(text: &str, pattern: &Regex, accept: impl Fn(&Value, Stage) -> bool) -> Option<Value> {
    if text.contains(THINK_OPEN) {
        match after_think(text) {
            Some(rest) => {
                if let Some(value) = parse(&rest).filter(|value| accept(value, Stage::AfterThink)) {
                    return Some(value);
                }
                tracing::error!("Could not parse JSON after </think>. Preview: {}", super::llm::preview(&rest, 100));
            }
            None => tracing::error!("Found <think> tag but couldn't locate closing </think> tag"),
        }
    }

    if let Some(value) = parse(&strip_code_fence(text)).filter(|value| accept(value, Stage::Whole)) {
        return Some(value);
    }

    let found = pattern
        .find_iter(text)
        .filter_map(|candidate| parse(candidate.as_str()))
        .find(|value| accept(value, Stage::Regex));
    if found.is_none() {
        tracing::error!("Could not find valid JSON in the response using regex");
    }
    found
}

fn after_think(text: &str) -> Option<String> {
    let end = text.find(THINK_CLOSE)? + THINK_CLOSE.len();
    let rest = text[end..].trim();
    if let Some(fenced) = rest.strip_prefix("```json") {
        if let Some((inner, _)) = fenced.split_once("```") {
            return Some(inner.trim().to_string());
        }
    }
    Some(rest.to_string())
}

fn strip_code_fence(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(stripped) = trimmed
        .strip_prefix("```json")
        .and_then(|s| s.strip_suffix("```"))
    {
        return stripped.trim().to_string();
    }
    if let Some(stripped) = trimmed
        .strip_prefix("```")
        .and_then(|s| s.strip_suffix("```"))
    {
        return stripped.trim().to_string();
    }
    trimmed.to_string()
}

fn parse(candidate: &str) -> Option<Value> {
    serde_json::from_str::<Value>(candidate).ok()
}

/// String field of an extracted object, `None` when absent or not a string.
pub fn string_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(Value::as_str).map(ToString::to_string)
}

/// String list field; non-string items are skipped.
pub fn string_list_field(map: &Map<String, Value>, key: &str) -> Vec<String> {
    map.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_object() {
        let map = extract_json_object(r#"{"title": "Hello"}"#).unwrap();
        assert_eq!(map["title"], "Hello");
    }

    #[test]
    fn think_block_then_fenced_json() {
        let reply = "<think>I should plan {carefully}</think>\n```json\n{\"title\": \"After\"}\n```\ntrailing";
        let map = extract_json_object(reply).unwrap();
        assert_eq!(map["title"], "After");
    }

    #[test]
    fn fenced_whole_reply() {
        let reply = "```json\n{\"title\": \"Fenced\"}\n```";
        assert_eq!(extract_json_object(reply).unwrap()["title"], "Fenced");
    }

    #[test]
    fn regex_fallback_finds_embedded_object() {
        let reply = "Sure! Here is your post: {\"title\": \"Embedded\", \"tags\": [\"a\"]} Enjoy.";
        let map = extract_json_object(reply).unwrap();
        assert_eq!(map["title"], "Embedded");
        assert_eq!(string_list_field(&map, "tags"), vec!["a"]);
    }

    #[test]
    fn unclosed_think_falls_back_to_regex() {
        let reply = "<think>never closed {\"title\": \"Late\"}";
        assert_eq!(extract_json_object(reply).unwrap()["title"], "Late");
    }

    #[test]
    fn arrays_are_not_objects() {
        assert!(extract_json_object("[1, 2]").is_none());
        assert!(extract_json_object("no json here").is_none());
    }

    #[test]
    fn array_extraction() {
        let ideas = extract_json_array(r#"[{"title": "A", "description": "B"}]"#).unwrap();
        assert_eq!(ideas, vec![json!({"title": "A", "description": "B"})]);

        let embedded = extract_json_array("Ideas: [{\"title\": \"X\"}] done").unwrap();
        assert_eq!(embedded.len(), 1);

        let think = extract_json_array("<think>hmm</think>```json\n[{\"title\": \"T\"}]\n```").unwrap();
        assert_eq!(think[0]["title"], "T");
    }

    #[test]
    fn empty_array_only_accepted_when_whole_reply() {
        assert_eq!(extract_json_array("[]"), Some(Vec::new()));
        assert_eq!(extract_json_array("Nothing to offer: [] sorry"), None);
    }

    #[test]
    fn field_helpers_ignore_wrong_types() {
        let map = extract_json_object(r#"{"title": 5, "tags": ["a", 1, "b"]}"#).unwrap();
        assert_eq!(string_field(&map, "title"), None);
        assert_eq!(string_list_field(&map, "tags"), vec!["a", "b"]);
        assert!(string_list_field(&map, "missing").is_empty());
    }
}
