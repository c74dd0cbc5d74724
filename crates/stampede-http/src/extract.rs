//! Ordered extraction strategies over JSON response bodies

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

const BOM: char = '\u{feff}';

/// Parse a response body as JSON, tolerating surrounding whitespace and a
/// leading byte-order mark.
pub fn parse_json_body(body: &str) -> Option<Value> {
    let trimmed = body.trim().trim_start_matches(BOM).trim_start();
    if trimmed.is_empty() {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

type Strategy<T> = Arc<dyn Fn(&Value) -> Option<T> + Send + Sync>;

/// Candidate locations for one value in a JSON document, tried in order.
/// The first strategy that yields a value wins.
pub struct ExtractionChain<T> {
    strategies: Vec<(String, Strategy<T>)>,
}

impl<T> Clone for ExtractionChain<T> {
    fn clone(&self) -> Self {
        Self {
            strategies: self.strategies.clone(),
        }
    }
}

impl<T> fmt::Debug for ExtractionChain<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.strategies.iter().map(|(label, _)| label))
            .finish()
    }
}

impl<T> Default for ExtractionChain<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ExtractionChain<T> {
    pub fn new() -> Self {
        Self { strategies: Vec::new() }
    }

    /// Custom strategy; `label` shows up in debug output.
    pub fn custom<F>(mut self, label: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Value) -> Option<T> + Send + Sync + 'static,
    {
        self.strategies.push((label.into(), Arc::new(f)));
        self
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// First value any strategy yields.
    pub fn extract(&self, document: &Value) -> Option<T> {
        self.strategies.iter().find_map(|(_, strategy)| strategy(document))
    }

    /// Parse `body` (see [`parse_json_body`]) and extract from it.
    pub fn extract_body(&self, body: &str) -> Option<T> {
        parse_json_body(body).and_then(|document| self.extract(&document))
    }
}

impl<T: DeserializeOwned + 'static> ExtractionChain<T> {
    /// Deserialize the value at a JSON pointer (`/resultData/tokens/accessToken`).
    /// Null values are skipped.
    pub fn pointer(self, pointer: impl Into<String>) -> Self {
        let pointer = pointer.into();
        let label = format!("pointer {}", pointer);
        self.custom(label, move |document| {
            document
                .pointer(&pointer)
                .filter(|value| !value.is_null())
                .and_then(|value| T::deserialize(value).ok())
        })
    }
}

impl<T: DeserializeOwned + 'static> ExtractionChain<Vec<T>> {
    /// Array at a JSON pointer (`""` for the root). Elements that do not
    /// deserialize are dropped.
    pub fn array_at(self, pointer: impl Into<String>) -> Self {
        let pointer = pointer.into();
        let label = format!("array {}", if pointer.is_empty() { "/" } else { &pointer });
        self.custom(label, move |document| {
            let items = document.pointer(&pointer)?.as_array()?;
            Some(
                items
                    .iter()
                    .filter_map(|item| T::deserialize(item).ok())
                    .collect(),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_first_successful_strategy_wins() {
        let chain = ExtractionChain::<String>::new()
            .pointer("/resultData/tokens/accessToken")
            .pointer("/token");

        let nested = json!({"resultData": {"tokens": {"accessToken": "abc"}}, "token": "flat"});
        assert_eq!(chain.extract(&nested).as_deref(), Some("abc"));

        let flat = json!({"token": "flat"});
        assert_eq!(chain.extract(&flat).as_deref(), Some("flat"));

        let neither = json!({"resultData": {"tokens": {"accessToken": null}}});
        assert_eq!(chain.extract(&neither), None);
    }

    #[test]
    fn test_array_at_root_and_nested() {
        let chain = ExtractionChain::<Vec<u32>>::new().array_at("").array_at("/data");

        assert_eq!(chain.extract(&json!([1, 2, 3])), Some(vec![1, 2, 3]));
        assert_eq!(chain.extract(&json!({"data": [4, "x", 5]})), Some(vec![4, 5]));
        assert_eq!(chain.extract(&json!({"data": {"nested": []}})), None);
    }

    #[test]
    fn test_custom_strategy() {
        let chain = ExtractionChain::<usize>::new()
            .custom("object size", |doc| doc.as_object().map(|o| o.len()));
        assert_eq!(chain.extract(&json!({"a": 1, "b": 2})), Some(2));
        assert_eq!(format!("{:?}", chain), "[\"object size\"]");
    }

    #[test]
    fn test_bom_prefixed_body() {
        let chain = ExtractionChain::<Vec<String>>::new().array_at("");
        let body = "\u{feff}  [\"a\", \"b\"]\n";
        assert_eq!(chain.extract_body(body), Some(vec!["a".to_string(), "b".to_string()]));

        assert!(parse_json_body("  ").is_none());
        assert!(parse_json_body("<html>").is_none());
    }
}
