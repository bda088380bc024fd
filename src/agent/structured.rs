//! Structured capability calls
//!
//! Every language-model call that must yield data goes through
//! `invoke_structured`: the raw text is parsed and validated here once,
//! and callers only ever see a `StructuredOutcome`.

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::error::StructuredOutcome;
use super::provider::LLMProvider;

/// A schema the model output must satisfy.
pub trait StructuredSchema: DeserializeOwned + Sized {
    const NAME: &'static str;

    /// Check bounds and normalize. Returning `Err` marks a schema mismatch.
    fn validate(self) -> Result<Self, String> {
        Ok(self)
    }
}

/// One model invocation.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub model: String,
    pub system: Option<String>,
    pub prompt: String,
}

impl TaskSpec {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system: None,
            prompt: prompt.into(),
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

pub async fn invoke_text(provider: &dyn LLMProvider, task: &TaskSpec) -> Result<String, String> {
    provider
        .generate(&task.model, task.prompt.clone(), task.system.clone())
        .await
        .map_err(|e| format!("{:#}", e))
}

pub async fn invoke_structured<T: StructuredSchema>(provider: &dyn LLMProvider, task: &TaskSpec) -> StructuredOutcome<T> {
    let raw = match invoke_text(provider, task).await {
        Ok(raw) => raw,
        Err(e) => {
            warn!("{} call failed: {}", T::NAME, e);
            return StructuredOutcome::ProviderFailure(e);
        }
    };
    match parse_structured::<T>(&raw) {
        Ok(v) => StructuredOutcome::Ok(v),
        Err(e) => {
            debug!("{} output did not match schema: {}", T::NAME, e);
            StructuredOutcome::SchemaMismatch(format!("{}: {}", T::NAME, e))
        }
    }
}

pub fn parse_structured<T: StructuredSchema>(raw: &str) -> Result<T, String> {
    let cleaned = strip_markdown_fences(raw);
    let value: T = match serde_json::from_str::<T>(cleaned) {
        Ok(v) => v,
        Err(first_err) => {
            let fragment = extract_json_fragment(cleaned, '{', '}')
                .ok_or_else(|| format!("no JSON object in response ({})", first_err))?;
            serde_json::from_str::<T>(&fix_json_issues(fragment)).map_err(|e| e.to_string())?
        }
    };
    value.validate()
}

fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let clean = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    clean.strip_suffix("```").unwrap_or(clean).trim()
}

/// First balanced `open`..`close` fragment, ignoring delimiters inside strings.
fn extract_json_fragment(text: &str, open: char, close: char) -> Option<&str> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;
    let mut start_idx = None;

    for (i, c) in text.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        if c == '\\' && in_string {
            escape_next = true;
            continue;
        }
        if c == '"' {
            in_string = !in_string;
            continue;
        }
        if in_string {
            continue;
        }
        if c == open {
            if depth == 0 {
                start_idx = Some(i);
            }
            depth += 1;
        } else if c == close && depth > 0 {
            depth -= 1;
            if depth == 0 {
                if let Some(start) = start_idx {
                    return Some(&text[start..=i]);
                }
            }
        }
    }
    None
}

/// Repairs trailing commas and curly-quote delimiters outside string
/// literals. String contents pass through unchanged.
fn fix_json_issues(json: &str) -> String {
    let chars: Vec<char> = json.chars().collect();
    let mut out = String::with_capacity(json.len());
    let mut in_string = false;
    let mut curly_string = false;
    let mut escape_next = false;

    for (i, &c) in chars.iter().enumerate() {
        if c.is_control() && c != '\n' && c != '\t' {
            continue;
        }
        if in_string {
            if escape_next {
                escape_next = false;
                out.push(c);
                continue;
            }
            match c {
                '\\' => {
                    escape_next = true;
                    out.push(c);
                }
                '"' if curly_string => out.push_str("\\\""),
                '"' => {
                    in_string = false;
                    out.push(c);
                }
                '\u{201D}' if curly_string => {
                    in_string = false;
                    out.push('"');
                }
                _ => out.push(c),
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                curly_string = false;
                out.push(c);
            }
            '\u{201C}' | '\u{201D}' => {
                in_string = true;
                curly_string = true;
                out.push('"');
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
                if !matches!(next, Some(']') | Some('}')) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Pair {
        items: Vec<u32>,
    }

    impl StructuredSchema for Pair {
        const NAME: &'static str = "pair";

        fn validate(self) -> Result<Self, String> {
            if self.items.is_empty() {
                Err("items must not be empty".into())
            } else {
                Ok(self)
            }
        }
    }

    struct Fixed(anyhow::Result<String>);

    #[async_trait]
    impl LLMProvider for Fixed {
        async fn generate(&self, _model: &str, _prompt: String, _system: Option<String>) -> anyhow::Result<String> {
            match &self.0 {
                Ok(s) => Ok(s.clone()),
                Err(e) => Err(anyhow::anyhow!("{}", e)),
            }
        }
    }

    #[test]
    fn test_parse_fenced_and_chatty_output() {
        let fenced = "```json\n{\"items\": [1, 2]}\n```";
        assert_eq!(parse_structured::<Pair>(fenced).unwrap(), Pair { items: vec![1, 2] });
        let chatty = "Sure! Here is the data: {\"items\": [3,],} Hope it helps {x}";
        assert_eq!(parse_structured::<Pair>(chatty).unwrap(), Pair { items: vec![3] });
    }

    #[test]
    fn test_repair_leaves_string_contents_alone() {
        let fixed = fix_json_issues(r#"{"items": [{"claim": "Mayor: \"done,]\" and “soon,}”"},]}"#);
        let v: serde_json::Value = serde_json::from_str(&fixed).unwrap();
        assert_eq!(v["items"][0]["claim"], "Mayor: \"done,]\" and “soon,}”");
        assert_eq!(v["items"].as_array().map(Vec::len), Some(1));

        let fixed = fix_json_issues("{“claim”: “rates, then cuts,]”,}");
        let v: serde_json::Value = serde_json::from_str(&fixed).unwrap();
        assert_eq!(v["claim"], "rates, then cuts,]");
    }

    #[test]
    fn test_validation_failure_is_mismatch() {
        assert!(parse_structured::<Pair>("{\"items\": []}").is_err());
    }

    #[tokio::test]
    async fn test_invoke_tags_failures() {
        let task = TaskSpec::new("m", "p");
        let out = invoke_structured::<Pair>(&Fixed(Err(anyhow::anyhow!("timeout"))), &task).await;
        assert!(matches!(out, StructuredOutcome::ProviderFailure(_)));
        let out = invoke_structured::<Pair>(&Fixed(Ok("no json here".into())), &task).await;
        assert!(matches!(out, StructuredOutcome::SchemaMismatch(_)));
        let out = invoke_structured::<Pair>(&Fixed(Ok("{\"items\":[7]}".into())), &task).await;
        assert_eq!(out, StructuredOutcome::Ok(Pair { items: vec![7] }));
    }
}
