//! Agent configuration and first-turn prompt assembly.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::message::{Message, Role};
use crate::rag::{RetrievalFilters, RetrievalResult};
use crate::tools::ToolDefinition;

pub const CONTEXT_PLACEHOLDER: &str = "{CONTEXT}";
pub const QUERY_PLACEHOLDER: &str = "{QUERY}";

static FILE_REFERENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"@([^\s@,;:!?()]+\.md)\b").expect("Invalid file reference regex")
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub name: String,
    #[serde(flatten)]
    pub filters: RetrievalFilters,
    #[serde(default)]
    pub tool_definitions: Vec<ToolDefinition>,
    #[serde(default)]
    pub prompt_template: Vec<PromptMessage>,
}

impl AgentConfig {
    /// Messages that open a new chat. User entries carry the raw query as
    /// visible content and the retrieval results as provenance.
    pub fn seed_messages(
        &self,
        query: &str,
        context: &str,
        results: &[RetrievalResult],
    ) -> Vec<Message> {
        if self.prompt_template.is_empty() {
            return vec![grounded_user_message(
                default_grounding_prompt(context, query),
                query,
                results,
            )];
        }

        self.prompt_template
            .iter()
            .map(|entry| match entry.role {
                Role::User => grounded_user_message(
                    entry
                        .content
                        .replace(CONTEXT_PLACEHOLDER, context)
                        .replace(QUERY_PLACEHOLDER, query),
                    query,
                    results,
                ),
                role => Message::new(role, entry.content.clone()),
            })
            .collect()
    }

    /// Filters for this turn, with any `@note.md` references in the input
    /// added to the explicit file selection.
    pub fn filters_for_input(&self, input: &str) -> RetrievalFilters {
        let mut filters = self.filters.clone();
        for reference in extract_file_references(input) {
            if !filters.files.contains(&reference) {
                filters.files.push(reference);
            }
        }
        filters
    }
}

pub fn default_grounding_prompt(context: &str, query: &str) -> String {
    format!(
        "Based on the following context answer the question down below. \n\n\nContext: \n{}\n\n\nQuery:\n{}",
        context, query
    )
}

fn grounded_user_message(content: String, query: &str, results: &[RetrievalResult]) -> Message {
    let mut message = Message::user(content);
    message.visible_content = Some(query.to_string());
    message.context = results.to_vec();
    message
}

/// `@name.md` mentions in order of first appearance.
pub fn extract_file_references(input: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    FILE_REFERENCE_RE
        .captures_iter(input)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .filter(|path| seen.insert(path.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(path: &str, content: &str) -> RetrievalResult {
        RetrievalResult {
            content: content.to_string(),
            source_path: path.to_string(),
            file_modified: None,
            file_created: None,
            score: None,
        }
    }

    #[test]
    fn empty_template_uses_default_grounding_prompt() {
        let agent = AgentConfig::default();
        let results = vec![result("a.md", "alpha")];
        let messages = agent.seed_messages("what is alpha", "alpha", &results);

        assert_eq!(messages.len(), 1);
        assert_eq!(
            messages[0].text(),
            "Based on the following context answer the question down below. \n\n\nContext: \nalpha\n\n\nQuery:\nwhat is alpha"
        );
        assert_eq!(messages[0].display_text(), "what is alpha");
        assert_eq!(messages[0].context, results);
    }

    #[test]
    fn template_substitutes_placeholders_in_user_entries_only() {
        let agent = AgentConfig {
            prompt_template: vec![
                PromptMessage {
                    role: Role::System,
                    content: "Keep {QUERY} literal here".into(),
                },
                PromptMessage {
                    role: Role::User,
                    content: "ctx={CONTEXT} q={QUERY}".into(),
                },
            ],
            ..Default::default()
        };
        let messages = agent.seed_messages("why", "because", &[]);

        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].text(), "Keep {QUERY} literal here");
        assert_eq!(messages[1].text(), "ctx=because q=why");
        assert_eq!(messages[1].visible_content.as_deref(), Some("why"));
    }

    #[test]
    fn file_references_are_extracted_once_in_order() {
        let refs = extract_file_references("compare @b.md with @notes/a.md, and @b.md again");
        assert_eq!(refs, vec!["b.md".to_string(), "notes/a.md".to_string()]);
        assert!(extract_file_references("mail me @ home.md").is_empty());
    }

    #[test]
    fn references_extend_agent_file_filter() {
        let agent = AgentConfig {
            filters: RetrievalFilters {
                files: vec!["a.md".into()],
                limit: 5,
                ..Default::default()
            },
            ..Default::default()
        };
        let filters = agent.filters_for_input("see @a.md and @c.md");
        assert_eq!(filters.files, vec!["a.md".to_string(), "c.md".to_string()]);
        assert_eq!(filters.limit, 5);
    }

    #[test]
    fn filter_fields_flatten_into_agent_json() {
        let agent: AgentConfig = serde_json::from_value(json!({
            "name": "Research Agent",
            "files": [],
            "limit": 15,
            "search_mode": "hybrid"
        }))
        .unwrap();
        assert_eq!(agent.filters.limit, 15);
        assert_eq!(agent.filters.search_mode, crate::rag::SearchMode::Hybrid);
        assert!(agent.prompt_template.is_empty());
    }
}
