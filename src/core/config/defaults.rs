use chrono::{DateTime, Utc};

use crate::chat::{AgentConfig, PromptMessage, Role};
use crate::rag::RetrievalFilters;
use crate::tools::{create_note_tool_definition, search_tool_definition};

const ASSISTANT_PROMPT: &str = "You are a helpful assistant helping a user organize and manage their personal knowledge and notes. You will answer the user's question and help them with their request. You can search the knowledge base by using the search tool and create new notes by using the create note tool.";

const PRESEEDED_CONTEXT_NOTE: &str = "An initial query has been made and the context is already provided for you (so please do not call the search tool initially).";

const DAILY_NOTE_PROMPT: &str = "You are an experienced assistant helping a user who writes quick notes about their day. When the user writes something, respond with relevant information from earlier in their day and from their knowledge base.\n\n- Try not to give advice or be verbose; keep the focus on the user.\n- Use the search tool to find relevant notes.\n- Use the create note tool when a note should be written.\n- Motivate the user if necessary.\n\nWhen the user asks, you will create a note for them with all the relevant things they have noted in the day.";

const DEFAULT_USER_TEMPLATE: &str = "Context retrieved from your knowledge base for the query below: \n{CONTEXT}\n\n\nQuery for context above:\n{QUERY}";

const DEFAULT_LIMIT: usize = 15;

/// Agents offered to a user before they configure their own.
pub fn generate_default_agents() -> Vec<AgentConfig> {
    vec![
        agent(
            "Default",
            format!("{}\n\n{}", ASSISTANT_PROMPT, PRESEEDED_CONTEXT_NOTE),
            DEFAULT_USER_TEMPLATE,
        ),
        agent("Research Agent", ASSISTANT_PROMPT.to_string(), "{QUERY}"),
        agent("Daily Note Agent", DAILY_NOTE_PROMPT.to_string(), "{QUERY}"),
    ]
}

fn agent(name: &str, system_prompt: String, user_template: &str) -> AgentConfig {
    AgentConfig {
        name: name.to_string(),
        filters: RetrievalFilters {
            files: Vec::new(),
            limit: DEFAULT_LIMIT,
            min_date: Some(DateTime::<Utc>::UNIX_EPOCH),
            max_date: None,
            ..Default::default()
        },
        tool_definitions: vec![search_tool_definition(), create_note_tool_definition()],
        prompt_template: vec![
            PromptMessage {
                role: Role::System,
                content: system_prompt,
            },
            PromptMessage {
                role: Role::User,
                content: user_template.to_string(),
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_agents_have_unique_names_and_tools() {
        let agents = generate_default_agents();
        let names: Vec<&str> = agents.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["Default", "Research Agent", "Daily Note Agent"]);

        for agent in &agents {
            assert_eq!(agent.filters.limit, DEFAULT_LIMIT);
            let tools: Vec<&str> = agent
                .tool_definitions
                .iter()
                .map(|t| t.name.as_str())
                .collect();
            assert_eq!(tools, vec!["search", "createNote"]);
        }
    }

    #[test]
    fn only_default_agent_embeds_retrieved_context() {
        let agents = generate_default_agents();
        assert!(agents[0].prompt_template[1].content.contains("{CONTEXT}"));
        assert_eq!(agents[1].prompt_template[1].content, "{QUERY}");
    }
}
