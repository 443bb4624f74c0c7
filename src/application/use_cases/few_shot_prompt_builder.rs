//! Few-shot prompt assembly for SQL generation and answer synthesis
//!
//! Templates are plain text with `{name}` placeholders. Unknown placeholders
//! are left untouched so literal braces in policy text survive rendering.

use crate::domain::error::{AppError, Result};
use crate::domain::example::Example;
use crate::domain::prompt::{ChatMessage, StructuredPrompt};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static PLACEHOLDER_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{([a-z_]+)\}").unwrap());

const EXAMPLE_PLACEHOLDERS: [&str; 3] = ["question", "sql_query", "sql_result"];

/// Fill `{name}` placeholders from `values`; anything else stays as written.
pub fn render(template: &str, values: &[(&str, &str)]) -> String {
    PLACEHOLDER_PATTERN
        .replace_all(template, |caps: &Captures| {
            let name = &caps[1];
            values
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| value.to_string())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

#[derive(Debug, Clone)]
pub struct PromptTemplates {
    pub generation_policy: String,
    pub synthesis_policy: String,
    pub example_template: String,
}

impl PromptTemplates {
    /// The example template must reference every example field.
    pub fn new(
        generation_policy: impl Into<String>,
        synthesis_policy: impl Into<String>,
        example_template: impl Into<String>,
    ) -> Result<Self> {
        let example_template = example_template.into();
        for name in EXAMPLE_PLACEHOLDERS {
            if !example_template.contains(&format!("{{{}}}", name)) {
                return Err(AppError::Config(format!(
                    "Example template is missing the {{{}}} placeholder",
                    name
                )));
            }
        }
        Ok(Self {
            generation_policy: generation_policy.into(),
            synthesis_policy: synthesis_policy.into(),
            example_template,
        })
    }
}

pub struct FewShotPromptBuilder {
    templates: PromptTemplates,
    top_k: usize,
}

impl FewShotPromptBuilder {
    pub fn new(templates: PromptTemplates, top_k: usize) -> Self {
        Self { templates, top_k }
    }

    /// System instruction, then one user/assistant pair per example, then
    /// the live question.
    pub fn assemble(&self, question: &str, examples: &[Example], system_policy: &str) -> StructuredPrompt {
        let mut prompt = StructuredPrompt::new();
        prompt.push(ChatMessage::system(system_policy));
        for example in examples {
            prompt.push(ChatMessage::user(example.question.clone()));
            prompt.push(ChatMessage::assistant(self.render_example(example)));
        }
        prompt.push(ChatMessage::user(question));
        prompt
    }

    /// `table_info` is the schema text of the active connection.
    pub fn generation_prompt(
        &self,
        question: &str,
        examples: &[Example],
        dialect: &str,
        table_info: &str,
    ) -> StructuredPrompt {
        let top_k = self.top_k.to_string();
        let policy = render(
            &self.templates.generation_policy,
            &[("dialect", dialect), ("top_k", &top_k), ("table_info", table_info)],
        );
        self.assemble(question, examples, &policy)
    }

    /// High-confidence examples and the synthesis policy share the system
    /// turn; the question, SQL and result make up the user turn.
    pub fn synthesis_prompt(
        &self,
        question: &str,
        sql: &str,
        result: &str,
        examples: &[Example],
    ) -> StructuredPrompt {
        let mut system = String::new();
        if !examples.is_empty() {
            system.push_str("Reference examples:\n\n");
            for example in examples {
                system.push_str(&format!(
                    "Question: {}\nSQL Query: {}\nSQL Result: {}\n\n",
                    example.question, example.sql_query, example.sql_result
                ));
            }
        }
        system.push_str(self.templates.synthesis_policy.trim());

        let user = format!(
            "Now, given the following user question, corresponding SQL query, and SQL result, answer the user question.\n\n\
             Question: {}\nSQL Query: {}\nSQL Result: {}\n\nKeep the answer concise.",
            question, sql, result
        );

        let mut prompt = StructuredPrompt::new();
        prompt.push(ChatMessage::system(system));
        prompt.push(ChatMessage::user(user));
        prompt
    }

    fn render_example(&self, example: &Example) -> String {
        render(
            &self.templates.example_template,
            &[
                ("question", &example.question),
                ("sql_query", &example.sql_query),
                ("sql_result", &example.sql_result),
            ],
        )
        .trim()
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::prompt::Role;

    fn builder() -> FewShotPromptBuilder {
        let templates = PromptTemplates::new(
            "You write {dialect} queries returning at most {top_k} rows. Use {braces} literally.",
            "Answer concisely.",
            "```sql\n{sql_query}\n```\nSQLResult: {sql_result}",
        );
        // example template lacks {question}
        assert!(templates.is_err());

        let templates = PromptTemplates::new(
            "You write {dialect} queries returning at most {top_k} rows. Use {braces} literally.",
            "Answer concisely.",
            "Question: {question}\n```sql\n{sql_query}\n```\nSQLResult: {sql_result}",
        )
        .unwrap();
        FewShotPromptBuilder::new(templates, 5)
    }

    #[test]
    fn test_render_leaves_unknown_placeholders() {
        assert_eq!(
            render("{a} and {b} and {}", &[("a", "x")]),
            "x and {b} and {}"
        );
    }

    #[test]
    fn test_render_does_not_reexpand_values() {
        assert_eq!(
            render("{question}", &[("question", "{sql_query}"), ("sql_query", "boom")]),
            "{sql_query}"
        );
    }

    #[test]
    fn test_generation_prompt_without_examples() {
        let prompt = builder().generation_prompt("How many customers?", &[], "SQLite", "");
        assert_eq!(prompt.len(), 2);
        let messages = prompt.messages();
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(
            messages[0].content,
            "You write SQLite queries returning at most 5 rows. Use {braces} literally."
        );
        assert_eq!(prompt.last_user(), Some("How many customers?"));
    }

    #[test]
    fn test_generation_prompt_renders_example_turns_in_order() {
        let examples = vec![
            Example::new("How many orders?", "SELECT COUNT(*) FROM orders", "7"),
            Example::new("List products", "SELECT name FROM products", "[]"),
        ];
        let prompt = builder().generation_prompt("How many customers?", &examples, "MySQL", "");
        let messages = prompt.messages();

        assert_eq!(messages.len(), 6);
        assert_eq!(messages[1].role, Role::User);
        assert_eq!(messages[1].content, "How many orders?");
        assert_eq!(messages[2].role, Role::Assistant);
        assert!(messages[2].content.contains("```sql\nSELECT COUNT(*) FROM orders\n```"));
        assert_eq!(messages[3].content, "List products");
        assert_eq!(messages[5].content, "How many customers?");
    }

    #[test]
    fn test_generation_prompt_carries_schema() {
        let templates = PromptTemplates::new(
            "Dialect {dialect}.\n\nOnly use these tables:\n{table_info}",
            "",
            "{question} {sql_query} {sql_result}",
        )
        .unwrap();
        let schema = "CREATE TABLE customers (\n\tid integer,\n\tname text\n)";
        let prompt = FewShotPromptBuilder::new(templates, 5).generation_prompt(
            "How many customers?",
            &[],
            "PostgreSQL",
            schema,
        );

        assert_eq!(
            prompt.messages()[0].content,
            format!("Dialect PostgreSQL.\n\nOnly use these tables:\n{}", schema)
        );
    }

    #[test]
    fn test_synthesis_prompt_layout() {
        let examples = vec![Example::new("How many customers?", "SELECT COUNT(*) FROM customers", "42")];
        let prompt = builder().synthesis_prompt(
            "How many customers?",
            "SELECT COUNT(*) FROM customers",
            "[[42]]",
            &examples,
        );
        let messages = prompt.messages();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].content.starts_with("Reference examples:"));
        assert!(messages[0].content.ends_with("Answer concisely."));
        assert!(messages[1].content.contains("SQL Result: [[42]]"));

        let bare = builder().synthesis_prompt("q", "", "nothing", &[]);
        assert_eq!(bare.messages()[0].content, "Answer concisely.");
    }
}
