use serde::{Deserialize, Serialize};

/// One curated few-shot demonstration. Field aliases accept both example
/// bank spellings in circulation (`input`/`query`/`result` and
/// `Question`/`SQLQuery`/`SQLResult`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Example {
    #[serde(alias = "input", alias = "Question")]
    pub question: String,
    #[serde(alias = "query", alias = "SQLQuery")]
    pub sql_query: String,
    #[serde(alias = "result", alias = "SQLResult")]
    pub sql_result: String,
}

/// Which example fields feed the stored embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbedFields {
    #[default]
    All,
    Question,
}

impl Example {
    pub fn new(
        question: impl Into<String>,
        sql_query: impl Into<String>,
        sql_result: impl Into<String>,
    ) -> Self {
        Self {
            question: question.into(),
            sql_query: sql_query.into(),
            sql_result: sql_result.into(),
        }
    }

    pub fn embedding_text(&self, fields: EmbedFields) -> String {
        match fields {
            EmbedFields::All => [
                self.question.as_str(),
                self.sql_query.as_str(),
                self.sql_result.as_str(),
            ]
            .join(" "),
            EmbedFields::Question => self.question.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoredExample {
    pub example: Example,
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_text_joins_all_fields() {
        let example = Example::new("How many users?", "SELECT COUNT(*) FROM users", "7");
        assert_eq!(
            example.embedding_text(EmbedFields::All),
            "How many users? SELECT COUNT(*) FROM users 7"
        );
        assert_eq!(
            example.embedding_text(EmbedFields::Question),
            "How many users?"
        );
    }

    #[test]
    fn test_deserialize_accepts_aliases() {
        let legacy: Example = serde_json::from_str(
            r#"{"Question": "q", "SQLQuery": "SELECT 1", "SQLResult": "1"}"#,
        )
        .unwrap();
        let short: Example =
            serde_json::from_str(r#"{"input": "q", "query": "SELECT 1", "result": "1"}"#).unwrap();
        assert_eq!(legacy, short);
    }

    #[test]
    fn test_deserialize_rejects_missing_field() {
        let parsed = serde_json::from_str::<Example>(r#"{"question": "q", "sql_query": "SELECT 1"}"#);
        assert!(parsed.is_err());
    }
}
