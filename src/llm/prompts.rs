/// The one sentence used for every out-of-domain answer.
pub const CANONICAL_REFUSAL: &str =
    "I can only help with SQL database queries. Please ask about your database data.";

const SCHEMA_SLOT: &str = "{schema}";
const PROMPT_SLOT: &str = "{prompt}";

/// Instruction template for SQL Server generation.  The refusal sentence,
/// the fence requirement and the `[INST]` delimiters are relied on by the
/// response reducer and by the configured stop sequences.
const SQL_SERVER_TEMPLATE: &str = r#"[INST] You are a specialized SQL query generator with STRICT limitations:

CRITICAL RULES:
1. You ONLY generate SQL queries for database operations
2. You MUST NOT answer any non-database related questions
3. If asked about anything other than SQL/database operations, respond with: "I can only help with SQL database queries."
4. NEVER provide general knowledge, programming advice, or personal opinions

TASK: Given the user's natural language input and database schema, generate a precise SQL Server query.

USER INPUT: {prompt}

DATABASE SCHEMA: {schema}

REQUIREMENTS:
- Use SQL Server syntax ONLY
- Reference ONLY the provided tables and columns
- If the request cannot be translated to a valid SQL query using the given schema, ask for clarification
- If the user asks about topics outside of database querying, decline politely
- Always wrap your SQL code in ``` markers
- Provide ONLY the SQL query, no explanations unless explicitly requested

RESPOND WITH ONLY:
1. The SQL query in ``` blocks
2. OR clarification questions about the database query
3. OR the decline message for non-DB topics

[/INST]"#;

/// Immutable instruction template with `{schema}` and `{prompt}` slots.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    text: &'static str,
}

impl PromptTemplate {
    /// The built-in SQL Server template.
    pub fn sql_server() -> Self {
        Self {
            text: SQL_SERVER_TEMPLATE,
        }
    }

    /// Render the template.
    ///
    /// Substitution is a single left-to-right pass over the template, so slot
    /// markers that appear inside `schema` or `user_query` are copied
    /// literally and never expanded.  No escaping is applied; this is the
    /// single place to add input sanitisation.
    pub fn build(&self, schema: &str, user_query: &str) -> String {
        let mut out = String::with_capacity(self.text.len() + schema.len() + user_query.len());
        let mut rest = self.text;

        loop {
            let next = [(SCHEMA_SLOT, schema), (PROMPT_SLOT, user_query)]
                .into_iter()
                .filter_map(|(slot, value)| rest.find(slot).map(|at| (at, slot, value)))
                .min_by_key(|(at, _, _)| *at);

            match next {
                Some((at, slot, value)) => {
                    out.push_str(&rest[..at]);
                    out.push_str(value);
                    rest = &rest[at + slot.len()..];
                }
                None => {
                    out.push_str(rest);
                    break;
                }
            }
        }

        out
    }
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::sql_server()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_substitutes_both_slots() {
        let prompt = PromptTemplate::sql_server().build("Orders(id, total)", "total sales");
        assert!(prompt.contains("USER INPUT: total sales"));
        assert!(prompt.contains("DATABASE SCHEMA: Orders(id, total)"));
        assert!(!prompt.contains(SCHEMA_SLOT));
        assert!(!prompt.contains(PROMPT_SLOT));
    }

    #[test]
    fn template_carries_contract() {
        let prompt = PromptTemplate::sql_server().build("", "");
        assert!(prompt.starts_with("[INST]"));
        assert!(prompt.ends_with("[/INST]"));
        assert!(prompt.contains("I can only help with SQL database queries."));
        assert!(prompt.contains("SQL Server syntax ONLY"));
        assert!(prompt.contains("```"));
    }

    #[test]
    fn slot_markers_in_user_text_are_not_expanded() {
        let prompt = PromptTemplate::sql_server().build("T(a)", "show {schema} please");
        assert!(prompt.contains("USER INPUT: show {schema} please"));
        assert_eq!(prompt.matches("T(a)").count(), 1);
    }

    #[test]
    fn canonical_refusal_starts_with_template_sentence() {
        assert!(CANONICAL_REFUSAL.starts_with("I can only help with SQL database queries."));
    }
}
