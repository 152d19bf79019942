/// Tool names that change schema or rows. Refused outright in read-only mode.
pub const MUTATING_TOOLS: &[&str] = &[
    "create_table",
    "add_column",
    "drop_table",
    "drop_column",
    "rename_column",
    "insert_rows",
    "update_rows",
    "delete_rows",
    "update",
    "delete",
    "insert",
];

const ANALYTIC_WORDS: &[&str] = &[
    "show",
    "list",
    "count",
    "average",
    "sum",
    "top",
    "aggregate",
    "group",
    "describe",
    "plot",
    "chart",
    "time-series",
];

const MUTATIVE_WORDS: &[&str] = &["create", "insert", "update", "delete", "drop", "add"];

pub fn is_mutating(tool_name: &str) -> bool {
    MUTATING_TOOLS.contains(&tool_name)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow,
    Deny { reason_code: &'static str, user_message: String, fallback_path: &'static str },
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GuardrailPolicy {
    pub read_only: bool,
}

impl GuardrailPolicy {
    pub fn new(read_only: bool) -> Self {
        Self { read_only }
    }

    pub fn evaluate(&self, tool_name: &str) -> GuardrailDecision {
        if self.read_only && is_mutating(tool_name) {
            return GuardrailDecision::Deny {
                reason_code: "read_only_mutation_blocked",
                user_message: format!(
                    "`{tool_name}` changes the database, but this conversation is read-only."
                ),
                fallback_path: "retry_with_writes_allowed",
            };
        }
        GuardrailDecision::Allow
    }
}

/// Keyword classification of a prompt. A convenience gate for obviously
/// analytic requests; it is not a security boundary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PromptClass {
    pub analytic: bool,
    pub mutative: bool,
}

impl PromptClass {
    pub fn read_only(self) -> bool {
        self.analytic && !self.mutative
    }
}

pub fn classify_prompt(prompt: &str) -> PromptClass {
    let tokens = tokenize(&prompt.to_ascii_lowercase());

    let time_series_phrase = tokens.windows(2).any(|pair| pair[0] == "time" && pair[1] == "series");
    let analytic =
        time_series_phrase || tokens.iter().any(|token| matches_vocabulary(token, ANALYTIC_WORDS));
    let mutative = tokens.iter().any(|token| matches_vocabulary(token, MUTATIVE_WORDS));

    PromptClass { analytic, mutative }
}

fn tokenize(text: &str) -> Vec<String> {
    let mut sanitized = String::with_capacity(text.len());
    for character in text.chars() {
        if character.is_ascii_alphanumeric() || character == '-' {
            sanitized.push(character);
        } else {
            sanitized.push(' ');
        }
    }
    sanitized
        .split_whitespace()
        .map(|token| token.trim_matches('-').to_string())
        .filter(|token| !token.is_empty())
        .collect()
}

/// Exact match, or a plain plural ("counts", "inserts", "averages").
fn matches_vocabulary(token: &str, vocabulary: &[&str]) -> bool {
    vocabulary.contains(&token)
        || token.strip_suffix('s').is_some_and(|singular| vocabulary.contains(&singular))
}

#[cfg(test)]
mod tests {
    use super::{classify_prompt, is_mutating, GuardrailDecision, GuardrailPolicy};

    #[test]
    fn read_only_policy_denies_mutating_tools() {
        let policy = GuardrailPolicy::new(true);
        let decision = policy.evaluate("insert_rows");

        let (reason_code, user_message, fallback_path) = match decision {
            GuardrailDecision::Deny { reason_code, user_message, fallback_path } => {
                (reason_code, user_message, fallback_path)
            }
            _ => ("", String::new(), ""),
        };

        assert_eq!(reason_code, "read_only_mutation_blocked");
        assert!(user_message.contains("insert_rows"));
        assert_eq!(fallback_path, "retry_with_writes_allowed");
    }

    #[test]
    fn read_only_policy_allows_reads() {
        let policy = GuardrailPolicy::new(true);
        assert_eq!(policy.evaluate("select_rows"), GuardrailDecision::Allow);
        assert_eq!(policy.evaluate("group_by"), GuardrailDecision::Allow);
    }

    #[test]
    fn writable_policy_allows_everything() {
        let policy = GuardrailPolicy::default();
        assert_eq!(policy.evaluate("drop_table"), GuardrailDecision::Allow);
    }

    #[test]
    fn mutating_set_includes_bare_action_names() {
        for name in ["update", "delete", "insert", "rename_column", "delete_rows"] {
            assert!(is_mutating(name), "{name} should be mutating");
        }
        assert!(!is_mutating("describe_table"));
    }

    #[test]
    fn analytic_prompts_are_read_only() {
        for prompt in [
            "Show me the top 5 customers",
            "What is the average order total?",
            "count rows in orders",
            "Plot a time series of signups by week",
            "chart the time-series of events",
            "List tables",
        ] {
            assert!(classify_prompt(prompt).read_only(), "`{prompt}` should be read-only");
        }
    }

    #[test]
    fn mutative_words_override_analytic_ones() {
        let class = classify_prompt("Create a table and show me its columns");
        assert!(class.analytic);
        assert!(class.mutative);
        assert!(!class.read_only());

        assert!(!classify_prompt("Add a status column, then list tables").read_only());
        assert!(!classify_prompt("inserts please, then count").read_only());
    }

    #[test]
    fn words_match_whole_tokens_only() {
        let class = classify_prompt("What is my address and summary?");
        assert!(!class.analytic);
        assert!(!class.mutative);
        assert!(!class.read_only());
    }
}
