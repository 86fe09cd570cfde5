// Versioned analysis prompt.
// Bump PROMPT_VERSION whenever the rendered text changes; it is part of every cache key.

use crate::model::IssueSnapshot;

pub const PROMPT_VERSION: &str = "v2";

const MAX_BODY_CHARS: usize = 8_000;
const MAX_COMMENTS: usize = 20;
const MAX_COMMENT_CHARS: usize = 1_000;

const INSTRUCTIONS: &str = r#"You analyze GitHub issues for maintainers.

Respond with a single JSON object and nothing else:
{
  "category": "bug" | "feature" | "documentation" | "question" | "other",
  "summary": "one sentence describing the issue",
  "confidence": number between 0 and 1,
  "priority_score": { "score": integer 1-5, "justification": "one or two sentences" },
  "suggested_labels": ["label", "label"],
  "potential_impact": "one sentence"
}"#;

struct Example {
    title: &'static str,
    body: &'static str,
    answer: &'static str,
}

const EXAMPLES: &[Example] = &[
    Example {
        title: "Panic when config file is empty",
        body: "Running `tool init` with an empty tool.toml panics with `unwrap on None` in config.rs:88.",
        answer: r#"{"category":"bug","summary":"Initialization panics instead of reporting an error when the config file is empty.","confidence":0.93,"priority_score":{"score":4,"justification":"Crashes on a common first-run path."},"suggested_labels":["bug","config"],"potential_impact":"New users hit a crash before completing setup."}"#,
    },
    Example {
        title: "Support reading tokens from a file",
        body: "It would be nice to pass --token-file instead of putting secrets in env vars.",
        answer: r#"{"category":"feature","summary":"Request to accept credentials from a file path in addition to environment variables.","confidence":0.88,"priority_score":{"score":2,"justification":"Convenience improvement with an existing workaround."},"suggested_labels":["enhancement","cli"],"potential_impact":"Easier secret handling in containerized deployments."}"#,
    },
    Example {
        title: "README install section references removed flag",
        body: "The install docs still say `--legacy`, which was dropped in 2.0.",
        answer: r#"{"category":"documentation","summary":"Installation docs reference a flag that no longer exists.","confidence":0.95,"priority_score":{"score":2,"justification":"Misleading but easy to fix."},"suggested_labels":["documentation","good-first-issue"],"potential_impact":"Users following the docs get a confusing error."}"#,
    },
];

const STRICT_SUFFIX: &str =
    "\n\nIMPORTANT: your previous answer could not be parsed. Reply with ONLY the JSON object, no prose and no code fences.";

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Render the analysis prompt for a snapshot.
pub fn render(snapshot: &IssueSnapshot) -> String {
    let mut prompt = String::with_capacity(4_096);
    prompt.push_str(INSTRUCTIONS);

    prompt.push_str("\n\nExamples:\n");
    for (i, example) in EXAMPLES.iter().enumerate() {
        prompt.push_str(&format!(
            "\nExample {}\nTitle: {}\nBody: {}\nAnswer: {}\n",
            i + 1,
            example.title,
            example.body,
            example.answer
        ));
    }

    prompt.push_str("\n---\n\n");
    prompt.push_str(&format!(
        "Repository: {}/{}\n",
        snapshot.issue.owner, snapshot.issue.name
    ));
    prompt.push_str(&format!("Title: {}\n", snapshot.title));
    if !snapshot.labels.is_empty() {
        let labels: Vec<&str> = snapshot.labels.iter().map(String::as_str).collect();
        prompt.push_str(&format!("Existing labels: {}\n", labels.join(", ")));
    }
    prompt.push_str("Body:\n");
    prompt.push_str(truncate(&snapshot.body, MAX_BODY_CHARS));
    prompt.push_str("\n\nComments:\n");
    if snapshot.comments.is_empty() {
        prompt.push_str("(none)\n");
    }
    for comment in snapshot.comments.iter().take(MAX_COMMENTS) {
        prompt.push_str("- ");
        prompt.push_str(truncate(comment, MAX_COMMENT_CHARS));
        prompt.push('\n');
    }
    prompt.push_str("\nAnswer:");
    prompt
}

/// Prompt used for the single re-ask after an unparseable answer.
pub fn strict(prompt: &str) -> String {
    format!("{}{}", prompt, STRICT_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{IssueRef, IssueState};
    use std::collections::BTreeSet;

    fn snapshot(body: String, comments: Vec<String>) -> IssueSnapshot {
        IssueSnapshot {
            issue: IssueRef::new("acme", "core", 42).unwrap(),
            title: "Crash on start".into(),
            body,
            labels: BTreeSet::from(["bug".to_string()]),
            state: IssueState::Open,
            content_hash: "h1".into(),
            comments,
            html_url: String::new(),
            author: None,
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn test_render_includes_issue_fields() {
        let prompt = render(&snapshot("Steps to reproduce".into(), vec!["same here".into()]));
        assert!(prompt.contains("Repository: acme/core"));
        assert!(prompt.contains("Title: Crash on start"));
        assert!(prompt.contains("Existing labels: bug"));
        assert!(prompt.contains("Steps to reproduce"));
        assert!(prompt.contains("- same here"));
    }

    #[test]
    fn test_render_truncates_body_and_comments() {
        let body = "é".repeat(MAX_BODY_CHARS + 50);
        let comments = (0..30).map(|i| format!("comment-{}", i)).collect();
        let prompt = render(&snapshot(body, comments));

        assert!(!prompt.contains(&"é".repeat(MAX_BODY_CHARS + 1)));
        assert!(prompt.contains("comment-19"));
        assert!(!prompt.contains("comment-20"));
    }

    #[test]
    fn test_render_without_comments() {
        let prompt = render(&snapshot(String::new(), vec![]));
        assert!(prompt.contains("(none)"));
    }

    #[test]
    fn test_strict_appends_instruction() {
        assert!(strict("base").starts_with("base"));
        assert!(strict("base").contains("ONLY the JSON"));
    }
}
