//! Prompt templates for the extraction chains. Placeholders use `{name}`
//! substitution; every template demands the same JSON envelope so one parser
//! serves all agents.

pub const JSON_ENVELOPE: &str = r#"Respond with ONLY a JSON object, no prose:
{
  "findings": [
    {
      "kind": "feature|decision|pattern|constraint|workflow|risk",
      "title": "short imperative title",
      "description": "what it is and where it lives",
      "confidence": 0.0,
      "evidence": [
        {"file_path": "relative/path", "start_line": 1, "end_line": 2, "snippet": "verbatim quote"}
      ]
    }
  ],
  "relationships": [
    {"from": "finding title", "to": "finding title", "relation": "depends_on|affects|extends|implements|uses|related_to", "reason": "", "confidence": 0.0}
  ]
}
Every finding MUST cite evidence with real file paths and line numbers from the provided context."#;

pub const DOC_FEATURES: &str = r#"You are analyzing the documentation of the project "{project_name}".
Extract FEATURES and architecture DECISIONS stated in the documents below.
Only report what the text supports; do not speculate.

{context}

{json_envelope}"#;

pub const DOC_WORKFLOWS: &str = r#"You are analyzing rule files and CI configuration of the project "{project_name}".
Extract development WORKFLOWS and mandatory CONSTRAINTS (lint rules, review policy, CI gates).
Only report what the files support.

{context}

{json_envelope}"#;

pub const GIT_CHUNK: &str = r#"You are analyzing git history of the project "{project_name}".
Below are commits {range} of {total} (reverse chronological).{recency_note}
Extract up to {max_findings} significant milestones as findings (kind "decision" or "feature"):
releases, migrations, architecture changes, dependency swaps. Skip routine fixes.

Project metadata:
{metadata}

Commits:
{commits}

{json_envelope}"#;

pub const CODE_ANALYSIS: &str = r#"You are analyzing source code of the project "{project_name}".
{existing_note}
Extract features, patterns, architectural decisions, constraints, and risks visible in the code.
Prefer fewer, well-evidenced findings over many shallow ones.

{existing_context}
{context}

{json_envelope}"#;

pub const REACT_SYSTEM: &str = r#"You are a code analysis agent exploring the repository "{project_name}".
Use the provided tools to read files, search, and list directories. Work in small steps:
inspect the layout first, then drill into the most load-bearing files.
When you have enough evidence, reply WITHOUT tool calls, using this format:

{json_envelope}"#;

pub const REACT_FALLBACK: &str = r#"You are analyzing the repository "{project_name}". Tool calling is unavailable,
so here is a directory tree and key files instead.

{context}

{json_envelope}"#;

/// Render a template against `{name}` placeholders, envelope included.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.replace("{json_envelope}", JSON_ENVELOPE);
    for (key, value) in vars {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_substitutes_and_inlines_envelope() {
        let p = render(DOC_FEATURES, &[("project_name", "demo"), ("context", "## README")]);
        assert!(p.contains("\"demo\""));
        assert!(p.contains("## README"));
        assert!(p.contains("\"findings\""));
        assert!(!p.contains("{json_envelope}"));
    }
}
