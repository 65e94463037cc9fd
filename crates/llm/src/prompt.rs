//! Shared message types and template substitution used by both the
//! validator and generator adapters.

/// A chat message role, as sent to both validator- and generator-style
/// LLM APIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// Substitutes `{context}`, `{current_time}`, and `{question}` placeholders
/// in a prompt template. Unknown placeholders are left untouched rather
/// than erroring, since template authors sometimes include literal braces.
pub fn render_template(template: &str, replacements: &[(&str, &str)]) -> String {
    let mut rendered = template.to_string();
    for (key, value) in replacements {
        rendered = rendered.replace(&format!("{{{key}}}"), value);
    }
    rendered
}

/// Strips a single leading/trailing markdown code fence
/// (` ```json ` or plain ` ``` `) from a model response before attempting
/// to parse it as JSON. Models reliably wrap structured JSON output in
/// fences despite being asked not to.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let without_prefix = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_prefix
        .strip_suffix("```")
        .unwrap_or(without_prefix)
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_known_placeholders() {
        let out = render_template(
            "Q: {question} at {current_time} given {context}",
            &[("question", "hi"), ("current_time", "now"), ("context", "docs")],
        );
        assert_eq!(out, "Q: hi at now given docs");
    }

    #[test]
    fn leaves_unknown_placeholders_untouched() {
        let out = render_template("{unknown} {question}", &[("question", "hi")]);
        assert_eq!(out, "{unknown} hi");
    }

    #[test]
    fn strips_json_fence() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
    }

    #[test]
    fn strips_plain_fence() {
        assert_eq!(strip_code_fences("```\n{\"a\":1}\n```"), "{\"a\":1}");
    }

    #[test]
    fn leaves_unfenced_text_alone() {
        assert_eq!(strip_code_fences("  {\"a\":1}  "), "{\"a\":1}");
    }
}
