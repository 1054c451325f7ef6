//! Prompts and extraction schemas for the capability workflows.

use serde_json::{Value, json};

/// Instruction to revise rejected code.
pub fn revision_instructions(code: &str, feedback: &str) -> String {
    format!("update the code: {code} \n to meet these updated instructions: {feedback}")
}

pub fn generate_code(instructions: &str) -> String {
    format!(
        "\
Write a new capability for the hive-mind assistant in Rust with these requirements:
{instructions}

Rules:
- Implement `hive_mind::capabilities::Capability` for a unit struct.
- `name()` returns a snake_case identifier; `description()` is under 1024 characters and \
tells a model when this capability is the right one to call.
- Declare every argument in `parameters()` with its type. Arguments arrive already \
coerced to the declared types.
- Read secrets from environment variables, never from literals.
- Return `CapabilityOutput::Text` for short answers, `Structured` for data and `Stream` \
for long generated prose.

Return the complete source file in the `code` field."
    )
}

pub fn code_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "code": {"type": "string", "description": "Complete Rust source file"}
        },
        "required": ["code"],
        "additionalProperties": false
    })
}

pub fn feedback(answer: &str) -> String {
    format!(
        "\
Read the user's feedback and determine if the work is approved.
If it is not approved, copy the user's revision request into `user_feedback` using their \
EXACT WORDS, VERBATIM. Do not paraphrase, summarize or correct it.
feedback: {answer}"
    )
}

pub fn feedback_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "approve": {
                "type": "boolean",
                "description": "Whether the user approved."
            },
            "user_feedback": {
                "type": "string",
                "description": "The user's requested changes, copied verbatim from their message. Empty when approved."
            }
        },
        "required": ["approve", "user_feedback"],
        "additionalProperties": false
    })
}

pub fn generate_dependencies(code: &str, existing: &[String]) -> String {
    format!(
        "\
Based on this code:
{code}

the dependency manifest currently lists:
{}

Does it need to be updated? Set `update` and list each missing crate in `dependencies` \
as `name = \"version\"`.",
        if existing.is_empty() {
            "(nothing)".to_string()
        } else {
            existing.join("\n")
        }
    )
}

pub fn dependencies_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "update": {"type": "boolean"},
            "dependencies": {"type": "array", "items": {"type": "string"}}
        },
        "required": ["update", "dependencies"],
        "additionalProperties": false
    })
}

pub fn generate_name(code: &str, feedback: &str) -> String {
    format!(
        "\
Suggest a snake_case file name for this capability, based on the value its `name()` \
returns: {code}
Feedback from earlier suggestions: {feedback}"
    )
}

pub fn name_schema() -> Value {
    json!({
        "type": "object",
        "properties": {"name": {"type": "string"}},
        "required": ["name"],
        "additionalProperties": false
    })
}

pub fn code_review(code: &str) -> String {
    format!("```\n{code}\n```\n\nDo you approve this code?")
}

pub fn dependency_review(dependencies: &[String]) -> String {
    format!(
        "Do you approve these additional dependencies:\n```\n{}\n```",
        dependencies.join("\n")
    )
}

// ── Editing ─────────────────────────────────────────────────────────

pub fn edit_code(code: &str, request: &str) -> String {
    format!(
        "\
Update this hive-mind capability:
```
{code}
```

Requested change: {request}

Keep the `Capability` implementation and the value `name()` returns unless the change asks \
otherwise. Return the complete updated source file in the `code` field."
    )
}

pub fn find_capability(lookup: &str, names: &[String]) -> String {
    format!(
        "\
Which of these capabilities is the user referring to?
{}

user: {lookup}

Answer with one name from the list, exactly as written, or an empty string if none fits.",
        names.join("\n")
    )
}

pub fn confirm_capability(name: &str, code: &str) -> String {
    format!("Is `{name}` the capability to update?\n\n```\n{code}\n```")
}
