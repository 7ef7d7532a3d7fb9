//! Meta-prompt templates and the structured-template registry.
//!
//! Templates use `{name}` placeholders filled by [`render`]. The structured
//! registry maps a template name to a body plus its required variables;
//! resolution failures fall back to the generic core template, logged but
//! never surfaced, so the caller still gets a usable first prompt.

use std::collections::HashMap;

use tracing::warn;

/// Generic first-draft instruction: asks the backend to act as a prompt
/// engineer and rewrite the raw request into a polished target prompt.
pub const CORE_TEMPLATE: &str = r#"You are an expert prompt engineer. A user wants an AI assistant to do the following:

"{user_raw_request}"

Rewrite this request as a single polished, self-contained prompt for an AI assistant. The prompt should state the task, the expected format of the answer, and any constraints implied by the request. Use internal placeholders like [TOPIC] only where the user must fill in details. Output only the rewritten prompt, nothing else."#;

/// Critique instruction. Asks for JSON so the report can be structured, but
/// parse failure is tolerated downstream.
pub const EVALUATION_TEMPLATE: &str = r#"You are reviewing a prompt written for an AI assistant.

Original user request:
"{user_raw_request}"

Prompt under review:
"{prompt_to_evaluate}"

Assess how well the prompt serves the request. Respond with a JSON object of the form:
{"score": <1-10>, "strengths": [...], "weaknesses": [...], "suggestions": [...]}
Output only the JSON object."#;

/// Rewrite instruction fed with the latest critique.
pub const REFINEMENT_TEMPLATE: &str = r#"You are improving a prompt written for an AI assistant.

Original user request:
"{user_raw_request}"

Current prompt:
"{previous_prompt}"

Review of the current prompt:
{evaluation_report}

Rewrite the prompt to address the weaknesses and suggestions above while keeping its strengths. If the prompt already serves the request as well as it can, return it unchanged. Output only the rewritten prompt, nothing else."#;

/// One-shot term explanation within the context of a prompt.
pub const EXPLAIN_TERM_TEMPLATE: &str = r#"Within the context of the following prompt:

"{context}"

explain what "{term_to_explain}" means and why it appears here, in two or three plain sentences."#;

/// A named template with declared required variables.
pub struct StructuredTemplate {
    pub name: &'static str,
    pub body: &'static str,
    pub variables: &'static [&'static str],
}

static STRUCTURED_TEMPLATES: &[StructuredTemplate] = &[
    StructuredTemplate {
        name: "general",
        body: CORE_TEMPLATE,
        variables: &[],
    },
    StructuredTemplate {
        name: "concept_explanation",
        body: r#"You are an expert prompt engineer. Write a polished prompt asking an AI assistant to explain "{concept_to_explain}" to {target_audience}, based on this request:

"{user_raw_request}"

The prompt should ask for an accessible explanation with a concrete example. Output only the prompt."#,
        variables: &["concept_to_explain", "target_audience"],
    },
    StructuredTemplate {
        name: "research_outline",
        body: r#"You are an expert prompt engineer. Write a polished prompt asking an AI assistant to produce a structured research outline on {research_topic}, based on this request:

"{user_raw_request}"

The prompt should ask for sections, key questions per section, and suggested sources. Output only the prompt."#,
        variables: &["research_topic"],
    },
    StructuredTemplate {
        name: "basic_image_gen",
        body: r#"You are an expert prompt engineer for text-to-image models. Turn this request into a vivid, comma-separated image prompt covering subject, composition, style and lighting:

"{user_raw_request}"

Output only the image prompt."#,
        variables: &[],
    },
    StructuredTemplate {
        name: "basic_video_gen",
        body: r#"You are an expert prompt engineer for text-to-video models. Turn this request into a shot-by-shot video prompt covering scene, motion, and mood:

"{user_raw_request}"

Output only the video prompt."#,
        variables: &[],
    },
    StructuredTemplate {
        name: "code_snippet",
        body: r#"You are an expert prompt engineer. Write a polished prompt asking an AI assistant for a {programming_language} code snippet satisfying this request:

"{user_raw_request}"

The prompt should ask for idiomatic code, a short usage example, and notes on edge cases. Output only the prompt."#,
        variables: &["programming_language"],
    },
];

pub fn structured_template(name: &str) -> Option<&'static StructuredTemplate> {
    STRUCTURED_TEMPLATES.iter().find(|t| t.name == name)
}

pub fn structured_template_names() -> Vec<&'static str> {
    STRUCTURED_TEMPLATES.iter().map(|t| t.name).collect()
}

/// Fill `{name}` placeholders from the variable map.
pub fn render(template: &str, variables: &HashMap<String, String>) -> String {
    let mut out = template.to_string();
    for (key, value) in variables {
        out = out.replace(&format!("{{{}}}", key), value);
    }
    out
}

pub fn render_core_prompt(user_raw_request: &str) -> String {
    CORE_TEMPLATE.replace("{user_raw_request}", user_raw_request)
}

pub fn render_evaluation_prompt(user_raw_request: &str, prompt_to_evaluate: &str) -> String {
    EVALUATION_TEMPLATE
        .replace("{user_raw_request}", user_raw_request)
        .replace("{prompt_to_evaluate}", prompt_to_evaluate)
}

pub fn render_refinement_prompt(
    user_raw_request: &str,
    previous_prompt: &str,
    evaluation_report: &str,
) -> String {
    REFINEMENT_TEMPLATE
        .replace("{user_raw_request}", user_raw_request)
        .replace("{previous_prompt}", previous_prompt)
        .replace("{evaluation_report}", evaluation_report)
}

pub fn render_explain_prompt(term_to_explain: &str, context: &str) -> String {
    EXPLAIN_TERM_TEMPLATE
        .replace("{term_to_explain}", term_to_explain)
        .replace("{context}", context)
}

/// Render a structured template, or `None` when the name is unknown or a
/// required variable is missing/blank. The caller falls back to the core
/// template; the reason is logged here.
pub fn render_structured(
    name: &str,
    user_raw_request: &str,
    variables: Option<&HashMap<String, String>>,
) -> Option<String> {
    let Some(template) = structured_template(name) else {
        warn!(
            template = name,
            available = ?structured_template_names(),
            "Unknown structured template"
        );
        return None;
    };

    let empty = HashMap::new();
    let vars = variables.unwrap_or(&empty);
    let missing: Vec<&str> = template
        .variables
        .iter()
        .filter(|v| vars.get(**v).map(|s| s.trim().is_empty()).unwrap_or(true))
        .copied()
        .collect();
    if !missing.is_empty() {
        warn!(template = name, ?missing, "Structured template missing required variables");
        return None;
    }

    let mut all_vars = vars.clone();
    all_vars.insert("user_raw_request".into(), user_raw_request.to_string());
    Some(render(template.body, &all_vars))
}

/// Build the first-draft instruction for a session.
///
/// A named template is tried first; on failure the fall-through picks a
/// task-type default, then the generic core template. Fallbacks are logged
/// but never returned as errors.
pub fn resolve_initial_prompt(
    template_name: Option<&str>,
    variables: Option<&HashMap<String, String>>,
    task_type: &str,
    user_raw_request: &str,
) -> String {
    if let Some(name) = template_name {
        if let Some(rendered) = render_structured(name, user_raw_request, variables) {
            return rendered;
        }
        warn!(template = name, "Falling back to core template");
    }

    let default_template = match task_type {
        "image_generation" => Some("basic_image_gen"),
        "video_generation" => Some("basic_video_gen"),
        _ => None,
    };
    if let Some(name) = default_template {
        if let Some(rendered) = render_structured(name, user_raw_request, variables) {
            return rendered;
        }
    }

    render_core_prompt(user_raw_request)
}
