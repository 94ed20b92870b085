//! Template renderer — `{variable}` substitution for step subjects and bodies.

use std::collections::HashMap;

use outreach_core::types::Lead;

use crate::types::{RenderedContent, Step};

/// Replaces every `{key}` in `text` with `variables[key]`.
///
/// Unknown keys and unbalanced braces are left verbatim so partially
/// personalized content still ships.
pub fn render(text: &str, variables: &HashMap<String, String>) -> String {
    let mut result = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find('{') {
        result.push_str(&rest[..open]);
        let after_open = &rest[open + 1..];

        // A nested `{` restarts the token at the inner brace.
        let close = after_open.find('}');
        let nested = after_open.find('{');
        match (close, nested) {
            (Some(close), Some(nested)) if nested < close => {
                result.push('{');
                rest = after_open;
            }
            (Some(close), _) => {
                let key = &after_open[..close];
                match variables.get(key) {
                    Some(value) => result.push_str(value),
                    None => {
                        result.push('{');
                        result.push_str(key);
                        result.push('}');
                    }
                }
                rest = &after_open[close + 1..];
            }
            (None, _) => {
                result.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    result.push_str(rest);
    result
}

/// Renders the subject and body of a step independently.
pub fn render_step(step: &Step, variables: &HashMap<String, String>) -> RenderedContent {
    RenderedContent {
        subject: step.subject.as_deref().map(|s| render(s, variables)),
        body: render(&step.body, variables),
    }
}

/// Builds an enrollment's variable map from the lead snapshot: standard lead
/// fields, then lead attributes, then caller overrides. Empty fields are omitted.
pub fn lead_variables(lead: &Lead, overrides: HashMap<String, String>) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    let mut set = |key: &str, value: &str| {
        if !value.is_empty() {
            vars.insert(key.to_string(), value.to_string());
        }
    };
    set("first_name", lead.first_name());
    set("last_name", lead.last_name());
    set("name", lead.name.trim());
    set("email", &lead.email);
    set("company", lead.company.as_deref().unwrap_or_default());
    set("title", lead.title.as_deref().unwrap_or_default());
    set("phone", lead.phone.as_deref().unwrap_or_default());
    set("linkedin_url", lead.linkedin_url.as_deref().unwrap_or_default());

    vars.extend(lead.attributes.clone());
    vars.extend(overrides);
    vars
}
