//! Prompt construction for each stage.

use cogloop_core::message::Message;
use cogloop_core::state::RunState;
use cogloop_core::tool::ToolKind;

const PLANNER_SYSTEM: &str = "You are the planning module of an assistant for small-business owners. \
Break the user's request into a short sequence of tool calls. \
Answer with a JSON array only, no prose and no code fences. \
Each element is an object: {\"step\": <number>, \"tool\": \"<tool name>\", \"action\": \"<what to do>\", \"params\": {}}. \
Use only the tools listed below.";

const REFLECTOR_SYSTEM: &str = "You are the reflection module. Review progress on the plan \
and decide whether more tool calls are needed. Answer with JSON of the form \
{\"continue\": true|false, \"reason\": \"...\"}.";

const SYNTHESIZER_SYSTEM: &str = "You are the lead analyst. Use the results of every tool \
to write one answer for a small-business owner. Structure: 1) Summary, 2) Key observations, \
3) Recommendations, 4) Next steps. Be concrete and use numbers when available.";

/// `- name: description` per tool.
pub fn tool_catalog(catalog: &[(ToolKind, String)]) -> String {
    catalog
        .iter()
        .map(|(kind, description)| format!("- {kind}: {description}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Comma-separated file list, or `(no files)`.
pub fn file_list(files: &[String]) -> String {
    if files.is_empty() {
        "(no files)".to_string()
    } else {
        files.join(", ")
    }
}

pub fn planner_messages(run: &RunState, catalog: &[(ToolKind, String)]) -> Vec<Message> {
    vec![
        Message::system(format!(
            "{PLANNER_SYSTEM}\n\nAvailable tools:\n{}",
            tool_catalog(catalog)
        )),
        Message::user(format!(
            "Request: {}\nFiles: {}",
            run.query,
            file_list(&run.files)
        )),
    ]
}

/// The base planner messages plus a correction quoting the rejected output.
pub fn planner_retry_messages(base: &[Message], attempt: u32, bad_output: &str) -> Vec<Message> {
    let mut messages = base.to_vec();
    messages.push(Message::user(format!(
        "The previous answer was not a valid JSON array of steps. \
         Return ONLY the JSON array, without explanations. \
         Answer of attempt #{attempt}: {bad_output}"
    )));
    messages
}

pub fn reflector_messages(run: &RunState) -> Vec<Message> {
    vec![
        Message::system(REFLECTOR_SYSTEM),
        Message::user(format!(
            "Original request: {}\nCurrent step: {}\nPlan: {}\nTool history: {}\n\
             Is there enough information for the final answer?",
            run.query,
            run.current_step,
            to_json(&run.plan),
            to_json(&run.tool_results),
        )),
    ]
}

pub fn synthesizer_messages(run: &RunState) -> Vec<Message> {
    vec![
        Message::system(SYNTHESIZER_SYSTEM),
        Message::user(format!(
            "Request: {}\nPlan: {}\nTool results: {}\nReflection: {}\n\
             Combine all of this into the final report.",
            run.query,
            to_json(&run.plan),
            to_json(&run.tool_results),
            run.reflection.as_deref().unwrap_or(""),
        )),
    ]
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "[]".to_string())
}
