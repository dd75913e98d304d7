//! The two textual markers of the agent-output protocol.
//!
//! Both are matched case-sensitively anywhere in captured stdout.

/// Emitted by an agent when every story is done.
pub const COMPLETION_MARKER: &str = "<promise>COMPLETE</promise>";

const REQUEST_INPUT_OPEN: &str = "<request-input>";
const REQUEST_INPUT_CLOSE: &str = "</request-input>";

/// True if the output carries the completion marker.
pub fn has_completion_signal(output: &str) -> bool {
    output.contains(COMPLETION_MARKER)
}

/// Extract the question inside the first `<request-input>…</request-input>`.
///
/// Returns `None` when no complete marker is present or its content is blank.
pub fn detect_human_input_request(output: &str) -> Option<String> {
    let start = output.find(REQUEST_INPUT_OPEN)? + REQUEST_INPUT_OPEN.len();
    let len = output[start..].find(REQUEST_INPUT_CLOSE)?;
    let content = output[start..start + len].trim();
    if content.is_empty() {
        None
    } else {
        Some(content.to_string())
    }
}
