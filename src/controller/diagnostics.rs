//! Human-readable takes on structured syntax errors

use crate::protocol::ErrorDetail;

const FRIENDLY_MESSAGES: &[(&str, &str)] = &[
    ("expected ':'", "It looks like you missed a colon ':' at the end of this line."),
    ("unexpected indent", "The indentation here is incorrect. Try removing the extra spaces at the start of the line."),
    ("unindent does not match", "This line's indentation doesn't match the previous block. Check your spaces/tabs."),
    ("EOF while scanning triple-quoted string", "You have an unclosed triple-quoted string. Add ''' or \"\"\" to close it."),
    ("EOL while scanning string literal", "You have an unclosed string. Add a quote (' or \") at the end of the text."),
    ("invalid syntax", "This syntax is invalid. Check for missing brackets, quotes, or typos."),
    ("unmatched ')'", "You have an extra closing parenthesis ')' without a matching opening one."),
    ("unmatched '}'", "You have an extra closing brace '}' without a matching opening one."),
    ("unmatched ']'", "You have an extra closing bracket ']' without a matching opening one."),
    ("'(' was never closed", "You opened a parenthesis '(' but never closed it."),
    ("'{' was never closed", "You opened a curly brace '{' but never closed it."),
    ("'[' was never closed", "You opened a square bracket '[' but never closed it."),
];

/// First matching friendly message, or the raw message unchanged
pub fn friendly_error_message(raw: &str) -> String {
    FRIENDLY_MESSAGES
        .iter()
        .find(|(needle, _)| raw.contains(needle))
        .map(|(_, friendly)| friendly.to_string())
        .unwrap_or_else(|| raw.to_string())
}

/// `"<type>: <msg> (Line <n>)"`
pub fn format_error_detail(detail: &ErrorDetail) -> String {
    format!(
        "{}: {} (Line {})",
        detail.kind,
        detail.msg,
        detail.lineno.unwrap_or(0)
    )
}

pub fn is_syntax_kind(kind: &str) -> bool {
    kind == "SyntaxError" || kind == "IndentationError"
}
