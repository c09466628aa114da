//! Shared prompt rendering helpers.
//!
//! Large inputs are cut on char boundaries with an explicit marker so the
//! backend knows it is looking at a partial view.

use crate::context::ErrorContext;
use serde::Serialize;
use std::borrow::Cow;
use std::fmt::Write as _;

/// Max chars of fetched source file included in a prompt.
pub const MAX_SOURCE_CHARS: usize = 12_000;
/// Max chars of any single diff patch.
pub const MAX_PATCH_CHARS: usize = 4_000;
/// Max chars of the stack trace.
pub const MAX_STACK_CHARS: usize = 3_000;

/// Truncate to at most `max_chars` characters, appending a marker if cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> Cow<'_, str> {
    match text.char_indices().nth(max_chars) {
        None => Cow::Borrowed(text),
        Some((byte_idx, _)) => {
            let omitted = text[byte_idx..].chars().count();
            Cow::Owned(format!(
                "{}\n... [truncated {} chars]",
                &text[..byte_idx],
                omitted
            ))
        }
    }
}

/// Prefix each line with a right-aligned 1-based line number.
pub fn with_line_numbers(content: &str) -> String {
    content
        .lines()
        .enumerate()
        .map(|(i, line)| format!("{:4}| {}", i + 1, line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Pretty JSON for embedding a prior stage's output.
pub fn to_json_block<T: Serialize>(value: &T) -> String {
    let json = serde_json::to_string_pretty(value).unwrap_or_default();
    format!("```json\n{}\n```", json)
}

/// The failure facts every stage sees.
pub fn render_failure(context: &ErrorContext) -> String {
    let mut out = String::from("## Test failure\n");
    let _ = writeln!(out, "- Test file: {}", context.test_file);
    if !context.test_name.is_empty() {
        let _ = writeln!(out, "- Test name: {}", context.test_name);
    }
    if !context.error_type.is_empty() {
        let _ = writeln!(out, "- Error type: {}", context.error_type);
    }
    if let Some(selector) = &context.failing_selector {
        let _ = writeln!(out, "- Failing selector: {}", selector);
    }
    let _ = writeln!(out, "\n### Error message\n```\n{}\n```", context.error_message);
    if let Some(stack) = &context.stack_trace {
        let _ = writeln!(
            out,
            "\n### Stack trace\n```\n{}\n```",
            truncate_chars(stack, MAX_STACK_CHARS)
        );
    }
    out
}

/// The pull request diff, or an explicit note that none is available.
pub fn render_pr_diff(context: &ErrorContext) -> String {
    if !context.has_pr_diff() {
        return "## PR changes\nNo PR diff available.\n".to_string();
    }
    let mut out = format!("## PR changes ({} files)\n", context.pr_diff.len());
    for file in &context.pr_diff {
        let _ = writeln!(out, "\n### {} ({})", file.filename, file.status);
        match &file.patch {
            Some(patch) => {
                let _ = writeln!(
                    out,
                    "```diff\n{}\n```",
                    truncate_chars(patch, MAX_PATCH_CHARS)
                );
            }
            None => out.push_str("(no patch available)\n"),
        }
    }
    out
}

/// The fetched test source with line numbers, if present.
pub fn render_source(context: &ErrorContext) -> Option<String> {
    context.source_file_content.as_ref().map(|source| {
        format!(
            "## Source of {}\n```\n{}\n```\n",
            context.test_file,
            with_line_numbers(&truncate_chars(source, MAX_SOURCE_CHARS))
        )
    })
}
