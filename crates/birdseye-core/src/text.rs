//! Text utilities for function source.
//!
//! - Locating a function definition and trimming it to its significant text
//! - Whitespace normalization used for labels and staleness checks
//! - Byte offset to line:column conversion for reports
//!
//! ## Coordinate Conventions
//!
//! - Lines and columns are **1-indexed** (matching editor conventions)
//! - Byte offsets are **0-indexed**
//! - Columns count Unicode scalar values, not bytes

use crate::error::{BirdseyeError, BirdseyeResult};
use crate::range::Range;

// ============================================================================
// Positions
// ============================================================================

/// Convert a byte offset to 1-indexed line and column (Unicode-aware).
///
/// If `offset` exceeds the content length, returns the position at the end.
pub fn offset_to_position(content: &str, offset: usize) -> (u32, u32) {
    let mut line = 1u32;
    let mut col = 1u32;
    let mut current_offset = 0usize;

    for ch in content.chars() {
        if current_offset >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
        current_offset += ch.len_utf8();
    }

    (line, col)
}

// ============================================================================
// Whitespace
// ============================================================================

/// Replace every run of two or more whitespace characters by one space.
///
/// Single whitespace characters are kept as they are.
pub fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut run = String::new();
    for ch in s.chars() {
        if ch.is_whitespace() {
            run.push(ch);
            continue;
        }
        flush_whitespace_run(&mut out, &mut run);
        out.push(ch);
    }
    flush_whitespace_run(&mut out, &mut run);
    out
}

fn flush_whitespace_run(out: &mut String, run: &mut String) {
    match run.chars().count() {
        0 => {}
        1 => out.push_str(run),
        _ => out.push(' '),
    }
    run.clear();
}

/// Remove all whitespace.
pub fn strip_whitespace(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Shorten `s` to roughly `max_len` characters, keeping both ends.
///
/// Strings at most five characters over the limit are returned unchanged;
/// longer ones keep `max_len / 2 - 1` leading and `max_len / 2 - 2`
/// trailing characters around `...`.
pub fn truncate(s: &str, max_len: usize) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= max_len + 5 {
        return s.to_string();
    }
    let head = (max_len / 2).saturating_sub(1);
    let tail_start = chars.len() - (max_len / 2).saturating_sub(2);
    let mut out: String = chars[..head].iter().collect();
    out.push_str("...");
    out.extend(&chars[tail_start..]);
    out
}

// ============================================================================
// Staleness
// ============================================================================

/// Decide whether the live text of a traced node no longer matches the
/// text it had when it was traced.
///
/// Identical text is never stale. Otherwise an untagged node (an
/// expression) survives whitespace-only changes, unless either side
/// contains a quote character: whitespace inside string literals is
/// significant. Tagged nodes (statements) are stale on any change.
pub fn is_range_text_stale(original: &str, current: &str, tagged: bool) -> bool {
    if original == current {
        return false;
    }
    if tagged || has_quote(original) || has_quote(current) {
        return true;
    }
    strip_whitespace(original) != strip_whitespace(current)
}

fn has_quote(s: &str) -> bool {
    s.contains('\'') || s.contains('"')
}

// ============================================================================
// Function Text
// ============================================================================

/// Trim function source to its significant text.
///
/// `text` must start at the `def` keyword (after any decorators). The
/// result ends at the last significant character of the last statement:
/// trailing blank lines, comment-only lines, a trailing end-of-line comment
/// and trailing whitespace are removed.
pub fn trim_function_text(text: &str) -> BirdseyeResult<&str> {
    if !text.starts_with("def") {
        return Err(BirdseyeError::InvalidFunction {
            reason: "function text must start at the 'def' keyword".to_string(),
        });
    }

    let mut end = text.len();
    loop {
        let body = &text[..end];
        let line_start = body.rfind('\n').map(|i| i + 1).unwrap_or(0);
        let line = &body[line_start..];
        let code = strip_line_comment(line).trim_end();
        if !code.is_empty() || line_start == 0 {
            end = line_start + code.len();
            break;
        }
        end = line_start.saturating_sub(1);
    }

    Ok(text[..end].trim_end())
}

/// Cut an end-of-line comment, ignoring `#` inside string literals.
fn strip_line_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, ch) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match (quote, ch) {
            (Some(_), '\\') => escaped = true,
            (Some(q), c) if c == q => quote = None,
            (None, '\'' | '"') => quote = Some(ch),
            (None, '#') => return &line[..i],
            _ => {}
        }
    }
    line
}

/// Find the definition of function `name` in `source`.
///
/// Returns the range from the `def` keyword to the end of the function's
/// indented block (before any following blank lines). This is a textual
/// search: the first `def name(` wins.
pub fn locate_function(source: &str, name: &str) -> Option<Range> {
    let mut line_start = 0;
    for line in source.split_inclusive('\n') {
        if let Some(def_col) = def_keyword_column(line, name) {
            let start = line_start + def_col;
            let indent = indentation(line);
            let end = block_end(source, start, indent);
            return Some(Range::new(start, end));
        }
        line_start += line.len();
    }
    None
}

/// Column of the `def` keyword if `line` defines `name`.
fn def_keyword_column(line: &str, name: &str) -> Option<usize> {
    let indent = indentation(line);
    let rest = &line[indent..];
    let (offset, rest) = match rest.strip_prefix("async") {
        Some(after) if after.starts_with(char::is_whitespace) => {
            let trimmed = after.trim_start();
            (indent + rest.len() - trimmed.len(), trimmed)
        }
        _ => (indent, rest),
    };
    let after_def = rest.strip_prefix("def")?;
    if !after_def.starts_with(char::is_whitespace) {
        return None;
    }
    let after_name = after_def.trim_start().strip_prefix(name)?;
    if after_name.trim_start().starts_with('(') {
        Some(offset)
    } else {
        None
    }
}

fn indentation(line: &str) -> usize {
    line.len() - line.trim_start_matches([' ', '\t']).len()
}

/// End offset of the block whose header starts at `header_start`.
fn block_end(source: &str, header_start: usize, indent: usize) -> usize {
    let header_end = header_colon(source, header_start).unwrap_or(source.len());
    let mut end = source[header_end..]
        .find('\n')
        .map(|i| header_end + i)
        .unwrap_or(source.len());

    let mut offset = end;
    for line in source[end..].split_inclusive('\n') {
        let line_offset = offset;
        offset += line.len();
        let content = line.trim();
        if content.is_empty() || content.starts_with('#') {
            continue;
        }
        if indentation(line) <= indent {
            break;
        }
        end = line_offset + line.trim_end().len();
    }
    end
}

/// Offset just past the `:` closing a `def` header, skipping brackets and
/// string literals so multi-line signatures are handled.
fn header_colon(source: &str, from: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, ch) in source[from..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match (quote, ch) {
            (Some(_), '\\') => escaped = true,
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(ch),
            (None, '(' | '[' | '{') => depth += 1,
            (None, ')' | ']' | '}') => depth = depth.saturating_sub(1),
            (None, ':') if depth == 0 => return Some(from + i + 1),
            _ => {}
        }
    }
    None
}

// ============================================================================
// Tests
// ============================================================================
