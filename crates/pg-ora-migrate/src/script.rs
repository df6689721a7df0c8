//! Splitting SQL script text into executable statements.
//!
//! Used by the test-data loader and by backup restore. Statements end at a
//! `;` outside quotes; `--` line comments and blank lines are dropped.

/// Split script text into trimmed, non-empty statements.
///
/// Single-quoted strings may contain `;` and doubled `''` escapes. A
/// trailing statement without a terminator is kept.
#[must_use]
pub fn split_statements(text: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_quote = !in_quote;
                current.push(c);
            }
            '-' if !in_quote && chars.peek() == Some(&'-') => {
                // Line comment, skip to end of line.
                for rest in chars.by_ref() {
                    if rest == '\n' {
                        current.push('\n');
                        break;
                    }
                }
            }
            ';' if !in_quote => {
                push_statement(&mut statements, &mut current);
            }
            _ => current.push(c),
        }
    }
    push_statement(&mut statements, &mut current);
    statements
}

fn push_statement(statements: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        statements.push(trimmed.to_string());
    }
    current.clear();
}
