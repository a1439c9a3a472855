/// Returns the text between the first pair of double quotes on `line`.
///
/// `None` when the line has no opening quote or the literal is never closed.
pub fn extract_quoted(line: &str) -> Option<&str> {
    let start = line.find('"')? + 1;
    let len = line[start..].find('"')?;
    Some(&line[start..start + len])
}

/// Cuts a trailing `;` comment, ignoring semicolons inside a string literal.
pub fn strip_comment(line: &str) -> &str {
    let mut in_string = false;
    for (i, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            ';' if !in_string => return &line[..i],
            _ => {}
        }
    }
    line
}
