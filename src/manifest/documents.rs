//! Splitting YAML streams into documents without losing a byte.

/// A YAML stream cut into document bodies and the markers between them.
///
/// `---` and `...` lines are stored verbatim (including trailing comments and
/// line endings). A `---` followed by content on the same line keeps only the
/// marker and the spaces after it, and the body starts at the content.
/// Joining without replacements reproduces the input exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Documents<'a> {
    bodies: Vec<&'a str>,
    separators: Vec<&'a str>,
}

impl<'a> Documents<'a> {
    pub fn split(text: &'a str) -> Self {
        let mut bodies = Vec::new();
        let mut separators = Vec::new();
        let mut body_start = 0;
        let mut offset = 0;

        for line in text.split_inclusive('\n') {
            if let Some(marker) = marker_len(line) {
                bodies.push(&text[body_start..offset]);
                separators.push(&line[..marker]);
                body_start = offset + marker;
            }
            offset += line.len();
        }
        bodies.push(&text[body_start..]);

        Self { bodies, separators }
    }

    /// Document bodies in order. Bodies before a leading separator or after a
    /// trailing one may be empty.
    pub fn bodies(&self) -> &[&'a str] {
        &self.bodies
    }

    /// Reassemble the stream, substituting bodies where `replace` returns
    /// `Some`.
    pub fn join_with<F>(&self, mut replace: F) -> String
    where
        F: FnMut(usize, &'a str) -> Option<String>,
    {
        let mut output = String::new();
        for (index, body) in self.bodies.iter().enumerate() {
            match replace(index, body) {
                Some(new_body) => output.push_str(&new_body),
                None => output.push_str(body),
            }
            if let Some(separator) = self.separators.get(index) {
                output.push_str(separator);
            }
        }
        output
    }

    #[cfg(test)]
    fn join(&self) -> String {
        self.join_with(|_, _| None)
    }
}

/// Length of the document marker starting `line`, if it has one.
///
/// `---` and `...` may stand alone or carry a comment, in which case the whole
/// line is the marker. `--- content` opens a document on the marker line.
fn marker_len(line: &str) -> Option<usize> {
    let content = line.trim_end_matches(['\n', '\r']);
    let (marker, rest) = match content.strip_prefix("---") {
        Some(rest) => ("---", rest),
        None => ("...", content.strip_prefix("...")?),
    };

    let trimmed = rest.trim_start_matches([' ', '\t']);
    if trimmed.is_empty() {
        return Some(line.len());
    }
    if trimmed.len() == rest.len() {
        return None;
    }
    if trimmed.starts_with('#') {
        return Some(line.len());
    }
    (marker == "---").then(|| content.len() - trimmed.len())
}

/// Only whitespace, comment and directive lines.
pub fn is_blank_document(body: &str) -> bool {
    body.lines().all(|line| {
        let trimmed = line.trim();
        trimmed.is_empty() || trimmed.starts_with('#') || line.starts_with('%')
    })
}
