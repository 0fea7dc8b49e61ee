//! Span-tracking YAML node tree.
//!
//! This is not a general YAML parser. It understands the layout used by
//! Kubernetes manifests (block and flow collections, compact `- key: v`
//! items, explicit `? key` entries, plain, quoted and block scalars, anchors,
//! aliases, tags and comments) and records where every node lives in the
//! source text. JSON documents parse as flow collections. Anything else is
//! rejected with [`ManifestError::YamlParse`] so callers can leave the
//! document untouched.

use yaml_rust2::YamlLoader;

use super::ManifestError;

/// Byte range into the document text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarStyle {
    Plain,
    SingleQuoted,
    DoubleQuoted,
    Literal,
    Folded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionStyle {
    Block,
    /// `{...}` or `[...]`, possibly spanning lines.
    Flow,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub key: String,
    pub key_span: Span,
    pub value: Node,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Mapping {
        anchor: Option<String>,
        style: CollectionStyle,
        /// Column of the keys; zero for flow mappings.
        indent: usize,
        entries: Vec<Entry>,
        span: Span,
    },
    Sequence {
        anchor: Option<String>,
        style: CollectionStyle,
        indent: usize,
        items: Vec<Node>,
        span: Span,
    },
    /// An empty plain scalar is a null; its span is zero-length.
    Scalar {
        anchor: Option<String>,
        value: String,
        style: ScalarStyle,
        span: Span,
    },
    Alias {
        name: String,
        span: Span,
    },
}

impl Node {
    pub fn span(&self) -> Span {
        match self {
            Node::Mapping { span, .. }
            | Node::Sequence { span, .. }
            | Node::Scalar { span, .. }
            | Node::Alias { span, .. } => *span,
        }
    }

    pub fn anchor(&self) -> Option<&str> {
        match self {
            Node::Mapping { anchor, .. }
            | Node::Sequence { anchor, .. }
            | Node::Scalar { anchor, .. } => anchor.as_deref(),
            Node::Alias { .. } => None,
        }
    }

    /// Value of `key` in a mapping.
    pub fn get(&self, key: &str) -> Option<&Node> {
        match self {
            Node::Mapping { entries, .. } => entries
                .iter()
                .find(|entry| entry.key == key)
                .map(|entry| &entry.value),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            Node::Scalar { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Node::Scalar { value, style: ScalarStyle::Plain, .. }
            if value.is_empty() || value == "~" || value == "null" || value == "Null" || value == "NULL")
    }

    fn set_anchor(&mut self, name: String) {
        match self {
            Node::Mapping { anchor, .. }
            | Node::Sequence { anchor, .. }
            | Node::Scalar { anchor, .. } => *anchor = Some(name),
            Node::Alias { .. } => {}
        }
    }
}

/// One parsed YAML document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// `None` for documents holding only comments.
    pub root: Option<Node>,
    /// Anchored nodes in the order they were completed.
    anchors: Vec<(String, Node)>,
}

impl Document {
    /// Parse `text`, which must be valid YAML holding at most one document.
    pub fn parse(text: &str) -> Result<Self, ManifestError> {
        let loaded =
            YamlLoader::load_from_str(text).map_err(|e| ManifestError::YamlParse(e.to_string()))?;
        if loaded.len() > 1 {
            return Err(ManifestError::YamlParse(format!(
                "expected a single document, found {}",
                loaded.len()
            )));
        }

        Parser::new(text).parse()
    }

    /// Follow an alias to the closest preceding definition of its anchor;
    /// other nodes map to themselves.
    pub fn resolve<'n>(&'n self, node: &'n Node) -> Option<&'n Node> {
        match node {
            Node::Alias { name, span } => self
                .anchors
                .iter()
                .filter(|(anchor, target)| anchor == name && target.span().start < span.start)
                .max_by_key(|(_, target)| target.span().start)
                .map(|(_, target)| target),
            other => Some(other),
        }
    }
}

#[derive(Debug)]
struct Line<'a> {
    start: usize,
    /// Without the line terminator.
    text: &'a str,
    indent: usize,
}

struct Parser<'a> {
    text: &'a str,
    lines: Vec<Line<'a>>,
    line: usize,
    col: usize,
    anchors: Vec<(String, Node)>,
}

type ParseResult<T> = Result<T, ManifestError>;

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        let mut lines = Vec::new();
        let mut start = 0;
        for raw in text.split_inclusive('\n') {
            let content = raw.trim_end_matches(['\n', '\r']);
            let indent = content.len() - content.trim_start_matches(' ').len();
            lines.push(Line {
                start,
                text: content,
                indent,
            });
            start += raw.len();
        }

        Self {
            text,
            lines,
            line: 0,
            col: 0,
            anchors: Vec::new(),
        }
    }

    fn parse(mut self) -> ParseResult<Document> {
        let Some(first) = self.next_significant(0) else {
            return Ok(Document {
                root: None,
                anchors: self.anchors,
            });
        };

        let text = self.lines[first].text.trim_start();
        if text.starts_with('%') {
            return Err(self.error_at(first, "directives are not supported"));
        }
        // Tabs are plain whitespace inside a flow root such as a JSON object
        if !text.starts_with(['{', '[']) {
            if let Some(index) = self
                .lines
                .iter()
                .position(|line| line.text.starts_with('\t') && !line.text.trim().is_empty())
            {
                return Err(self.error_at(index, "tab indentation"));
            }
        }

        self.line = first;
        self.col = self.lines[first].indent;
        let root = self.parse_node(-1)?;
        self.expect_line_end()?;

        if let Some(extra) = self.next_significant(self.line + 1) {
            return Err(self.error_at(extra, "unexpected content after document root"));
        }

        Ok(Document {
            root: Some(root),
            anchors: self.anchors,
        })
    }

    fn error_at(&self, line: usize, message: &str) -> ManifestError {
        ManifestError::YamlParse(format!("line {}: {}", line + 1, message))
    }

    fn line_of(&self, offset: usize) -> usize {
        self.lines
            .partition_point(|line| line.start <= offset)
            .saturating_sub(1)
    }

    /// Move the cursor to an absolute offset.
    fn seek(&mut self, offset: usize) {
        self.line = self.line_of(offset);
        self.col = offset - self.lines[self.line].start;
    }

    fn key_text(&self, key: &Node) -> String {
        match key {
            Node::Scalar { value, .. } => value.clone(),
            other => {
                let span = other.span();
                self.text[span.start..span.end].to_string()
            }
        }
    }

    fn define(&mut self, name: String, node: &mut Node) {
        node.set_anchor(name.clone());
        self.anchors.push((name, node.clone()));
    }

    fn rest(&self) -> &'a str {
        let text = self.lines[self.line].text;
        &text[self.col.min(text.len())..]
    }

    fn offset(&self) -> usize {
        self.lines[self.line].start + self.col.min(self.lines[self.line].text.len())
    }

    fn line_end_offset(&self, line: usize) -> usize {
        self.lines[line].start + self.lines[line].text.len()
    }

    fn skip_spaces(&mut self) {
        let rest = self.rest();
        self.col += rest.len() - rest.trim_start_matches([' ', '\t']).len();
    }

    /// Nothing but whitespace or a comment remains on the current line.
    fn at_line_end(&self) -> bool {
        let rest = self.rest().trim_start_matches([' ', '\t']);
        rest.is_empty() || rest.starts_with('#')
    }

    fn expect_line_end(&mut self) -> ParseResult<()> {
        self.skip_spaces();
        if self.at_line_end() {
            Ok(())
        } else {
            Err(self.error_at(self.line, "unexpected trailing content"))
        }
    }

    fn next_significant(&self, from: usize) -> Option<usize> {
        (from..self.lines.len()).find(|&i| !is_blank_or_comment(self.lines[i].text))
    }

    fn move_to(&mut self, line: usize) {
        self.line = line;
        self.col = self.lines[line].indent;
    }

    fn null_at(offset: usize) -> Node {
        Node::Scalar {
            anchor: None,
            value: String::new(),
            style: ScalarStyle::Plain,
            span: Span::new(offset, offset),
        }
    }

    /// Parse the node starting at the cursor. Lines belonging to it must be
    /// indented deeper than `parent`.
    fn parse_node(&mut self, parent: isize) -> ParseResult<Node> {
        let mut anchor = None;

        loop {
            let rest = self.rest();
            if let Some(name) = rest.strip_prefix('&') {
                let name = token(name);
                if name.is_empty() {
                    return Err(self.error_at(self.line, "empty anchor name"));
                }
                anchor = Some(name.to_string());
                self.col += 1 + name.len();
            } else if rest.starts_with('!') {
                self.col += token(rest).len();
            } else {
                break;
            }

            let property_end = self.offset();
            self.skip_spaces();
            if self.at_line_end() {
                match self.next_significant(self.line + 1) {
                    Some(next) if self.lines[next].indent as isize > parent => self.move_to(next),
                    _ => {
                        let mut node = Self::null_at(property_end);
                        if let Some(name) = anchor {
                            self.define(name, &mut node);
                        }
                        return Ok(node);
                    }
                }
            }
        }

        let mut node = self.parse_bare(parent)?;
        if let Some(name) = anchor {
            self.define(name, &mut node);
        }
        Ok(node)
    }

    fn parse_bare(&mut self, parent: isize) -> ParseResult<Node> {
        let rest = self.rest();

        if let Some(name) = rest.strip_prefix('*') {
            let name = token(name);
            let start = self.offset();
            self.col += 1 + name.len();
            return Ok(Node::Alias {
                name: name.to_string(),
                span: Span::new(start, self.offset()),
            });
        }
        if is_sequence_entry(rest) {
            return self.parse_block_sequence();
        }
        if rest.starts_with('[') || rest.starts_with('{') {
            return self.parse_flow();
        }
        if rest.starts_with('|') || rest.starts_with('>') {
            return self.parse_block_scalar(parent);
        }
        if is_explicit_key(rest) || scan_key(rest).is_some() {
            return self.parse_block_mapping();
        }
        if rest.starts_with('"') || rest.starts_with('\'') {
            return self.parse_quoted();
        }
        self.parse_plain(parent)
    }

    fn parse_block_mapping(&mut self) -> ParseResult<Node> {
        let indent = self.col;
        let start = self.offset();
        let mut entries = Vec::new();

        loop {
            let entry = if is_explicit_key(self.rest()) {
                self.parse_explicit_entry(indent)?
            } else {
                let key_start = self.offset();
                let Some(key) = scan_key(self.rest()) else {
                    return Err(self.error_at(self.line, "expected a mapping key"));
                };
                self.col += key.colon + 1;
                Entry {
                    key: key.value,
                    key_span: Span::new(key_start, key_start + key.len),
                    value: self.parse_entry_value(indent)?,
                }
            };
            self.expect_line_end()?;
            entries.push(entry);

            match self.next_significant(self.line + 1) {
                Some(next) if self.lines[next].indent == indent => {
                    if is_sequence_entry(&self.lines[next].text[indent..]) {
                        break;
                    }
                    self.move_to(next);
                }
                Some(next) if self.lines[next].indent > indent => {
                    return Err(self.error_at(next, "unexpected indentation"));
                }
                _ => break,
            }
        }

        let end = entries
            .last()
            .map_or(start, |entry| entry.value.span().end.max(entry.key_span.end));
        Ok(Node::Mapping {
            anchor: None,
            style: CollectionStyle::Block,
            indent,
            entries,
            span: Span::new(start, end),
        })
    }

    /// Value following a `:` or `?` indicator of a mapping at `indent`.
    fn parse_entry_value(&mut self, indent: usize) -> ParseResult<Node> {
        let after_indicator = self.offset();
        self.skip_spaces();
        if !self.at_line_end() {
            return self.parse_node(indent as isize);
        }

        match self.next_significant(self.line + 1) {
            Some(next)
                if self.lines[next].indent > indent
                    || (self.lines[next].indent == indent
                        && is_sequence_entry(&self.lines[next].text[indent..])) =>
            {
                self.move_to(next);
                self.parse_node(indent as isize)
            }
            _ => Ok(Self::null_at(after_indicator)),
        }
    }

    /// `? key` followed by an optional `: value` line at the same indent.
    fn parse_explicit_entry(&mut self, indent: usize) -> ParseResult<Entry> {
        self.col += 1;
        let key = self.parse_entry_value(indent)?;
        self.expect_line_end()?;

        let value = match self.next_significant(self.line + 1) {
            Some(next)
                if self.lines[next].indent == indent
                    && is_value_indicator(&self.lines[next].text[indent..]) =>
            {
                self.move_to(next);
                self.col += 1;
                self.parse_entry_value(indent)?
            }
            _ => Self::null_at(self.line_end_offset(self.line)),
        };

        Ok(Entry {
            key: self.key_text(&key),
            key_span: key.span(),
            value,
        })
    }

    fn parse_block_sequence(&mut self) -> ParseResult<Node> {
        let indent = self.col;
        let start = self.offset();
        let mut items = Vec::new();

        loop {
            self.col += 1;
            let after_dash = self.offset();
            self.skip_spaces();

            let item = if self.at_line_end() {
                match self.next_significant(self.line + 1) {
                    Some(next) if self.lines[next].indent > indent => {
                        self.move_to(next);
                        self.parse_node(indent as isize)?
                    }
                    _ => Self::null_at(after_dash),
                }
            } else {
                self.parse_node(indent as isize)?
            };
            self.expect_line_end()?;
            items.push(item);

            match self.next_significant(self.line + 1) {
                Some(next)
                    if self.lines[next].indent == indent
                        && is_sequence_entry(&self.lines[next].text[indent..]) =>
                {
                    self.move_to(next);
                }
                Some(next) if self.lines[next].indent > indent => {
                    return Err(self.error_at(next, "unexpected indentation"));
                }
                _ => break,
            }
        }

        let end = items.last().map_or(start, |item| item.span().end);
        Ok(Node::Sequence {
            anchor: None,
            style: CollectionStyle::Block,
            indent,
            items,
            span: Span::new(start, end),
        })
    }

    /// Plain scalar, possibly continued on deeper-indented lines.
    fn parse_plain(&mut self, parent: isize) -> ParseResult<Node> {
        let start = self.offset();
        let first = plain_segment(self.rest());
        let mut value = first.to_string();
        self.col += first.len();
        let mut end = self.offset();

        let mut has_comment = !self.at_line_end_without_comment();
        let mut pending_newlines = 0;
        let mut next = self.line + 1;
        while !has_comment && next < self.lines.len() {
            let line = &self.lines[next];
            let trimmed = line.text.trim();
            if trimmed.is_empty() {
                pending_newlines += 1;
                next += 1;
                continue;
            }
            if line.indent as isize <= parent || trimmed.starts_with('#') {
                break;
            }

            let segment = plain_segment(&line.text[line.indent..]);
            if pending_newlines > 0 {
                value.push_str(&"\n".repeat(pending_newlines));
            } else {
                value.push(' ');
            }
            value.push_str(segment);
            pending_newlines = 0;

            self.line = next;
            self.col = line.indent + segment.len();
            end = self.offset();
            has_comment = !self.at_line_end_without_comment();
            next += 1;
        }

        Ok(Node::Scalar {
            anchor: None,
            value,
            style: ScalarStyle::Plain,
            span: Span::new(start, end),
        })
    }

    /// Only whitespace remains, not even a comment.
    fn at_line_end_without_comment(&self) -> bool {
        self.rest().trim().is_empty()
    }

    fn parse_quoted(&mut self) -> ParseResult<Node> {
        let start = self.offset();
        let quote = self.rest().as_bytes()[0];
        let style = if quote == b'"' {
            ScalarStyle::DoubleQuoted
        } else {
            ScalarStyle::SingleQuoted
        };

        let mut raw = String::new();
        let mut col = self.col + 1;
        loop {
            let text = self.lines[self.line].text;
            match find_closing_quote(&text[col..], quote) {
                Some(close) => {
                    raw.push_str(&text[col..col + close]);
                    self.col = col + close + 1;
                    break;
                }
                None => {
                    raw.push_str(&text[col..]);
                    raw.push('\n');
                    if self.line + 1 >= self.lines.len() {
                        return Err(self.error_at(self.line, "unterminated quoted scalar"));
                    }
                    self.line += 1;
                    col = 0;
                }
            }
        }

        Ok(Node::Scalar {
            anchor: None,
            value: unquote(&fold_lines(&raw), quote),
            style,
            span: Span::new(start, self.offset()),
        })
    }

    fn parse_block_scalar(&mut self, parent: isize) -> ParseResult<Node> {
        let start = self.offset();
        let header = token(self.rest());
        let style = if header.starts_with('|') {
            ScalarStyle::Literal
        } else {
            ScalarStyle::Folded
        };
        if !header[1..]
            .chars()
            .all(|c| c == '+' || c == '-' || c.is_ascii_digit())
        {
            return Err(self.error_at(self.line, "invalid block scalar header"));
        }
        let indicator = header[1..]
            .chars()
            .find_map(|c| c.to_digit(10))
            .map(|digit| digit as usize);
        self.col += header.len();
        let mut end = self.offset();
        if !self.at_line_end() {
            return Err(self.error_at(self.line, "unexpected content after block scalar header"));
        }

        let Some(first) = self.next_significant_content(self.line + 1) else {
            return Ok(Node::Scalar {
                anchor: None,
                value: String::new(),
                style,
                span: Span::new(start, end),
            });
        };
        // An indentation indicator counts from the owning node
        let content_indent = match indicator {
            Some(extra) => parent.max(0) as usize + extra,
            None => self.lines[first].indent,
        };
        if content_indent as isize <= parent || self.lines[first].indent < content_indent {
            return Ok(Node::Scalar {
                anchor: None,
                value: String::new(),
                style,
                span: Span::new(start, end),
            });
        }

        let mut body = Vec::new();
        let mut last = first;
        for index in first..self.lines.len() {
            let line = &self.lines[index];
            if line.text.trim().is_empty() {
                body.push("");
                continue;
            }
            if line.indent < content_indent {
                break;
            }
            body.push(&line.text[content_indent..]);
            last = index;
        }
        body.truncate(last - first + 1);

        self.line = last;
        self.col = self.lines[last].text.len();
        end = self.line_end_offset(last);

        let value = match style {
            ScalarStyle::Folded => body.join(" "),
            _ => body.join("\n"),
        };
        Ok(Node::Scalar {
            anchor: None,
            value,
            style,
            span: Span::new(start, end),
        })
    }

    /// Next line with any non-whitespace character, comments included.
    fn next_significant_content(&self, from: usize) -> Option<usize> {
        (from..self.lines.len()).find(|&i| !self.lines[i].text.trim().is_empty())
    }

    /// Parse a `[...]` or `{...}` collection, which may span lines.
    fn parse_flow(&mut self) -> ParseResult<Node> {
        let mut pos = self.offset();
        let node = self.flow_node(&mut pos)?;
        self.seek(pos);
        Ok(node)
    }

    fn flow_error(&self, offset: usize, message: &str) -> ManifestError {
        self.error_at(self.line_of(offset), message)
    }

    /// Skip whitespace, line breaks and comments between flow tokens.
    fn flow_skip(&self, pos: &mut usize) {
        let bytes = self.text.as_bytes();
        while let Some(&byte) = bytes.get(*pos) {
            match byte {
                b' ' | b'\t' | b'\r' | b'\n' => *pos += 1,
                b'#' if *pos == 0 || bytes[*pos - 1].is_ascii_whitespace() => {
                    *pos = self.text[*pos..]
                        .find('\n')
                        .map_or(bytes.len(), |i| *pos + i);
                }
                _ => break,
            }
        }
    }

    fn flow_node(&mut self, pos: &mut usize) -> ParseResult<Node> {
        let text = self.text;
        let bytes = text.as_bytes();
        let mut anchor = None;

        loop {
            self.flow_skip(pos);
            match bytes.get(*pos) {
                Some(b'&') => {
                    let name = flow_token(&text[*pos + 1..]);
                    if name.is_empty() {
                        return Err(self.flow_error(*pos, "empty anchor name"));
                    }
                    anchor = Some(name.to_string());
                    *pos += 1 + name.len();
                }
                Some(b'!') => *pos += flow_token(&text[*pos..]).len(),
                _ => break,
            }
        }

        let start = *pos;
        let mut node = match bytes.get(start) {
            Some(b'*') => {
                let name = flow_token(&text[start + 1..]);
                *pos += 1 + name.len();
                Node::Alias {
                    name: name.to_string(),
                    span: Span::new(start, *pos),
                }
            }
            Some(b'{') => self.flow_mapping(pos)?,
            Some(b'[') => self.flow_sequence(pos)?,
            Some(&quote @ (b'"' | b'\'')) => self.flow_quoted(pos, quote)?,
            _ => self.flow_plain(pos),
        };

        if let Some(name) = anchor {
            self.define(name, &mut node);
        }
        Ok(node)
    }

    fn flow_mapping(&mut self, pos: &mut usize) -> ParseResult<Node> {
        let text = self.text;
        let bytes = text.as_bytes();
        let start = *pos;
        *pos += 1;
        let mut entries = Vec::new();

        loop {
            self.flow_skip(pos);
            match bytes.get(*pos) {
                None => return Err(self.flow_error(start, "unterminated flow mapping")),
                Some(b'}') => {
                    *pos += 1;
                    break;
                }
                Some(b'?') if bytes.get(*pos + 1).is_some_and(u8::is_ascii_whitespace) => {
                    *pos += 1;
                }
                _ => {}
            }

            let key = self.flow_node(pos)?;
            self.flow_skip(pos);
            let value = if bytes.get(*pos) == Some(&b':') {
                self.flow_value(pos)?
            } else {
                Self::null_at(key.span().end)
            };
            entries.push(Entry {
                key: self.key_text(&key),
                key_span: key.span(),
                value,
            });

            self.flow_skip(pos);
            match bytes.get(*pos) {
                Some(b',') => *pos += 1,
                Some(b'}') => {
                    *pos += 1;
                    break;
                }
                _ => return Err(self.flow_error(*pos, "expected ',' or '}' in flow mapping")),
            }
        }

        Ok(Node::Mapping {
            anchor: None,
            style: CollectionStyle::Flow,
            indent: 0,
            entries,
            span: Span::new(start, *pos),
        })
    }

    fn flow_sequence(&mut self, pos: &mut usize) -> ParseResult<Node> {
        let text = self.text;
        let bytes = text.as_bytes();
        let start = *pos;
        *pos += 1;
        let mut items = Vec::new();

        loop {
            self.flow_skip(pos);
            match bytes.get(*pos) {
                None => return Err(self.flow_error(start, "unterminated flow sequence")),
                Some(b']') => {
                    *pos += 1;
                    break;
                }
                _ => {}
            }

            let item = self.flow_node(pos)?;
            self.flow_skip(pos);
            // `[key: value]` holds a single-pair mapping
            let item = if bytes.get(*pos) == Some(&b':') {
                let value = self.flow_value(pos)?;
                let span = Span::new(item.span().start, value.span().end.max(item.span().end));
                Node::Mapping {
                    anchor: None,
                    style: CollectionStyle::Flow,
                    indent: 0,
                    entries: vec![Entry {
                        key: self.key_text(&item),
                        key_span: item.span(),
                        value,
                    }],
                    span,
                }
            } else {
                item
            };
            items.push(item);

            self.flow_skip(pos);
            match bytes.get(*pos) {
                Some(b',') => *pos += 1,
                Some(b']') => {
                    *pos += 1;
                    break;
                }
                _ => return Err(self.flow_error(*pos, "expected ',' or ']' in flow sequence")),
            }
        }

        Ok(Node::Sequence {
            anchor: None,
            style: CollectionStyle::Flow,
            indent: 0,
            items,
            span: Span::new(start, *pos),
        })
    }

    /// Value after the `:` at `pos`; a missing value is a null right after
    /// the indicator.
    fn flow_value(&mut self, pos: &mut usize) -> ParseResult<Node> {
        *pos += 1;
        let after_colon = *pos;
        self.flow_skip(pos);
        let text = self.text;
        match text.as_bytes().get(*pos) {
            None | Some(b',' | b'}' | b']') => Ok(Self::null_at(after_colon)),
            Some(_) => self.flow_node(pos),
        }
    }

    fn flow_quoted(&self, pos: &mut usize, quote: u8) -> ParseResult<Node> {
        let start = *pos;
        let Some(close) = find_closing_quote(&self.text[start + 1..], quote) else {
            return Err(self.flow_error(start, "unterminated quoted scalar"));
        };
        let raw = &self.text[start + 1..start + 1 + close];
        *pos = start + close + 2;

        Ok(Node::Scalar {
            anchor: None,
            value: unquote(&fold_lines(raw), quote),
            style: if quote == b'"' {
                ScalarStyle::DoubleQuoted
            } else {
                ScalarStyle::SingleQuoted
            },
            span: Span::new(start, *pos),
        })
    }

    /// Plain scalar inside a flow collection; empty when an indicator
    /// follows immediately.
    fn flow_plain(&self, pos: &mut usize) -> Node {
        let bytes = self.text.as_bytes();
        let start = *pos;
        let mut end = start;

        for (i, &byte) in bytes.iter().enumerate().skip(start) {
            let stop = match byte {
                b',' | b'[' | b']' | b'{' | b'}' => true,
                b':' => bytes
                    .get(i + 1)
                    .is_none_or(|next| next.is_ascii_whitespace() || b",[]{}".contains(next)),
                b'#' => i > start && bytes[i - 1].is_ascii_whitespace(),
                _ => false,
            };
            if stop {
                break;
            }
            if !byte.is_ascii_whitespace() {
                end = i + 1;
            }
        }

        *pos = end;
        Node::Scalar {
            anchor: None,
            value: fold_lines(&self.text[start..end]),
            style: ScalarStyle::Plain,
            span: Span::new(start, end),
        }
    }
}

struct Key {
    value: String,
    /// Byte length of the key text.
    len: usize,
    /// Offset of the `:` indicator.
    colon: usize,
}

/// Recognise `key:` at the start of `rest`.
fn scan_key(rest: &str) -> Option<Key> {
    let (value, len) = match rest.as_bytes().first()? {
        quote @ (b'"' | b'\'') => {
            let close = find_closing_quote(&rest[1..], *quote)? + 1;
            (unquote(&rest[1..close], *quote), close + 1)
        }
        b'[' | b'{' | b'&' | b'*' | b'!' | b'|' | b'>' | b'#' | b'%' | b'@' | b'`' => return None,
        _ => {
            let mut previous = ' ';
            let mut found = None;
            for (i, c) in rest.char_indices() {
                if c == '#' && previous.is_whitespace() {
                    return None;
                }
                if c == ':' {
                    let next = rest[i + 1..].chars().next();
                    if next.is_none_or(|n| n == ' ' || n == '\t') {
                        found = Some(i);
                        break;
                    }
                }
                previous = c;
            }
            let key = rest[..found?].trim_end();
            (key.to_string(), key.len())
        }
    };

    let after = &rest[len..];
    let trimmed = after.trim_start_matches([' ', '\t']);
    let colon = len + (after.len() - trimmed.len());
    let follows = trimmed.strip_prefix(':')?;
    if follows.is_empty() || follows.starts_with([' ', '\t']) {
        Some(Key { value, len, colon })
    } else {
        None
    }
}

fn is_sequence_entry(rest: &str) -> bool {
    rest == "-" || rest.starts_with("- ") || rest.starts_with("-\t")
}

fn is_explicit_key(rest: &str) -> bool {
    rest == "?" || rest.starts_with("? ") || rest.starts_with("?\t")
}

fn is_value_indicator(rest: &str) -> bool {
    rest == ":" || rest.starts_with(": ") || rest.starts_with(":\t")
}

fn is_blank_or_comment(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.is_empty() || trimmed.starts_with('#')
}

/// Anchor, alias or tag name inside a flow collection.
fn flow_token(text: &str) -> &str {
    let end = text
        .find(|c: char| c.is_whitespace() || matches!(c, ',' | '[' | ']' | '{' | '}'))
        .unwrap_or(text.len());
    &text[..end]
}

/// Leading run of non-whitespace characters.
fn token(text: &str) -> &str {
    let end = text
        .find(|c: char| c.is_whitespace())
        .unwrap_or(text.len());
    &text[..end]
}

/// Plain scalar text on one line, stopping before a comment.
fn plain_segment(text: &str) -> &str {
    let mut previous = ' ';
    let mut end = text.len();
    for (i, c) in text.char_indices() {
        if c == '#' && previous.is_whitespace() && i > 0 {
            end = i;
            break;
        }
        previous = c;
    }
    text[..end].trim_end()
}

/// Index of the closing quote in `text`, which starts after the opening one.
fn find_closing_quote(text: &str, quote: u8) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if quote == b'"' && bytes[i] == b'\\' {
            i += 2;
            continue;
        }
        if bytes[i] == quote {
            if quote == b'\'' && bytes.get(i + 1) == Some(&b'\'') {
                i += 2;
                continue;
            }
            return Some(i);
        }
        i += 1;
    }
    None
}

/// Fold the line breaks of a multi-line flow scalar into spaces.
fn fold_lines(raw: &str) -> String {
    if !raw.contains('\n') {
        return raw.to_string();
    }
    raw.split('\n')
        .map(str::trim)
        .collect::<Vec<_>>()
        .join(" ")
}

fn unquote(raw: &str, quote: u8) -> String {
    if quote == b'\'' {
        return raw.replace("''", "'");
    }

    let mut value = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            value.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => value.push('\n'),
            Some('t') => value.push('\t'),
            Some('r') => value.push('\r'),
            Some('0') => value.push('\0'),
            Some(other) => value.push(other),
            None => {}
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Document {
        Document::parse(text).unwrap()
    }

    fn root(doc: &Document) -> &Node {
        doc.root.as_ref().unwrap()
    }

    fn slice<'t>(text: &'t str, node: &Node) -> &'t str {
        let span = node.span();
        &text[span.start..span.end]
    }

    #[test]
    fn test_nested_mappings_with_comments() {
        let text = "# header\napiVersion: v1 # inline\nkind: ConfigMap\nmetadata:\n  # about the name\n  name: demo\n  labels:\n    app: demo\ndata:\n  key: value\n";
        let doc = parse(text);
        let root = root(&doc);

        assert_eq!(root.get("kind").and_then(Node::as_scalar), Some("ConfigMap"));
        let metadata = root.get("metadata").unwrap();
        assert!(matches!(metadata, Node::Mapping { indent: 2, .. }));
        assert_eq!(metadata.get("name").and_then(Node::as_scalar), Some("demo"));
        assert_eq!(slice(text, metadata.get("name").unwrap()), "demo");
        assert_eq!(slice(text, root.get("apiVersion").unwrap()), "v1");
    }

    #[test]
    fn test_sequences_compact_and_same_indent() {
        let text = "containers:\n- name: app\n  image: nginx\n- name: sidecar\n  args:\n    - --verbose\n    - \"quoted\"\nnext: 1\n";
        let doc = parse(text);
        let root = root(&doc);

        let Node::Sequence { items, .. } = root.get("containers").unwrap() else {
            panic!("expected sequence");
        };
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].get("image").and_then(Node::as_scalar), Some("nginx"));
        let Node::Sequence { items: args, .. } = items[1].get("args").unwrap() else {
            panic!("expected args sequence");
        };
        assert_eq!(args[1].as_scalar(), Some("quoted"));
        assert_eq!(root.get("next").and_then(Node::as_scalar), Some("1"));
    }

    #[test]
    fn test_scalar_styles() {
        let text = "single: 'it''s'\ndouble: \"a\\tb\"\nliteral: |\n  line one\n  line two\nfolded: >-\n  folded\n  text\nplain: multi\n  line\nempty:\n";
        let doc = parse(text);
        let root = root(&doc);

        assert_eq!(root.get("single").and_then(Node::as_scalar), Some("it's"));
        assert_eq!(root.get("double").and_then(Node::as_scalar), Some("a\tb"));
        assert_eq!(
            root.get("literal").and_then(Node::as_scalar),
            Some("line one\nline two")
        );
        assert_eq!(root.get("folded").and_then(Node::as_scalar), Some("folded text"));
        assert_eq!(root.get("plain").and_then(Node::as_scalar), Some("multi line"));

        let empty = root.get("empty").unwrap();
        assert!(empty.is_null());
        assert!(empty.span().is_empty());
    }

    #[test]
    fn test_block_scalar_span_covers_body() {
        let text = "script: |\n  echo hi\n\n  echo bye\nafter: x\n";
        let doc = parse(text);
        let script = root(&doc).get("script").unwrap();
        assert_eq!(slice(text, script), "|\n  echo hi\n\n  echo bye");
    }

    #[test]
    fn test_anchors_and_aliases() {
        let text = "base: &meta\n  name: shared\nother: *meta\ntag: !!str 42\n";
        let doc = parse(text);
        let root = root(&doc);

        assert_eq!(root.get("base").unwrap().anchor(), Some("meta"));
        let alias = root.get("other").unwrap();
        assert!(matches!(alias, Node::Alias { name, .. } if name == "meta"));
        let resolved = doc.resolve(alias).unwrap();
        assert_eq!(resolved.get("name").and_then(Node::as_scalar), Some("shared"));
        assert_eq!(root.get("tag").and_then(Node::as_scalar), Some("42"));
    }

    #[test]
    fn test_flow_collections_have_entries() {
        let text = "metadata: {name: x, namespace: \"y\"}\nports: [80,\n  443]\n";
        let doc = parse(text);
        let root = root(&doc);

        let metadata = root.get("metadata").unwrap();
        assert!(matches!(
            metadata,
            Node::Mapping { style: CollectionStyle::Flow, .. }
        ));
        assert_eq!(slice(text, metadata), "{name: x, namespace: \"y\"}");
        assert_eq!(metadata.get("name").and_then(Node::as_scalar), Some("x"));
        assert_eq!(slice(text, metadata.get("namespace").unwrap()), "\"y\"");

        let ports = root.get("ports").unwrap();
        let Node::Sequence { style: CollectionStyle::Flow, items, .. } = ports else {
            panic!("expected flow sequence");
        };
        assert_eq!(items.iter().filter_map(Node::as_scalar).collect::<Vec<_>>(), ["80", "443"]);
        assert_eq!(slice(text, ports), "[80,\n  443]");
    }

    #[test]
    fn test_flow_nulls_and_anchors() {
        let text = "m: {a: , b: &v 1, c: *v, d}\n";
        let doc = parse(text);
        let m = root(&doc).get("m").unwrap();

        assert!(m.get("a").unwrap().is_null());
        assert_eq!(m.get("a").unwrap().span(), Span::new(6, 6));
        assert_eq!(doc.resolve(m.get("c").unwrap()).and_then(Node::as_scalar), Some("1"));
        assert!(m.get("d").unwrap().is_null());
    }

    #[test]
    fn test_json_document() {
        let text = "{\n  \"kind\": \"ConfigMap\",\n  \"metadata\": {\"name\": \"a\", \"labels\": {\"x\": [1, 2]}}\n}\n";
        let doc = parse(text);
        let root = root(&doc);

        assert!(matches!(root, Node::Mapping { style: CollectionStyle::Flow, .. }));
        assert_eq!(root.get("kind").and_then(Node::as_scalar), Some("ConfigMap"));
        let metadata = root.get("metadata").unwrap();
        assert_eq!(slice(text, metadata.get("name").unwrap()), "\"a\"");
        assert!(metadata.get("labels").and_then(|labels| labels.get("x")).is_some());
    }

    #[test]
    fn test_urls_and_colons_in_values() {
        let text = "url: http://example.com:8080/path\nkey:with-colon: x\n";
        let doc = parse(text);
        let root = root(&doc);
        assert_eq!(
            root.get("url").and_then(Node::as_scalar),
            Some("http://example.com:8080/path")
        );
        assert_eq!(root.get("key:with-colon").and_then(Node::as_scalar), Some("x"));
    }

    #[test]
    fn test_quoted_keys() {
        let doc = parse("\"app.kubernetes.io/name\": web\n'x': y\n");
        let root = root(&doc);
        assert_eq!(root.get("app.kubernetes.io/name").and_then(Node::as_scalar), Some("web"));
        assert_eq!(root.get("x").and_then(Node::as_scalar), Some("y"));
    }

    #[test]
    fn test_comment_only_document_has_no_root() {
        assert!(parse("# nothing here\n\n").root.is_none());
    }

    #[test]
    fn test_scalar_root() {
        let doc = parse("just a string\n");
        assert_eq!(root(&doc).as_scalar(), Some("just a string"));
    }

    #[test]
    fn test_invalid_yaml_is_rejected() {
        assert!(matches!(
            Document::parse("key: [unclosed\nother: : :\n"),
            Err(ManifestError::YamlParse(_))
        ));
    }

    #[test]
    fn test_explicit_keys() {
        let text = "? name\n: demo\n? [a, b]\n: pair\n? lonely\nafter: x\n";
        let doc = parse(text);
        let root = root(&doc);

        assert_eq!(root.get("name").and_then(Node::as_scalar), Some("demo"));
        assert_eq!(root.get("[a, b]").and_then(Node::as_scalar), Some("pair"));
        assert!(root.get("lonely").unwrap().is_null());
        assert_eq!(root.get("after").and_then(Node::as_scalar), Some("x"));
    }

    #[test]
    fn test_block_scalar_indentation_indicator() {
        let text = "x: |2\n    indented first\n  second\ny: z\n";
        let doc = parse(text);
        let root = root(&doc);

        assert_eq!(
            root.get("x").and_then(Node::as_scalar),
            Some("  indented first\nsecond")
        );
        assert_eq!(root.get("y").and_then(Node::as_scalar), Some("z"));
    }

    #[test]
    fn test_alias_uses_closest_preceding_anchor() {
        let text = "a: &x first\nb: *x\nc: &x second\nd: *x\n";
        let doc = parse(text);
        let root = root(&doc);
        let resolved = |key: &str| doc.resolve(root.get(key).unwrap()).and_then(Node::as_scalar);

        assert_eq!(resolved("b"), Some("first"));
        assert_eq!(resolved("d"), Some("second"));
    }

    #[test]
    fn test_crlf_line_endings() {
        let text = "metadata:\r\n  name: demo\r\n";
        let doc = parse(text);
        let name = root(&doc).get("metadata").unwrap().get("name").unwrap();
        assert_eq!(slice(text, name), "demo");
    }
}
