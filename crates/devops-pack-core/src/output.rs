//! The output region: accumulated server output rendered as HTML lines.

/// Line separator appended after every received line.
pub const LINE_BREAK: &str = "<br>";

/// Text accumulated from `output` events, in receipt order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputRegion {
    content: String,
    lines: Vec<String>,
}

impl OutputRegion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from existing content; appended lines follow it.
    pub fn with_content(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            lines: Vec::new(),
        }
    }

    /// Append `line` verbatim followed by a line break.
    pub fn append(&mut self, line: &str) {
        self.content.push_str(line);
        self.content.push_str(LINE_BREAK);
        self.lines.push(line.to_string());
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Lines appended since construction.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}
