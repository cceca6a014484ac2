//! Minimal rich text model for announcement posts.
//!
//! Post facets index into the UTF-8 encoding of the text, so spans are
//! computed in bytes, not chars.

/// One piece of a rich text body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Literal text.
    Text(String),
    /// A mention rendered as `@handle` and linked to `did`.
    Mention {
        /// Handle shown in the text (without the leading `@`).
        handle: String,
        /// DID the mention resolves to.
        did: String,
    },
}

/// Byte range of a mention inside the rendered text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MentionSpan {
    pub byte_start: usize,
    pub byte_end: usize,
    pub did: String,
}

/// An ordered list of segments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RichText {
    segments: Vec<Segment>,
}

impl RichText {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends literal text.
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.segments.push(Segment::Text(text.into()));
        self
    }

    /// Appends a mention.
    pub fn mention(mut self, handle: impl Into<String>, did: impl Into<String>) -> Self {
        self.segments.push(Segment::Mention {
            handle: handle.into(),
            did: did.into(),
        });
        self
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Renders the text and the mention spans in one pass.
    pub fn render(&self) -> (String, Vec<MentionSpan>) {
        let mut text = String::new();
        let mut spans = Vec::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(s) => text.push_str(s),
                Segment::Mention { handle, did } => {
                    let byte_start = text.len();
                    text.push('@');
                    text.push_str(handle.trim_start_matches('@'));
                    spans.push(MentionSpan {
                        byte_start,
                        byte_end: text.len(),
                        did: did.clone(),
                    });
                }
            }
        }
        (text, spans)
    }
}
