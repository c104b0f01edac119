//! Document segmentation: splits an HTML document into an ordered list of
//! protected and text segments so keyword matching never touches markup.

use once_cell::sync::Lazy;
use regex::Regex;

/// Elements whose full contents are off limits for keyword linking.
///
/// `a` keeps already-linked text from being re-linked, the heading and
/// control elements keep navigational text out of the body-link pool, and
/// the rest guard non-prose or executable content. This table is the single
/// source of truth for the protected-region pattern.
const PROTECTED_ELEMENTS: &[&str] = &[
    "a",
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
    "button",
    "label",
    "figcaption",
    "script",
    "style",
    "code",
    "pre",
    "textarea",
    "select",
    "option",
];

// Full protected elements come before the bare-tag alternative so the
// leftmost-first alternation swallows whole elements, not just their
// opening tags. Comments and standalone tags round out the pattern.
static PROTECTED_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    let mut alternatives: Vec<String> = PROTECTED_ELEMENTS
        .iter()
        .map(|element| format!("<{element}\\b[^>]*>.*?</{element}\\s*>"))
        .collect();
    alternatives.push("<!--.*?-->".to_string());
    alternatives.push("<[^>]+>".to_string());
    Regex::new(&format!("(?is)(?:{})", alternatives.join("|"))).ok()
});

/// Classification of one contiguous span of the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    /// Copied through verbatim, never scanned for keywords.
    Protected,
    /// Eligible for keyword matching.
    Text,
}

/// A contiguous span of the document, tagged by how the replacer may use it.
#[derive(Debug, Clone)]
pub struct Segment {
    pub kind: SegmentKind,
    pub content: String,
}

impl Segment {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: SegmentKind::Text,
            content: content.into(),
        }
    }

    pub fn protected(content: impl Into<String>) -> Self {
        Self {
            kind: SegmentKind::Protected,
            content: content.into(),
        }
    }
}

/// Split `document` into an ordered segment list.
///
/// The split is lossless: joining the segments in order reproduces the input
/// byte for byte. A text segment never starts or ends inside a tag. If the
/// protected pattern is unavailable the whole document degrades to a single
/// text segment, trading markup awareness for best-effort linking.
pub fn segment(document: &str) -> Vec<Segment> {
    if document.is_empty() {
        return Vec::new();
    }
    let Some(pattern) = PROTECTED_PATTERN.as_ref() else {
        return vec![Segment::text(document)];
    };

    let mut segments = Vec::new();
    let mut cursor = 0;
    for found in pattern.find_iter(document) {
        if found.start() > cursor {
            segments.push(Segment::text(&document[cursor..found.start()]));
        }
        segments.push(Segment::protected(found.as_str()));
        cursor = found.end();
    }
    if cursor < document.len() {
        segments.push(Segment::text(&document[cursor..]));
    }
    segments
}

/// Join segments back into a document string, in order.
pub fn assemble(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(|segment| segment.content.as_str())
        .collect()
}
