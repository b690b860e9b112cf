use std::fmt;
use std::sync::Arc;

use fxhash::FxBuildHasher;
use indexmap::IndexMap;
use string_cache::DefaultAtom as Atom;

/// Attribute name to attribute value, for a single start tag.
pub type AttributeMap = IndexMap<String, String, FxBuildHasher>;

/// Shared, immutable attribute set attached to a `Start` event.
///
/// Start tags without attributes all point at the same empty map owned by the parser.
pub type Attributes = Arc<AttributeMap>;

/// Location of a tag in the input: 1-based line, 0-based column counted in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Position {
    pub line: u64,
    pub column: u64,
}

impl Position {
    pub fn new(line: u64, column: u64) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A structural event produced by [`IterParser`](crate::IterParser).
#[derive(Debug, Clone, PartialEq)]
pub enum ParseEvent {
    /// An element was opened.
    Start {
        name: Atom,
        attributes: Attributes,
        position: Position,
    },
    /// An element was closed. `text` is its body with surrounding whitespace removed.
    End {
        name: Atom,
        text: String,
        position: Position,
    },
}

impl ParseEvent {
    /// Local name of the element (namespace prefix removed).
    pub fn name(&self) -> &str {
        match self {
            ParseEvent::Start { name, .. } | ParseEvent::End { name, .. } => name.as_ref(),
        }
    }

    pub fn position(&self) -> Position {
        match self {
            ParseEvent::Start { position, .. } | ParseEvent::End { position, .. } => *position,
        }
    }

    pub fn is_start(&self) -> bool {
        matches!(self, ParseEvent::Start { .. })
    }

    /// Attributes of a `Start` event, `None` for `End`.
    pub fn attributes(&self) -> Option<&AttributeMap> {
        match self {
            ParseEvent::Start { attributes, .. } => Some(attributes),
            ParseEvent::End { .. } => None,
        }
    }

    /// Text of an `End` event, `None` for `Start`.
    pub fn text(&self) -> Option<&str> {
        match self {
            ParseEvent::Start { .. } => None,
            ParseEvent::End { text, .. } => Some(text),
        }
    }
}

/// Removes everything up to and including the first colon of an element name.
pub(crate) fn strip_namespace(name: &[u8]) -> &[u8] {
    match name.iter().position(|&b| b == b':') {
        Some(colon) => &name[colon + 1..],
        None => name,
    }
}
