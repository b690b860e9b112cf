//! Push-style XML tokenizer built on top of `quick-xml`.
//!
//! Input arrives in arbitrary chunks through [`Tokenizer::feed`]. Each feed tokenizes the
//! longest prefix of the buffered bytes that ends before the last `<`, so a tag is never
//! split between two feeds, and reports every structural token to a [`TokenHandler`].
//! Bytes after that prefix are carried over to the next feed. The final feed tokenizes
//! everything that is left.
//!
//! Since a fresh `quick-xml` reader is used for every feed, element nesting, line and
//! column bookkeeping live here rather than in the reader.

use std::mem;

use quick_xml::Reader;
use quick_xml::errors::SyntaxError;
use quick_xml::escape;
use quick_xml::events::{BytesStart, Event};

use crate::errors::{Error, Result};
use crate::event::Position;
use crate::text_accumulator::is_xml_whitespace;

/// Receives the tokens found by [`Tokenizer::feed`].
///
/// Returning an error stops tokenization immediately; no further callbacks are made for
/// the rest of the feed.
pub(crate) trait TokenHandler {
    fn start_element(&mut self, element: &BytesStart<'_>, position: Position) -> Result<()>;

    /// Text, CDATA content and resolved references inside the document element.
    fn character_data(&mut self, data: &[u8]) -> Result<()>;

    fn end_element(&mut self, name: &[u8], position: Position) -> Result<()>;
}

/// Converts byte offsets into line and column numbers, scanning forward only.
#[derive(Debug, Clone, Copy)]
struct LineTracker {
    /// Absolute offset that `position` refers to.
    offset: usize,
    position: Position,
}

impl LineTracker {
    fn new() -> Self {
        Self {
            offset: 0,
            position: Position::new(1, 0),
        }
    }

    fn advance(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            if byte == b'\n' {
                self.position.line += 1;
                self.position.column = 0;
            } else if byte & 0xC0 != 0x80 {
                // Continuation bytes do not start a new character.
                self.position.column += 1;
            }
        }
        self.offset += bytes.len();
    }
}

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug)]
pub(crate) struct Tokenizer {
    /// Bytes received but not tokenized yet.
    carry: Vec<u8>,
    /// Absolute input offset of `carry[0]`.
    base: usize,
    tracker: LineTracker,
    /// Raw names of the open elements, concatenated.
    open_names: Vec<u8>,
    /// End offset of each open element's name in `open_names`.
    open_ends: Vec<usize>,
    root_seen: bool,
    root_closed: bool,
}

impl Tokenizer {
    pub(crate) fn new() -> Self {
        Self {
            carry: Vec::new(),
            base: 0,
            tracker: LineTracker::new(),
            open_names: Vec::with_capacity(256),
            open_ends: Vec::with_capacity(16),
            root_seen: false,
            root_closed: false,
        }
    }

    /// Current nesting depth.
    pub(crate) fn depth(&self) -> usize {
        self.open_ends.len()
    }

    /// Tokenizes `chunk` together with any bytes carried over from the previous feed.
    ///
    /// `is_final` marks the last chunk of the input; afterwards the document must be
    /// complete.
    pub(crate) fn feed<H: TokenHandler>(
        &mut self,
        chunk: &[u8],
        is_final: bool,
        handler: &mut H,
    ) -> Result<()> {
        if self.carry.is_empty() {
            let consumed = self.tokenize(chunk, is_final, handler)?;
            self.commit(chunk, consumed);
            self.carry.extend_from_slice(&chunk[consumed..]);
        } else {
            let mut input = mem::take(&mut self.carry);
            input.extend_from_slice(chunk);
            let consumed = self.tokenize(&input, is_final, handler)?;
            self.commit(&input, consumed);
            input.drain(..consumed);
            self.carry = input;
        }
        if is_final {
            self.finish()?;
        }
        Ok(())
    }

    fn tokenize<H: TokenHandler>(
        &mut self,
        input: &[u8],
        is_final: bool,
        handler: &mut H,
    ) -> Result<usize> {
        let limit = if is_final {
            input.len()
        } else {
            input.iter().rposition(|&b| b == b'<').unwrap_or(0)
        };

        let mut reader = Reader::from_reader(&input[..limit]);
        let config = reader.config_mut();
        // Nesting is tracked here because the reader does not survive between feeds.
        config.check_end_names = false;
        config.allow_unmatched_ends = true;
        config.expand_empty_elements = false;

        let mut consumed = 0;
        loop {
            let start = consumed;
            match reader.read_event() {
                Ok(Event::Eof) => return Ok(consumed),
                Ok(event) => {
                    let end = markup_boundary(input, reader.buffer_position() as usize);
                    self.dispatch(event, input, start, handler)?;
                    consumed = end;
                }
                // Markup cut off by the end of the prefix, e.g. a comment containing `<`.
                // The reader only reports these at the end of its input, so retry once more
                // input has arrived.
                Err(quick_xml::Error::Syntax(ref kind)) if !is_final && is_cut_off(kind) => {
                    return Ok(consumed);
                }
                Err(e) => {
                    let at = (reader.error_position() as usize).clamp(start, limit);
                    return Err(Error::malformed(self.position_at(input, at), e.to_string()));
                }
            }
        }
    }

    fn dispatch<H: TokenHandler>(
        &mut self,
        event: Event<'_>,
        input: &[u8],
        start: usize,
        handler: &mut H,
    ) -> Result<()> {
        match event {
            Event::Start(element) => {
                let position = self.position_at(input, start);
                self.open_element(element.name().as_ref(), position)?;
                handler.start_element(&element, position)
            }
            Event::Empty(element) => {
                let position = self.position_at(input, start);
                self.open_element(element.name().as_ref(), position)?;
                handler.start_element(&element, position)?;
                self.close_element(element.name().as_ref(), position)?;
                handler.end_element(element.name().as_ref(), position)
            }
            Event::End(element) => {
                let position = self.position_at(input, start);
                self.close_element(element.name().as_ref(), position)?;
                handler.end_element(element.name().as_ref(), position)
            }
            Event::Text(text) => {
                let text = text.into_inner();
                if text.contains(&b'&') {
                    let resolved = self.unescape(&text, input, start)?;
                    self.character_data(resolved.as_bytes(), input, start, handler)
                } else {
                    self.character_data(&text, input, start, handler)
                }
            }
            Event::CData(cdata) => {
                let cdata = cdata.into_inner();
                self.character_data(&cdata, input, start, handler)
            }
            Event::GeneralRef(reference) => {
                let name = reference.into_inner();
                let mut raw = Vec::with_capacity(name.len() + 2);
                raw.push(b'&');
                raw.extend_from_slice(&name);
                raw.push(b';');
                let resolved = self.unescape(&raw, input, start)?;
                self.character_data(resolved.as_bytes(), input, start, handler)
            }
            _ => Ok(()),
        }
    }

    fn character_data<H: TokenHandler>(
        &mut self,
        data: &[u8],
        input: &[u8],
        start: usize,
        handler: &mut H,
    ) -> Result<()> {
        if !self.open_ends.is_empty() {
            return handler.character_data(data);
        }
        let data = if self.base + start == 0 {
            data.strip_prefix(UTF8_BOM).unwrap_or(data)
        } else {
            data
        };
        if data.iter().all(|&b| is_xml_whitespace(b)) {
            return Ok(());
        }
        let message = if self.root_closed {
            "junk after document element"
        } else {
            "syntax error"
        };
        Err(Error::malformed(self.position_at(input, start), message))
    }

    /// Resolves predefined entities and character references.
    fn unescape(&mut self, raw: &[u8], input: &[u8], start: usize) -> Result<String> {
        let text = std::str::from_utf8(raw).map_err(|_| {
            Error::malformed(self.position_at(input, start), "not well-formed (invalid token)")
        })?;
        match escape::unescape(text) {
            Ok(resolved) => Ok(resolved.into_owned()),
            Err(e) => Err(Error::malformed(
                self.position_at(input, start),
                format!("undefined entity: {}", e),
            )),
        }
    }

    fn open_element(&mut self, name: &[u8], position: Position) -> Result<()> {
        if self.root_closed {
            return Err(Error::malformed(position, "junk after document element"));
        }
        self.root_seen = true;
        self.open_names.extend_from_slice(name);
        self.open_ends.push(self.open_names.len());
        Ok(())
    }

    fn close_element(&mut self, name: &[u8], position: Position) -> Result<()> {
        let Some(end) = self.open_ends.pop() else {
            return Err(Error::malformed(position, "not well-formed (invalid token)"));
        };
        let start = self.open_ends.last().copied().unwrap_or(0);
        if &self.open_names[start..end] != name {
            return Err(Error::malformed(position, "mismatched tag"));
        }
        self.open_names.truncate(start);
        if self.open_ends.is_empty() {
            self.root_closed = true;
        }
        Ok(())
    }

    /// Checks that the complete input formed a document.
    fn finish(&self) -> Result<()> {
        if !self.root_seen {
            return Err(Error::malformed(self.tracker.position, "no element found"));
        }
        if !self.open_ends.is_empty() {
            return Err(Error::malformed(self.tracker.position, "unclosed token"));
        }
        Ok(())
    }

    /// Line and column of `input[offset]`, where `input` starts at `self.base`.
    fn position_at(&mut self, input: &[u8], offset: usize) -> Position {
        let from = self.tracker.offset - self.base;
        if offset > from {
            self.tracker.advance(&input[from..offset]);
        }
        self.tracker.position
    }

    /// Drops the first `consumed` bytes of `input` from the bookkeeping.
    fn commit(&mut self, input: &[u8], consumed: usize) {
        self.position_at(input, consumed);
        self.base += consumed;
    }
}

/// Whether a syntax error only means the markup has not ended yet.
fn is_cut_off(kind: &SyntaxError) -> bool {
    match kind {
        SyntaxError::UnclosedPIOrXmlDecl
        | SyntaxError::UnclosedComment
        | SyntaxError::UnclosedDoctype
        | SyntaxError::UnclosedCData
        | SyntaxError::UnclosedTag => true,
        SyntaxError::InvalidBangMarkup => false,
    }
}

/// The reader may already have swallowed the `<` that ended a text run. Step back onto it
/// so the next token starts at its markup.
#[inline]
fn markup_boundary(input: &[u8], position: usize) -> usize {
    if position > 0 && input.get(position - 1) == Some(&b'<') {
        position - 1
    } else {
        position
    }
}
