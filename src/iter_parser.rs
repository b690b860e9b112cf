use std::borrow::Cow;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::iter::FusedIterator;
use std::mem;
use std::path::Path;
use std::sync::Arc;

use log::{debug, trace};
use quick_xml::escape;
use quick_xml::events::BytesStart;
use string_cache::DefaultAtom as Atom;

use crate::config::ParserOptions;
use crate::errors::{Error, Result};
use crate::event::{AttributeMap, Attributes, ParseEvent, Position, strip_namespace};
use crate::event_queue::EventQueue;
use crate::text_accumulator::TextAccumulator;
use crate::tokenizer::{TokenHandler, Tokenizer};

/// Read-buffer size used by [`iterparse`] and by default [`ParserOptions`].
pub const DEFAULT_BUFFER_SIZE: usize = 1 << 14;
pub const MIN_BUFFER_SIZE: usize = 1 << 10;
pub const MAX_BUFFER_SIZE: usize = 1 << 24;

/// Name of the table-cell element, by far the most frequent tag in TABLEDATA.
const TD: &[u8] = b"TD";

pub(crate) fn clamp_buffer_size(requested: usize) -> usize {
    let clamped = requested.clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE);
    if clamped != requested {
        debug!(
            "Buffer size {} is out of range, using {} instead",
            requested, clamped
        );
    }
    clamped
}

/// Turns tokenizer callbacks into queued [`ParseEvent`]s.
#[derive(Debug)]
struct EventBuilder {
    queue: EventQueue,
    text: TextAccumulator,
    /// Character data is only collected between a start tag and the next end tag.
    keep_text: bool,
    empty_attributes: Attributes,
    td_name: Atom,
}

impl EventBuilder {
    fn new(queue_capacity: usize, text_capacity: usize) -> Result<Self> {
        Ok(Self {
            queue: EventQueue::with_capacity(queue_capacity)?,
            text: TextAccumulator::with_capacity(text_capacity)?,
            keep_text: false,
            empty_attributes: Arc::new(AttributeMap::default()),
            td_name: Atom::from("TD"),
        })
    }

    fn element_name(&self, raw: &[u8], position: Position) -> Result<Atom> {
        if raw == TD {
            return Ok(self.td_name.clone());
        }
        let name = std::str::from_utf8(strip_namespace(raw))
            .map_err(|_| Error::malformed(position, "not well-formed (invalid token)"))?;
        Ok(Atom::from(name))
    }

    fn attributes(&self, element: &BytesStart<'_>, position: Position) -> Result<Attributes> {
        let mut attributes: Option<AttributeMap> = None;
        for attribute in element.attributes() {
            let attribute = attribute.map_err(|e| Error::malformed(position, e.to_string()))?;
            if attribute.value.is_empty() {
                continue;
            }
            let key = std::str::from_utf8(attribute.key.as_ref())
                .map_err(|_| Error::malformed(position, "not well-formed (invalid token)"))?;
            let value = normalize_attribute_value(&attribute.value);
            let value = std::str::from_utf8(&value)
                .map_err(|_| Error::malformed(position, "not well-formed (invalid token)"))?;
            let value = escape::unescape(value)
                .map_err(|e| Error::malformed(position, format!("undefined entity: {}", e)))?;
            attributes
                .get_or_insert_with(|| AttributeMap::with_capacity_and_hasher(4, Default::default()))
                .insert(key.to_string(), value.into_owned());
        }
        Ok(match attributes {
            Some(attributes) => Arc::new(attributes),
            None => Arc::clone(&self.empty_attributes),
        })
    }
}

/// Literal tabs, newlines and carriage returns in an attribute value become spaces, with a
/// CR LF pair counting once. Character references are resolved afterwards and survive.
fn normalize_attribute_value(raw: &[u8]) -> Cow<'_, [u8]> {
    if !raw.iter().any(|&b| matches!(b, b'\t' | b'\n' | b'\r')) {
        return Cow::Borrowed(raw);
    }
    let mut normalized = Vec::with_capacity(raw.len());
    let mut bytes = raw.iter().copied().peekable();
    while let Some(byte) = bytes.next() {
        match byte {
            b'\r' => {
                bytes.next_if_eq(&b'\n');
                normalized.push(b' ');
            }
            b'\t' | b'\n' => normalized.push(b' '),
            _ => normalized.push(byte),
        }
    }
    Cow::Owned(normalized)
}

impl TokenHandler for EventBuilder {
    fn start_element(&mut self, element: &BytesStart<'_>, position: Position) -> Result<()> {
        let name = self.element_name(element.name().as_ref(), position)?;
        let attributes = self.attributes(element, position)?;
        self.queue.push(ParseEvent::Start {
            name,
            attributes,
            position,
        })?;
        self.text.clear();
        self.keep_text = true;
        Ok(())
    }

    fn character_data(&mut self, data: &[u8]) -> Result<()> {
        if self.keep_text {
            self.text.append(data)?;
        }
        Ok(())
    }

    fn end_element(&mut self, name: &[u8], position: Position) -> Result<()> {
        let name = self.element_name(name, position)?;
        let text = std::str::from_utf8(self.text.trimmed())
            .map_err(|_| Error::malformed(position, "not well-formed (invalid token)"))?
            .to_owned();
        self.queue.push(ParseEvent::End {
            name,
            text,
            position,
        })?;
        self.keep_text = false;
        Ok(())
    }
}

#[derive(Debug)]
enum State {
    /// More input may follow.
    Open,
    /// The source returned its last byte. Only queued events remain.
    Exhausted,
    /// An error occurred behind queued events and is returned once they are drained.
    Failed(Error),
    Finished,
}

/// Pull parser producing one [`ParseEvent`] per call to `next`.
///
/// Input is read from `source` in chunks of the configured buffer size. Each time the
/// internal queue runs dry, chunks are read and tokenized until at least one event is
/// available, the input ends or an error occurs. Events produced before an error are
/// always delivered first; the error is then yielded once and the iterator ends.
///
/// The text of an `End` event is the trimmed character data collected since the most
/// recent start tag, up to the first end tag after it. Text following a child element is
/// not collected, so `<T><A>hi</A></T>` ends `T` with the text `"hi"`. Attribute values
/// are entity-unescaped and their literal whitespace characters normalized to spaces.
///
/// # Example
///
/// ```rust
/// use tabxml::{ParseEvent, iterparse};
///
/// let xml = r#"<TABLE><TR><TD> 1 </TD></TR></TABLE>"#;
/// let texts: Vec<String> = iterparse(xml.as_bytes())
///     .unwrap()
///     .filter_map(|event| match event.unwrap() {
///         ParseEvent::End { name, text, .. } if &*name == "TD" => Some(text),
///         _ => None,
///     })
///     .collect();
/// assert_eq!(texts, vec!["1"]);
/// ```
pub struct IterParser<R> {
    source: R,
    read_buf: Vec<u8>,
    tokenizer: Tokenizer,
    builder: EventBuilder,
    state: State,
}

impl<R: Read> IterParser<R> {
    /// Creates a parser reading `source` in chunks of `buffer_size` bytes.
    ///
    /// `buffer_size` is clamped to [`MIN_BUFFER_SIZE`]..=[`MAX_BUFFER_SIZE`]. The event
    /// queue holds `buffer_size / 2` events.
    pub fn new(source: R, buffer_size: usize) -> Result<Self> {
        let buffer_size = clamp_buffer_size(buffer_size);
        Self::with_queue_capacity(source, buffer_size, buffer_size / 2)
    }

    pub fn with_options(source: R, options: &ParserOptions) -> Result<Self> {
        Self::new(source, options.buffer_size)
    }

    fn with_queue_capacity(source: R, buffer_size: usize, queue_capacity: usize) -> Result<Self> {
        let mut read_buf = Vec::new();
        read_buf.try_reserve_exact(buffer_size).map_err(|e| {
            Error::OutOfMemory(format!("Out of memory for the read buffer: {}", e))
        })?;
        read_buf.resize(buffer_size, 0);
        Ok(Self {
            source,
            read_buf,
            tokenizer: Tokenizer::new(),
            builder: EventBuilder::new(queue_capacity, buffer_size)?,
            state: State::Open,
        })
    }

    /// Size of the chunks read from the source.
    pub fn buffer_size(&self) -> usize {
        self.read_buf.len()
    }

    /// Fills the read buffer, stopping early only at the end of the source.
    fn read_chunk(&mut self) -> Result<usize> {
        let mut filled = 0;
        while filled < self.read_buf.len() {
            match self.source.read(&mut self.read_buf[filled..]) {
                Ok(0) => break,
                Ok(read) => filled += read,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }

    /// Reads and tokenizes chunks until the queue holds an event or the input ends.
    fn refill(&mut self) -> Result<()> {
        self.builder.queue.reset();
        loop {
            let read = self.read_chunk()?;
            let is_final = read < self.read_buf.len();
            self.tokenizer
                .feed(&self.read_buf[..read], is_final, &mut self.builder)?;
            if is_final {
                self.state = State::Exhausted;
                break;
            }
            if !self.builder.queue.is_empty() {
                break;
            }
        }
        trace!(
            "Queued {} events of {}, depth {}",
            self.builder.queue.len(),
            self.builder.queue.capacity(),
            self.tokenizer.depth()
        );
        Ok(())
    }
}

impl IterParser<File> {
    /// Opens the file at `path` and parses it.
    pub fn from_path<P: AsRef<Path>>(path: P, options: &ParserOptions) -> Result<Self> {
        let file = File::open(path)?;
        Self::with_options(file, options)
    }
}

impl<R: Read> Iterator for IterParser<R> {
    type Item = Result<ParseEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(event) = self.builder.queue.pop() {
            return Some(Ok(event));
        }
        match mem::replace(&mut self.state, State::Finished) {
            State::Open => self.state = State::Open,
            State::Failed(error) => return Some(Err(error)),
            State::Exhausted | State::Finished => return None,
        }
        match self.refill() {
            Ok(()) => self.builder.queue.pop().map(Ok),
            Err(error) => match self.builder.queue.pop() {
                Some(event) => {
                    debug!(
                        "Deferring error behind {} queued events: {}",
                        self.builder.queue.len() + 1,
                        error
                    );
                    self.state = State::Failed(error);
                    Some(Ok(event))
                }
                None => {
                    self.state = State::Finished;
                    Some(Err(error))
                }
            },
        }
    }
}

impl<R: Read> FusedIterator for IterParser<R> {}

/// Parses `source` with the default buffer size.
pub fn iterparse<R: Read>(source: R) -> Result<IterParser<R>> {
    IterParser::new(source, DEFAULT_BUFFER_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io;

    #[derive(Debug, PartialEq)]
    enum Ev {
        Start(String, Vec<(String, String)>),
        End(String, String),
    }

    fn simplify(event: ParseEvent) -> Ev {
        match event {
            ParseEvent::Start {
                name, attributes, ..
            } => Ev::Start(
                name.to_string(),
                attributes
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
            ParseEvent::End { name, text, .. } => Ev::End(name.to_string(), text),
        }
    }

    fn start(name: &str, attributes: &[(&str, &str)]) -> Ev {
        Ev::Start(
            name.to_string(),
            attributes
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    fn end(name: &str, text: &str) -> Ev {
        Ev::End(name.to_string(), text.to_string())
    }

    fn parse_all(xml: &str) -> Result<Vec<Ev>> {
        iterparse(xml.as_bytes())?
            .map(|event| event.map(simplify))
            .collect()
    }

    /// Hands out at most `step` bytes per read and is interrupted before every read.
    struct Trickle<'a> {
        data: &'a [u8],
        step: usize,
        interrupt: bool,
    }

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.interrupt = !self.interrupt;
            if self.interrupt {
                return Err(io::Error::from(ErrorKind::Interrupted));
            }
            let n = self.step.min(buf.len()).min(self.data.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    /// Counts the bytes handed to the parser.
    struct Counting<'a> {
        data: &'a [u8],
        read: usize,
    }

    impl Read for Counting<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.data.read(buf)?;
            self.read += n;
            Ok(n)
        }
    }

    struct Failing;

    impl Read for Failing {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::other("connection reset"))
        }
    }

    #[test]
    fn test_basic_event_sequence() -> Result<()> {
        let events = parse_all(r#"<T><A x="1">hi</A><B/></T>"#)?;
        assert_eq!(
            events,
            vec![
                start("T", &[]),
                start("A", &[("x", "1")]),
                end("A", "hi"),
                start("B", &[]),
                end("B", ""),
                end("T", ""),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_positions_point_at_tags() -> Result<()> {
        let positions: Vec<String> = iterparse(r#"<T><A x="1">hi</A><B/></T>"#.as_bytes())?
            .map(|event| event.map(|e| e.position().to_string()))
            .collect::<Result<_>>()?;
        assert_eq!(positions, vec!["1:0", "1:3", "1:14", "1:18", "1:18", "1:22"]);
        Ok(())
    }

    #[test]
    fn test_table_document() -> Result<()> {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?>
<VOTABLE version="1.4">
  <RESOURCE>
    <TABLE name="stars">
      <FIELD name="id" datatype="int"/>
      <FIELD name="mag" datatype="float" unit=""/>
      <DATA>
        <TABLEDATA>
          <TR>
            <TD>1</TD>
            <TD> 12.5 </TD>
          </TR>
          <TR>
            <TD>2</TD>
            <TD/>
          </TR>
        </TABLEDATA>
      </DATA>
    </TABLE>
  </RESOURCE>
</VOTABLE>
"#;
        let events = parse_all(xml)?;
        let cells: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                Ev::End(name, text) if name == "TD" => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(cells, vec!["1", "12.5", "2", ""]);
        assert!(events.contains(&start("FIELD", &[("name", "mag"), ("datatype", "float")])));
        assert_eq!(events.first(), Some(&start("VOTABLE", &[("version", "1.4")])));
        assert_eq!(events.last(), Some(&end("VOTABLE", "")));
        Ok(())
    }

    #[rstest]
    #[case("<a>  hi there \n</a>", "hi there")]
    #[case("<a>\n\t</a>", "")]
    #[case("<a>x &amp; y</a>", "x & y")]
    #[case("<a>&#65;&#x42;C</a>", "ABC")]
    #[case("<a> <![CDATA[ <raw> ]]> </a>", "<raw>")]
    #[case("<a>one<!-- skipped -->two</a>", "onetwo")]
    #[case("<a>é 😊</a>", "é 😊")]
    fn test_element_text(#[case] xml: &str, #[case] expected: &str) -> Result<()> {
        let events = parse_all(xml)?;
        assert_eq!(events[1], end("a", expected));
        Ok(())
    }

    #[test]
    fn test_text_after_child_is_not_collected() -> Result<()> {
        let events = parse_all("<T>before<A>inner</A>after</T>")?;
        assert_eq!(events[2], end("A", "inner"));
        assert_eq!(events[3], end("T", "inner"));
        Ok(())
    }

    #[rstest]
    #[case("<T><A>hi</A></T>", "hi")]
    #[case("<T><A>hi</A><B/></T>", "")]
    #[case("<T><A>hi</A>\n  <B>x</B>\n</T>", "x")]
    fn test_parent_end_keeps_last_child_text(#[case] xml: &str, #[case] expected: &str) -> Result<()> {
        let events = parse_all(xml)?;
        assert_eq!(events.last(), Some(&end("T", expected)));
        Ok(())
    }

    #[test]
    fn test_namespace_prefixes_are_stripped_from_elements_only() -> Result<()> {
        let xml = r#"<vo:VOTABLE xmlns:vo="http://www.ivoa.net/xml/VOTable/v1.3"><vo:TD>1</vo:TD></vo:VOTABLE>"#;
        let events = parse_all(xml)?;
        assert_eq!(
            events,
            vec![
                start(
                    "VOTABLE",
                    &[("xmlns:vo", "http://www.ivoa.net/xml/VOTable/v1.3")]
                ),
                start("TD", &[]),
                end("TD", "1"),
                end("VOTABLE", ""),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_td_fast_path_matches_general_path() -> Result<()> {
        let events: Vec<ParseEvent> =
            iterparse("<T><TD>1</TD><x:TD>2</x:TD></T>".as_bytes())?.collect::<Result<_>>()?;
        assert_eq!(events[1].name(), "TD");
        assert_eq!(events[3].name(), "TD");
        assert_eq!(simplify(events[1].clone()), simplify(events[3].clone()));
        assert_eq!(events[2].text(), Some("1"));
        assert_eq!(events[4].text(), Some("2"));
        Ok(())
    }

    #[test]
    fn test_empty_attribute_sets_are_shared() -> Result<()> {
        let events: Vec<ParseEvent> =
            iterparse(r#"<T><A/><B empty=""/><C c="1"/></T>"#.as_bytes())?
                .collect::<Result<_>>()?;
        let attributes: Vec<&Attributes> = events
            .iter()
            .filter_map(|e| match e {
                ParseEvent::Start { attributes, .. } => Some(attributes),
                _ => None,
            })
            .collect();
        assert!(Arc::ptr_eq(attributes[0], attributes[1]));
        assert!(Arc::ptr_eq(attributes[0], attributes[2]));
        assert!(!Arc::ptr_eq(attributes[0], attributes[3]));
        assert_eq!(attributes[3].get("c").map(String::as_str), Some("1"));
        Ok(())
    }

    #[test]
    fn test_attribute_values_are_unescaped() -> Result<()> {
        let events = parse_all(r#"<T a="&lt;x&gt; &amp; &quot;y&quot;" b='&#65;'/>"#)?;
        assert_eq!(events[0], start("T", &[("a", "<x> & \"y\""), ("b", "A")]));
        Ok(())
    }

    #[test]
    fn test_attribute_whitespace_is_normalized() -> Result<()> {
        let events = parse_all("<T a=\"x\ty\nz\" b=\"1\r\n2\" c=\"&#10;\"/>")?;
        assert_eq!(
            events[0],
            start("T", &[("a", "x y z"), ("b", "1 2"), ("c", "\n")])
        );
        Ok(())
    }

    #[test]
    fn test_events_before_error_are_delivered_first() {
        let mut parser = iterparse("<T><A>1</A><B>2</C></T>".as_bytes()).unwrap();
        let mut events = Vec::new();
        let error = loop {
            match parser.next() {
                Some(Ok(event)) => events.push(simplify(event)),
                Some(Err(error)) => break error,
                None => panic!("expected an error"),
            }
        };
        assert_eq!(
            events,
            vec![start("T", &[]), start("A", &[]), end("A", "1"), start("B", &[])]
        );
        assert_eq!(error.to_string(), "1:15: mismatched tag");
        assert!(parser.next().is_none());
        assert!(parser.next().is_none());
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    fn test_empty_document(#[case] xml: &str) {
        let mut parser = iterparse(xml.as_bytes()).unwrap();
        let error = parser.next().unwrap().unwrap_err();
        assert!(matches!(error, Error::MalformedInput { .. }));
        assert!(error.to_string().ends_with("no element found"));
        assert!(parser.next().is_none());
    }

    #[test]
    fn test_queue_overflow_is_reported() {
        let mut parser = IterParser::with_queue_capacity("<T><A/><B/></T>".as_bytes(), 1024, 2)
            .unwrap();
        assert_eq!(simplify(parser.next().unwrap().unwrap()), start("T", &[]));
        assert_eq!(simplify(parser.next().unwrap().unwrap()), start("A", &[]));
        let error = parser.next().unwrap().unwrap_err();
        assert!(matches!(error, Error::InternalOverflow(_)));
        assert!(parser.next().is_none());
    }

    #[test]
    fn test_invalid_markup_is_reported_from_its_chunk() {
        let mut xml = String::from("<T><!x>");
        xml.push_str(&"<A/>".repeat(1 << 21));
        let mut source = Counting {
            data: xml.as_bytes(),
            read: 0,
        };
        let mut parser = IterParser::new(&mut source, MIN_BUFFER_SIZE).unwrap();
        assert_eq!(simplify(parser.next().unwrap().unwrap()), start("T", &[]));
        let error = parser.next().unwrap().unwrap_err();
        assert_eq!(
            error.to_string(),
            "1:3: syntax error: unknown or missed symbol in markup"
        );
        assert!(parser.next().is_none());
        drop(parser);
        assert_eq!(source.read, MIN_BUFFER_SIZE);
    }

    #[test]
    fn test_read_error_is_reported() {
        let mut parser = iterparse(Failing).unwrap();
        let error = parser.next().unwrap().unwrap_err();
        assert!(matches!(error, Error::Io(_)));
        assert!(parser.next().is_none());
    }

    #[test]
    fn test_long_text_across_many_chunks() -> Result<()> {
        let long_text: String = "0123456789".repeat(1000);
        let mut xml = String::from("<TABLEDATA>\n");
        for row in 0..200 {
            xml.push_str(&format!("  <TR><TD>{}</TD><TD>{}</TD></TR>\n", row, long_text));
        }
        xml.push_str("</TABLEDATA>\n");

        let source = Trickle {
            data: xml.as_bytes(),
            step: 333,
            interrupt: false,
        };
        let parser = IterParser::new(source, MIN_BUFFER_SIZE)?;
        assert_eq!(parser.buffer_size(), MIN_BUFFER_SIZE);

        let mut cells = Vec::new();
        for event in parser {
            if let ParseEvent::End { name, text, .. } = event? {
                if &*name == "TD" {
                    cells.push(text);
                }
            }
        }
        assert_eq!(cells.len(), 400);
        for (row, pair) in cells.chunks(2).enumerate() {
            assert_eq!(pair[0], row.to_string());
            assert_eq!(pair[1], long_text);
        }
        Ok(())
    }

    #[test]
    fn test_positions_across_chunks() -> Result<()> {
        let mut xml = String::from("<T>\n");
        for _ in 0..500 {
            xml.push_str("  <A>é</A>\n");
        }
        xml.push_str("</T>");
        let events: Vec<ParseEvent> =
            IterParser::new(xml.as_bytes(), MIN_BUFFER_SIZE)?.collect::<Result<_>>()?;
        assert_eq!(events.len(), 1002);
        for (index, pair) in events[1..1001].chunks(2).enumerate() {
            let line = index as u64 + 2;
            assert_eq!(pair[0].position(), Position::new(line, 2));
            assert_eq!(pair[1].position(), Position::new(line, 6));
        }
        assert_eq!(events[1001].position(), Position::new(502, 0));
        Ok(())
    }

    #[rstest]
    #[case(0, MIN_BUFFER_SIZE)]
    #[case(1000, MIN_BUFFER_SIZE)]
    #[case(4096, 4096)]
    #[case(DEFAULT_BUFFER_SIZE, DEFAULT_BUFFER_SIZE)]
    #[case(usize::MAX, MAX_BUFFER_SIZE)]
    fn test_buffer_size_is_clamped(#[case] requested: usize, #[case] expected: usize) {
        assert_eq!(clamp_buffer_size(requested), expected);
    }

    #[test]
    fn test_parser_options() -> Result<()> {
        let options = ParserOptions::default().with_buffer_size(2048);
        let parser = IterParser::with_options("<a/>".as_bytes(), &options)?;
        assert_eq!(parser.buffer_size(), 2048);
        assert_eq!(parser.builder.queue.capacity(), 1024);
        Ok(())
    }
}
