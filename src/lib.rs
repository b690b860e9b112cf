//! The `tabxml` crate reads and writes VOTable `TABLEDATA`, the tabular XML dialect of
//! `<TR>` rows made of `<TD>` cells.
//!
//! Reading is event based: [`IterParser`] pulls bytes from any [`std::io::Read`] source in
//! fixed-size chunks and yields one [`ParseEvent`] at a time, without building a document
//! tree. Writing goes the other way: [`write_tabledata`] serializes an Arrow
//! [`RecordBatch`](arrow::array::RecordBatch) row by row into any [`std::io::Write`] sink.
//!
//! ## Key Features
//!
//! * Bounded memory while parsing, whatever the size of the document.
//! * Errors found while parsing are reported only after every event that precedes them.
//! * Per-cell null masks, including element-wise masks for array-valued cells.
//! * Pluggable per-column [`Converter`]s, with a default based on Arrow's display formatting.
pub mod config;

mod errors;
pub use errors::{Error, Result};

mod converters;
mod escape;
mod event;
mod event_queue;
mod growable_buffer;
mod iter_parser;
mod null_mask;
mod tabledata_writer;
mod text_accumulator;
mod tokenizer;

pub use config::{Config, ParserOptions, WriterOptions};
pub use converters::{Converter, DisplayConverter};
pub use escape::{escape_xml, escape_xml_bytes, escape_xml_cdata, escape_xml_cdata_bytes};
pub use event::{AttributeMap, Attributes, ParseEvent, Position};
pub use iter_parser::{
    DEFAULT_BUFFER_SIZE, IterParser, MAX_BUFFER_SIZE, MIN_BUFFER_SIZE, iterparse,
};
pub use null_mask::{MaskValue, NullMask};
pub use tabledata_writer::write_tabledata;
