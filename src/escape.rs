//! Escaping of XML reserved characters.
//!
//! Two substitution tables are provided: one for character data (`<`, `>`, `&`) and one
//! for attribute values and other quoted contexts, which additionally covers `'` and `"`.
//! Both narrow (`&[u8]`) and wide (`&str`) inputs are supported, and the output always has
//! the same representation as the input. When nothing needs escaping the input is returned
//! borrowed.

use std::borrow::Cow;

type EscapeTable = [(u8, &'static str)];

const CDATA_ESCAPES: &EscapeTable = &[(b'>', "&gt;"), (b'<', "&lt;"), (b'&', "&amp;")];

const ATTRIBUTE_ESCAPES: &EscapeTable = &[
    (b'>', "&gt;"),
    (b'<', "&lt;"),
    (b'\'', "&apos;"),
    (b'&', "&amp;"),
    (b'"', "&quot;"),
];

/// Longest entity minus the one byte it replaces.
const MAX_ENTITY_GROWTH: usize = 5;

#[inline]
fn entity_for(table: &EscapeTable, byte: u8) -> Option<&'static str> {
    table
        .iter()
        .find_map(|&(reserved, entity)| (reserved == byte).then_some(entity))
}

fn count_reserved(table: &EscapeTable, input: &[u8]) -> usize {
    input
        .iter()
        .filter(|&&b| entity_for(table, b).is_some())
        .count()
}

fn escape_bytes_with<'a>(input: &'a [u8], table: &EscapeTable) -> Cow<'a, [u8]> {
    let count = count_reserved(table, input);
    if count == 0 {
        return Cow::Borrowed(input);
    }
    let mut output = Vec::with_capacity(input.len() + count * MAX_ENTITY_GROWTH);
    for &byte in input {
        match entity_for(table, byte) {
            Some(entity) => output.extend_from_slice(entity.as_bytes()),
            None => output.push(byte),
        }
    }
    Cow::Owned(output)
}

fn escape_str_with<'a>(input: &'a str, table: &EscapeTable) -> Cow<'a, str> {
    let count = count_reserved(table, input.as_bytes());
    if count == 0 {
        return Cow::Borrowed(input);
    }
    let mut output = String::with_capacity(input.len() + count * MAX_ENTITY_GROWTH);
    let mut last = 0;
    // Reserved characters are ASCII, so every match sits on a char boundary.
    for (index, byte) in input.bytes().enumerate() {
        if let Some(entity) = entity_for(table, byte) {
            output.push_str(&input[last..index]);
            output.push_str(entity);
            last = index + 1;
        }
    }
    output.push_str(&input[last..]);
    Cow::Owned(output)
}

/// Escapes `<`, `>`, `&`, `'` and `"`, suitable for attribute values.
pub fn escape_xml(input: &str) -> Cow<'_, str> {
    escape_str_with(input, ATTRIBUTE_ESCAPES)
}

/// Escapes `<`, `>` and `&`, suitable for element text.
pub fn escape_xml_cdata(input: &str) -> Cow<'_, str> {
    escape_str_with(input, CDATA_ESCAPES)
}

/// Byte-string variant of [`escape_xml`].
pub fn escape_xml_bytes(input: &[u8]) -> Cow<'_, [u8]> {
    escape_bytes_with(input, ATTRIBUTE_ESCAPES)
}

/// Byte-string variant of [`escape_xml_cdata`].
pub fn escape_xml_cdata_bytes(input: &[u8]) -> Cow<'_, [u8]> {
    escape_bytes_with(input, CDATA_ESCAPES)
}
