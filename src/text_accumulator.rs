use crate::errors::Result;
use crate::growable_buffer::GrowableBuffer;

#[inline]
pub(crate) fn is_xml_whitespace(byte: u8) -> bool {
    matches!(byte, b' ' | b'\r' | b'\n' | b'\t')
}

/// Collects the character data of one element body.
///
/// Leading whitespace is dropped while nothing has been kept yet, so the first
/// non-whitespace byte always starts the buffer. Trailing whitespace is removed by
/// [`TextAccumulator::trimmed`] once the element closes.
#[derive(Debug)]
pub(crate) struct TextAccumulator {
    buffer: GrowableBuffer<u8>,
}

impl TextAccumulator {
    pub(crate) fn with_capacity(capacity: usize) -> Result<Self> {
        Ok(Self {
            buffer: GrowableBuffer::with_capacity(capacity)?,
        })
    }

    pub(crate) fn append(&mut self, mut data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        if self.buffer.is_empty() {
            let start = data
                .iter()
                .position(|&b| !is_xml_whitespace(b))
                .unwrap_or(data.len());
            data = &data[start..];
        }
        self.buffer.extend_from_slice(data)
    }

    /// Strips trailing whitespace and returns the remaining text.
    pub(crate) fn trimmed(&mut self) -> &[u8] {
        let content = self.buffer.as_slice();
        let end = content
            .iter()
            .rposition(|&b| !is_xml_whitespace(b))
            .map_or(0, |last| last + 1);
        self.buffer.truncate(end);
        self.buffer.as_slice()
    }

    pub(crate) fn clear(&mut self) {
        self.buffer.clear();
    }

    #[cfg(test)]
    pub(crate) fn capacity(&self) -> usize {
        self.buffer.capacity()
    }
}
