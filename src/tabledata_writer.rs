use std::io::Write;

use arrow::array::RecordBatch;
use log::debug;

use crate::config::WriterOptions;
use crate::converters::Converter;
use crate::errors::{Error, Result};
use crate::growable_buffer::GrowableBuffer;
use crate::null_mask::NullMask;

const ROW_START: &str = " <TR>\n";
const ROW_END: &str = " </TR>\n";
const CELL_START: &str = "  <TD>";
const CELL_END: &str = "</TD>\n";
const EMPTY_CELL: &str = "  <TD/>\n";

/// Serializes the rows of `batch` as TABLEDATA `<TR>`/`<TD>` elements.
///
/// Every row is assembled in a reusable buffer and handed to `sink` with a single
/// `write_all`. A cell is written through its column's converter unless its mask is
/// fully set, in which case an empty `<TD/>` is written instead. Setting
/// `write_null_values` sends every cell through the converter.
///
/// # Errors
///
/// * `Error::InvalidArgument`: if the number of converters, the number of mask rows or
///   the width of a mask row does not match `batch`. Nothing is written in that case.
/// * Any error returned by a converter or by `sink`. Rows completed before the failure
///   have already been written.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use arrow::array::{Int32Array, RecordBatch};
/// use arrow::datatypes::{DataType, Field, Schema};
/// use tabxml::{DisplayConverter, NullMask, WriterOptions, write_tabledata};
///
/// let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Int32, true)]));
/// let batch = RecordBatch::try_new(schema, vec![Arc::new(Int32Array::from(vec![Some(1), None]))]).unwrap();
/// let mut output = Vec::new();
/// write_tabledata(
///     &mut output,
///     &batch,
///     &NullMask::from_batch(&batch),
///     &DisplayConverter::for_batch(&batch),
///     &WriterOptions::default(),
/// )
/// .unwrap();
/// assert_eq!(
///     String::from_utf8(output).unwrap(),
///     " <TR>\n  <TD>1</TD>\n </TR>\n <TR>\n  <TD/>\n </TR>\n"
/// );
/// ```
pub fn write_tabledata<W: Write + ?Sized>(
    sink: &mut W,
    batch: &RecordBatch,
    mask: &NullMask,
    converters: &[Box<dyn Converter>],
    options: &WriterOptions,
) -> Result<()> {
    check_shape(batch, mask, converters)?;
    let indent = options.effective_indent();
    let mut buffer = GrowableBuffer::<u8>::with_capacity(options.effective_buffer_size())?;

    for (row, cell_masks) in mask.rows().iter().enumerate() {
        buffer.clear();
        buffer.push_repeated(b' ', indent)?;
        buffer.push_str(ROW_START)?;
        for ((column, converter), cell_mask) in
            batch.columns().iter().zip(converters).zip(cell_masks)
        {
            buffer.push_repeated(b' ', indent)?;
            if options.write_null_values || !cell_mask.is_fully_masked() {
                let value = converter.convert(column.as_ref(), row, cell_mask)?;
                buffer.push_str(CELL_START)?;
                buffer.push_str(&value)?;
                buffer.push_str(CELL_END)?;
            } else {
                buffer.push_str(EMPTY_CELL)?;
            }
        }
        buffer.push_repeated(b' ', indent)?;
        buffer.push_str(ROW_END)?;
        sink.write_all(buffer.as_slice())?;
    }

    debug!(
        "Wrote {} rows of {} columns, row buffer grew to {} bytes",
        batch.num_rows(),
        batch.num_columns(),
        buffer.capacity()
    );
    Ok(())
}

fn check_shape(batch: &RecordBatch, mask: &NullMask, converters: &[Box<dyn Converter>]) -> Result<()> {
    if converters.len() != batch.num_columns() {
        return Err(Error::InvalidArgument(format!(
            "Got {} converters for {} columns",
            converters.len(),
            batch.num_columns()
        )));
    }
    if mask.num_rows() != batch.num_rows() {
        return Err(Error::InvalidArgument(format!(
            "Mask has {} rows but the table has {}",
            mask.num_rows(),
            batch.num_rows()
        )));
    }
    if let Some((row, cells)) = mask
        .rows()
        .iter()
        .enumerate()
        .find(|(_, cells)| cells.len() != batch.num_columns())
    {
        return Err(Error::InvalidArgument(format!(
            "Mask row {} has {} cells but the table has {} columns",
            row,
            cells.len(),
            batch.num_columns()
        )));
    }
    Ok(())
}
