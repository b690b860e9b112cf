//! Per-column formatting of table cells into TABLEDATA text.

use arrow::array::{Array, AsArray, RecordBatch};
use arrow::datatypes::DataType;
use arrow::util::display::{ArrayFormatter, FormatOptions};

use crate::errors::Result;
use crate::escape::escape_xml_cdata;
use crate::null_mask::MaskValue;

/// Formats the value of one cell.
///
/// The returned text is inserted between `<TD>` and `</TD>` as is, so it must already be
/// escaped.
pub trait Converter {
    fn convert(&self, column: &dyn Array, row: usize, mask: &MaskValue) -> Result<String>;
}

impl<F> Converter for F
where
    F: Fn(&dyn Array, usize, &MaskValue) -> Result<String>,
{
    fn convert(&self, column: &dyn Array, row: usize, mask: &MaskValue) -> Result<String> {
        self(column, row, mask)
    }
}

/// Formats any Arrow value with Arrow's display formatter.
///
/// Masked scalar cells become the empty string. Elements of list cells are separated by a
/// single space, and masked or null elements are written as `null_element`, `NaN` by
/// default. Text values are escaped.
#[derive(Debug, Clone)]
pub struct DisplayConverter {
    null_element: String,
}

impl Default for DisplayConverter {
    fn default() -> Self {
        Self {
            null_element: "NaN".to_string(),
        }
    }
}

impl DisplayConverter {
    pub fn with_null_element(mut self, null_element: impl Into<String>) -> Self {
        self.null_element = null_element.into();
        self
    }

    /// One default converter per column of `batch`.
    pub fn for_batch(batch: &RecordBatch) -> Vec<Box<dyn Converter>> {
        (0..batch.num_columns())
            .map(|_| Box::new(DisplayConverter::default()) as Box<dyn Converter>)
            .collect()
    }

    fn format_elements(&self, values: &dyn Array, mask: &MaskValue) -> Result<String> {
        let options = FormatOptions::default().with_null("");
        let formatter = ArrayFormatter::try_new(values, &options)?;
        let mut text = String::new();
        for index in 0..values.len() {
            if index > 0 {
                text.push(' ');
            }
            let masked = match mask {
                MaskValue::Elements(elements) => elements.get(index).copied().unwrap_or(false),
                MaskValue::Scalar(masked) => *masked,
            };
            if masked || values.is_null(index) {
                text.push_str(&self.null_element);
            } else {
                text.push_str(&formatter.value(index).to_string());
            }
        }
        Ok(escape_text(values.data_type(), text))
    }
}

impl Converter for DisplayConverter {
    fn convert(&self, column: &dyn Array, row: usize, mask: &MaskValue) -> Result<String> {
        if column.is_null(row) || *mask == MaskValue::Scalar(true) {
            return Ok(String::new());
        }
        match column.data_type() {
            DataType::List(_) => self.format_elements(column.as_list::<i32>().value(row).as_ref(), mask),
            DataType::LargeList(_) => {
                self.format_elements(column.as_list::<i64>().value(row).as_ref(), mask)
            }
            DataType::FixedSizeList(_, _) => {
                self.format_elements(column.as_fixed_size_list().value(row).as_ref(), mask)
            }
            data_type => {
                let options = FormatOptions::default().with_null("");
                let formatter = ArrayFormatter::try_new(column, &options)?;
                Ok(escape_text(data_type, formatter.value(row).to_string()))
            }
        }
    }
}

fn escape_text(data_type: &DataType, text: String) -> String {
    match data_type {
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => {
            escape_xml_cdata(&text).into_owned()
        }
        _ => text,
    }
}
