use arrow::array::{Array, AsArray, RecordBatch};
use arrow::datatypes::DataType;

/// Mask of a single table cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaskValue {
    /// The whole cell is masked (`true`) or present (`false`).
    Scalar(bool),
    /// One flag per element of an array-valued cell.
    Elements(Vec<bool>),
}

impl MaskValue {
    /// Whether nothing of the cell is left to write.
    ///
    /// An element-wise mask counts only when every element is masked, which includes the
    /// mask of an empty array.
    pub fn is_fully_masked(&self) -> bool {
        match self {
            MaskValue::Scalar(masked) => *masked,
            MaskValue::Elements(elements) => elements.iter().all(|&masked| masked),
        }
    }
}

impl From<bool> for MaskValue {
    fn from(masked: bool) -> Self {
        MaskValue::Scalar(masked)
    }
}

impl From<Vec<bool>> for MaskValue {
    fn from(elements: Vec<bool>) -> Self {
        MaskValue::Elements(elements)
    }
}

/// Row-major cell masks for a table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NullMask {
    rows: Vec<Vec<MaskValue>>,
}

impl NullMask {
    /// Wraps explicit cell masks. The shape is checked when the table is written.
    pub fn new(rows: Vec<Vec<MaskValue>>) -> Self {
        Self { rows }
    }

    /// A mask with every cell present.
    pub fn unmasked(num_rows: usize, num_columns: usize) -> Self {
        Self {
            rows: vec![vec![MaskValue::Scalar(false); num_columns]; num_rows],
        }
    }

    /// Derives the mask from the validity bitmaps of `batch`.
    ///
    /// List cells get one flag per element, taken from the child array. A null list
    /// cell is masked as a whole.
    pub fn from_batch(batch: &RecordBatch) -> Self {
        let mut rows = vec![Vec::with_capacity(batch.num_columns()); batch.num_rows()];
        for column in batch.columns() {
            for (row, cells) in rows.iter_mut().enumerate() {
                cells.push(cell_mask(column.as_ref(), row));
            }
        }
        Self { rows }
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn row(&self, row: usize) -> Option<&[MaskValue]> {
        self.rows.get(row).map(Vec::as_slice)
    }

    pub fn get(&self, row: usize, column: usize) -> Option<&MaskValue> {
        self.rows.get(row).and_then(|cells| cells.get(column))
    }

    pub(crate) fn rows(&self) -> &[Vec<MaskValue>] {
        &self.rows
    }
}

fn cell_mask(column: &dyn Array, row: usize) -> MaskValue {
    if column.is_null(row) {
        return MaskValue::Scalar(true);
    }
    let elements = match column.data_type() {
        DataType::List(_) => column.as_list::<i32>().value(row),
        DataType::LargeList(_) => column.as_list::<i64>().value(row),
        DataType::FixedSizeList(_, _) => column.as_fixed_size_list().value(row),
        _ => return MaskValue::Scalar(false),
    };
    MaskValue::Elements((0..elements.len()).map(|i| elements.is_null(i)).collect())
}
