use std::fmt::Display;

use crate::error::{CoreError, CoreResult};

/// Flat storage of a column, row-major over `n_rows * stride` values.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Float(Vec<f32>),
    Int(Vec<i64>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Float(values) => values.len(),
            ColumnData::Int(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ColumnData::Float(_) => "float",
            ColumnData::Int(_) => "int",
        }
    }
}

/// One named field of a sample: `n_rows` rows, each of shape `row_shape`.
///
/// Scalars have an empty row shape, calorimeter images `[eta, phi]` and
/// track tensors `[n_tracks, n_attributes]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    n_rows: usize,
    row_shape: Vec<usize>,
    data: ColumnData,
}

impl Column {
    /// Create a new column, checking that the flat data matches `n_rows * stride`
    ///
    /// # Arguments
    ///
    /// * `n_rows` - number of rows (events)
    /// * `row_shape` - shape of one row, empty for scalars
    /// * `data` - row-major flat values
    ///
    pub fn new(n_rows: usize, row_shape: Vec<usize>, data: ColumnData) -> CoreResult<Self> {
        let stride: usize = row_shape.iter().product();
        if data.len() != n_rows * stride {
            return Err(CoreError::SchemaMismatch(format!(
                "column with {} rows of shape {:?} needs {} values, got {}",
                n_rows,
                row_shape,
                n_rows * stride,
                data.len()
            )));
        }
        Ok(Column { n_rows, row_shape, data })
    }

    pub fn from_f32(values: Vec<f32>) -> Self {
        Column { n_rows: values.len(), row_shape: Vec::new(), data: ColumnData::Float(values) }
    }

    pub fn from_i64(values: Vec<i64>) -> Self {
        Column { n_rows: values.len(), row_shape: Vec::new(), data: ColumnData::Int(values) }
    }

    pub fn zeros(n_rows: usize, row_shape: Vec<usize>) -> Self {
        let stride: usize = row_shape.iter().product();
        Column { n_rows, row_shape, data: ColumnData::Float(vec![0.0; n_rows * stride]) }
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn row_shape(&self) -> &[usize] {
        &self.row_shape
    }

    pub fn stride(&self) -> usize {
        self.row_shape.iter().product()
    }

    pub fn is_scalar(&self) -> bool {
        self.row_shape.is_empty()
    }

    pub fn data(&self) -> &ColumnData {
        &self.data
    }

    pub fn into_data(self) -> ColumnData {
        self.data
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match &self.data {
            ColumnData::Float(values) => Some(values),
            ColumnData::Int(_) => None,
        }
    }

    pub fn as_f32_mut(&mut self) -> Option<&mut [f32]> {
        match &mut self.data {
            ColumnData::Float(values) => Some(values),
            ColumnData::Int(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<&[i64]> {
        match &self.data {
            ColumnData::Int(values) => Some(values),
            ColumnData::Float(_) => None,
        }
    }

    /// Value at flat position `index` widened to f64
    pub fn value_f64(&self, index: usize) -> f64 {
        match &self.data {
            ColumnData::Float(values) => values[index] as f64,
            ColumnData::Int(values) => values[index] as f64,
        }
    }

    /// All flat values widened to f64
    pub fn to_f64_vec(&self) -> Vec<f64> {
        match &self.data {
            ColumnData::Float(values) => values.iter().map(|&v| v as f64).collect(),
            ColumnData::Int(values) => values.iter().map(|&v| v as f64).collect(),
        }
    }

    /// Convert integer storage to float storage, keeping the shape
    pub fn into_float(self) -> Column {
        match self.data {
            ColumnData::Float(_) => self,
            ColumnData::Int(values) => Column {
                n_rows: self.n_rows,
                row_shape: self.row_shape,
                data: ColumnData::Float(values.into_iter().map(|v| v as f32).collect()),
            },
        }
    }

    /// Gather the given rows, in the given order
    pub fn take(&self, rows: &[usize]) -> Column {
        let stride = self.stride();
        let data = match &self.data {
            ColumnData::Float(values) => ColumnData::Float(gather(values, rows, stride)),
            ColumnData::Int(values) => ColumnData::Int(gather(values, rows, stride)),
        };
        Column { n_rows: rows.len(), row_shape: self.row_shape.clone(), data }
    }

    /// Keep the rows where `mask` is true
    pub fn filter(&self, mask: &[bool]) -> Column {
        let rows: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter(|&(_, &keep)| keep)
            .map(|(i, _)| i)
            .collect();
        self.take(&rows)
    }

    /// Contiguous row range `[lo, hi)`
    pub fn slice_rows(&self, lo: usize, hi: usize) -> Column {
        let stride = self.stride();
        let data = match &self.data {
            ColumnData::Float(values) => ColumnData::Float(values[lo * stride..hi * stride].to_vec()),
            ColumnData::Int(values) => ColumnData::Int(values[lo * stride..hi * stride].to_vec()),
        };
        Column { n_rows: hi - lo, row_shape: self.row_shape.clone(), data }
    }

    /// Concatenate columns along the row axis; shapes and storage types must agree
    pub fn concat(columns: &[&Column]) -> CoreResult<Column> {
        let first = columns
            .first()
            .ok_or_else(|| CoreError::SchemaMismatch("cannot concatenate zero columns".to_string()))?;

        let n_rows = columns.iter().map(|c| c.n_rows).sum();
        let mut data = match &first.data {
            ColumnData::Float(_) => ColumnData::Float(Vec::with_capacity(n_rows * first.stride())),
            ColumnData::Int(_) => ColumnData::Int(Vec::with_capacity(n_rows * first.stride())),
        };

        for column in columns {
            if column.row_shape != first.row_shape {
                return Err(CoreError::SchemaMismatch(format!(
                    "cannot concatenate row shapes {:?} and {:?}",
                    first.row_shape, column.row_shape
                )));
            }
            match (&mut data, &column.data) {
                (ColumnData::Float(out), ColumnData::Float(values)) => out.extend_from_slice(values),
                (ColumnData::Int(out), ColumnData::Int(values)) => out.extend_from_slice(values),
                (out, values) => {
                    return Err(CoreError::SchemaMismatch(format!(
                        "cannot concatenate {} and {} columns",
                        out.type_name(),
                        values.type_name()
                    )))
                }
            }
        }

        Ok(Column { n_rows, row_shape: first.row_shape.clone(), data })
    }
}

impl Display for Column {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Column({} x {:?}, {})", self.n_rows, self.row_shape, self.data.type_name())
    }
}

fn gather<T: Copy>(values: &[T], rows: &[usize], stride: usize) -> Vec<T> {
    let mut out = Vec::with_capacity(rows.len() * stride);
    for &row in rows {
        out.extend_from_slice(&values[row * stride..(row + 1) * stride]);
    }
    out
}
