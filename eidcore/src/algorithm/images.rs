use rayon::prelude::*;

use crate::data::column::{Column, ColumnData};
use crate::data::sample::Sample;
use crate::error::CoreResult;

// clip negatives, then rotate by 180 degrees when the left half is brighter
fn orient(image: &mut [f32], width: usize) {
    image.iter_mut().for_each(|v| *v = v.max(0.0));

    let half = width / 2;
    let mean_of = |lo: usize, hi: usize| -> f64 {
        if hi <= lo {
            return 0.0;
        }
        let mut sum = 0.0;
        let mut n = 0usize;
        for row in image.chunks(width) {
            sum += row[lo..hi].iter().map(|&v| v as f64).sum::<f64>();
            n += hi - lo;
        }
        if n == 0 {
            0.0
        } else {
            sum / n as f64
        }
    };

    // the right half excludes the last column
    let left = mean_of(0, half);
    let right = mean_of(half, width.saturating_sub(1));
    if left > right {
        image.reverse();
    }
}

/// Orient calorimeter images so that the energy deposit sits on the right.
///
/// Every rank-2 image field listed in `fields` is clipped to non-negative
/// values and flipped along both axes when the mean of its left half exceeds
/// the mean of its right half. Other fields are left untouched.
pub fn orient_images(sample: &mut Sample, fields: &[String]) -> CoreResult<()> {
    for field in fields {
        let (height, width) = match sample.get(field).map(|c| c.row_shape()) {
            Some(&[height, width]) => (height, width),
            Some(shape) => {
                log::debug!("field `{}` with row shape {:?} is not oriented", field, shape);
                continue;
            }
            None => continue,
        };
        if height * width == 0 {
            continue;
        }

        sample.update(field, |column| {
            let n_rows = column.n_rows();
            let shape = column.row_shape().to_vec();
            let mut values = match column.into_data() {
                ColumnData::Float(values) => values,
                ColumnData::Int(values) => values.into_iter().map(|v| v as f32).collect(),
            };
            values.par_chunks_mut(height * width).for_each(|image| orient(image, width));
            Column::new(n_rows, shape, ColumnData::Float(values))
        })?;
    }
    Ok(())
}
