//! Per-pixel reductions over stacks of aligned rasters.

use crate::core::raster::Raster;
use crate::types::{SarError, SarResult};
use ndarray::{Array2, Zip};

fn stack_sums(rasters: &[Raster]) -> SarResult<(Array2<f64>, Array2<u32>)> {
    let first = rasters
        .first()
        .ok_or_else(|| SarError::InvalidParameter("cannot reduce an empty raster stack".to_string()))?;
    let mut sums = Array2::<f64>::zeros(first.dim());
    let mut counts = Array2::<u32>::zeros(first.dim());
    for r in rasters {
        first.ensure_same_grid(r)?;
        Zip::from(&mut sums)
            .and(&mut counts)
            .and(r.data())
            .and(r.validity())
            .for_each(|s, n, &v, &ok| {
                if ok {
                    *s += v as f64;
                    *n += 1;
                }
            });
    }
    Ok((sums, counts))
}

/// Per-pixel sum of a stack, valid where any input is valid.
///
/// Used for event rainfall totals: daily precipitation layers summed over
/// the during-event window.
pub fn accumulate_collection(rasters: &[Raster], band: &str) -> SarResult<Raster> {
    let (sums, counts) = stack_sums(rasters)?;
    let first = &rasters[0];
    log::debug!("Accumulated {} layers into '{}'", rasters.len(), band);
    Ok(Raster::from_fn(band, first.units(), *first.grid(), |r, c| {
        if counts[[r, c]] > 0 {
            Some(sums[[r, c]] as f32)
        } else {
            None
        }
    }))
}

/// Per-pixel mean of a stack over its valid samples
pub fn mean_collection(rasters: &[Raster], band: &str) -> SarResult<Raster> {
    let (sums, counts) = stack_sums(rasters)?;
    let first = &rasters[0];
    Ok(Raster::from_fn(band, first.units(), *first.grid(), |r, c| {
        let n = counts[[r, c]];
        if n > 0 {
            Some((sums[[r, c]] / n as f64) as f32)
        } else {
            None
        }
    }))
}
