use crate::core::kernel::{reduce_at, Kernel, Reducer};
use crate::core::raster::Raster;
use crate::types::{SarError, SarResult, Units};

/// Offsets of the nine sampled 3x3 windows inside the 7x7 neighbourhood, row-major
const SAMPLE_OFFSETS: [(isize, isize); 9] = [
    (-2, -2),
    (-2, 0),
    (-2, 2),
    (0, -2),
    (0, 0),
    (0, 2),
    (2, -2),
    (2, 0),
    (2, 2),
];

/// Speckle filtering parameters
#[derive(Debug, Clone)]
pub struct SpeckleFilterParams {
    /// Number of smallest sampled var/mean^2 ratios averaged into the noise estimate
    pub noise_samples: usize,
}

impl Default for SpeckleFilterParams {
    fn default() -> Self {
        Self { noise_samples: 5 }
    }
}

/// Refined Lee speckle filter.
///
/// Works in natural power units: local 3x3 statistics are sampled at nine
/// positions of a 7x7 window, the strongest of four gradients picks one of
/// eight edge-aligned directional windows, and an MMSE estimate blends the
/// directional mean with the observed value.
pub struct SpeckleFilter {
    params: SpeckleFilterParams,
    directional: Vec<Vec<(isize, isize, f32)>>,
}

/// Directional windows for directions 1..=8.
///
/// Odd directions use the half-window kernel (bottom four rows of a 7x7),
/// even ones the lower-left triangle; direction `d` is rotated clockwise
/// `(d - 1) / 2` quarter turns.
pub fn directional_kernels() -> SarResult<Vec<Kernel>> {
    let mut rect = vec![0.0f32; 49];
    let mut diag = vec![0.0f32; 49];
    for r in 0..7 {
        for c in 0..7 {
            if r >= 3 {
                rect[r * 7 + c] = 1.0;
            }
            if c <= r {
                diag[r * 7 + c] = 1.0;
            }
        }
    }
    let rect = Kernel::fixed(7, 7, &rect, 3, 3)?;
    let diag = Kernel::fixed(7, 7, &diag, 3, 3)?;

    Ok((1..=8)
        .map(|d: i32| {
            let base = if d % 2 == 1 { &rect } else { &diag };
            base.rotate((d - 1) / 2)
        })
        .collect())
}

/// Direction 1..=8 of the strongest gradient among the sampled window means.
///
/// Gradient axes are N-S, the anti-diagonal, E-W and the diagonal; ties go
/// to the lowest axis. The sign test against the centre chooses between the
/// two directions of the axis.
pub fn select_direction(s: &[f32; 9]) -> u8 {
    let gradients = [
        (s[1] - s[7]).abs(),
        (s[6] - s[2]).abs(),
        (s[3] - s[5]).abs(),
        (s[0] - s[8]).abs(),
    ];
    let mut axis = 0;
    for k in 1..4 {
        if gradients[k] > gradients[axis] {
            axis = k;
        }
    }

    let (a, b) = match axis {
        0 => (s[1], s[7]),
        1 => (s[6], s[2]),
        2 => (s[3], s[5]),
        _ => (s[0], s[8]),
    };
    if a - s[4] > s[4] - b {
        axis as u8 + 1
    } else {
        axis as u8 + 5
    }
}

/// Mean of the `n` smallest finite ratios (all of them if fewer)
fn noise_variance(ratios: &mut Vec<f32>, n: usize) -> f32 {
    ratios.retain(|v| v.is_finite());
    if ratios.is_empty() {
        return 0.0;
    }
    ratios.sort_by(|a, b| a.total_cmp(b));
    let take = n.min(ratios.len()).max(1);
    ratios[..take].iter().sum::<f32>() / take as f32
}

impl SpeckleFilter {
    /// Create a new speckle filter with default parameters
    pub fn new() -> SarResult<Self> {
        Self::with_params(SpeckleFilterParams::default())
    }

    /// Create a speckle filter with custom parameters
    pub fn with_params(params: SpeckleFilterParams) -> SarResult<Self> {
        if params.noise_samples == 0 || params.noise_samples > 9 {
            return Err(SarError::InvalidParameter(format!(
                "noise_samples must be within 1..=9, got {}",
                params.noise_samples
            )));
        }
        let directional = directional_kernels()?.iter().map(Kernel::taps).collect();
        Ok(Self { params, directional })
    }

    /// Filter a decibel band; the result is in decibels on the same grid
    pub fn apply_filter(&self, image: &Raster) -> SarResult<Raster> {
        log::info!("Applying Refined Lee speckle filter to '{}'", image.band());
        log::debug!("Filter parameters: {:?}", self.params);

        let power = image.to_power()?;
        let filtered = self.refined_lee_power(&power)?;
        let out = filtered.to_db()?;

        log::info!(
            "Speckle filtering of '{}' completed: {} valid pixels",
            image.band(),
            out.valid_count()
        );
        Ok(out)
    }

    /// Filter every band independently
    pub fn apply_filter_bands(&self, bands: &[Raster]) -> SarResult<Vec<Raster>> {
        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            bands.par_iter().map(|b| self.apply_filter(b)).collect()
        }
        #[cfg(not(feature = "parallel"))]
        {
            bands.iter().map(|b| self.apply_filter(b)).collect()
        }
    }

    /// Filter the pre-event and during-event mosaics concurrently
    pub fn apply_filter_pair(&self, pre: &Raster, during: &Raster) -> SarResult<(Raster, Raster)> {
        #[cfg(feature = "parallel")]
        let (a, b) = rayon::join(|| self.apply_filter(pre), || self.apply_filter(during));
        #[cfg(not(feature = "parallel"))]
        let (a, b) = (self.apply_filter(pre), self.apply_filter(during));
        Ok((a?, b?))
    }

    /// Refined Lee on a natural-power band
    pub fn refined_lee_power(&self, img: &Raster) -> SarResult<Raster> {
        if img.units() != Units::Power {
            return Err(SarError::InvalidParameter(format!(
                "Refined Lee needs power units, band '{}' is {:?}",
                img.band(),
                img.units()
            )));
        }

        let k3 = Kernel::square(1);
        let mean3 = img.reduce_neighborhood(Reducer::Mean, &k3);
        let var3 = img.reduce_neighborhood(Reducer::Variance, &k3);
        let (rows, cols) = img.dim();

        let filter_row = |i: usize| -> Vec<(Option<f32>, bool)> {
            (0..cols)
                .map(|j| match img.get(i, j) {
                    Some(raw) => self.filter_pixel(img, &mean3, &var3, i, j, raw),
                    None => (None, false),
                })
                .collect()
        };

        #[cfg(feature = "parallel")]
        let values: Vec<Vec<(Option<f32>, bool)>> = {
            use rayon::prelude::*;
            (0..rows).into_par_iter().map(filter_row).collect()
        };
        #[cfg(not(feature = "parallel"))]
        let values: Vec<Vec<(Option<f32>, bool)>> = (0..rows).map(filter_row).collect();

        let clamped: usize = values.iter().flatten().filter(|(_, c)| *c).count();
        if clamped > 0 {
            log::debug!(
                "Refined Lee on '{}': adaptive gain clamped to 0 at {} pixels with zero directional variance",
                img.band(),
                clamped
            );
        }

        Ok(Raster::from_fn(img.band(), Units::Power, *img.grid(), |i, j| values[i][j].0))
    }

    /// Filtered power at one valid pixel, plus whether the gain was clamped
    fn filter_pixel(
        &self,
        img: &Raster,
        mean3: &Raster,
        var3: &Raster,
        i: usize,
        j: usize,
        raw: f32,
    ) -> (Option<f32>, bool) {
        let (rows, cols) = img.dim();
        let centre_mean = mean3.get(i, j).unwrap_or(raw);
        let centre_var = var3.get(i, j).unwrap_or(0.0);

        let mut means = [0.0f32; 9];
        let mut ratios = Vec::with_capacity(9);
        for (k, &(dr, dc)) in SAMPLE_OFFSETS.iter().enumerate() {
            let r = (i as isize + dr).clamp(0, rows as isize - 1) as usize;
            let c = (j as isize + dc).clamp(0, cols as isize - 1) as usize;
            let (m, v) = match (mean3.get(r, c), var3.get(r, c)) {
                (Some(m), Some(v)) => (m, v),
                _ => (centre_mean, centre_var),
            };
            means[k] = m;
            ratios.push(v / (m * m));
        }

        let direction = select_direction(&means);
        let sigma_v = noise_variance(&mut ratios, self.params.noise_samples);

        let taps = &self.directional[direction as usize - 1];
        let dir_mean = reduce_at(img, i, j, taps, Reducer::Mean).unwrap_or(raw);
        let dir_var = reduce_at(img, i, j, taps, Reducer::Variance).unwrap_or(0.0);

        let var_x = ((dir_var - dir_mean * dir_mean * sigma_v) / (sigma_v + 1.0)).max(0.0);
        let (gain, clamped) = if dir_var > 0.0 && dir_var.is_finite() {
            let k = var_x / dir_var;
            if k.is_finite() {
                (k, false)
            } else {
                (0.0, true)
            }
        } else {
            (0.0, true)
        };

        let filtered = dir_mean + gain * (raw - dir_mean);
        if filtered > 0.0 && filtered.is_finite() {
            (Some(filtered), clamped)
        } else {
            (Some(raw), clamped)
        }
    }
}
