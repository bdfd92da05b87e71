//! PCA projector for embedding sets
//!
//! Training centres the data, forms the covariance matrix (divided by the
//! number of rows) and takes its SVD. The leading `d_out` singular vectors
//! become the projection columns. With a non-zero `eigen_power`, column `k`
//! is scaled by `λ_k^eigen_power`; `-0.5` whitens the output.

use anyhow::Context;
use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{EvalError, Result};

/// Eigenvalues at or below this are left unscaled
const EIGENVALUE_FLOOR: f64 = 1e-12;

/// Trained linear projection `(x - mean) · P`
#[derive(Debug, Clone, PartialEq)]
pub struct PcaMatrix {
    pub eigen_power: f32,
    pub mean: Array1<f32>,
    /// Eigenvalues of the kept components, largest first
    pub eigenvalues: Vec<f32>,
    /// `d_in × d_out`
    pub projection: Array2<f32>,
}

/// On-disk form of [`PcaMatrix`]
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PcaFile {
    d_in: usize,
    d_out: usize,
    eigen_power: f32,
    mean: Vec<f32>,
    eigenvalues: Vec<f32>,
    /// Row-major `d_in × d_out`
    projection: Vec<f32>,
}

impl PcaMatrix {
    pub fn d_in(&self) -> usize {
        self.projection.nrows()
    }

    pub fn d_out(&self) -> usize {
        self.projection.ncols()
    }

    /// Fit a projector to the rows of `features`
    pub fn train(features: ArrayView2<f32>, d_out: usize, eigen_power: f32) -> Result<Self> {
        let (n, d) = features.dim();
        if n < 2 {
            return Err(EvalError::InvalidParameter(format!(
                "PCA needs at least 2 training rows, got {}",
                n
            )));
        }
        if d_out == 0 || d_out > d {
            return Err(EvalError::InvalidParameter(format!(
                "PCA output dimension must be in 1..={}, got {}",
                d, d_out
            )));
        }

        let data = features.mapv(f64::from);
        let mean = data
            .mean_axis(Axis(0))
            .ok_or_else(|| EvalError::InvalidParameter("empty training set".to_string()))?;
        let centered = &data - &mean;
        let covariance = centered.t().dot(&centered) / n as f64;
        let covariance: Vec<f64> = covariance.iter().copied().collect();

        let (eigenvalues, eigenvectors) = symmetric_svd(&covariance, d)?;

        let mut projection = Array2::zeros((d, d_out));
        for k in 0..d_out {
            let lambda = eigenvalues[k];
            let scale = if eigen_power != 0.0 && lambda > EIGENVALUE_FLOOR {
                lambda.powf(eigen_power as f64)
            } else {
                1.0
            };
            for i in 0..d {
                projection[[i, k]] = (eigenvectors[i * d + k] * scale) as f32;
            }
        }

        tracing::debug!(
            "Trained PCA {} -> {} on {} rows (top eigenvalue {:.4e})",
            d,
            d_out,
            n,
            eigenvalues.first().copied().unwrap_or(0.0)
        );

        Ok(Self {
            eigen_power,
            mean: mean.mapv(|v| v as f32),
            eigenvalues: eigenvalues[..d_out].iter().map(|&v| v as f32).collect(),
            projection,
        })
    }

    /// Project rows into the reduced space
    pub fn apply(&self, features: ArrayView2<f32>) -> Result<Array2<f32>> {
        if features.ncols() != self.d_in() {
            return Err(EvalError::DimensionMismatch {
                left: features.shape().to_vec(),
                right: vec![self.d_in(), self.d_out()],
            });
        }
        let centered = &features - &self.mean;
        Ok(centered.dot(&self.projection))
    }

    /// Save the projector as JSON
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let file = PcaFile {
            d_in: self.d_in(),
            d_out: self.d_out(),
            eigen_power: self.eigen_power,
            mean: self.mean.to_vec(),
            eigenvalues: self.eigenvalues.clone(),
            projection: self.projection.iter().copied().collect(),
        };
        let content = serde_json::to_string_pretty(&file)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write PCA file: {}", path.display()))?;
        Ok(())
    }

    /// Load a projector saved with [`PcaMatrix::save`]
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read PCA file: {}", path.display()))?;
        let file: PcaFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse PCA file: {}", path.display()))?;

        if file.mean.len() != file.d_in || file.eigenvalues.len() != file.d_out {
            anyhow::bail!("PCA file {} has inconsistent dimensions", path.display());
        }
        let projection = Array2::from_shape_vec((file.d_in, file.d_out), file.projection)
            .with_context(|| format!("Invalid PCA projection in {}", path.display()))?;

        Ok(Self {
            eigen_power: file.eigen_power,
            mean: Array1::from_vec(file.mean),
            eigenvalues: file.eigenvalues,
            projection,
        })
    }
}

/// Singular values and row-major left singular vectors of a `d × d` matrix
fn symmetric_svd(a: &[f64], d: usize) -> Result<(Vec<f64>, Vec<f64>)> {
    let a = faer::mat::MatRef::from_row_major_slice(a, d, d);
    let svd = a
        .svd()
        .map_err(|e| EvalError::Linalg(format!("SVD did not converge: {:?}", e)))?;

    let mut singular_values = vec![0.0f64; d];
    faer::col::ColMut::from_slice_mut(&mut singular_values).copy_from(svd.S().column_vector());

    let mut u = vec![0.0f64; d * d];
    faer::mat::MatMut::from_row_major_slice_mut(&mut u, d, d).copy_from(svd.U());

    Ok((singular_values, u))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    /// Points spread along (1, 2) with a little orthogonal noise
    fn line_data() -> Array2<f32> {
        let mut rows = Vec::new();
        for (t, e) in [(-2.0f32, 0.1f32), (-1.0, -0.1), (0.0, 0.1), (1.0, -0.1), (2.0, 0.1)] {
            rows.extend([t + 2.0 * e + 3.0, 2.0 * t - e - 1.0]);
        }
        Array2::from_shape_vec((5, 2), rows).unwrap()
    }

    #[test]
    fn test_first_component_follows_main_axis() {
        let pca = PcaMatrix::train(line_data().view(), 1, 0.0).unwrap();
        assert_eq!((pca.d_in(), pca.d_out()), (2, 1));

        let v = pca.projection.column(0);
        let dir = [1.0 / 5f32.sqrt(), 2.0 / 5f32.sqrt()];
        let cos = (v[0] * dir[0] + v[1] * dir[1]).abs();
        assert!((cos - 1.0).abs() < 1e-2, "cos = {}", cos);
        assert!((pca.mean[0] - 3.04).abs() < 1e-4);
    }

    #[test]
    fn test_whitening_gives_unit_variance() {
        let data = line_data();
        let pca = PcaMatrix::train(data.view(), 2, -0.5).unwrap();
        let projected = pca.apply(data.view()).unwrap();
        for k in 0..2 {
            let col = projected.column(k);
            let variance = col.iter().map(|v| v * v).sum::<f32>() / col.len() as f32;
            assert!((variance - 1.0).abs() < 1e-3, "component {} variance {}", k, variance);
        }
        assert!(pca.eigenvalues[0] >= pca.eigenvalues[1]);
    }

    #[test]
    fn test_projection_is_centered() {
        let data = line_data();
        let pca = PcaMatrix::train(data.view(), 2, 0.0).unwrap();
        let projected = pca.apply(data.view()).unwrap();
        let mean = projected.mean_axis(Axis(0)).unwrap();
        assert!(mean.iter().all(|m| m.abs() < 1e-4));
    }

    #[test]
    fn test_train_rejects_bad_input() {
        let one_row = array![[1.0f32, 2.0]];
        assert!(PcaMatrix::train(one_row.view(), 1, -0.5).is_err());
        let data = line_data();
        assert!(PcaMatrix::train(data.view(), 0, -0.5).is_err());
        assert!(PcaMatrix::train(data.view(), 3, -0.5).is_err());
    }

    #[test]
    fn test_apply_dimension_mismatch() {
        let pca = PcaMatrix::train(line_data().view(), 1, 0.0).unwrap();
        let wide = array![[1.0f32, 2.0, 3.0]];
        assert!(matches!(pca.apply(wide.view()), Err(EvalError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pca.json");
        let pca = PcaMatrix::train(line_data().view(), 2, -0.5).unwrap();
        pca.save(&path).unwrap();
        assert_eq!(PcaMatrix::load(&path).unwrap(), pca);
    }
}
