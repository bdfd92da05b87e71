//! Feature vector sets
//!
//! A feature set pairs an ordered list of image names with either one
//! embedding per image (`N × D`) or one spatial feature map per image. Maps
//! arrive as `N × D × H × W` and are stored reshaped to `N × (H·W) × D`, with
//! spatial position `h·W + w`.
//!
//! ## File Format (JSON)
//!
//! ```json
//! {
//!   "image_names": ["img_001.jpg", "img_002.jpg"],
//!   "shape": [2, 4],
//!   "vectors": [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8]
//! }
//! ```
//!
//! `vectors` is the flattened row-major array. `shape` may be `[N, D]`,
//! `[N, D, H, W]` or an already reshaped `[N, H·W, D]`.

use anyhow::{Context, Result};
use ndarray::{concatenate, Array2, Array3, Array4, ArrayView2, ArrayView3, ArrayView4, Axis};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::EvalError;

/// Feature payload of a set
#[derive(Debug, Clone, PartialEq)]
pub enum Features {
    /// One embedding per image, `N × D`
    Vectors(Array2<f32>),
    /// One feature map per image, `N × positions × D`
    Maps(Array3<f32>),
}

impl Features {
    pub fn len(&self) -> usize {
        match self {
            Self::Vectors(v) => v.nrows(),
            Self::Maps(m) => m.len_of(Axis(0)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn layout(&self) -> &'static str {
        match self {
            Self::Vectors(_) => "vector",
            Self::Maps(_) => "feature-map",
        }
    }

    /// Per-item shape (`[D]` or `[positions, D]`)
    pub fn item_shape(&self) -> Vec<usize> {
        match self {
            Self::Vectors(v) => v.shape()[1..].to_vec(),
            Self::Maps(m) => m.shape()[1..].to_vec(),
        }
    }
}

/// Ordered image names plus their features
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSet {
    pub names: Vec<String>,
    pub data: Features,
}

/// On-disk representation of a feature set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFile {
    pub image_names: Vec<String>,
    pub shape: Vec<usize>,
    pub vectors: Vec<f32>,
}

impl FeatureSet {
    /// Build a set of embeddings
    pub fn from_vectors(names: Vec<String>, vectors: Array2<f32>) -> Result<Self, EvalError> {
        check_name_count(&names, vectors.nrows())?;
        Ok(Self {
            names,
            data: Features::Vectors(vectors),
        })
    }

    /// Build a set from a flat row-major buffer and its shape
    pub fn from_raw(names: Vec<String>, shape: &[usize], values: Vec<f32>) -> Result<Self, EvalError> {
        let expected: usize = shape.iter().product();
        if values.len() != expected {
            return Err(EvalError::LengthMismatch {
                what: "feature values/shape",
                left: values.len(),
                right: expected,
            });
        }

        let data = match *shape {
            [n, d] => Features::Vectors(
                Array2::from_shape_vec((n, d), values)
                    .map_err(|e| EvalError::InvalidParameter(e.to_string()))?,
            ),
            [n, p, d] => Features::Maps(
                Array3::from_shape_vec((n, p, d), values)
                    .map_err(|e| EvalError::InvalidParameter(e.to_string()))?,
            ),
            [n, d, h, w] => {
                let maps = Array4::from_shape_vec((n, d, h, w), values)
                    .map_err(|e| EvalError::InvalidParameter(e.to_string()))?;
                Features::Maps(reshape_feature_map(maps.view()))
            }
            _ => {
                return Err(EvalError::InvalidParameter(format!(
                    "feature shape must have 2, 3 or 4 dimensions, got {:?}",
                    shape
                )))
            }
        };

        check_name_count(&names, data.len())?;
        Ok(Self { names, data })
    }

    /// Load a feature set from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read feature file: {}", path.display()))?;
        let file: FeatureFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse feature file: {}", path.display()))?;

        let names = file
            .image_names
            .iter()
            .map(|n| normalize_image_name(n))
            .collect();
        let set = Self::from_raw(names, &file.shape, file.vectors)
            .with_context(|| format!("Invalid feature file: {}", path.display()))?;

        tracing::debug!(
            "Loaded {} {} features {:?} from {}",
            set.len(),
            set.data.layout(),
            set.data.item_shape(),
            path.display()
        );
        Ok(set)
    }

    /// Save the feature set to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let (shape, vectors) = match &self.data {
            Features::Vectors(v) => (v.shape().to_vec(), v.iter().copied().collect()),
            Features::Maps(m) => (m.shape().to_vec(), m.iter().copied().collect()),
        };
        let file = FeatureFile {
            image_names: self.names.clone(),
            shape,
            vectors,
        };
        let content = serde_json::to_string(&file).context("Failed to serialize feature file")?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write feature file: {}", path.display()))?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Embeddings view; fails for feature maps
    pub fn vectors(&self) -> Result<ArrayView2<'_, f32>, EvalError> {
        match &self.data {
            Features::Vectors(v) => Ok(v.view()),
            Features::Maps(_) => Err(EvalError::UnsupportedShape {
                method: "vector",
                expected: "vector",
                actual: "feature-map",
            }),
        }
    }

    /// Feature-map view; fails for embeddings
    pub fn maps(&self) -> Result<ArrayView3<'_, f32>, EvalError> {
        match &self.data {
            Features::Maps(m) => Ok(m.view()),
            Features::Vectors(_) => Err(EvalError::UnsupportedShape {
                method: "feature-map",
                expected: "feature-map",
                actual: "vector",
            }),
        }
    }

    /// Stack embedding sets row-wise, keeping name order
    pub fn concat(sets: &[&FeatureSet]) -> Result<FeatureSet, EvalError> {
        let views = sets
            .iter()
            .map(|s| s.vectors())
            .collect::<Result<Vec<_>, _>>()?;
        if let Some(first) = views.first() {
            if let Some(other) = views.iter().find(|v| v.ncols() != first.ncols()) {
                return Err(EvalError::DimensionMismatch {
                    left: first.shape().to_vec(),
                    right: other.shape().to_vec(),
                });
            }
        }
        let vectors = if views.is_empty() {
            Array2::zeros((0, 0))
        } else {
            concatenate(Axis(0), &views).map_err(|e| EvalError::InvalidParameter(e.to_string()))?
        };
        let names = sets.iter().flat_map(|s| s.names.iter().cloned()).collect();
        FeatureSet::from_vectors(names, vectors)
    }
}

fn check_name_count(names: &[String], rows: usize) -> Result<(), EvalError> {
    if names.len() != rows {
        return Err(EvalError::LengthMismatch {
            what: "image names/features",
            left: names.len(),
            right: rows,
        });
    }
    Ok(())
}

/// Reshape `N × D × H × W` maps to `N × (H·W) × D`
pub fn reshape_feature_map(maps: ArrayView4<f32>) -> Array3<f32> {
    let (n, d, h, w) = maps.dim();
    Array3::from_shape_fn((n, h * w, d), |(i, p, c)| maps[[i, c, p / w, p % w]])
}

/// Strip directories and a `.jpg`/`.png` extension from an image name
pub fn normalize_image_name(name: &str) -> String {
    let normalized = name.replace('\\', "/");
    let base = normalized.rsplit('/').next().unwrap_or(&normalized);
    base.strip_suffix(".jpg")
        .or_else(|| base.strip_suffix(".png"))
        .unwrap_or(base)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("img_{}", i)).collect()
    }

    #[test]
    fn test_reshape_feature_map_positions() {
        // 1 image, D=2, H=2, W=3; value encodes (channel, h, w)
        let mut values = Vec::new();
        for c in 0..2 {
            for h in 0..2 {
                for w in 0..3 {
                    values.push((c * 100 + h * 10 + w) as f32);
                }
            }
        }
        let maps = Array4::from_shape_vec((1, 2, 2, 3), values).unwrap();
        let reshaped = reshape_feature_map(maps.view());

        assert_eq!(reshaped.shape(), &[1, 6, 2]);
        // position 4 = h 1, w 1
        assert_eq!(reshaped[[0, 4, 0]], 11.0);
        assert_eq!(reshaped[[0, 4, 1]], 111.0);
        assert_eq!(reshaped[[0, 2, 1]], 102.0);
    }

    #[test]
    fn test_from_raw_shapes() {
        let set = FeatureSet::from_raw(names(2), &[2, 3], vec![0.0; 6]).unwrap();
        assert_eq!(set.data.layout(), "vector");
        assert_eq!(set.data.item_shape(), vec![3]);

        let set = FeatureSet::from_raw(names(2), &[2, 3, 2, 2], vec![0.0; 24]).unwrap();
        assert_eq!(set.data.layout(), "feature-map");
        assert_eq!(set.data.item_shape(), vec![4, 3]);
    }

    #[test]
    fn test_from_raw_rejects_bad_input() {
        assert!(matches!(
            FeatureSet::from_raw(names(2), &[2, 3], vec![0.0; 5]),
            Err(EvalError::LengthMismatch { .. })
        ));
        assert!(matches!(
            FeatureSet::from_raw(names(3), &[2, 3], vec![0.0; 6]),
            Err(EvalError::LengthMismatch { .. })
        ));
        assert!(matches!(
            FeatureSet::from_raw(names(2), &[2], vec![0.0; 2]),
            Err(EvalError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_concat() {
        let a = FeatureSet::from_raw(names(2), &[2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let b = FeatureSet::from_raw(vec!["x".to_string()], &[1, 2], vec![5.0, 6.0]).unwrap();
        let all = FeatureSet::concat(&[&a, &b]).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all.names[2], "x");
        assert_eq!(all.vectors().unwrap().row(2).to_vec(), vec![5.0, 6.0]);
    }

    #[test]
    fn test_vectors_view_rejects_maps() {
        let set = FeatureSet::from_raw(names(1), &[1, 2, 1, 1], vec![0.0; 2]).unwrap();
        assert!(set.vectors().is_err());
        assert!(set.maps().is_ok());
    }

    #[test]
    fn test_normalize_image_name() {
        assert_eq!(normalize_image_name("/data/D1/illustration/p12_3.jpg"), "p12_3");
        assert_eq!(normalize_image_name("a\\b\\c.png"), "c");
        assert_eq!(normalize_image_name("plain"), "plain");
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features.json");
        let set = FeatureSet::from_raw(names(2), &[2, 3, 1, 2], (0..12).map(|v| v as f32).collect())
            .unwrap();
        set.save(&path).unwrap();

        let loaded = FeatureSet::load(&path).unwrap();
        assert_eq!(loaded, set);
    }
}
