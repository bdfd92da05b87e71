//! Ground-truth, prediction, pair-list and label files
//!
//! ## Ground truth (CSV)
//!
//! ```text
//! query_id,reference_id
//! Q00001,R12345
//! Q00002,
//! ```
//!
//! The header is optional. A blank reference id means "no match" and the
//! line is dropped.
//!
//! ## Predictions (CSV)
//!
//! ```text
//! query_id,reference_id,score
//! Q00001,R12345,0.873412
//! ```
//!
//! ## Index pairs (JSON)
//!
//! `[[probe_index, reference_index], ...]`

use anyhow::{Context, Result};
use ndarray::ArrayView2;
use std::fmt::Write as _;
use std::path::Path;

use crate::benchmark::{GroundTruthMatch, IndexPair, PredictedMatch};

const GROUND_TRUTH_HEADER: &str = "query_id,reference_id";
const PREDICTIONS_HEADER: &str = "query_id,reference_id,score";
const LABEL_COLUMN: &str = "label_encoded";

fn read_text(path: &Path, what: &str) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {} file: {}", what, path.display()))
}

fn write_text(path: &Path, what: &str, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
    }
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write {} file: {}", what, path.display()))
}

/// Read a ground-truth CSV of `query_id,db_id` lines
pub fn read_ground_truth(path: &Path) -> Result<Vec<GroundTruthMatch>> {
    let content = read_text(path, "ground truth")?;
    let mut matches = Vec::new();

    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line == GROUND_TRUTH_HEADER {
            continue;
        }
        let fields: Vec<&str> = line.split(',').collect();
        let [query, db] = fields[..] else {
            anyhow::bail!(
                "{}:{}: expected 'query_id,db_id', got '{}'",
                path.display(),
                i + 1,
                line
            );
        };
        if db.is_empty() {
            continue;
        }
        matches.push(GroundTruthMatch::new(query, db));
    }

    tracing::debug!("Read {} ground-truth matches from {}", matches.len(), path.display());
    Ok(matches)
}

/// Read a predictions CSV of `query_id,db_id,score` lines
pub fn read_predictions(path: &Path) -> Result<Vec<PredictedMatch>> {
    let content = read_text(path, "predictions")?;
    let mut predictions = Vec::new();

    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line == PREDICTIONS_HEADER {
            continue;
        }
        let fields: Vec<&str> = line.split(',').collect();
        let [query, db, score] = fields[..] else {
            anyhow::bail!(
                "{}:{}: expected 'query_id,db_id,score', got '{}'",
                path.display(),
                i + 1,
                line
            );
        };
        let score: f64 = score
            .trim()
            .parse()
            .with_context(|| format!("{}:{}: invalid score '{}'", path.display(), i + 1, score))?;
        if !score.is_finite() {
            anyhow::bail!("{}:{}: score must be finite, got {}", path.display(), i + 1, score);
        }
        predictions.push(PredictedMatch::new(query, db, score));
    }

    tracing::debug!("Read {} predictions from {}", predictions.len(), path.display());
    Ok(predictions)
}

/// Write predictions with a header, scores to 6 decimals
pub fn write_predictions(predictions: &[PredictedMatch], path: &Path) -> Result<()> {
    let mut content = String::with_capacity(32 * (predictions.len() + 1));
    content.push_str(PREDICTIONS_HEADER);
    content.push('\n');
    for p in predictions {
        let _ = writeln!(content, "{},{},{:.6}", p.query, p.db, p.score);
    }
    write_text(path, "predictions", &content)
}

/// Write k-NN results as prediction lines (no header)
///
/// `scores[q]` must be decreasing and `indices[q]` index into `db_ids`. With
/// `nmax`, only the `nmax` highest scores overall are written (ties resolved
/// in row-major order) and each row stops at its first dropped entry.
pub fn write_predictions_from_arrays(
    scores: ArrayView2<f32>,
    indices: ArrayView2<usize>,
    db_ids: &[String],
    query_ids: &[String],
    path: &Path,
    nmax: Option<usize>,
) -> Result<()> {
    if scores.dim() != indices.dim() {
        anyhow::bail!(
            "scores {:?} and indices {:?} differ in shape",
            scores.dim(),
            indices.dim()
        );
    }
    if scores.nrows() != query_ids.len() {
        anyhow::bail!(
            "{} score rows for {} query ids",
            scores.nrows(),
            query_ids.len()
        );
    }

    let (nq, k) = scores.dim();
    let mut keep = vec![true; nq * k];
    if let Some(nmax) = nmax.filter(|&n| n < nq * k) {
        let flat: Vec<f32> = scores.iter().copied().collect();
        let mut order: Vec<usize> = (0..flat.len()).collect();
        order.sort_by(|&a, &b| flat[b].total_cmp(&flat[a]));
        for &dropped in &order[nmax..] {
            keep[dropped] = false;
        }
    }

    let mut content = String::new();
    for (q, query_id) in query_ids.iter().enumerate() {
        for slot in 0..k {
            if !keep[q * k + slot] {
                break;
            }
            let db_index = indices[[q, slot]];
            let db_id = db_ids.get(db_index).with_context(|| {
                format!("reference index {} out of range ({} ids)", db_index, db_ids.len())
            })?;
            let _ = writeln!(content, "{},{},{:.6}", query_id, db_id, scores[[q, slot]]);
        }
    }
    write_text(path, "predictions", &content)
}

/// Read a JSON list of `[probe_index, reference_index]` pairs
pub fn read_pairs(path: &Path) -> Result<Vec<IndexPair>> {
    let content = read_text(path, "pair list")?;
    let pairs: Vec<IndexPair> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse pair list: {}", path.display()))?;
    Ok(pairs)
}

/// Write a JSON list of index pairs
pub fn write_pairs(pairs: &[IndexPair], path: &Path) -> Result<()> {
    let content = serde_json::to_string(pairs).context("Failed to serialize pair list")?;
    write_text(path, "pair list", &content)
}

/// Read integer class labels from a CSV
///
/// Uses the `label_encoded` column when the header names one, otherwise the
/// first column (with or without a header).
pub fn read_labels(path: &Path) -> Result<Vec<usize>> {
    let content = read_text(path, "labels")?;
    let mut lines = content
        .lines()
        .enumerate()
        .map(|(i, l)| (i, l.trim()))
        .filter(|(_, l)| !l.is_empty())
        .peekable();

    let mut column = 0;
    if let Some(&(_, first)) = lines.peek() {
        let fields: Vec<&str> = first.split(',').map(str::trim).collect();
        if let Some(pos) = fields.iter().position(|&f| f == LABEL_COLUMN) {
            column = pos;
            lines.next();
        } else if fields[0].parse::<usize>().is_err() {
            lines.next();
        }
    }

    let mut labels = Vec::new();
    for (i, line) in lines {
        let field = line.split(',').nth(column).map(str::trim).unwrap_or("");
        let label = field
            .parse::<usize>()
            .with_context(|| format!("{}:{}: invalid label '{}'", path.display(), i + 1, field))?;
        labels.push(label);
    }
    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn write(dir: &tempfile::TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_read_ground_truth_skips_header_and_blank_db() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "gt.csv", "query_id,reference_id\nQ1,R1\nQ2,\n\nQ3,R3\n");
        let gt = read_ground_truth(&path).unwrap();
        assert_eq!(gt, vec![GroundTruthMatch::new("Q1", "R1"), GroundTruthMatch::new("Q3", "R3")]);
    }

    #[test]
    fn test_read_ground_truth_malformed_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "gt.csv", "Q1,R1\nQ2,R2,extra\n");
        let err = read_ground_truth(&path).unwrap_err().to_string();
        assert!(err.contains(":2:"), "{}", err);
    }

    #[test]
    fn test_predictions_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preds.csv");
        let predictions = vec![
            PredictedMatch::new("Q1", "R1", 0.123456789),
            PredictedMatch::new("Q1", "R2", -1.5),
            PredictedMatch::new("Q2", "R9", 1.0),
        ];
        write_predictions(&predictions, &path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("query_id,reference_id,score\nQ1,R1,0.123457\n"));

        let read = read_predictions(&path).unwrap();
        assert_eq!(read.len(), predictions.len());
        for (a, b) in read.iter().zip(&predictions) {
            assert_eq!((&a.query, &a.db), (&b.query, &b.db));
            assert!((a.score - b.score).abs() <= 5e-7);
        }
    }

    #[test]
    fn test_read_predictions_bad_score() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "preds.csv", "Q1,R1,high\n");
        assert!(read_predictions(&path).is_err());
    }

    #[test]
    fn test_read_predictions_non_finite_score() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "preds.csv", "q1,r2,0.5\nq1,r1,NaN\n");
        let err = read_predictions(&path).unwrap_err().to_string();
        assert!(err.contains(":2:"), "{}", err);

        let path = write(&dir, "inf.csv", "q1,r1,inf\n");
        assert!(read_predictions(&path).is_err());
    }

    #[test]
    fn test_write_predictions_from_arrays_nmax() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("knn.csv");
        let scores = array![[0.9f32, 0.5], [0.8, 0.7]];
        let indices = array![[1usize, 0], [0, 1]];
        let db_ids = vec!["R0".to_string(), "R1".to_string()];
        let query_ids = vec!["Q0".to_string(), "Q1".to_string()];

        write_predictions_from_arrays(scores.view(), indices.view(), &db_ids, &query_ids, &path, Some(3))
            .unwrap();
        let read = read_predictions(&path).unwrap();
        let rows: Vec<(String, String)> = read.into_iter().map(|p| (p.query, p.db)).collect();
        assert_eq!(
            rows,
            vec![
                ("Q0".to_string(), "R1".to_string()),
                ("Q1".to_string(), "R0".to_string()),
                ("Q1".to_string(), "R1".to_string()),
            ]
        );

        write_predictions_from_arrays(scores.view(), indices.view(), &db_ids, &query_ids, &path, None)
            .unwrap();
        assert_eq!(read_predictions(&path).unwrap().len(), 4);
    }

    #[test]
    fn test_pairs_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "pairs.json", "[[0, 3], [2, 1]]");
        let pairs = read_pairs(&path).unwrap();
        assert_eq!(pairs, vec![IndexPair::new(0, 3), IndexPair::new(2, 1)]);

        let out = dir.path().join("out.json");
        write_pairs(&pairs, &out).unwrap();
        assert_eq!(read_pairs(&out).unwrap(), pairs);
    }

    #[test]
    fn test_read_labels_formats() {
        let dir = tempfile::tempdir().unwrap();
        let named = write(&dir, "a.csv", "name,label_encoded\nx,2\ny,0\n");
        assert_eq!(read_labels(&named).unwrap(), vec![2, 0]);

        let bare = write(&dir, "b.csv", "1\n1\n3\n");
        assert_eq!(read_labels(&bare).unwrap(), vec![1, 1, 3]);

        let headed = write(&dir, "c.csv", "label\n4\n");
        assert_eq!(read_labels(&headed).unwrap(), vec![4]);
    }
}
