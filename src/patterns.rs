use linfa::prelude::*;
use linfa::DatasetBase;
use linfa_clustering::KMeans;
use linfa_reduction::Pca;
use ndarray::{Array1, Array2, Axis};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;
use serde::{Deserialize, Serialize};

use crate::error::{AnalyticsError, Result};
use crate::models::PerformanceRecord;

pub const FEATURE_COUNT: usize = 5;
const ROW_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LearningPattern {
    pub pattern_type: String,
    pub avg_quiz: f64,
    pub avg_assignment: f64,
    pub avg_attendance: f64,
    pub avg_participation: f64,
    pub avg_grade: f64,
    pub count: usize,
}

/// Rows of `[quiz, assignment, attendance, participation, overall]`.
pub fn feature_matrix(records: &[PerformanceRecord]) -> Array2<f64> {
    let flat: Vec<f64> = records
        .iter()
        .flat_map(|r| {
            [
                r.quiz_average,
                r.assignment_average,
                r.attendance_rate,
                r.participation_score,
                r.overall_grade,
            ]
        })
        .collect();
    Array2::from_shape_vec((records.len(), FEATURE_COUNT), flat)
        .unwrap_or_else(|_| Array2::zeros((0, FEATURE_COUNT)))
}

/// Zero mean, unit variance per column. Constant columns are only centred.
pub fn standardize(features: &Array2<f64>) -> Array2<f64> {
    if features.nrows() == 0 {
        return features.clone();
    }
    let mean = features
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(features.ncols()));
    let std = features
        .std_axis(Axis(0), 0.0)
        .mapv(|s| if s > f64::EPSILON { s } else { 1.0 });
    (features - &mean) / &std
}

/// Groups a course cohort into learning patterns: standardise, project onto
/// two principal components, then k-means with a fixed seed.
#[derive(Debug, Clone)]
pub struct PatternAnalyzer {
    n_clusters: usize,
    n_components: usize,
    seed: u64,
}

impl Default for PatternAnalyzer {
    fn default() -> Self {
        Self {
            n_clusters: 3,
            n_components: 2,
            seed: 42,
        }
    }
}

impl PatternAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn discover(&self, records: &[PerformanceRecord]) -> Result<Vec<LearningPattern>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let features = feature_matrix(records);
        let (groups, distinct) = group_identical_rows(&features);
        let memberships = if distinct < self.n_clusters {
            // Too few distinct students for the fixed cluster count: one
            // pattern per distinct score profile.
            groups
        } else {
            self.cluster(&features)?
        };

        Ok(summarize_clusters(&features, &memberships))
    }

    fn cluster(&self, features: &Array2<f64>) -> Result<Array1<usize>> {
        let scaled = standardize(features);

        let pca = Pca::params(self.n_components)
            .fit(&DatasetBase::from(scaled.clone()))
            .map_err(|e| AnalyticsError::Clustering(format!("pca: {e}")))?;
        let reduced: Array2<f64> = pca.predict(&scaled);

        // k-means++ cannot seed more centroids than there are distinct points.
        let (groups, distinct) = group_identical_rows(&reduced);
        if distinct < self.n_clusters {
            return Ok(groups);
        }

        let rng = Xoshiro256Plus::seed_from_u64(self.seed);
        let observations = DatasetBase::from(reduced.clone());
        let model = KMeans::params_with_rng(self.n_clusters, rng)
            .max_n_iterations(300)
            .tolerance(1e-4)
            .fit(&observations)
            .map_err(|e| AnalyticsError::Clustering(format!("k-means: {e}")))?;

        Ok(model.predict(&reduced))
    }
}

/// Labels equal rows (within `ROW_TOLERANCE`) with the same group number,
/// numbered in order of first appearance. Returns the labels and the number
/// of distinct rows.
pub fn group_identical_rows(matrix: &Array2<f64>) -> (Array1<usize>, usize) {
    let mut representatives: Vec<usize> = Vec::new();
    let labels = matrix
        .outer_iter()
        .enumerate()
        .map(|(i, row)| {
            let found = representatives.iter().position(|&r| {
                matrix
                    .row(r)
                    .iter()
                    .zip(row.iter())
                    .all(|(a, b)| (a - b).abs() <= ROW_TOLERANCE)
            });
            found.unwrap_or_else(|| {
                representatives.push(i);
                representatives.len() - 1
            })
        })
        .collect::<Array1<usize>>();
    (labels, representatives.len())
}

fn summarize_clusters(features: &Array2<f64>, memberships: &Array1<usize>) -> Vec<LearningPattern> {
    let mut clusters: Vec<usize> = memberships.to_vec();
    clusters.sort_unstable();
    clusters.dedup();

    clusters
        .into_iter()
        .enumerate()
        .map(|(i, cluster)| {
            let rows: Vec<usize> = memberships
                .iter()
                .enumerate()
                .filter(|(_, &m)| m == cluster)
                .map(|(row, _)| row)
                .collect();
            let members = features.select(Axis(0), &rows);
            let centroid = members
                .mean_axis(Axis(0))
                .unwrap_or_else(|| Array1::zeros(FEATURE_COUNT));

            LearningPattern {
                pattern_type: format!("Learning Pattern {}", i + 1),
                avg_quiz: centroid[0],
                avg_assignment: centroid[1],
                avg_attendance: centroid[2],
                avg_participation: centroid[3],
                avg_grade: centroid[4],
                count: rows.len(),
            }
        })
        .collect()
}
