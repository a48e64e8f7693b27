use std::path::Path;

use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;

use crate::export::{self, CATALOG_FILE, CatalogEntry, ExportError, PARAMS_FILE};
use crate::features::{DIM, Feature, FeatureVector};
use crate::standardize::StandardizationParameters;

const SEARCH_URL: &str = "https://open.spotify.com/search/";

#[derive(Error, Debug, PartialEq)]
pub enum QueryError {
    #[error("unknown query feature \"{0}\"")]
    UnknownFeature(String),
    #[error("query is missing feature {0}")]
    MissingFeature(Feature),
    #[error("feature {0} given more than once")]
    DuplicateFeature(Feature),
    #[error("feature {feature} has non-finite value {value}")]
    NonFinite { feature: Feature, value: f64 },
    #[error("failed to build worker pool: {0}")]
    ThreadPool(String),
}

/// Assemble a raw query vector from `(name, value)` pairs. Names may be the
/// short query key (`danceability`) or the column name (`danceability_%`).
/// Every feature must be given exactly once.
pub fn query_vector<I, K>(pairs: I) -> Result<FeatureVector, QueryError>
where
    I: IntoIterator<Item = (K, f64)>,
    K: AsRef<str>,
{
    let mut slots: [Option<f64>; DIM] = [None; DIM];
    for (key, value) in pairs {
        let key = key.as_ref();
        let feature =
            Feature::from_query_key(key).ok_or_else(|| QueryError::UnknownFeature(key.to_string()))?;
        if !value.is_finite() {
            return Err(QueryError::NonFinite { feature, value });
        }
        let slot = &mut slots[feature.index()];
        if slot.is_some() {
            return Err(QueryError::DuplicateFeature(feature));
        }
        *slot = Some(value);
    }

    let mut out = [0.0_f64; DIM];
    for f in Feature::ALL {
        out[f.index()] = slots[f.index()].ok_or(QueryError::MissingFeature(f))?;
    }
    Ok(out)
}

#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    /// Position in the catalog document.
    pub index: usize,
    pub track_name: String,
    pub artist_name: String,
    pub year: i32,
    pub streams: u64,
    pub distance: f64,
    /// 0-100, higher is closer.
    pub match_score: u8,
    pub search_link: String,
}

impl Recommendation {
    fn new(index: usize, entry: &CatalogEntry, distance: f64) -> Self {
        Self {
            index,
            track_name: entry.track_name.clone(),
            artist_name: entry.artist_name.clone(),
            year: entry.released_year,
            streams: entry.streams,
            distance,
            match_score: match_score(distance),
            search_link: search_link(&entry.track_name, &entry.artist_name),
        }
    }
}

/// Rough percentage: 100 at distance 0, minus 10 points per unit distance.
pub fn match_score(distance: f64) -> u8 {
    (100.0 - (distance * 10.0).round()).clamp(0.0, 100.0) as u8
}

pub fn search_link(track_name: &str, artist_name: &str) -> String {
    format!(
        "{}{}",
        SEARCH_URL,
        urlencoding::encode(&format!("{} {}", track_name, artist_name))
    )
}

/// Euclidean distance in standardized space.
pub fn euclidean_distance(a: &FeatureVector, b: &FeatureVector) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// Read-only lookup state: the exported parameters and catalog.
/// Never mutated after construction, so it can be shared across threads
/// behind a plain `Arc` or reference.
pub struct SimilarityIndex {
    params: StandardizationParameters,
    catalog: Vec<CatalogEntry>,
}

impl SimilarityIndex {
    pub fn new(params: StandardizationParameters, catalog: Vec<CatalogEntry>) -> Self {
        Self { params, catalog }
    }

    /// Load both documents from an artifact directory.
    pub fn load(dir: &Path) -> Result<Self, ExportError> {
        let params = export::load_parameters(&dir.join(PARAMS_FILE))?;
        let catalog = export::load_catalog(&dir.join(CATALOG_FILE))?;
        log::info!("Loaded similarity index: {} tracks from {}", catalog.len(), dir.display());
        Ok(Self::new(params, catalog))
    }

    pub fn params(&self) -> &StandardizationParameters {
        &self.params
    }

    pub fn catalog(&self) -> &[CatalogEntry] {
        &self.catalog
    }

    pub fn len(&self) -> usize {
        self.catalog.len()
    }

    pub fn is_empty(&self) -> bool {
        self.catalog.is_empty()
    }

    /// Standardize a raw query with the exported parameters and return the
    /// `k` nearest catalog entries, closest first.
    pub fn rank(&self, raw: &FeatureVector, k: usize) -> Vec<Recommendation> {
        let z = self.params.transform(raw);
        self.rank_standardized(&z, k, None)
    }

    /// Same as [`rank`](Self::rank) but on a dedicated pool of `jobs` workers.
    pub fn rank_with_workers(
        &self,
        raw: &FeatureVector,
        k: usize,
        jobs: usize,
    ) -> Result<Vec<Recommendation>, QueryError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .build()
            .map_err(|e| QueryError::ThreadPool(e.to_string()))?;
        Ok(pool.install(|| self.rank(raw, k)))
    }

    /// Catalog entries closest to an existing entry, excluding the entry itself.
    pub fn similar_to(&self, index: usize, k: usize) -> Vec<Recommendation> {
        match self.catalog.get(index) {
            Some(entry) => self.rank_standardized(entry.vector(), k, Some(index)),
            None => Vec::new(),
        }
    }

    /// Case-insensitive substring search on track name, returning the first match.
    pub fn find_track(&self, needle: &str) -> Option<usize> {
        let needle = needle.to_lowercase();
        self.catalog
            .iter()
            .position(|e| e.track_name.to_lowercase().contains(&needle))
    }

    fn rank_standardized(
        &self,
        z: &FeatureVector,
        k: usize,
        exclude: Option<usize>,
    ) -> Vec<Recommendation> {
        if k == 0 {
            return Vec::new();
        }

        let mut distances: Vec<(usize, f64)> = self
            .catalog
            .par_iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != exclude)
            .map(|(i, entry)| (i, euclidean_distance(z, entry.vector())))
            .collect();

        // Ties keep catalog order
        let by_distance =
            |a: &(usize, f64), b: &(usize, f64)| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0));

        if distances.len() > k {
            distances.select_nth_unstable_by(k - 1, by_distance);
            distances.truncate(k);
        }
        distances.sort_by(by_distance);

        distances
            .into_iter()
            .map(|(i, dist)| Recommendation::new(i, &self.catalog[i], dist))
            .collect()
    }
}
