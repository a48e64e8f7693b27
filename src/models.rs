use crate::features::FeatureVector;

/// Identifying metadata carried through to the catalog document.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackMeta {
    pub track_name: String,
    pub artist_name: String,
    pub released_year: i32,
    pub streams: u64,
}

/// One cleaned catalog entry: metadata plus raw (unstandardized) features.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub meta: TrackMeta,
    pub features: FeatureVector,
}
