use std::collections::HashMap;
use std::fmt;

use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

use crate::features::{DIM, Feature, FeatureVector};
use crate::models::{Record, TrackMeta};
use crate::standardize::StandardizationParameters;

/// A feature vector serialized as `{column: value}` in canonical order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureMap(pub FeatureVector);

impl Serialize for FeatureMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(DIM))?;
        for f in Feature::ALL {
            map.serialize_entry(f.column(), &self.0[f.index()])?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for FeatureMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Flattened into a catalog entry, this map also sees every other field
        // of the entry, so only the feature columns have to be numbers
        let raw: HashMap<String, serde_json::Value> = HashMap::deserialize(deserializer)?;
        let mut out = [0.0_f64; DIM];
        for f in Feature::ALL {
            let value = raw
                .get(f.column())
                .ok_or_else(|| de::Error::missing_field(f.column()))?;
            out[f.index()] = value.as_f64().ok_or_else(|| {
                de::Error::custom(format!("feature {} is not a number: {}", f.column(), value))
            })?;
        }
        Ok(FeatureMap(out))
    }
}

/// `scaler_params.json`: per-feature mean and scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDocument {
    pub mean: FeatureMap,
    pub scale: FeatureMap,
}

impl From<&StandardizationParameters> for ParameterDocument {
    fn from(params: &StandardizationParameters) -> Self {
        Self {
            mean: FeatureMap(*params.mean()),
            scale: FeatureMap(*params.scale()),
        }
    }
}

impl TryFrom<ParameterDocument> for StandardizationParameters {
    type Error = crate::standardize::StandardizeError;

    fn try_from(doc: ParameterDocument) -> Result<Self, Self::Error> {
        StandardizationParameters::from_parts(doc.mean.0, doc.scale.0)
    }
}

/// One element of `spotify_data.json`: metadata plus standardized features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub track_name: String,
    #[serde(rename = "artist(s)_name")]
    pub artist_name: String,
    pub released_year: i32,
    pub streams: u64,
    #[serde(flatten)]
    pub features: FeatureMap,
}

impl CatalogEntry {
    pub fn new(meta: &TrackMeta, standardized: FeatureVector) -> Self {
        Self {
            track_name: meta.track_name.clone(),
            artist_name: meta.artist_name.clone(),
            released_year: meta.released_year,
            streams: meta.streams,
            features: FeatureMap(standardized),
        }
    }

    /// Build from a raw record through the single transform path.
    pub fn standardized(record: &Record, params: &StandardizationParameters) -> Self {
        Self::new(&record.meta, params.transform(&record.features))
    }

    pub fn vector(&self) -> &FeatureVector {
        &self.features.0
    }

    pub fn same_track(&self, meta: &TrackMeta) -> bool {
        self.track_name == meta.track_name
            && self.artist_name == meta.artist_name
            && self.released_year == meta.released_year
            && self.streams == meta.streams
    }
}

impl fmt::Display for CatalogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {} ({})", self.track_name, self.artist_name, self.released_year)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_document_shape() {
        let params = StandardizationParameters::from_parts(
            [120.0, 60.0, 50.0, 65.0, 27.0, 1.5, 18.0, 10.0],
            [28.0, 14.5, 23.5, 16.5, 26.0, 8.4, 13.7, 9.9],
        )
        .unwrap();
        let json = serde_json::to_value(ParameterDocument::from(&params)).unwrap();

        assert_eq!(json["mean"]["bpm"], 120.0);
        assert_eq!(json["scale"]["danceability_%"], 14.5);
        assert_eq!(json["mean"].as_object().unwrap().len(), DIM);
        assert_eq!(json["scale"].as_object().unwrap().len(), DIM);
    }

    #[test]
    fn test_parameter_document_key_order() {
        let doc = ParameterDocument {
            mean: FeatureMap([0.0; DIM]),
            scale: FeatureMap([1.0; DIM]),
        };
        let text = serde_json::to_string(&doc).unwrap();
        let positions: Vec<usize> = Feature::ALL
            .iter()
            .map(|f| text.find(&format!("\"{}\"", f.column())).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_parameter_document_missing_feature() {
        let json = r#"{"mean": {"bpm": 1.0}, "scale": {"bpm": 1.0}}"#;
        let err = serde_json::from_str::<ParameterDocument>(json).unwrap_err();
        assert!(err.to_string().contains("danceability_%"));
    }

    #[test]
    fn test_catalog_entry_fields() {
        let meta = TrackMeta {
            track_name: "Flowers".into(),
            artist_name: "Miley Cyrus".into(),
            released_year: 2023,
            streams: 1_316_855_716,
        };
        let entry = CatalogEntry::new(&meta, [0.5, -1.0, 0.0, 0.25, 2.0, -0.1, 0.3, -0.7]);
        let json = serde_json::to_value(&entry).unwrap();
        let obj = json.as_object().unwrap();

        assert_eq!(obj.len(), 4 + DIM);
        assert_eq!(obj["track_name"], "Flowers");
        assert_eq!(obj["artist(s)_name"], "Miley Cyrus");
        assert_eq!(obj["released_year"], 2023);
        assert_eq!(obj["streams"], 1_316_855_716u64);
        assert_eq!(obj["danceability_%"], -1.0);

        let back: CatalogEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back, entry);
        assert!(back.same_track(&meta));
    }

    #[test]
    fn test_catalog_entry_ignores_extra_fields() {
        let json = r#"{
            "track_name": "vampire",
            "artist(s)_name": "Olivia Rodrigo",
            "released_year": 2023,
            "streams": 140003974,
            "spotify_link": "https://open.spotify.com/track/1kuGVB7EU95pJObxwvfwKS",
            "key": "F",
            "in_spotify_playlists": 1397,
            "bpm": 0.5, "danceability_%": -0.25, "valence_%": 1.0, "energy_%": 0.0,
            "acousticness_%": 2.0, "instrumentalness_%": -1.5, "liveness_%": 0.75,
            "speechiness_%": -0.125
        }"#;
        let entry: CatalogEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.track_name, "vampire");
        assert_eq!(entry.streams, 140_003_974);
        assert_eq!(
            entry.vector(),
            &[0.5, -0.25, 1.0, 0.0, 2.0, -1.5, 0.75, -0.125]
        );

        let bad = json.replace("\"bpm\": 0.5", "\"bpm\": \"fast\"");
        let err = serde_json::from_str::<CatalogEntry>(&bad).unwrap_err();
        assert!(err.to_string().contains("bpm"));
    }
}
