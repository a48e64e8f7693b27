use std::fmt;

/// Number of audio-feature dimensions per record.
pub const DIM: usize = 8;

/// Raw or standardized feature values, always in [`Feature::ALL`] order.
pub type FeatureVector = [f64; DIM];

/// The audio-feature dimensions used for scaling, training and lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    Bpm,
    Danceability,
    Valence,
    Energy,
    Acousticness,
    Instrumentalness,
    Liveness,
    Speechiness,
}

impl Feature {
    /// Canonical dimension order. Every vector in the crate is indexed by this.
    pub const ALL: [Feature; DIM] = [
        Feature::Bpm,
        Feature::Danceability,
        Feature::Valence,
        Feature::Energy,
        Feature::Acousticness,
        Feature::Instrumentalness,
        Feature::Liveness,
        Feature::Speechiness,
    ];

    /// Column name in the source table and in both exported documents.
    pub fn column(self) -> &'static str {
        match self {
            Self::Bpm => "bpm",
            Self::Danceability => "danceability_%",
            Self::Valence => "valence_%",
            Self::Energy => "energy_%",
            Self::Acousticness => "acousticness_%",
            Self::Instrumentalness => "instrumentalness_%",
            Self::Liveness => "liveness_%",
            Self::Speechiness => "speechiness_%",
        }
    }

    /// Short name accepted from query callers.
    pub fn query_key(self) -> &'static str {
        match self {
            Self::Bpm => "bpm",
            Self::Danceability => "danceability",
            Self::Valence => "valence",
            Self::Energy => "energy",
            Self::Acousticness => "acousticness",
            Self::Instrumentalness => "instrumentalness",
            Self::Liveness => "liveness",
            Self::Speechiness => "speechiness",
        }
    }

    /// Position of this feature inside a [`FeatureVector`].
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_column(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.column() == name)
    }

    /// Accepts either the short query key or the full column name.
    pub fn from_query_key(key: &str) -> Option<Self> {
        let key = key.trim();
        Self::ALL
            .into_iter()
            .find(|f| f.query_key().eq_ignore_ascii_case(key) || f.column() == key)
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.column())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_matches_canonical_order() {
        for (i, f) in Feature::ALL.iter().enumerate() {
            assert_eq!(f.index(), i);
        }
    }

    #[test]
    fn test_column_roundtrip() {
        for f in Feature::ALL {
            assert_eq!(Feature::from_column(f.column()), Some(f));
        }
        assert_eq!(Feature::from_column("danceability"), None);
    }

    #[test]
    fn test_query_key_lookup() {
        assert_eq!(Feature::from_query_key("energy"), Some(Feature::Energy));
        assert_eq!(Feature::from_query_key(" Valence "), Some(Feature::Valence));
        assert_eq!(
            Feature::from_query_key("speechiness_%"),
            Some(Feature::Speechiness)
        );
        assert_eq!(Feature::from_query_key("loudness"), None);
    }
}
