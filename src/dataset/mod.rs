pub mod parse;

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::features::{DIM, Feature};
use crate::models::{Record, TrackMeta};
pub use parse::DropReason;
use parse::decode_field;

pub const COL_TRACK_NAME: &str = "track_name";
pub const COL_ARTIST_NAME: &str = "artist(s)_name";
pub const COL_RELEASED_YEAR: &str = "released_year";
pub const COL_STREAMS: &str = "streams";

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("failed to open {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("required column \"{0}\" not found in header")]
    MissingColumn(String),
}

/// A row that was excluded from the cleaned set.
#[derive(Debug, Clone, PartialEq)]
pub struct DroppedRow {
    /// 1-based data row number (header excluded).
    pub row: usize,
    pub reason: DropReason,
}

pub struct LoadResult {
    pub records: Vec<Record>,
    pub total_rows: usize,
    pub dropped: Vec<DroppedRow>,
}

/// Header positions of the columns we need.
struct ColumnMap {
    track_name: usize,
    artist_name: usize,
    released_year: usize,
    streams: usize,
    features: [usize; DIM],
}

impl ColumnMap {
    fn from_header(header: &csv::ByteRecord) -> Result<Self, LoadError> {
        let names: Vec<String> = header
            .iter()
            .map(|h| decode_field(h).trim().to_string())
            .collect();
        let find = |name: &str| -> Result<usize, LoadError> {
            names
                .iter()
                .position(|n| n == name)
                .ok_or_else(|| LoadError::MissingColumn(name.to_string()))
        };

        let mut features = [0usize; DIM];
        for f in Feature::ALL {
            features[f.index()] = find(f.column())?;
        }

        Ok(Self {
            track_name: find(COL_TRACK_NAME)?,
            artist_name: find(COL_ARTIST_NAME)?,
            released_year: find(COL_RELEASED_YEAR)?,
            streams: find(COL_STREAMS)?,
            features,
        })
    }

    fn parse_row(&self, row: &csv::ByteRecord, width: usize) -> Result<Record, DropReason> {
        if row.len() != width {
            return Err(DropReason::FieldCount {
                expected: width,
                found: row.len(),
            });
        }
        let field = |i: usize| decode_field(row.get(i).unwrap_or_default());

        let streams = parse::parse_play_count(&field(self.streams))
            .ok_or(DropReason::InvalidPlayCount)?;
        let released_year = parse::parse_year(&field(self.released_year))
            .ok_or(DropReason::InvalidYear)?;

        let mut features = [0.0_f64; DIM];
        for f in Feature::ALL {
            features[f.index()] = parse::parse_feature(&field(self.features[f.index()]))
                .ok_or(DropReason::InvalidFeature(f))?;
        }

        Ok(Record {
            meta: TrackMeta {
                track_name: field(self.track_name).into_owned(),
                artist_name: field(self.artist_name).into_owned(),
                released_year,
                streams,
            },
            features,
        })
    }
}

/// Load and clean the source table.
pub fn load_records(path: &Path) -> Result<LoadResult, LoadError> {
    let file = File::open(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    log::info!("Loading records from {}", path.display());
    parse_records(file)
}

/// Parse a table from any reader, applying the row-cleaning policy:
/// a row with an unparsable play count, year or feature value is dropped,
/// never fatal. Only header problems and I/O failures abort.
pub fn parse_records<R: Read>(reader: R) -> Result<LoadResult, LoadError> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(reader);

    let header = rdr.byte_headers()?.clone();
    let columns = ColumnMap::from_header(&header)?;
    let width = header.len();

    let mut records = Vec::new();
    let mut dropped = Vec::new();
    let mut total_rows = 0usize;

    for result in rdr.byte_records() {
        total_rows += 1;
        let parsed = match result {
            Ok(row) => columns.parse_row(&row, width),
            Err(e) if e.is_io_error() => return Err(LoadError::Csv(e)),
            Err(e) => Err(DropReason::Malformed(e.to_string())),
        };

        match parsed {
            Ok(record) => records.push(record),
            Err(reason) => {
                log::debug!("Dropping row {}: {}", total_rows, reason);
                dropped.push(DroppedRow {
                    row: total_rows,
                    reason,
                });
            }
        }
    }

    log::info!(
        "Loaded {} records ({} rows read, {} dropped)",
        records.len(),
        total_rows,
        dropped.len()
    );

    Ok(LoadResult {
        records,
        total_rows,
        dropped,
    })
}
