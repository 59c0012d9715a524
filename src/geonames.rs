#![forbid(unsafe_code)]
//! Line-oriented loaders for the GeoNames gazetteer dump and its
//! feature-code lookup table.
//!
//! The gazetteer loader tolerates malformed records: a bad line is logged
//! together with its raw text and skipped. The feature-code loader carries
//! no such tolerance and aborts on the first bad line.

use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};

use log::{info, warn};
use thiserror::Error;

use crate::store::{FeatureCode, Geoname, RecordStore, StoreError};

/// Number of tab-separated fields in a GeoNames dump line.
const GEONAME_FIELDS: usize = 19;

/// Errors that abort a loader run.
#[derive(Debug, Error)]
pub enum GeonamesImportError {
    /// The dump file could not be opened.
    #[error("failed to open dump at {path:?}")]
    Open {
        /// Path of the dump.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Reading the next line failed.
    #[error("failed to read dump at {path:?}")]
    Read {
        /// Path of the dump.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A feature-code line did not carry the expected fields.
    #[error("malformed feature-code record: {line:?}")]
    MalformedFeatureCode {
        /// The offending raw line.
        line: String,
    },
    /// Persisting a feature-code row failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Per-record failure inside the GeoNames dump; recovered locally.
#[derive(Debug, Error)]
enum RecordError {
    #[error("expected {GEONAME_FIELDS} fields but found {found}")]
    FieldCount { found: usize },
    #[error("field '{name}' value {value:?} is not numeric")]
    InvalidField { name: &'static str, value: String },
}

/// Import a GeoNames dump, one tab-separated record per line.
///
/// Malformed records are logged with the offending line and skipped; an
/// unparsable elevation field defaults to zero instead of failing the
/// record. Returns the count of successfully imported records.
pub fn import_geonames(path: &Path, store: &RecordStore) -> Result<u64, GeonamesImportError> {
    let file = File::open(path).map_err(|source| GeonamesImportError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let reader = BufReader::new(file);

    let mut imported = 0u64;
    for line in reader.lines() {
        let line = line.map_err(|source| GeonamesImportError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        match parse_geoname(&line) {
            Ok(geoname) => match store.upsert_geoname(&geoname) {
                Ok(()) => imported += 1,
                Err(error) => warn!("failed to store geonames record: {error}; line: {line}"),
            },
            Err(error) => warn!("skipping malformed geonames record: {error}; line: {line}"),
        }
    }

    info!("{imported} geonames entities imported");
    Ok(imported)
}

/// Import the GeoNames feature-code table: `code`, `name` and `description`
/// per tab-separated line. Any malformed line aborts the load.
pub fn import_feature_codes(path: &Path, store: &RecordStore) -> Result<u64, GeonamesImportError> {
    let file = File::open(path).map_err(|source| GeonamesImportError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let reader = BufReader::new(file);

    let mut imported = 0u64;
    for line in reader.lines() {
        let line = line.map_err(|source| GeonamesImportError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut fields = line.split('\t');
        let (Some(code), Some(name), Some(description)) =
            (fields.next(), fields.next(), fields.next())
        else {
            return Err(GeonamesImportError::MalformedFeatureCode { line });
        };
        store.upsert_feature_code(&FeatureCode {
            code: code.to_owned(),
            name: name.to_owned(),
            description: description.to_owned(),
        })?;
        imported += 1;
    }

    info!("{imported} feature codes imported");
    Ok(imported)
}

fn parse_geoname(line: &str) -> Result<Geoname, RecordError> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < GEONAME_FIELDS {
        return Err(RecordError::FieldCount {
            found: fields.len(),
        });
    }

    // Field 8 (country code) is intentionally skipped.
    Ok(Geoname {
        id: numeric_field(&fields, 0, "id")?,
        name: fields[1].to_owned(),
        ascii_name: fields[2].to_owned(),
        alternate_names: fields[3].to_owned(),
        latitude: numeric_field(&fields, 4, "latitude")?,
        longitude: numeric_field(&fields, 5, "longitude")?,
        feature_class: fields[6].to_owned(),
        feature_code: fields[7].to_owned(),
        cc2: fields[9].to_owned(),
        admin1: fields[10].to_owned(),
        admin2: fields[11].to_owned(),
        admin3: fields[12].to_owned(),
        admin4: fields[13].to_owned(),
        population: numeric_field(&fields, 14, "population")?,
        elevation: fields[15].parse().unwrap_or(0),
        digital_elevation: fields[16].to_owned(),
        timezone: fields[17].to_owned(),
        modified_on: fields[18].to_owned(),
    })
}

fn numeric_field<T: std::str::FromStr>(
    fields: &[&str],
    index: usize,
    name: &'static str,
) -> Result<T, RecordError> {
    fields[index].parse().map_err(|_| RecordError::InvalidField {
        name,
        value: fields[index].to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn dump_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("create temp dump");
        file.write_all(contents.as_bytes()).expect("write dump");
        file
    }

    fn geoname_line(id: &str, name: &str, elevation: &str) -> String {
        [
            id, name, name, "", "42.57952", "1.65362", "P", "PPL", "AD", "",
            "02", "", "", "", "1052", elevation, "1868", "Europe/Andorra", "2012-11-03",
        ]
        .join("\t")
    }

    #[fixture]
    fn store() -> RecordStore {
        RecordStore::open_in_memory().expect("open in-memory store")
    }

    #[rstest]
    fn imports_well_formed_records(store: RecordStore) {
        let contents = format!(
            "{}\n{}\n",
            geoname_line("3039154", "El Tarter", "1721"),
            geoname_line("3039163", "Sant Julia", "951"),
        );
        let file = dump_file(&contents);

        let imported = import_geonames(file.path(), &store).expect("import dump");

        assert_eq!(imported, 2);
        let record = store
            .geoname(3039154)
            .expect("read geoname")
            .expect("geoname exists");
        assert_eq!(record.name, "El Tarter");
        assert_eq!(record.elevation, 1721);
        assert_eq!(record.admin1, "02");
    }

    #[rstest]
    fn unparsable_elevation_defaults_to_zero(store: RecordStore) {
        let contents = format!("{}\n", geoname_line("3039154", "El Tarter", "n/a"));
        let file = dump_file(&contents);

        let imported = import_geonames(file.path(), &store).expect("import dump");

        assert_eq!(imported, 1);
        let record = store
            .geoname(3039154)
            .expect("read geoname")
            .expect("geoname exists");
        assert_eq!(record.elevation, 0);
    }

    #[rstest]
    fn malformed_lines_are_skipped(store: RecordStore) {
        let contents = format!(
            "too\tfew\tfields\n{}\n",
            geoname_line("3039154", "El Tarter", "1721"),
        );
        let file = dump_file(&contents);

        let imported = import_geonames(file.path(), &store).expect("import dump");

        assert_eq!(imported, 1, "the well-formed record still imports");
    }

    #[rstest]
    fn feature_codes_import_and_abort_on_malformed_lines(store: RecordStore) {
        let file = dump_file("P.PPL\tpopulated place\tcity, town or village\n");
        let imported = import_feature_codes(file.path(), &store).expect("import codes");
        assert_eq!(imported, 1);
        let code = store
            .feature_code("P.PPL")
            .expect("read code")
            .expect("code exists");
        assert_eq!(code.name, "populated place");

        let bad = dump_file("P.PPL only-one-field\n");
        let err = import_feature_codes(bad.path(), &store)
            .expect_err("malformed line should abort the load");
        assert!(matches!(
            err,
            GeonamesImportError::MalformedFeatureCode { .. }
        ));
    }

    #[rstest]
    fn missing_dump_reports_open_error(store: RecordStore) {
        let err = import_geonames(Path::new("/nonexistent/allCountries.txt"), &store)
            .expect_err("missing dump should fail");
        assert!(matches!(err, GeonamesImportError::Open { .. }));
    }
}
