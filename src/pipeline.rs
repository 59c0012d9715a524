#![forbid(unsafe_code)]
//! End-to-end import pipeline: OSM extract, GeoNames dump, feature codes
//! and the cleanup sweeps, stitched to a claimed job record.
//!
//! Each phase can be skipped independently; the job row is finalised with
//! [`JobStatus::Finalized`] on success and [`JobStatus::Error`] when any
//! phase escapes.

use std::{
    path::PathBuf,
    time::{Duration, Instant},
};

use log::{info, warn};
use thiserror::Error;

use crate::{
    cleaner::{CleanupError, CleanupSummary, clean_unreferenced_entities},
    geonames::{GeonamesImportError, import_feature_codes, import_geonames},
    job::{JobError, JobLog, JobStatus, StatusSink},
    osm::{OsmImportError, OsmImportSummary, import_osm_xml},
    store::RecordStore,
};

/// Inputs and phase toggles for one pipeline run.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Path of the OSM XML extract.
    pub osm_path: PathBuf,
    /// Path of the GeoNames dump; defaults to the OSM path when absent.
    pub geonames_path: Option<PathBuf>,
    /// Path of the feature-code table; the phase is skipped when absent.
    pub feature_codes_path: Option<PathBuf>,
    /// Skip the OSM phase and its interim cleanup.
    pub skip_osm: bool,
    /// Skip the GeoNames phase.
    pub skip_geonames: bool,
    /// Skip the feature-code phase.
    pub skip_feature_codes: bool,
    /// Skip the final cleanup sweep.
    pub skip_cleanup: bool,
}

impl ImportOptions {
    /// Options for a full run over a single OSM extract.
    #[must_use]
    pub fn for_osm_extract(osm_path: PathBuf) -> Self {
        Self {
            osm_path,
            geonames_path: None,
            feature_codes_path: None,
            skip_osm: false,
            skip_geonames: false,
            skip_feature_codes: false,
            skip_cleanup: false,
        }
    }
}

/// What each phase of a completed run accomplished. Phases that were
/// skipped report `None`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportReport {
    /// OSM phase counters.
    pub osm: Option<OsmImportSummary>,
    /// Cleanup sweep run between the OSM and GeoNames phases.
    pub interim_cleanup: Option<CleanupSummary>,
    /// GeoNames records imported.
    pub geonames_imported: Option<u64>,
    /// Feature-code rows imported.
    pub feature_codes_imported: Option<u64>,
    /// Final cleanup sweep.
    pub final_cleanup: Option<CleanupSummary>,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
}

/// Errors escaping a pipeline run. The job record is already stamped
/// [`JobStatus::Error`] by the time one of these reaches the caller.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The OSM phase failed.
    #[error(transparent)]
    Osm(#[from] OsmImportError),
    /// The GeoNames or feature-code phase failed.
    #[error(transparent)]
    Geonames(#[from] GeonamesImportError),
    /// A cleanup sweep failed.
    #[error(transparent)]
    Cleanup(#[from] CleanupError),
    /// The job record could not be updated.
    #[error(transparent)]
    Job(#[from] JobError),
}

/// Run the configured phases against the store, reporting progress to the
/// claimed job and stamping its final status.
pub fn run_import(
    store: &mut RecordStore,
    job: &mut JobLog,
    options: &ImportOptions,
) -> Result<ImportReport, PipelineError> {
    match execute(store, job, options) {
        Ok(report) => {
            job.finish(JobStatus::Finalized)?;
            Ok(report)
        }
        Err(error) => {
            if let Err(finish_error) = job.finish(JobStatus::Error) {
                warn!("failed to stamp error status on job: {finish_error}");
            }
            Err(error)
        }
    }
}

fn execute(
    store: &mut RecordStore,
    job: &mut JobLog,
    options: &ImportOptions,
) -> Result<ImportReport, PipelineError> {
    let started = Instant::now();
    let mut report = ImportReport::default();

    if options.skip_osm {
        info!("skipping OSM import");
    } else {
        report.osm = Some(import_osm_xml(&options.osm_path, store, job)?);
        let interim = clean_unreferenced_entities(store)?;
        job.checkpoint(interim.total());
        report.interim_cleanup = Some(interim);
    }

    if options.skip_geonames {
        info!("skipping geonames import");
    } else {
        let path = options
            .geonames_path
            .as_deref()
            .unwrap_or(&options.osm_path);
        let imported = import_geonames(path, store)?;
        job.checkpoint(imported);
        report.geonames_imported = Some(imported);

        if options.skip_feature_codes {
            info!("skipping feature-code import");
        } else if let Some(features) = options.feature_codes_path.as_deref() {
            let imported = import_feature_codes(features, store)?;
            job.checkpoint(imported);
            report.feature_codes_imported = Some(imported);
        } else {
            info!("no feature-code table supplied");
        }
    }

    if options.skip_cleanup {
        info!("skipping final cleanup");
    } else {
        let swept = clean_unreferenced_entities(store)?;
        job.checkpoint(swept.total());
        report.final_cleanup = Some(swept);
    }

    report.elapsed = started.elapsed();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::EntityKind;
    use rstest::{fixture, rstest};
    use std::io::Write;
    use tempfile::TempDir;

    const EXTRACT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<osm version="0.6">
  <node id="1" lat="42.5" lon="1.5">
    <tag k="name" v="Summit"/>
  </node>
  <node id="2" lat="42.6" lon="1.6"/>
  <way id="10">
    <nd ref="2"/>
    <tag k="name" v="Ridge Path"/>
  </way>
</osm>
"#;

    fn geoname_line() -> String {
        [
            "3039154", "El Tarter", "El Tarter", "", "42.57952", "1.65362", "P", "PPL",
            "AD", "", "02", "", "", "", "1052", "1721", "1868", "Europe/Andorra",
            "2012-11-03",
        ]
        .join("\t")
    }

    #[fixture]
    fn tmp() -> TempDir {
        TempDir::new().expect("create temp dir")
    }

    fn write_file(tmp: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = tmp.path().join(name);
        let mut file = std::fs::File::create(&path).expect("create file");
        file.write_all(contents.as_bytes()).expect("write file");
        path
    }

    #[rstest]
    fn full_run_finalises_the_job(tmp: TempDir) {
        let osm = write_file(&tmp, "extract.osm", EXTRACT);
        let dump = write_file(&tmp, "allCountries.txt", &format!("{}\n", geoname_line()));
        let features = write_file(&tmp, "featureCodes.txt", "P.PPL\tpopulated place\tcity\n");
        let database = tmp.path().join("gazetteer.db");

        let mut store = RecordStore::open(&database).expect("open store");
        let mut job = JobLog::claim(&database).expect("claim job");
        let mut options = ImportOptions::for_osm_extract(osm);
        options.geonames_path = Some(dump);
        options.feature_codes_path = Some(features);

        let report = run_import(&mut store, &mut job, &options).expect("run pipeline");

        assert_eq!(job.status().expect("read status"), JobStatus::Finalized);
        assert_eq!(report.osm.as_ref().map(|osm| osm.nodes), Some(2));
        assert_eq!(report.geonames_imported, Some(1));
        assert_eq!(report.feature_codes_imported, Some(1));
        // Named node and named way survive, the unnamed member point is
        // owned by the way and survives too.
        assert_eq!(store.entity_count(EntityKind::Point).expect("count"), 2);
        assert_eq!(store.entity_count(EntityKind::Way).expect("count"), 1);
    }

    #[rstest]
    fn failing_osm_phase_stamps_error_status(tmp: TempDir) {
        let database = tmp.path().join("gazetteer.db");
        let mut store = RecordStore::open(&database).expect("open store");
        let mut job = JobLog::claim(&database).expect("claim job");
        let options = ImportOptions::for_osm_extract(tmp.path().join("missing.osm"));

        let error = run_import(&mut store, &mut job, &options).expect_err("missing extract");

        assert!(matches!(error, PipelineError::Osm(_)));
        assert_eq!(job.status().expect("read status"), JobStatus::Error);
    }

    #[rstest]
    fn skipping_every_phase_still_finalises(tmp: TempDir) {
        let database = tmp.path().join("gazetteer.db");
        let mut store = RecordStore::open(&database).expect("open store");
        let mut job = JobLog::claim(&database).expect("claim job");
        let mut options = ImportOptions::for_osm_extract(tmp.path().join("unused.osm"));
        options.skip_osm = true;
        options.skip_geonames = true;
        options.skip_cleanup = true;

        let report = run_import(&mut store, &mut job, &options).expect("run pipeline");

        assert_eq!(report.osm, None);
        assert_eq!(report.geonames_imported, None);
        assert_eq!(report.final_cleanup, None);
        assert_eq!(job.status().expect("read status"), JobStatus::Finalized);
    }

    #[rstest]
    fn geonames_path_falls_back_to_the_extract_path(tmp: TempDir) {
        // A dump handed in as the only input is read for both phases; the
        // OSM phase is skipped so the XML parser never sees it.
        let dump = write_file(&tmp, "allCountries.txt", &format!("{}\n", geoname_line()));
        let database = tmp.path().join("gazetteer.db");
        let mut store = RecordStore::open(&database).expect("open store");
        let mut job = JobLog::claim(&database).expect("claim job");
        let mut options = ImportOptions::for_osm_extract(dump);
        options.skip_osm = true;

        let report = run_import(&mut store, &mut job, &options).expect("run pipeline");

        assert_eq!(report.geonames_imported, Some(1));
        assert!(store.geoname(3039154).expect("read geoname").is_some());
    }
}
