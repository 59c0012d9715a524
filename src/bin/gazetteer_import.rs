//! Command-line entry point for the gazetteer import pipeline.
#![forbid(unsafe_code)]

use std::path::PathBuf;

use clap::Parser;
use thiserror::Error;

use gazetteer_data::{
    ImportOptions, ImportReport, JobError, JobLog, PipelineError, RecordStore, StoreError,
    run_import,
};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(err) = run(Arguments::parse()) {
        eprintln!("gazetteer-import: {err}");
        std::process::exit(1);
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "gazetteer-import",
    about = "Import OSM extracts and GeoNames dumps into a gazetteer database",
    version
)]
struct Arguments {
    /// OSM XML extract to import; doubles as the GeoNames dump path when
    /// --geonames-file is not given.
    #[arg(value_name = "FILE")]
    file: PathBuf,
    /// SQLite database receiving the imported records.
    #[arg(long, value_name = "path", default_value = "gazetteer.db")]
    database: PathBuf,
    /// GeoNames dump to import instead of reading FILE.
    #[arg(long, value_name = "path")]
    geonames_file: Option<PathBuf>,
    /// GeoNames feature-code table to import.
    #[arg(long, value_name = "path")]
    features_file: Option<PathBuf>,
    /// Skip the OSM import phase.
    #[arg(long)]
    skip_osm: bool,
    /// Skip the GeoNames import phase.
    #[arg(long)]
    skip_geonames: bool,
    /// Skip the feature-code import phase.
    #[arg(long)]
    skip_features: bool,
    /// Skip the final cleanup sweep.
    #[arg(long)]
    skip_clean: bool,
}

impl Arguments {
    fn into_options(self) -> (PathBuf, ImportOptions) {
        let options = ImportOptions {
            osm_path: self.file,
            geonames_path: self.geonames_file,
            feature_codes_path: self.features_file,
            skip_osm: self.skip_osm,
            skip_geonames: self.skip_geonames,
            skip_feature_codes: self.skip_features,
            skip_cleanup: self.skip_clean,
        };
        (self.database, options)
    }
}

/// Errors emitted by the import command.
#[derive(Debug, Error)]
enum CliError {
    /// The database could not be opened or initialised.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// No job could be claimed for the run.
    #[error(transparent)]
    Job(#[from] JobError),
    /// An import phase failed.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

fn run(arguments: Arguments) -> Result<(), CliError> {
    let (database, options) = arguments.into_options();
    let mut store = RecordStore::open(&database)?;
    let mut job = JobLog::claim(&database)?;

    let report = run_import(&mut store, &mut job, &options)?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &ImportReport) {
    if let Some(osm) = &report.osm {
        println!(
            "OSM: {} nodes, {} ways, {} relations, {} tags, {} members ({} skipped)",
            osm.nodes, osm.ways, osm.relations, osm.tags, osm.members, osm.errors
        );
    }
    if let Some(swept) = &report.interim_cleanup {
        println!("interim cleanup removed {} rows", swept.total());
    }
    if let Some(imported) = report.geonames_imported {
        println!("GeoNames: {imported} records");
    }
    if let Some(imported) = report.feature_codes_imported {
        println!("feature codes: {imported} rows");
    }
    if let Some(swept) = &report.final_cleanup {
        println!("final cleanup removed {} rows", swept.total());
    }
    println!("finished in {:.2?}", report.elapsed);
}
