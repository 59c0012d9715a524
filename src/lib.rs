#![forbid(unsafe_code)]
//! Bulk geodata ingestion for a gazetteer service.
//!
//! ## Responsibilities
//!
//! - Stream OSM XML extracts into a SQLite store, attaching way and
//!   relation ownership as the document unfolds.
//! - Load GeoNames dumps and the feature-code lookup table from their
//!   tab-separated distribution format.
//! - Sweep unnamed, unreferenced entities out of the store in bounded
//!   batches after each import.
//! - Track import runs as claimable job records with row counters and
//!   start/end timestamps.
//!
//! ## Boundaries
//!
//! - No network access: inputs are local files already fetched by the
//!   operator or an outer scheduler.
//! - No query surface beyond the point lookups the importers and tests
//!   need; serving reads is a consumer concern.
//!
//! ## Invariants
//!
//! - Imports are idempotent per external identifier; a rerun refreshes
//!   rows without detaching previously claimed parents.
//! - A malformed element or dump record skips that record only; the
//!   stream continues and the skip is counted on the job.
//! - Cleanup deletes in fixed-size transactions so an interruption leaves
//!   the store consistent.

pub mod cleaner;
pub mod geonames;
pub mod job;
pub mod osm;
pub mod pipeline;
pub mod store;
pub mod tags;

pub use cleaner::{BATCH_SIZE, CleanupError, CleanupSummary, clean_unreferenced_entities};
pub use geonames::{GeonamesImportError, import_feature_codes, import_geonames};
pub use job::{JobError, JobLog, JobStatus, StatusSink};
pub use osm::{OsmImportError, OsmImportSummary, import_osm_xml};
pub use pipeline::{ImportOptions, ImportReport, PipelineError, run_import};
pub use store::{
    EntityKind, FeatureCode, Geoname, Point, RecordStore, Relation, StoreError, Way,
};
