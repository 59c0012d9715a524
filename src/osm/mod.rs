#![forbid(unsafe_code)]
//! Streaming importer for OSM XML extracts.
//!
//! The extract is consumed as a forward-only event stream so files far
//! larger than memory can be processed: each top-level `node`, `way` or
//! `relation` subtree is buffered, dispatched to its importer on close, and
//! released. A failure inside a single subtree is logged and counted, never
//! fatal to the stream.

mod subtree;

use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use log::{debug, error, info};
use quick_xml::Reader;
use quick_xml::events::Event;
use thiserror::Error;

use crate::job::StatusSink;
use crate::store::{EntityKind, RecordStore, StoreError};
use crate::tags::is_foreign_language_variant;

use subtree::{RawElement, SubtreeBuilder};

/// Cumulative counts reported by one import run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OsmImportSummary {
    /// Nodes imported as points.
    pub nodes: u64,
    /// Ways imported.
    pub ways: u64,
    /// Relations imported.
    pub relations: u64,
    /// Tags retained after classification.
    pub tags: u64,
    /// Relation members processed.
    pub members: u64,
    /// Top-level elements skipped after an import failure.
    pub errors: u64,
}

/// Errors that abort the whole OSM stream.
///
/// Per-element failures are tolerated and surface only in
/// [`OsmImportSummary::errors`]; these variants cover the file itself being
/// unreadable or structurally broken.
#[derive(Debug, Error)]
pub enum OsmImportError {
    /// The extract could not be opened.
    #[error("failed to open OSM extract at {path:?}")]
    Open {
        /// Path of the extract.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The XML stream could not be decoded.
    #[error("failed to parse OSM extract at {path:?}")]
    Parse {
        /// Path of the extract.
        path: PathBuf,
        /// Source error returned by `quick-xml`.
        #[source]
        source: quick_xml::Error,
    },
}

/// Failure importing one top-level element; recovered locally.
#[derive(Debug, Error)]
enum ElementError {
    #[error("missing required attribute '{name}'")]
    MissingAttribute { name: &'static str },
    #[error("attribute '{name}' value {value:?} is not numeric")]
    InvalidNumber { name: &'static str, value: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Stream an OSM XML extract into the record store.
///
/// Progress is flushed through `sink` at the phase boundaries (after the
/// last node, after the last way, and at end of stream) and whenever a
/// malformed element is skipped.
pub fn import_osm_xml(
    path: &Path,
    store: &RecordStore,
    sink: &mut dyn StatusSink,
) -> Result<OsmImportSummary, OsmImportError> {
    let file = File::open(path).map_err(|source| OsmImportError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = Reader::from_reader(BufReader::new(file));
    let mut buf = Vec::new();
    let mut builder = SubtreeBuilder::default();
    let mut stream = StreamState::new(store);

    loop {
        let event =
            reader
                .read_event_into(&mut buf)
                .map_err(|source| OsmImportError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?;
        match event {
            Event::Eof => break,
            Event::Start(start) => {
                let element =
                    RawElement::from_start(&start).map_err(|source| OsmImportError::Parse {
                        path: path.to_path_buf(),
                        source,
                    })?;
                if builder.is_open() {
                    builder.push_child(element);
                } else if is_top_level(element.name()) {
                    builder.begin(element);
                }
            }
            Event::Empty(start) => {
                let element =
                    RawElement::from_start(&start).map_err(|source| OsmImportError::Parse {
                        path: path.to_path_buf(),
                        source,
                    })?;
                if builder.is_open() {
                    builder.push_child(element);
                } else if is_top_level(element.name()) {
                    stream.dispatch(sink, &element, &[]);
                }
            }
            Event::End(end) => {
                if builder.closes(end.name().as_ref())
                    && let Some((element, children)) = builder.finish()
                {
                    stream.dispatch(sink, &element, &children);
                }
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(stream.into_summary(sink))
}

fn is_top_level(name: &str) -> bool {
    matches!(name, "node" | "way" | "relation")
}

struct StreamState<'a> {
    store: &'a RecordStore,
    summary: OsmImportSummary,
    phase_count: u64,
    nodes_flushed: bool,
    ways_flushed: bool,
}

impl<'a> StreamState<'a> {
    fn new(store: &'a RecordStore) -> Self {
        Self {
            store,
            summary: OsmImportSummary::default(),
            phase_count: 0,
            nodes_flushed: false,
            ways_flushed: false,
        }
    }

    fn dispatch(&mut self, sink: &mut dyn StatusSink, element: &RawElement, children: &[RawElement]) {
        match element.name() {
            "way" if !self.nodes_flushed => {
                self.flush_phase(sink, "nodes");
                self.nodes_flushed = true;
            }
            "relation" if !self.ways_flushed => {
                self.flush_phase(sink, "ways");
                self.ways_flushed = true;
            }
            _ => {}
        }

        let outcome = match element.name() {
            "node" => self.import_node(element, children),
            "way" => self.import_way(element, children),
            "relation" => self.import_relation(element, children),
            _ => return,
        };

        match outcome {
            Ok(()) => self.phase_count += 1,
            Err(detail) => {
                let id = element.attribute("id").unwrap_or("?");
                error!("failed to import {} {id}: {detail}", element.name());
                self.summary.errors += 1;
                sink.record_error();
            }
        }
    }

    fn flush_phase(&mut self, sink: &mut dyn StatusSink, phase: &str) {
        info!("{} {phase} imported", self.phase_count);
        sink.checkpoint(self.phase_count);
        self.phase_count = 0;
    }

    fn into_summary(self, sink: &mut dyn StatusSink) -> OsmImportSummary {
        sink.checkpoint(self.phase_count);
        info!(
            "OSM import finished: {} nodes, {} ways, {} relations, {} tags, {} members ({} errors)",
            self.summary.nodes,
            self.summary.ways,
            self.summary.relations,
            self.summary.tags,
            self.summary.members,
            self.summary.errors,
        );
        self.summary
    }

    fn import_node(&mut self, element: &RawElement, children: &[RawElement]) -> Result<(), ElementError> {
        let id = required_attribute::<i64>(element, "id")?;
        let latitude = required_attribute::<f64>(element, "lat")?;
        let longitude = required_attribute::<f64>(element, "lon")?;
        self.store.upsert_point(id, latitude, longitude)?;

        let mut tags = 0u64;
        for child in children.iter().filter(|child| child.name() == "tag") {
            tags += u64::from(self.import_tag(child, id, EntityKind::Point)?);
        }
        if tags > 0 {
            debug!("imported {tags} tags for node {id}");
        }
        self.summary.nodes += 1;
        self.summary.tags += tags;
        Ok(())
    }

    fn import_way(&mut self, element: &RawElement, children: &[RawElement]) -> Result<(), ElementError> {
        let id = required_attribute::<i64>(element, "id")?;
        self.store.upsert_way(id)?;

        let mut tags = 0u64;
        let mut nodes = 0u64;
        for child in children {
            match child.name() {
                "nd" => {
                    let Some(reference) = child.attribute("ref").and_then(parse_integer) else {
                        debug!("way {id} carries an nd child without a numeric ref");
                        continue;
                    };
                    if !self.store.attach_way_reference(reference, id)? {
                        debug!("node {reference} referenced by way {id} is not stored");
                    }
                    nodes += 1;
                }
                "tag" => tags += u64::from(self.import_tag(child, id, EntityKind::Way)?),
                _ => {}
            }
        }
        if tags > 0 || nodes > 0 {
            debug!("imported {tags} tags and {nodes} node references for way {id}");
        }
        self.summary.ways += 1;
        self.summary.tags += tags;
        Ok(())
    }

    fn import_relation(
        &mut self,
        element: &RawElement,
        children: &[RawElement],
    ) -> Result<(), ElementError> {
        let id = required_attribute::<i64>(element, "id")?;
        let role = element.attribute("role").unwrap_or("");
        self.store.upsert_relation(id, role)?;

        let mut tags = 0u64;
        let mut members = 0u64;
        for child in children {
            match child.name() {
                "tag" => tags += u64::from(self.import_tag(child, id, EntityKind::Relation)?),
                "member" => {
                    self.import_member(child, id)?;
                    members += 1;
                }
                _ => {}
            }
        }
        debug!("imported {tags} tags and {members} members for relation {id}");
        self.summary.relations += 1;
        self.summary.tags += tags;
        self.summary.members += members;
        Ok(())
    }

    fn import_member(&self, child: &RawElement, relation_id: i64) -> Result<(), ElementError> {
        let kind = match child.attribute("type") {
            Some("node") => EntityKind::Point,
            Some("way") => EntityKind::Way,
            Some("relation") => EntityKind::Relation,
            _ => {
                debug!("relation {relation_id} carries a member of unknown type");
                return Ok(());
            }
        };
        let Some(reference) = child.attribute("ref").and_then(parse_integer) else {
            debug!("relation {relation_id} carries a member without a numeric ref");
            return Ok(());
        };
        let role = child.attribute("role").unwrap_or("");
        if !self
            .store
            .attach_relation_member(kind, reference, relation_id, role)?
        {
            debug!(
                "{} {reference} referenced by relation {relation_id} is not stored",
                kind.as_str()
            );
        }
        Ok(())
    }

    /// Persist one `tag` child when the classifier retains its key.
    /// Returns whether a row was written.
    fn import_tag(
        &self,
        child: &RawElement,
        reference: i64,
        kind: EntityKind,
    ) -> Result<bool, ElementError> {
        let Some(key) = child.attribute("k") else {
            return Ok(false);
        };
        if is_foreign_language_variant(key) {
            return Ok(false);
        }
        let value = child.attribute("v").unwrap_or("");
        self.store.insert_tag(reference, kind, key, value)?;
        Ok(true)
    }
}

fn required_attribute<T: std::str::FromStr>(
    element: &RawElement,
    name: &'static str,
) -> Result<T, ElementError> {
    let value = element
        .attribute(name)
        .ok_or(ElementError::MissingAttribute { name })?;
    value.parse().map_err(|_| ElementError::InvalidNumber {
        name,
        value: value.to_owned(),
    })
}

fn parse_integer(value: &str) -> Option<i64> {
    value.parse().ok()
}
