#![forbid(unsafe_code)]
//! Batched removal of unnamed, unreferenced entities after an import.
//!
//! An OSM extract carries far more geometry than a gazetteer needs; once
//! parent references are attached, anything that is neither named nor owned
//! by a surviving parent is dead weight. The sweep deletes in fixed-size
//! batches, each inside its own transaction, so an interrupted run leaves
//! the store consistent and simply resumes on the next invocation.

use log::info;
use rusqlite::{Transaction, params};
use thiserror::Error;

use crate::{
    store::{EntityKind, RecordStore, StoreError},
    tags::NAME_KEYS,
};

/// Maximum rows deleted per transaction.
pub const BATCH_SIZE: usize = 1000;

/// Rows removed by a cleanup run, per entity table.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupSummary {
    /// Points deleted, including those cascaded from parents.
    pub points: u64,
    /// Ways deleted, including those cascaded from relations.
    pub ways: u64,
    /// Relations deleted.
    pub relations: u64,
}

impl CleanupSummary {
    /// Total rows deleted across all entity tables.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.points + self.ways + self.relations
    }
}

/// Errors raised by the cleanup sweep.
#[derive(Debug, Error)]
pub enum CleanupError {
    /// A batch transaction could not be opened or committed.
    #[error("failed to {operation} cleanup batch")]
    Batch {
        /// Description of the failing step.
        operation: &'static str,
        /// Source error returned by `rusqlite`.
        #[source]
        source: rusqlite::Error,
    },
    /// A statement inside a batch failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Delete every entity that carries no retained name and is not referenced
/// by a surviving parent, sweeping points, then ways, then relations.
///
/// Deleting a way or relation cascades to the member rows it owns and to
/// the tags of everything removed. Nested member relations are detached by
/// the parent sweep order rather than deleted recursively.
pub fn clean_unreferenced_entities(
    store: &mut RecordStore,
) -> Result<CleanupSummary, CleanupError> {
    let mut summary = CleanupSummary::default();
    sweep(store, EntityKind::Point, &mut summary)?;
    sweep(store, EntityKind::Way, &mut summary)?;
    sweep(store, EntityKind::Relation, &mut summary)?;
    info!(
        "cleanup removed {} points, {} ways and {} relations",
        summary.points, summary.ways, summary.relations
    );
    Ok(summary)
}

fn sweep(
    store: &mut RecordStore,
    kind: EntityKind,
    summary: &mut CleanupSummary,
) -> Result<(), CleanupError> {
    let candidate_sql = candidate_sql(kind);
    loop {
        let transaction =
            store
                .connection_mut()
                .transaction()
                .map_err(|source| CleanupError::Batch {
                    operation: "open",
                    source,
                })?;
        let batch = candidate_batch(&transaction, &candidate_sql)?;
        if batch.is_empty() {
            break;
        }
        for id in &batch {
            delete_entity(&transaction, kind, *id, summary)?;
        }
        transaction.commit().map_err(|source| CleanupError::Batch {
            operation: "commit",
            source,
        })?;
    }
    Ok(())
}

/// Candidates are unnamed rows with no surviving parent reference. Points
/// can be owned by either a way or a relation; ways and relations only by a
/// relation.
fn candidate_sql(kind: EntityKind) -> String {
    let retained = NAME_KEYS
        .iter()
        .map(|key| format!("'{key}'"))
        .collect::<Vec<_>>()
        .join(", ");
    let orphan_filter = match kind {
        EntityKind::Point => "way_reference IS NULL AND relation_reference IS NULL",
        EntityKind::Way | EntityKind::Relation => "relation_reference IS NULL",
    };
    format!(
        "SELECT id FROM {table} WHERE {orphan_filter}
            AND NOT EXISTS (
                SELECT 1 FROM tags
                    WHERE tags.reference = {table}.id
                    AND tags.owner_kind = '{owner}'
                    AND tags.key IN ({retained})
            )
            LIMIT {BATCH_SIZE}",
        table = kind.table(),
        owner = kind.as_str(),
    )
}

fn candidate_batch(transaction: &Transaction<'_>, sql: &str) -> Result<Vec<i64>, StoreError> {
    let mut statement = transaction
        .prepare(sql)
        .map_err(|source| StoreError::Sqlite {
            operation: "select cleanup candidates",
            source,
        })?;
    let rows = statement
        .query_map([], |row| row.get(0))
        .map_err(|source| StoreError::Sqlite {
            operation: "select cleanup candidates",
            source,
        })?;
    let mut batch = Vec::new();
    for row in rows {
        batch.push(row.map_err(|source| StoreError::Sqlite {
            operation: "select cleanup candidates",
            source,
        })?);
    }
    Ok(batch)
}

fn delete_entity(
    transaction: &Transaction<'_>,
    kind: EntityKind,
    id: i64,
    summary: &mut CleanupSummary,
) -> Result<(), StoreError> {
    match kind {
        EntityKind::Point => {}
        EntityKind::Way => {
            summary.points += cascade_members(transaction, EntityKind::Point, "way_reference", id)?;
        }
        EntityKind::Relation => {
            summary.points +=
                cascade_members(transaction, EntityKind::Point, "relation_reference", id)?;
            summary.ways +=
                cascade_members(transaction, EntityKind::Way, "relation_reference", id)?;
        }
    }

    delete_tags_of(transaction, kind, &format!("reference = {id}"))?;
    execute(
        transaction,
        &format!("DELETE FROM {} WHERE id = ?1", kind.table()),
        id,
        "delete entity",
    )?;
    match kind {
        EntityKind::Point => summary.points += 1,
        EntityKind::Way => summary.ways += 1,
        EntityKind::Relation => summary.relations += 1,
    }
    Ok(())
}

/// Delete the member rows a parent owns, tags first, and report how many
/// member rows went.
fn cascade_members(
    transaction: &Transaction<'_>,
    member: EntityKind,
    parent_column: &str,
    parent_id: i64,
) -> Result<u64, StoreError> {
    delete_tags_of(
        transaction,
        member,
        &format!(
            "reference IN (SELECT id FROM {table} WHERE {parent_column} = {parent_id})",
            table = member.table(),
        ),
    )?;
    let deleted = transaction
        .execute(
            &format!(
                "DELETE FROM {} WHERE {parent_column} = ?1",
                member.table()
            ),
            [parent_id],
        )
        .map_err(|source| StoreError::Sqlite {
            operation: "cascade member rows",
            source,
        })?;
    Ok(u64::try_from(deleted).unwrap_or(u64::MAX))
}

fn delete_tags_of(
    transaction: &Transaction<'_>,
    kind: EntityKind,
    reference_filter: &str,
) -> Result<(), StoreError> {
    transaction
        .execute(
            &format!(
                "DELETE FROM tags WHERE owner_kind = '{owner}' AND {reference_filter}",
                owner = kind.as_str(),
            ),
            [],
        )
        .map(|_| ())
        .map_err(|source| StoreError::Sqlite {
            operation: "delete tags",
            source,
        })
}

fn execute(
    transaction: &Transaction<'_>,
    sql: &str,
    id: i64,
    operation: &'static str,
) -> Result<(), StoreError> {
    transaction
        .execute(sql, params![id])
        .map(|_| ())
        .map_err(|source| StoreError::Sqlite { operation, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn store() -> RecordStore {
        RecordStore::open_in_memory().expect("open in-memory store")
    }

    fn named(store: &RecordStore, kind: EntityKind, id: i64, name: &str) {
        store
            .insert_tag(id, kind, "name", name)
            .expect("insert name tag");
    }

    #[rstest]
    fn unnamed_orphan_point_is_removed(mut store: RecordStore) {
        store.upsert_point(1, 0.0, 0.0).expect("insert point");
        store
            .insert_tag(1, EntityKind::Point, "highway", "crossing")
            .expect("insert tag");

        let summary = clean_unreferenced_entities(&mut store).expect("cleanup");

        assert_eq!(summary.points, 1);
        assert!(store.point(1).expect("read point").is_none());
        assert!(
            store
                .tags_for(EntityKind::Point, 1)
                .expect("read tags")
                .is_empty(),
            "tags of removed rows must go with them"
        );
    }

    #[rstest]
    fn named_point_survives(mut store: RecordStore) {
        store.upsert_point(1, 0.0, 0.0).expect("insert point");
        named(&store, EntityKind::Point, 1, "Old Oak");

        let summary = clean_unreferenced_entities(&mut store).expect("cleanup");

        assert_eq!(summary.points, 0);
        assert!(store.point(1).expect("read point").is_some());
    }

    #[rstest]
    fn english_name_variant_also_retains(mut store: RecordStore) {
        store.upsert_point(1, 0.0, 0.0).expect("insert point");
        store
            .insert_tag(1, EntityKind::Point, "name:en", "Old Oak")
            .expect("insert tag");

        clean_unreferenced_entities(&mut store).expect("cleanup");

        assert!(store.point(1).expect("read point").is_some());
    }

    #[rstest]
    fn point_owned_by_a_named_way_survives(mut store: RecordStore) {
        store.upsert_point(1, 0.0, 0.0).expect("insert point");
        store.upsert_way(10).expect("insert way");
        named(&store, EntityKind::Way, 10, "High Street");
        store.attach_way_reference(1, 10).expect("attach point");

        let summary = clean_unreferenced_entities(&mut store).expect("cleanup");

        assert_eq!(summary.total(), 0);
        assert!(store.point(1).expect("read point").is_some());
        assert!(store.way(10).expect("read way").is_some());
    }

    #[rstest]
    fn removing_an_unnamed_way_cascades_to_its_points(mut store: RecordStore) {
        store.upsert_point(1, 0.0, 0.0).expect("insert point");
        store.upsert_point(2, 0.0, 1.0).expect("insert point");
        store.upsert_way(10).expect("insert way");
        store.attach_way_reference(1, 10).expect("attach point");
        store.attach_way_reference(2, 10).expect("attach point");
        // Named member points do not protect an unnamed parent.
        named(&store, EntityKind::Point, 1, "Corner Stone");

        let summary = clean_unreferenced_entities(&mut store).expect("cleanup");

        assert_eq!(summary.ways, 1);
        assert!(store.way(10).expect("read way").is_none());
        assert!(
            store.point(1).expect("read point").is_none(),
            "members go with the parent"
        );
        assert!(store.point(2).expect("read point").is_none());
    }

    #[rstest]
    fn removing_an_unnamed_relation_cascades_to_members(mut store: RecordStore) {
        store.upsert_point(1, 0.0, 0.0).expect("insert point");
        store.upsert_way(10).expect("insert way");
        store.upsert_relation(100, "").expect("insert relation");
        store
            .attach_relation_member(EntityKind::Point, 1, 100, "admin_centre")
            .expect("attach point");
        store
            .attach_relation_member(EntityKind::Way, 10, 100, "outer")
            .expect("attach way");

        let summary = clean_unreferenced_entities(&mut store).expect("cleanup");

        assert_eq!(summary.relations, 1);
        assert!(store.relation(100).expect("read relation").is_none());
        assert!(store.point(1).expect("read point").is_none());
        assert!(store.way(10).expect("read way").is_none());
    }

    #[rstest]
    fn second_run_is_a_no_op(mut store: RecordStore) {
        store.upsert_point(1, 0.0, 0.0).expect("insert point");
        store.upsert_way(10).expect("insert way");

        let first = clean_unreferenced_entities(&mut store).expect("first cleanup");
        let second = clean_unreferenced_entities(&mut store).expect("second cleanup");

        assert!(first.total() > 0);
        assert_eq!(second, CleanupSummary::default());
    }

    #[rstest]
    fn sweeps_past_a_full_batch(mut store: RecordStore) {
        for id in 0..(BATCH_SIZE as i64 + 10) {
            store.upsert_point(id, 0.0, 0.0).expect("insert point");
        }

        let summary = clean_unreferenced_entities(&mut store).expect("cleanup");

        assert_eq!(summary.points, BATCH_SIZE as u64 + 10);
        assert_eq!(store.entity_count(EntityKind::Point).expect("count"), 0);
    }
}
