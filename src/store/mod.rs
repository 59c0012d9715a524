#![forbid(unsafe_code)]
//! SQLite-backed record store for imported geodata entities.
//!
//! Writes are idempotent by external identifier so an interrupted run can be
//! repeated without hard failures: coordinate upserts refresh the row while
//! leaving previously attached parent references untouched, and parent
//! attachment is a blind try-update that reports found/not-found instead of
//! erroring on a missing target.

mod schema;

pub use schema::{SCHEMA_VERSION, SchemaError, initialise_schema};

use std::path::{Path, PathBuf};

use rusqlite::{Connection, Error as SqliteError, OptionalExtension, params};
use thiserror::Error;

/// Discriminates which entity table a tag row or sweep applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    /// An OSM node.
    Point,
    /// An OSM way.
    Way,
    /// An OSM relation.
    Relation,
}

impl EntityKind {
    /// Stable discriminator stored in the `owner_kind` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Point => "point",
            Self::Way => "way",
            Self::Relation => "relation",
        }
    }

    pub(crate) const fn table(self) -> &'static str {
        match self {
            Self::Point => "points",
            Self::Way => "ways",
            Self::Relation => "relations",
        }
    }
}

/// A node extracted from the OSM stream, as stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    /// External OSM identifier.
    pub id: i64,
    /// Latitude in WGS84 degrees.
    pub latitude: f64,
    /// Longitude in WGS84 degrees.
    pub longitude: f64,
    /// Identifier of the owning way, when a way claimed this point.
    pub way_reference: Option<i64>,
    /// Identifier of the owning relation, when a relation claimed this point.
    pub relation_reference: Option<i64>,
    /// Membership role assigned by the owning relation.
    pub role: Option<String>,
}

/// A way extracted from the OSM stream, as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Way {
    /// External OSM identifier.
    pub id: i64,
    /// Identifier of the owning relation, when a relation claimed this way.
    pub relation_reference: Option<i64>,
    /// Membership role assigned by the owning relation.
    pub role: Option<String>,
}

/// A relation extracted from the OSM stream, as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    /// External OSM identifier.
    pub id: i64,
    /// Role this relation plays when itself a member of a parent relation.
    pub role: String,
    /// Identifier of the parent relation, enabling nesting.
    pub relation_reference: Option<i64>,
}

/// One record of the GeoNames gazetteer dump.
#[derive(Debug, Clone, PartialEq)]
pub struct Geoname {
    /// GeoNames identifier.
    pub id: i64,
    /// Primary name.
    pub name: String,
    /// Name restricted to ASCII characters.
    pub ascii_name: String,
    /// Comma-separated alternate names.
    pub alternate_names: String,
    /// Latitude in WGS84 degrees.
    pub latitude: f64,
    /// Longitude in WGS84 degrees.
    pub longitude: f64,
    /// Feature class letter.
    pub feature_class: String,
    /// Feature code within the class.
    pub feature_code: String,
    /// Alternate country codes.
    pub cc2: String,
    /// First-level administrative subdivision code.
    pub admin1: String,
    /// Second-level administrative subdivision code.
    pub admin2: String,
    /// Third-level administrative subdivision code.
    pub admin3: String,
    /// Fourth-level administrative subdivision code.
    pub admin4: String,
    /// Population count.
    pub population: i64,
    /// Elevation in metres; zero when the dump value was unparsable.
    pub elevation: i64,
    /// Digital elevation model value.
    pub digital_elevation: String,
    /// IANA timezone identifier.
    pub timezone: String,
    /// Date of last modification in the dump.
    pub modified_on: String,
}

/// One row of the GeoNames feature-code lookup table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureCode {
    /// Composite class.code key.
    pub code: String,
    /// Short name of the feature type.
    pub name: String,
    /// Longer description of the feature type.
    pub description: String,
}

/// Errors raised by the record store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Opening the SQLite database failed.
    #[error("failed to open SQLite database at {path:?}")]
    Open {
        /// Database path that could not be opened.
        path: PathBuf,
        /// Source error returned by `rusqlite`.
        #[source]
        source: SqliteError,
    },
    /// Initialising the schema failed.
    #[error(transparent)]
    Schema(#[from] SchemaError),
    /// A statement failed to execute.
    #[error("failed to {operation}")]
    Sqlite {
        /// Description of the failing operation.
        operation: &'static str,
        /// Source error returned by `rusqlite`.
        #[source]
        source: SqliteError,
    },
}

/// Persistence facade over a single SQLite connection.
#[derive(Debug)]
pub struct RecordStore {
    connection: Connection,
}

impl RecordStore {
    /// Open (or create) a store at the supplied path and initialise its
    /// schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let connection = Connection::open(path).map_err(|source| StoreError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Self::initialised(connection)
    }

    /// Open an in-memory store, mainly for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let connection = Connection::open_in_memory().map_err(|source| StoreError::Open {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        Self::initialised(connection)
    }

    fn initialised(mut connection: Connection) -> Result<Self, StoreError> {
        schema::initialise_schema(&mut connection)?;
        Ok(Self { connection })
    }

    pub(crate) fn connection_mut(&mut self) -> &mut Connection {
        &mut self.connection
    }

    /// Create or refresh a point. Parent references attached by an earlier
    /// run survive the upsert.
    pub fn upsert_point(&self, id: i64, latitude: f64, longitude: f64) -> Result<(), StoreError> {
        self.connection
            .prepare_cached(
                "INSERT INTO points (id, latitude, longitude) VALUES (?1, ?2, ?3)
                    ON CONFLICT(id) DO UPDATE SET
                        latitude = excluded.latitude,
                        longitude = excluded.longitude",
            )
            .and_then(|mut statement| statement.execute(params![id, latitude, longitude]))
            .map(|_| ())
            .map_err(|source| StoreError::Sqlite {
                operation: "upsert point",
                source,
            })
    }

    /// Create a way if it does not already exist.
    pub fn upsert_way(&self, id: i64) -> Result<(), StoreError> {
        self.connection
            .prepare_cached("INSERT OR IGNORE INTO ways (id) VALUES (?1)")
            .and_then(|mut statement| statement.execute([id]))
            .map(|_| ())
            .map_err(|source| StoreError::Sqlite {
                operation: "upsert way",
                source,
            })
    }

    /// Create or refresh a relation together with its own membership role.
    pub fn upsert_relation(&self, id: i64, role: &str) -> Result<(), StoreError> {
        self.connection
            .prepare_cached(
                "INSERT INTO relations (id, role) VALUES (?1, ?2)
                    ON CONFLICT(id) DO UPDATE SET role = excluded.role",
            )
            .and_then(|mut statement| statement.execute(params![id, role]))
            .map(|_| ())
            .map_err(|source| StoreError::Sqlite {
                operation: "upsert relation",
                source,
            })
    }

    /// Record a tag owned by the given entity. Keys are not unique per
    /// entity; repeated inserts add further rows.
    pub fn insert_tag(
        &self,
        reference: i64,
        kind: EntityKind,
        key: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        self.connection
            .prepare_cached(
                "INSERT INTO tags (reference, owner_kind, key, value) VALUES (?1, ?2, ?3, ?4)",
            )
            .and_then(|mut statement| statement.execute(params![reference, kind.as_str(), key, value]))
            .map(|_| ())
            .map_err(|source| StoreError::Sqlite {
                operation: "insert tag",
                source,
            })
    }

    /// Attach a point to its owning way. Returns whether the point existed;
    /// a missing point is a no-op, not an error.
    pub fn attach_way_reference(&self, point_id: i64, way_id: i64) -> Result<bool, StoreError> {
        self.connection
            .prepare_cached("UPDATE points SET way_reference = ?2 WHERE id = ?1")
            .and_then(|mut statement| statement.execute(params![point_id, way_id]))
            .map(|rows| rows > 0)
            .map_err(|source| StoreError::Sqlite {
                operation: "attach way reference",
                source,
            })
    }

    /// Attach an entity to its owning relation with the declared role.
    /// Returns whether the member existed; last write wins when an entity is
    /// claimed by two parents.
    pub fn attach_relation_member(
        &self,
        kind: EntityKind,
        member_id: i64,
        relation_id: i64,
        role: &str,
    ) -> Result<bool, StoreError> {
        let sql = match kind {
            EntityKind::Point => {
                "UPDATE points SET relation_reference = ?2, role = ?3 WHERE id = ?1"
            }
            EntityKind::Way => "UPDATE ways SET relation_reference = ?2, role = ?3 WHERE id = ?1",
            EntityKind::Relation => {
                "UPDATE relations SET relation_reference = ?2, role = ?3 WHERE id = ?1"
            }
        };
        self.connection
            .prepare_cached(sql)
            .and_then(|mut statement| statement.execute(params![member_id, relation_id, role]))
            .map(|rows| rows > 0)
            .map_err(|source| StoreError::Sqlite {
                operation: "attach relation member",
                source,
            })
    }

    /// Create or refresh a GeoNames record.
    pub fn upsert_geoname(&self, geoname: &Geoname) -> Result<(), StoreError> {
        self.connection
            .prepare_cached(
                "INSERT OR REPLACE INTO geonames (
                    id, name, ascii_name, alternate_names, latitude, longitude,
                    feature_class, feature_code, cc2, admin1, admin2, admin3,
                    admin4, population, elevation, digital_elevation, timezone,
                    modified_on
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
            )
            .and_then(|mut statement| {
                statement.execute(params![
                    geoname.id,
                    geoname.name,
                    geoname.ascii_name,
                    geoname.alternate_names,
                    geoname.latitude,
                    geoname.longitude,
                    geoname.feature_class,
                    geoname.feature_code,
                    geoname.cc2,
                    geoname.admin1,
                    geoname.admin2,
                    geoname.admin3,
                    geoname.admin4,
                    geoname.population,
                    geoname.elevation,
                    geoname.digital_elevation,
                    geoname.timezone,
                    geoname.modified_on,
                ])
            })
            .map(|_| ())
            .map_err(|source| StoreError::Sqlite {
                operation: "upsert geoname",
                source,
            })
    }

    /// Create or refresh a feature-code lookup row.
    pub fn upsert_feature_code(&self, feature: &FeatureCode) -> Result<(), StoreError> {
        self.connection
            .prepare_cached(
                "INSERT OR REPLACE INTO feature_codes (code, name, description)
                    VALUES (?1, ?2, ?3)",
            )
            .and_then(|mut statement| {
                statement.execute(params![feature.code, feature.name, feature.description])
            })
            .map(|_| ())
            .map_err(|source| StoreError::Sqlite {
                operation: "upsert feature code",
                source,
            })
    }

    /// Look up a point by id.
    pub fn point(&self, id: i64) -> Result<Option<Point>, StoreError> {
        self.connection
            .query_row(
                "SELECT id, latitude, longitude, way_reference, relation_reference, role
                    FROM points WHERE id = ?1",
                [id],
                |row| {
                    Ok(Point {
                        id: row.get(0)?,
                        latitude: row.get(1)?,
                        longitude: row.get(2)?,
                        way_reference: row.get(3)?,
                        relation_reference: row.get(4)?,
                        role: row.get(5)?,
                    })
                },
            )
            .optional()
            .map_err(|source| StoreError::Sqlite {
                operation: "read point",
                source,
            })
    }

    /// Look up a way by id.
    pub fn way(&self, id: i64) -> Result<Option<Way>, StoreError> {
        self.connection
            .query_row(
                "SELECT id, relation_reference, role FROM ways WHERE id = ?1",
                [id],
                |row| {
                    Ok(Way {
                        id: row.get(0)?,
                        relation_reference: row.get(1)?,
                        role: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(|source| StoreError::Sqlite {
                operation: "read way",
                source,
            })
    }

    /// Look up a relation by id.
    pub fn relation(&self, id: i64) -> Result<Option<Relation>, StoreError> {
        self.connection
            .query_row(
                "SELECT id, role, relation_reference FROM relations WHERE id = ?1",
                [id],
                |row| {
                    Ok(Relation {
                        id: row.get(0)?,
                        role: row.get(1)?,
                        relation_reference: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(|source| StoreError::Sqlite {
                operation: "read relation",
                source,
            })
    }

    /// Tags owned by the given entity, as key/value pairs in insertion order.
    pub fn tags_for(&self, kind: EntityKind, id: i64) -> Result<Vec<(String, String)>, StoreError> {
        let mut statement = self
            .connection
            .prepare_cached(
                "SELECT key, value FROM tags
                    WHERE reference = ?1 AND owner_kind = ?2 ORDER BY id",
            )
            .map_err(|source| StoreError::Sqlite {
                operation: "read tags",
                source,
            })?;
        let rows = statement
            .query_map(params![id, kind.as_str()], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .map_err(|source| StoreError::Sqlite {
                operation: "read tags",
                source,
            })?;
        let mut tags = Vec::new();
        for row in rows {
            tags.push(row.map_err(|source| StoreError::Sqlite {
                operation: "read tags",
                source,
            })?);
        }
        Ok(tags)
    }

    /// Number of stored entities of the given kind.
    pub fn entity_count(&self, kind: EntityKind) -> Result<u64, StoreError> {
        let count: i64 = self
            .connection
            .query_row(
                match kind {
                    EntityKind::Point => "SELECT COUNT(*) FROM points",
                    EntityKind::Way => "SELECT COUNT(*) FROM ways",
                    EntityKind::Relation => "SELECT COUNT(*) FROM relations",
                },
                [],
                |row| row.get(0),
            )
            .map_err(|source| StoreError::Sqlite {
                operation: "count entities",
                source,
            })?;
        Ok(count.unsigned_abs())
    }

    /// Look up a GeoNames record by id.
    pub fn geoname(&self, id: i64) -> Result<Option<Geoname>, StoreError> {
        self.connection
            .query_row(
                "SELECT id, name, ascii_name, alternate_names, latitude, longitude,
                        feature_class, feature_code, cc2, admin1, admin2, admin3,
                        admin4, population, elevation, digital_elevation, timezone,
                        modified_on
                    FROM geonames WHERE id = ?1",
                [id],
                |row| {
                    Ok(Geoname {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        ascii_name: row.get(2)?,
                        alternate_names: row.get(3)?,
                        latitude: row.get(4)?,
                        longitude: row.get(5)?,
                        feature_class: row.get(6)?,
                        feature_code: row.get(7)?,
                        cc2: row.get(8)?,
                        admin1: row.get(9)?,
                        admin2: row.get(10)?,
                        admin3: row.get(11)?,
                        admin4: row.get(12)?,
                        population: row.get(13)?,
                        elevation: row.get(14)?,
                        digital_elevation: row.get(15)?,
                        timezone: row.get(16)?,
                        modified_on: row.get(17)?,
                    })
                },
            )
            .optional()
            .map_err(|source| StoreError::Sqlite {
                operation: "read geoname",
                source,
            })
    }

    /// Look up a feature-code row by its key.
    pub fn feature_code(&self, code: &str) -> Result<Option<FeatureCode>, StoreError> {
        self.connection
            .query_row(
                "SELECT code, name, description FROM feature_codes WHERE code = ?1",
                [code],
                |row| {
                    Ok(FeatureCode {
                        code: row.get(0)?,
                        name: row.get(1)?,
                        description: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(|source| StoreError::Sqlite {
                operation: "read feature code",
                source,
            })
    }
}
