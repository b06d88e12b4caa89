use std::collections::{BTreeMap, HashMap, HashSet};
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags, params};
use serde::Serialize;

use crate::types::{MemberId, MemberRecord};
use crate::utils::MemberFilter;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Member {0} appears more than once in the input")]
    DuplicateMember(MemberId),
    #[error("Database already holds {0} members; loading requires a fresh database")]
    NotEmpty(usize),
    #[error("Failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

const SCHEMA: &str = "
    CREATE TABLE national_parties (
        party_id INTEGER NOT NULL PRIMARY KEY,
        party    TEXT NOT NULL,
        country  TEXT NOT NULL,
        CONSTRAINT unique_national_parties UNIQUE (party, country)
    );

    CREATE TABLE members (
        member_id   INTEGER NOT NULL PRIMARY KEY,
        name        TEXT NOT NULL,
        eu_fraction TEXT NOT NULL,
        party_id    INTEGER NOT NULL REFERENCES national_parties(party_id)
    );

    CREATE TABLE emails (
        member_id INTEGER REFERENCES members(member_id),
        email     TEXT NOT NULL,
        CONSTRAINT unique_emails UNIQUE (member_id, email)
    );

    CREATE TABLE roles (
        member_id INTEGER REFERENCES members(member_id),
        role      TEXT NOT NULL,
        committee TEXT NOT NULL
    );
";

/// A row of `national_parties`, with its synthetic id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NationalParty {
    pub id: i64,
    pub party: String,
    pub country: String,
}

/// Rows actually written by [`MemberStore::load`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadStats {
    pub parties: usize,
    pub members: usize,
    pub emails: usize,
    pub roles: usize,
}

impl std::fmt::Display for LoadStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\nStatistics:")?;
        writeln!(f, "  National parties: {}", self.parties)?;
        writeln!(f, "  Members:          {}", self.members)?;
        writeln!(f, "  Emails:           {}", self.emails)?;
        writeln!(f, "  Roles:            {}", self.roles)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnSchema {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "PrimaryKey")]
    pub primary_key: bool,
    #[serde(rename = "Type")]
    pub column_type: String,
    #[serde(rename = "Null")]
    pub nullable: bool,
    #[serde(rename = "Default")]
    pub default: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSchema {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Columns")]
    pub columns: BTreeMap<String, ColumnSchema>,
}

pub type DatabaseSchema = BTreeMap<String, TableSchema>;

/// Resolves the party table from the records.
///
/// Each distinct party string gets the country of the last record naming it.
/// Ids are handed out from 1 in sorted party order, so the same input always
/// yields the same ids.
pub fn national_parties(records: &[MemberRecord]) -> Vec<NationalParty> {
    let mut country_of_party: BTreeMap<&str, &str> = BTreeMap::new();

    for record in records {
        if let Some(previous) =
            country_of_party.insert(&record.national_party, &record.country)
            && previous != record.country
        {
            log::warn!(
                "Party '{}' listed under both '{}' and '{}', keeping '{}'",
                record.national_party,
                previous,
                record.country,
                record.country
            );
        }
    }

    country_of_party
        .into_iter()
        .zip(1..)
        .map(|((party, country), id)| NationalParty {
            id,
            party: party.to_string(),
            country: country.to_string(),
        })
        .collect()
}

fn check_unique_ids(records: &[MemberRecord]) -> Result<(), StoreError> {
    let mut seen = HashSet::with_capacity(records.len());
    for record in records {
        if !seen.insert(record.id) {
            return Err(StoreError::DuplicateMember(record.id));
        }
    }
    Ok(())
}

/// `<path>.partial`, where a database is built before it is moved into place.
fn staging_path(path: &Path) -> PathBuf {
    let mut staging = OsString::from(path.as_os_str());
    staging.push(".partial");
    PathBuf::from(staging)
}

fn remove_file(path: &Path) -> Result<(), StoreError> {
    fs::remove_file(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub struct MemberStore {
    conn: Connection,
}

impl MemberStore {
    /// Builds a complete database at `path` from `records`.
    ///
    /// The database is written to a staging file next to `path` and renamed
    /// over `path` only after the load has committed. On any error the
    /// staging file is removed and whatever was at `path` is left untouched.
    pub fn build(path: &Path, records: &[MemberRecord]) -> Result<LoadStats, StoreError> {
        check_unique_ids(records)?;

        let staging = staging_path(path);
        if staging.exists() {
            log::warn!("Removing stale '{}'", staging.display());
            remove_file(&staging)?;
        }

        log::info!("Initializing database '{}'", path.display());
        let result = Self::create(&staging)
            .and_then(|mut store| store.load(records))
            .and_then(|stats| {
                fs::rename(&staging, path)
                    .map(|()| stats)
                    .map_err(|source| StoreError::Io {
                        path: path.to_path_buf(),
                        source,
                    })
            });

        if result.is_err()
            && staging.exists()
            && let Err(e) = remove_file(&staging)
        {
            log::warn!("{}", e);
        }
        result
    }

    fn create(path: &Path) -> Result<Self, StoreError> {
        let store = Self::from_connection(Connection::open(path)?)?;
        store.init_schema()?;
        Ok(store)
    }

    /// Opens an existing database read-only.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Self::from_connection(conn)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        let store = Self::from_connection(Connection::open_in_memory()?)?;
        store.init_schema()?;
        Ok(store)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { conn })
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Writes all records in a single transaction.
    ///
    /// Nothing is committed unless every insert succeeds: the transaction
    /// rolls back when dropped on an error path.
    pub fn load(&mut self, records: &[MemberRecord]) -> Result<LoadStats, StoreError> {
        check_unique_ids(records)?;

        let parties = national_parties(records);
        let party_ids: HashMap<&str, i64> =
            parties.iter().map(|p| (p.party.as_str(), p.id)).collect();

        log::info!(
            "Loading {} members and {} national parties",
            records.len(),
            parties.len()
        );

        let tx = self.conn.transaction()?;

        let existing: i64 = tx.query_row("SELECT COUNT(*) FROM members", [], |row| row.get(0))?;
        if existing > 0 {
            return Err(StoreError::NotEmpty(existing as usize));
        }

        let mut stats = LoadStats::default();
        {
            let mut insert_party = tx.prepare(
                "INSERT OR IGNORE INTO national_parties (party_id, party, country) VALUES (?1, ?2, ?3)",
            )?;
            let mut insert_member = tx.prepare(
                "INSERT INTO members (member_id, name, eu_fraction, party_id) VALUES (?1, ?2, ?3, ?4)",
            )?;
            let mut insert_email =
                tx.prepare("INSERT OR IGNORE INTO emails (member_id, email) VALUES (?1, ?2)")?;
            let mut insert_role = tx.prepare(
                "INSERT INTO roles (member_id, role, committee) VALUES (?1, ?2, ?3)",
            )?;

            for party in &parties {
                stats.parties +=
                    insert_party.execute(params![party.id, party.party, party.country])?;
            }

            for record in records {
                let party_id = party_ids[record.national_party.as_str()];
                stats.members += insert_member.execute(params![
                    record.id,
                    record.name,
                    record.eu_fraction,
                    party_id
                ])?;

                for email in &record.emails {
                    stats.emails += insert_email.execute(params![record.id, email])?;
                }

                for (role, committees) in &record.roles {
                    for committee in committees {
                        stats.roles += insert_role.execute(params![record.id, role, committee])?;
                    }
                }
            }
        }

        tx.commit()?;
        log::info!("Committed {} members", stats.members);
        Ok(stats)
    }

    /// Describes every table the way `PRAGMA table_info` reports it.
    pub fn schema(&self) -> Result<DatabaseSchema, StoreError> {
        let mut tables_stmt = self
            .conn
            .prepare("SELECT tbl_name FROM sqlite_master WHERE type = 'table' ORDER BY tbl_name")?;
        let tables = tables_stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut columns_stmt = self.conn.prepare(
            "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1) ORDER BY cid",
        )?;

        let mut schema = DatabaseSchema::new();
        for table in tables {
            let columns = columns_stmt
                .query_map([&table], |row| {
                    Ok(ColumnSchema {
                        name: row.get(0)?,
                        column_type: row.get(1)?,
                        nullable: row.get::<_, i64>(2)? == 0,
                        default: row.get(3)?,
                        primary_key: row.get::<_, i64>(4)? > 0,
                    })
                })?
                .map(|column| column.map(|c| (c.name.clone(), c)))
                .collect::<Result<BTreeMap<_, _>, _>>()?;

            schema.insert(
                table.clone(),
                TableSchema {
                    name: table,
                    columns,
                },
            );
        }

        Ok(schema)
    }

    /// Builds a `mailto:` link addressing the first email of every member
    /// matching `filter`. Members without an email are left out; `None` when
    /// nobody is left.
    pub fn mailto_link(&self, filter: &MemberFilter) -> Result<Option<String>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT (SELECT e.email FROM emails e
                     WHERE e.member_id = m.member_id
                     ORDER BY e.rowid LIMIT 1)
             FROM members m
             JOIN national_parties p ON p.party_id = m.party_id
             WHERE (?1 IS NULL OR p.country = ?1)
               AND (?2 IS NULL OR p.party = ?2)
               AND (?3 IS NULL OR TRIM(m.eu_fraction) = ?3)
             ORDER BY m.member_id",
        )?;

        let emails = stmt
            .query_map(
                params![filter.country, filter.party, filter.eu_fraction],
                |row| row.get::<_, Option<String>>(0),
            )?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .flatten()
            .collect::<Vec<_>>();

        if emails.is_empty() {
            return Ok(None);
        }
        Ok(Some(format!("mailto:{}", emails.join(","))))
    }
}
