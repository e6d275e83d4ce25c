//! Load genome set, taxonomy and genome annotations from an SQLite file.
//!
//! Access is strictly read-only. The distributed database format is an
//! SQLite file containing exactly one genome set, its taxon forest and its
//! annotated genomes; everything is projected into the arena structures of
//! [`crate::db::models`] up front so no connection is held afterwards.

use std::collections::HashMap;
use std::path::Path;

use log::debug;
use rusqlite::{Connection, OpenFlags};

use crate::db::models::{AnnotatedGenome, ReferenceGenomeSet, Taxon, TaxonId, Taxonomy};
use crate::errors::{GambitError, Result};

/// Open an SQLite genome database file read-only and project its contents.
pub fn load_taxonomy_db(
    path: impl AsRef<Path>,
) -> Result<(ReferenceGenomeSet, Taxonomy, Vec<AnnotatedGenome>)> {
    let conn = Connection::open_with_flags(
        path.as_ref(),
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    load_from_connection(&conn)
}

/// Project the contents of an open genome database connection.
pub fn load_from_connection(
    conn: &Connection,
) -> Result<(ReferenceGenomeSet, Taxonomy, Vec<AnnotatedGenome>)> {
    let genomeset = only_genomeset(conn)?;
    let taxonomy = load_taxa(conn, genomeset.db_id)?;
    let genomes = load_genomes(conn, genomeset.db_id, &taxonomy)?;
    debug!(
        "loaded genome set {:?} with {} taxa and {} genomes",
        genomeset.key,
        taxonomy.len(),
        genomes.len()
    );
    Ok((genomeset, taxonomy, genomes))
}

/// Get the only genome set in the database.
///
/// The distributed database format expects exactly one; anything else is an
/// error.
pub fn only_genomeset(conn: &Connection) -> Result<ReferenceGenomeSet> {
    let mut stmt =
        conn.prepare("SELECT id, key, version, name, description FROM genome_sets")?;
    let mut sets = stmt
        .query_map([], |row| {
            Ok(ReferenceGenomeSet {
                db_id: row.get(0)?,
                key: row.get(1)?,
                version: row.get(2)?,
                name: row.get(3)?,
                description: row.get(4)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    match sets.len() {
        1 => Ok(sets.remove(0)),
        0 => Err(GambitError::IncompatibleDatabase(
            "database contains no genome sets".into(),
        )),
        _ => Err(GambitError::IncompatibleDatabase(
            "database contains multiple genome sets".into(),
        )),
    }
}

struct TaxonRow {
    taxon: Taxon,
    parent_db_id: Option<i64>,
}

fn load_taxa(conn: &Connection, genome_set_id: i64) -> Result<Taxonomy> {
    let mut stmt = conn.prepare(
        "SELECT id, key, name, rank, description, distance_threshold, report, parent_id, ncbi_id \
         FROM taxa WHERE genome_set_id = ? ORDER BY id",
    )?;
    let rows = stmt
        .query_map([genome_set_id], |row| {
            Ok(TaxonRow {
                taxon: Taxon {
                    db_id: row.get(0)?,
                    key: row.get(1)?,
                    name: row.get(2)?,
                    rank: row.get(3)?,
                    description: row.get(4)?,
                    distance_threshold: row.get(5)?,
                    report: row.get(6)?,
                    parent: None,
                    ncbi_id: row.get(8)?,
                    children: Vec::new(),
                },
                parent_db_id: row.get(7)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    // Two passes: allocate arena ids, then resolve parent and child links.
    let id_by_db_id: HashMap<i64, TaxonId> = rows
        .iter()
        .enumerate()
        .map(|(i, r)| (r.taxon.db_id, TaxonId(i)))
        .collect();

    let mut taxa: Vec<Taxon> = Vec::with_capacity(rows.len());
    let mut parents: Vec<Option<TaxonId>> = Vec::with_capacity(rows.len());
    for row in rows {
        let parent = match row.parent_db_id {
            Some(pid) => Some(*id_by_db_id.get(&pid).ok_or_else(|| {
                GambitError::IncompatibleDatabase(format!(
                    "taxon {:?} references parent outside its genome set",
                    row.taxon.key
                ))
            })?),
            None => None,
        };
        parents.push(parent);
        taxa.push(row.taxon);
    }

    for (i, parent) in parents.iter().enumerate() {
        taxa[i].parent = *parent;
        if let Some(p) = parent {
            let child = TaxonId(i);
            taxa[p.0].children.push(child);
        }
    }

    Taxonomy::new(taxa)
}

fn load_genomes(
    conn: &Connection,
    genome_set_id: i64,
    taxonomy: &Taxonomy,
) -> Result<Vec<AnnotatedGenome>> {
    let mut stmt = conn.prepare(
        "SELECT g.id, g.key, g.description, g.ncbi_db, g.ncbi_id, g.genbank_acc, g.refseq_acc, \
                a.organism, a.taxon_id \
         FROM genomes g JOIN genome_annotations a ON a.genome_id = g.id \
         WHERE a.genome_set_id = ? ORDER BY g.id",
    )?;

    struct GenomeRow {
        genome: AnnotatedGenome,
        taxon_db_id: Option<i64>,
        key: String,
    }

    let rows = stmt
        .query_map([genome_set_id], |row| {
            let key: String = row.get(1)?;
            Ok(GenomeRow {
                genome: AnnotatedGenome {
                    db_id: row.get(0)?,
                    key: key.clone(),
                    description: row.get(2)?,
                    ncbi_db: row.get(3)?,
                    ncbi_id: row.get(4)?,
                    genbank_acc: row.get(5)?,
                    refseq_acc: row.get(6)?,
                    organism: row.get(7)?,
                    taxon: TaxonId(0),
                },
                taxon_db_id: row.get(8)?,
                key,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let taxon_by_db_id: HashMap<i64, TaxonId> = (0..taxonomy.len())
        .map(|i| (taxonomy.get(TaxonId(i)).db_id, TaxonId(i)))
        .collect();

    let mut genomes = Vec::with_capacity(rows.len());
    for row in rows {
        let taxon_db_id = row.taxon_db_id.ok_or_else(|| {
            GambitError::IncompatibleDatabase(format!(
                "genome {:?} has no taxon assignment",
                row.key
            ))
        })?;
        let taxon = *taxon_by_db_id.get(&taxon_db_id).ok_or_else(|| {
            GambitError::IncompatibleDatabase(format!(
                "genome {:?} is assigned to a taxon outside its genome set",
                row.key
            ))
        })?;
        let mut genome = row.genome;
        genome.taxon = taxon;
        genomes.push(genome);
    }

    Ok(genomes)
}

/// SQL schema for the genome database, used by tests and tooling that build
/// small databases from scratch.
pub const SCHEMA_SQL: &str = "
CREATE TABLE genome_sets (
    id INTEGER PRIMARY KEY,
    key VARCHAR NOT NULL,
    version VARCHAR,
    name VARCHAR NOT NULL,
    description VARCHAR,
    extra VARCHAR
);
CREATE TABLE genomes (
    id INTEGER PRIMARY KEY,
    key VARCHAR NOT NULL UNIQUE,
    description VARCHAR NOT NULL,
    ncbi_db VARCHAR,
    ncbi_id INTEGER,
    genbank_acc VARCHAR UNIQUE,
    refseq_acc VARCHAR UNIQUE,
    extra VARCHAR
);
CREATE TABLE taxa (
    id INTEGER PRIMARY KEY,
    key VARCHAR NOT NULL UNIQUE,
    name VARCHAR NOT NULL,
    rank VARCHAR,
    description VARCHAR,
    distance_threshold FLOAT,
    report BOOLEAN NOT NULL DEFAULT 1,
    genome_set_id INTEGER NOT NULL REFERENCES genome_sets (id),
    parent_id INTEGER REFERENCES taxa (id),
    ncbi_id INTEGER,
    extra VARCHAR
);
CREATE TABLE genome_annotations (
    genome_id INTEGER NOT NULL REFERENCES genomes (id),
    genome_set_id INTEGER NOT NULL REFERENCES genome_sets (id),
    taxon_id INTEGER REFERENCES taxa (id),
    organism VARCHAR,
    PRIMARY KEY (genome_id, genome_set_id)
);
";

#[cfg(test)]
pub(crate) mod test_fixtures {
    use super::*;

    /// Create an in-memory genome database with the fixture taxonomy used
    /// across classifier and pipeline tests:
    /// species taxa `s1`, `s2` under genus `g1`, plus genomes `A`..`D`.
    pub fn create_test_db(conn: &Connection) {
        conn.execute_batch(SCHEMA_SQL).expect("create schema");
        conn.execute_batch(
            "
            INSERT INTO genome_sets (id, key, version, name, description)
                VALUES (1, 'gambit/test', '1.0', 'Test set', 'fixture');

            INSERT INTO taxa (id, key, name, rank, distance_threshold, report, genome_set_id, parent_id, ncbi_id)
                VALUES (1, 'g1', 'Genusone', 'genus', 0.6, 1, 1, NULL, 100);
            INSERT INTO taxa (id, key, name, rank, distance_threshold, report, genome_set_id, parent_id, ncbi_id)
                VALUES (2, 's1', 'Genusone speciesone', 'species', 0.2, 1, 1, 1, 101);
            INSERT INTO taxa (id, key, name, rank, distance_threshold, report, genome_set_id, parent_id, ncbi_id)
                VALUES (3, 's2', 'Genusone speciestwo', 'species', 0.2, 1, 1, 1, 102);

            INSERT INTO genomes (id, key, description, ncbi_id, genbank_acc)
                VALUES (1, 'A', 'genome A', 11, 'GCA_000000011.1');
            INSERT INTO genomes (id, key, description, ncbi_id, genbank_acc)
                VALUES (2, 'B', 'genome B', 12, 'GCA_000000012.1');
            INSERT INTO genomes (id, key, description, ncbi_id, genbank_acc)
                VALUES (3, 'C', 'genome C', 13, 'GCA_000000013.1');
            INSERT INTO genomes (id, key, description, ncbi_id, genbank_acc)
                VALUES (4, 'D', 'genome D', 14, 'GCA_000000014.1');

            INSERT INTO genome_annotations (genome_id, genome_set_id, taxon_id, organism)
                VALUES (1, 1, 2, 'Genusone speciesone');
            INSERT INTO genome_annotations (genome_id, genome_set_id, taxon_id, organism)
                VALUES (2, 1, 2, 'Genusone speciesone');
            INSERT INTO genome_annotations (genome_id, genome_set_id, taxon_id, organism)
                VALUES (3, 1, 3, 'Genusone speciestwo');
            INSERT INTO genome_annotations (genome_id, genome_set_id, taxon_id, organism)
                VALUES (4, 1, 3, 'Genusone speciestwo');
            ",
        )
        .expect("insert fixture rows");
    }
}

#[cfg(test)]
mod tests {
    use super::test_fixtures::create_test_db;
    use super::*;

    fn open_fixture() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        create_test_db(&conn);
        conn
    }

    #[test]
    fn test_load_fixture() {
        let conn = open_fixture();
        let (gset, taxonomy, genomes) = load_from_connection(&conn).expect("load");

        assert_eq!(gset.key, "gambit/test");
        assert_eq!(gset.version.as_deref(), Some("1.0"));
        assert_eq!(taxonomy.len(), 3);
        assert_eq!(genomes.len(), 4);

        let genus = taxonomy.taxon_by_key("g1").expect("g1");
        let s1 = taxonomy.taxon_by_key("s1").expect("s1");
        let s2 = taxonomy.taxon_by_key("s2").expect("s2");
        assert_eq!(taxonomy.get(s1).parent, Some(genus));
        assert_eq!(taxonomy.get(s2).parent, Some(genus));
        assert_eq!(taxonomy.get(genus).children.len(), 2);
        assert_eq!(taxonomy.get(genus).distance_threshold, Some(0.6));
        assert!(taxonomy.get(genus).report);

        assert_eq!(genomes[0].key, "A");
        assert_eq!(genomes[0].taxon, s1);
        assert_eq!(genomes[3].taxon, s2);
        assert_eq!(genomes[1].ncbi_id, Some(12));
    }

    #[test]
    fn test_no_genome_set() {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        conn.execute_batch(SCHEMA_SQL).expect("create schema");
        let err = load_from_connection(&conn).expect_err("must fail");
        assert!(matches!(err, GambitError::IncompatibleDatabase(_)));
    }

    #[test]
    fn test_multiple_genome_sets() {
        let conn = open_fixture();
        conn.execute(
            "INSERT INTO genome_sets (id, key, name) VALUES (2, 'other', 'Other')",
            [],
        )
        .expect("insert");
        let err = load_from_connection(&conn).expect_err("must fail");
        assert!(matches!(err, GambitError::IncompatibleDatabase(_)));
    }

    #[test]
    fn test_genome_without_taxon() {
        let conn = open_fixture();
        conn.execute_batch(
            "INSERT INTO genomes (id, key, description) VALUES (5, 'E', 'genome E');
             INSERT INTO genome_annotations (genome_id, genome_set_id, taxon_id)
                 VALUES (5, 1, NULL);",
        )
        .expect("insert");
        let err = load_from_connection(&conn).expect_err("must fail");
        assert!(matches!(err, GambitError::IncompatibleDatabase(_)));
    }
}
