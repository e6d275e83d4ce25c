//! Reference database access: taxonomy projections and database assembly.

pub mod models;
pub mod refdb;
pub mod sqlite;

pub use models::{AnnotatedGenome, ReferenceGenomeSet, Taxon, TaxonId, Taxonomy};
pub use refdb::{genomes_by_id_subset, locate_db_files, ReferenceDatabase, GENOME_ID_ATTRS};
pub use sqlite::load_taxonomy_db;
