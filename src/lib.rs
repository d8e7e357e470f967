//! Core of a collaborative genome annotation editor: a typed, serializable,
//! invertible [`change::Change`] catalog applied to feature trees held in one
//! of three backends (authoritative record store, imported GFF3 snapshot,
//! client-side tree), plus the GFF3 codec and streaming importer that feed
//! them.
//!
//! Coordinates are interbase throughout: 0-based, half-open `[min, max)`.
//! The 1-based inclusive convention of GFF3 exists only inside [`gff3`].

pub mod backend;
pub mod change;
pub mod changes;
pub mod error;
pub mod feature;
pub mod gff3;
pub mod gff3_import;
pub mod ontology;
pub mod refseq;

pub use backend::Backend;
pub use change::{Change, ChangeLog, ChangeResult};
pub use error::{ChangeError, FeatureError, Gff3Error};
pub use feature::{Feature, FeatureId};
pub use ontology::Ontology;
pub use refseq::{Assembly, RefSeq, SequenceChunk};
