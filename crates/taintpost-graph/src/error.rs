use thiserror::Error;

/// Errors raised by the graph store itself. A duplicate primary key on insert
/// is a programming error in the calling pass; callers abort on it.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("duplicate {entity} id {id}")]
    DuplicateId { entity: &'static str, id: u32 },
    #[error("{entity} id {id} is not in the graph")]
    UnknownId { entity: &'static str, id: u32 },
}
