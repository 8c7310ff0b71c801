//! Process identity seeded into every socket and service a process creates.
//!
//! Replaces the original's ad hoc SHA-256-of-entropy `uuid_randomize` with
//! the `uuid` crate's v4 generator (already a `meshwire-proto` dependency
//! for `ListenRecord`'s `uuid` field).

use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Identity {
    pub uuid: String,
    pub cell: String,
}

impl Identity {
    pub fn generate(cell: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            cell: cell.into(),
        }
    }
}
