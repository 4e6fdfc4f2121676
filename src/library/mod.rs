//! Local music library: domain models, id translation, integrity
//! filtering, and the relational snapshot store.

pub mod ids;
pub mod integrity;
pub mod model;
pub mod music_db;
