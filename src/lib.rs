pub mod clause;
pub mod clause_allocator;
pub mod clause_database;
pub mod cref;
pub mod idx;
pub mod lit;
pub mod options;
pub mod stamp;
pub mod var;
