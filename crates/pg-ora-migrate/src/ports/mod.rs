//! Connection port implementations.

mod memory;
mod postgres;

pub use memory::MemoryDb;
pub use postgres::PgSourcePool;
