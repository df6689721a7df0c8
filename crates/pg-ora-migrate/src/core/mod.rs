//! Core abstractions shared by every engine component: the value model,
//! the connection port traits, and dialect-aware SQL builders.

pub mod ports;
pub mod sql;
pub mod value;

pub use ports::{ColumnInfo, SourceConnection, TargetConnection};
pub use value::{Record, SqlValue};
