//! Parameterized SQL: identifiers from config or checked field names, values as parameters.

mod builder;
pub mod params;
pub use builder::*;
pub use params::*;
