// mongoreql - ReQL-style chained queries on MongoDB
// Compiles a portable query description into native aggregation pipelines.

#![warn(rust_2018_idioms)]

pub mod backend;
pub mod compile;
pub mod reql;
pub mod runtime;

// Re-exports for convenience
pub use backend::{DocumentStore, IdProvider};
pub use compile::{compile_query, CompiledQuery, Mode, TranslationContext};
pub use reql::{Arg, JoinType, Term};
pub use runtime::{CursorItem, QueryRuntime};

/// mongoreql error types
pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum Error {
        /// An operation the compiler or dispatcher recognizes but cannot
        /// translate (unknown join type, write after non-filter stages, ...).
        #[error("Unsupported operation: {0}")]
        Unsupported(String),

        /// A term whose arguments violate the expected shape.
        #[error("Malformed query: {0}")]
        MalformedQuery(String),

        /// A stage or mode needed a database/collection that was never
        /// selected by a preceding `db`/`table` term.
        #[error("Missing target: {0}")]
        MissingTarget(String),

        /// Failure raised by the underlying store; propagated unchanged.
        #[error("Backend error: {0}")]
        Backend(#[from] mongodb::error::Error),
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_format() {
        // VERSION is a static string, always valid
        let _version: &str = VERSION;
    }
}
