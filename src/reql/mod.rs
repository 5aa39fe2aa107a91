//! Query description model.
//!
//! Defines the input tree shape consumed by the compiler: a query is an
//! ordered sequence of [`Term`]s, each carrying tagged [`Arg`]uments. The
//! model is wire-compatible with the JSON emitted by the chained query
//! builder (`{"id": ..., "args": [{"type": ..., "value": ...}, ...]}`).

pub mod term;

pub use term::{Arg, JoinType, Term};
