//! Combinators over tasks and futures.
//!
//! - [`when_any`]: first of N futures with the same output type
//! - [`when_any2`], [`when_any3`], [`when_any4`]: first of heterogeneous
//!   futures, tagged with [`AnyOf2`], [`AnyOf3`], [`AnyOf4`]

pub mod when_any;

pub use when_any::{when_any, when_any2, when_any3, when_any4, AnyOf2, AnyOf3, AnyOf4, WhenAny};
