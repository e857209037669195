//! Predicate trees and their compilation to engine queries
//!
//! Callers express queries as [`Predicate`] trees over schema fields:
//! - Boolean nodes (AND, OR, NOT)
//! - Atomic field conditions (equals, prefix, regex, range, contains)
//! - Post-filter placeholders evaluated outside the engine
//!
//! [`QueryCompiler`] turns a tree into a [`NativeQuery`] for one schema.

pub mod compiler;
pub mod native;
pub mod predicate;

pub use compiler::QueryCompiler;
pub use native::{BooleanQuery, NativeQuery};
pub use predicate::{FieldOp, FieldPredicate, Predicate};
