//! livedoc Query - document predicates, find options and result ordering.
//!
//! This crate provides:
//!
//! - `predicate`: `DocumentQuery` and its compiled `Predicate` form
//! - `pattern`: `$like` and `$regex` matching
//! - `matcher`: class-, mixin- and interface-aware document matching
//! - `options`: `FindOptions`, `Lookup` and `FindResult`
//! - `sort`: result ordering with a total `_id` tie-break
//! - `compare`: total ordering over JSON values

pub mod compare;
pub mod matcher;
pub mod options;
pub mod pattern;
pub mod predicate;
pub mod sort;

pub use matcher::{is_instance, match_doc, DocumentMatcher};
pub use options::{
    canonical_json, equivalence_key, FindOptions, FindResult, Lookup, LookupTarget,
    ReverseLookup, SortingOrder, SortingQuery,
};
pub use predicate::{Condition, DocumentQuery, FieldSource, Predicate};
pub use sort::{result_sort, DocumentSorter};
