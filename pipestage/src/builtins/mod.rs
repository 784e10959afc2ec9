//! Builtin operations, registered as the bottom registry layer.
//!
//! | Category | Names |
//! |----------|-------|
//! | load | `csv`, `json` |
//! | transformation | `split`, `filter`, `map_column` (and the structural `combine`) |
//! | validation | `no_nans`, `schema`, `columns` |
//! | write | `csv`, `json` |

pub mod loading;
pub mod operations;
pub mod transforming;
pub mod writing;

use crate::registry::ModuleExports;
use crate::validation;

/// Exports of the builtin layer.
pub fn exports() -> ModuleExports {
    ModuleExports::new()
        .with_loader("csv", loading::csv)
        .with_loader("json", loading::json)
        .with_transformation("split", transforming::split)
        .with_transformation("filter", transforming::filter)
        .with_transformation("map_column", transforming::map_column)
        .with_validation("no_nans", validation::no_nans)
        .with_validation("schema", validation::schema)
        .with_validation("columns", validation::columns)
        .with_writer("csv", writing::csv)
        .with_writer("json", writing::json)
}
