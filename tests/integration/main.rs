//! Integration tests entry point, following https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html

mod fixtures;
pub use fixtures::*;

mod milestones;
mod store_atomicity;
mod sync_end_to_end;
