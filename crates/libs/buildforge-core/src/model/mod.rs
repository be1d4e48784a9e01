//! Data model entities (§3) and their libsql-backed repositories (§6.1, §4.6).
//!
//! Each entity follows the BMC (Backend Model Controller) pattern: a plain
//! data struct, a `ForCreate` input struct, and a stateless `*Repo` with
//! `async fn` methods operating on a shared [`crate::db::Db`].

pub mod artifact;
pub mod git_operation;
pub mod log_record;
pub mod project;
pub mod snapshot;
pub mod task;
