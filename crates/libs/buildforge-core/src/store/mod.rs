//! Low-level storage operations for the SQLite-via-libsql persistence store
//! and for Git (via `git2`, see [`crate::git_safety`]).

pub mod db;
pub mod repo_cache;

pub use db::{Db, new_db_pool};
