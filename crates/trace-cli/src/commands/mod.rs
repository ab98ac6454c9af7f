pub mod auth_cmd;
pub mod common;
pub mod completions;
pub mod conflict;
pub mod entries;
pub mod sync;
