pub mod attempts;
pub mod content;
pub mod database;
pub mod jobs;
pub mod models;
pub mod objects;

pub use content::{ApprovalCommit, ApprovalOutcome};
pub use database::Database;
pub use jobs::JobPatch;
pub use objects::{LocalObjectStore, ObjectStore};
