pub mod authz;
pub mod progress;
pub mod query;
