pub mod auth;
pub mod projects;
pub mod students;
