pub mod assignments;
pub mod attendance;
pub mod core;
pub mod dashboard;
pub mod grades;
pub mod setup;
pub mod students;
