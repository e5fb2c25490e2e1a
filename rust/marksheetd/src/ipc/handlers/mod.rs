pub mod classes;
pub mod core;
pub mod grading;
pub mod marksheets;
pub mod students;
