pub mod backup_exchange;
pub mod core;
pub mod exams;
pub mod reports;
pub mod rooms;
pub mod seating;
pub mod setup;
pub mod students;
