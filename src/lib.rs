//! Lyceum: a subject-tuned tutoring chat core.
//!
//! Students talk to a tutor per subject, keep up to ten saved chats for each
//! one, and turn a conversation into quizzes or flashcards.

pub mod ai;
pub mod config;
pub mod controller;
pub mod storage;
pub mod store;
pub mod study;
pub mod subjects;
pub mod types;
