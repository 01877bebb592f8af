//! Sea-ORM entities for the tables the dispatch engine reads and writes.

pub mod content;
pub mod email_log;
pub mod subscriber;
pub mod subscription;
