pub mod error;
pub mod exam_link;
pub mod exam_questions;
pub mod service;
pub mod session;
pub mod toc;
