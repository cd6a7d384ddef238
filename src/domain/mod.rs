pub mod error;
pub mod lock;
pub mod model;
pub mod repository;
