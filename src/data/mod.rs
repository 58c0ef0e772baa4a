pub mod cache;
pub mod identity;
pub mod types;
