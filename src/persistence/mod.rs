pub mod sqlite;
pub mod store;
pub mod writeback;
