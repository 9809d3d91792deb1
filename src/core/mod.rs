// Core modules implementing document storage and error modeling.
pub mod document;
pub mod error;
pub mod file_store;
pub mod key;
pub mod memory_store;
pub mod store;
