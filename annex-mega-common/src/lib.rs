pub mod address;
pub mod error;
pub mod materialize;
pub mod store;
