pub mod meter;
pub mod store;
