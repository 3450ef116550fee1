//! Commentary synthesis: excerpt selection, prompt building, reply repair and
//! the per-verse orchestration that ties them to the usage meter.

pub mod audit;
pub mod orchestrator;
pub mod repair;
pub mod request;
pub mod select;
