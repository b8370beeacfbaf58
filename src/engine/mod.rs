pub mod fusion;
pub mod learning;
pub mod orchestrator;
