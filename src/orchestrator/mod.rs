pub mod runner;

pub use runner::Orchestrator;
