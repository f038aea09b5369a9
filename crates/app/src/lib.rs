pub mod analyses;
pub mod harness;
pub mod settings;
