pub mod archetype;
pub mod artifacts;
pub mod audit;
pub mod calibrator;
pub mod context;
pub mod optimizer;
pub mod policy;
pub mod reveal;
pub mod runner;
