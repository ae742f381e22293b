//! Narrative Harness: deterministic simulation and calibration for
//! trait-scored narrative games.
//!
//! Plays a scenario catalog automatically with scripted policies, records
//! per-step trait deltas and advisory cap flags, and resolves an archetype
//! or reveal from the final trait vector. Calibration and optimization of
//! the policies' tuning parameters run alongside, on configuration data.

pub mod core;
pub mod schema;
