pub mod catalog;
pub mod choice;
pub mod trace;
pub mod traits;
