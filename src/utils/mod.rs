//! Utility modules for the scanner

pub mod file_input;
pub mod local_scan;

pub use file_input::{read_targets, FileInputHandler, FileInputStats};
pub use local_scan::{scan_project, Lockfile};
