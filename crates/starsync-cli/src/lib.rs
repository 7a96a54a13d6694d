//! Library half of the `starsync` binary: dump readers, source record
//! validation and the import pipeline.

pub mod dump;
pub mod import;
pub mod logging;
pub mod progress;
pub mod reader;

pub use import::{Dataset, ImportReport, Importer};
pub use reader::{for_each_in_array, JsonLines, ReadStats};
