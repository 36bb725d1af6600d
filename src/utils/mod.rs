pub mod fs;
pub mod statistics;

pub use fs::{read_json_or_default, write_atomic, write_json_atomic};
pub use statistics::{summarize, SampleSummary};
