//! Root-cause analysis: search strategies and the scheduler that runs them once per change.

pub mod scheduler;
pub mod search;
pub mod tree;

pub use scheduler::{AnalysisFailure, ChangeCauseScheduler, ScheduleReport};
pub use search::{CompleteSearcher, LevelWiseSearcher, NodeMeasurer};
pub use tree::{CallTreeNode, CauseNode, CauseSearchResult};
