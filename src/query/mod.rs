//! Query Layer - structural queries over the persisted graph
//!
//! - Call graphs (callers/callees) as recursive CTEs
//! - Reachability and data flow as bounded breadth-first expansion
//! - Aggregate statistics

pub mod stats;
pub mod traversal;

pub use stats::{FunctionComplexity, GraphStats, graph_stats};
pub use traversal::{CallGraphEntry, DataFlowStep, Direction, ReachedNode, TraversalEngine, VariableAccess};
