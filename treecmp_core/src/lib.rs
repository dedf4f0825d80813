pub mod scanner;
pub mod matcher;
pub mod list;
pub mod decompress;
pub mod comparison;
pub mod scheduler;
pub mod session;

pub use scanner::{ScanResult, TreeScanner};
pub use matcher::{CompiledRule, MatchOutcome, NameMatcher, EXACT_WEIGHT};
pub use list::{match_trees, ComparisonEntry, ComparisonList, PendingComparison, ReconcileSummary};
pub use decompress::{Decompressor, MaterializeError};
pub use comparison::{ComparatorOptions, ContentComparator};
pub use scheduler::{ComparisonScheduler, CompletedComparison, VisibilityFilter};
pub use session::TreeComparison;
