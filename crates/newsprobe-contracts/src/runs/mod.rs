pub mod results;
pub mod scan;
pub mod stats;
pub mod summary;
pub mod transcript;

pub use results::{ConditionResults, ExecutionResult};
pub use stats::{condition_means, ReplyMeans, StatsTable};
pub use summary::{read_summary, write_summary, RunSummary};
pub use transcript::{write_transcript, TranscriptEntry, TranscriptHeader};

/// Run folder names, e.g. `25-02-03_10-04-12`.
pub const RUN_DIR_FORMAT: &str = "%y-%m-%d_%H-%M-%S";

pub const RESULTS_FILE: &str = "res.bin";
pub const STATS_FILE: &str = "res.csv";
pub const TRANSCRIPT_FILE: &str = "log.txt";
pub const SUMMARY_FILE: &str = "summary.json";
