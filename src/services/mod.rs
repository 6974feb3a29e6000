pub mod db;
pub mod job_manager;
pub mod llm;
pub mod pipeline;
pub mod profiler;
pub mod registry;
pub mod storage;

pub use db::{CostCheck, DatabaseHandler, SampleSpec, SqlValue};
pub use job_manager::{JobCleanupTask, JobManager, JobRequest};
pub use llm::{CostLedger, CostSnapshot, LlmGateway};
pub use pipeline::{MetadataPipeline, RunHooks};
pub use registry::ConnectionRegistry;
pub use storage::{MetadataStore, StoredEntry};
