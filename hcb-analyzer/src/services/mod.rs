//! Job pipeline services

pub mod chunk_store;
pub mod consolidator;
pub mod job_coordinator;
pub mod job_registry;
pub mod object_storage;
pub mod process_runner;
pub mod remote_fetch;
pub mod result_decoder;

pub use chunk_store::ChunkStore;
pub use consolidator::Consolidator;
pub use job_coordinator::{ChunkSubmission, JobCoordinator, JobSource};
pub use job_registry::JobRegistry;
pub use object_storage::{ObjectStorage, StoredObject, SupabaseStorage, UnconfiguredStorage};
pub use process_runner::{ProcessInvocation, ProcessOutput, ProcessRunner};
pub use remote_fetch::{FetchedFile, HttpFetcher, RemoteFetcher};
