//! Retrieval orchestration: backend probing and the hybrid search flow.

pub mod capability;
pub mod orchestrator;

pub use capability::ProbeState;
pub use orchestrator::OrchestratorBuilder;
pub use orchestrator::RetrievalOrchestrator;
pub use orchestrator::RetrievalOutcome;
pub use orchestrator::RetrieveOptions;
