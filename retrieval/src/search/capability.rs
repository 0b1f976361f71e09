//! One-shot backend probing.
//!
//! The orchestrator resolves backend availability exactly once, when it is
//! built. Later queries consult the recorded state instead of re-probing,
//! so a missing backend is logged exactly once instead of on every request.

use std::sync::Arc;

use tracing::debug;
use tracing::warn;

use crate::traits::DenseCapability;
use crate::traits::DenseRetriever;
use crate::traits::SparseBackend;

/// Availability of one backend, fixed at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    /// Backend wired and answering.
    Available,
    /// Backend missing or reporting unavailable.
    Unavailable,
}

impl ProbeState {
    pub fn is_available(self) -> bool {
        matches!(self, ProbeState::Available)
    }
}

/// Resolve the dense backend's availability and entry point.
pub(crate) fn probe_dense(
    retriever: Option<&Arc<dyn DenseRetriever>>,
) -> (ProbeState, DenseCapability) {
    match retriever {
        Some(retriever) => {
            let capability = retriever.capability();
            debug!(
                backend = retriever.name(),
                capability = ?capability,
                "dense backend probed"
            );
            (ProbeState::Available, capability)
        }
        None => {
            warn!("no dense backend wired, retrieval degrades to sparse only");
            (ProbeState::Unavailable, DenseCapability::BasicSearch)
        }
    }
}

/// Resolve the sparse backend's availability.
pub(crate) async fn probe_sparse(backend: Option<&Arc<dyn SparseBackend>>) -> ProbeState {
    match backend {
        Some(backend) if backend.is_available().await => ProbeState::Available,
        Some(_) => {
            warn!("sparse backend reports unavailable, fusion disabled");
            ProbeState::Unavailable
        }
        None => {
            warn!("no sparse backend wired, fusion disabled");
            ProbeState::Unavailable
        }
    }
}
