//! Workload identity federation: the reconciliation engine that converges
//! cloud IAM state to a federation configuration, the manual-mode script
//! generator, and the retry loop both lean on.

pub mod reconciler;
pub mod retry;
pub mod scripts;

pub use reconciler::WifReconciler;
