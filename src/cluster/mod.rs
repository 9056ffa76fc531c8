//! Cluster Adapters
//!
//! Implementations of the [`ClusterApi`](crate::domain::ClusterApi) port.

pub mod kubernetes;

#[cfg(test)]
pub(crate) mod fake;

pub use kubernetes::KubeClusterApi;
