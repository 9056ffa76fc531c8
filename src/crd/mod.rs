//! Custom Resource Definitions consumed by the migration
//!
//! This module contains the CRD types owned by other operators:
//! - CephCluster: Rook's cluster definition, patched to enable block OSDs

pub mod ceph_cluster;

pub use ceph_cluster::*;
