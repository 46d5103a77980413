//! Cluster membership and partition layout.
//!
//! - [`membership`] - Immutable membership snapshot
//! - [`placement`] - Replica sets per partition
//! - [`routing`] - Key to partition routing
//!
//! Membership is read once, when a resource is resolved. Replica sets only
//! change afterwards through committed reconfiguration entries.

pub mod membership;
pub mod placement;
pub mod routing;
