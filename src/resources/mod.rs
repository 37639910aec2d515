//! # Resource Monitoring
//!
//! Host pressure sampling feeding admission control. Readings come from a
//! pluggable [`ResourceSampler`]; [`SysinfoSampler`] reads the real host and
//! [`FixedSampler`] is settable for tests and embedding.

pub mod listener;
pub mod monitor;
pub mod sampler;

pub use listener::{PublishingListener, ResourceListener, WeakListener};
pub use monitor::ResourceMonitor;
pub use sampler::{FixedSampler, ResourceSampler, SampleError, SysinfoSampler};
