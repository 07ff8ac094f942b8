//! # extdev Runtime
//!
//! Orchestration layer for the extdev controller: descriptor file
//! discovery and parsing, logging setup, and the glue that registers one
//! device-type binding per descriptor.

pub mod descriptor;
pub mod logging;
pub mod runtime;

pub use descriptor::{
    DESCRIPTOR_SUBDIR, Descriptor, DescriptorError, DescriptorLoader, DescriptorResult,
};
pub use runtime::Runtime;
