//! Docker utilities for compose projects, containers and volumes.

pub mod client;
pub mod error;

pub use client::{ContainerRow, DockerClient};
pub use error::DockerError;
