//! Probe implementations
//!
//! A probe performs a single network check against a service target and
//! reports ok or an error. Probes are constructed from the (already
//! validated) service row via [`build_probe`] and retain no network
//! resources between calls.
//!
//! ## Probe types
//!
//! - **HTTP multi-endpoint**: concurrent endpoint requests + JavaScript
//!   failure condition
//! - **TCP**: connect, optionally send, optionally expect a substring
//! - **gRPC**: connectivity / standard health check / reflection

pub mod condition;
pub mod grpc;
pub mod http;
pub mod tcp;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

pub use grpc::GrpcProbe;
pub use http::HttpProbe;
pub use tcp::TcpProbe;

use crate::model::{Service, ServiceConfig};

/// A single network check
///
/// Implementations never panic on target behavior; anything the target
/// does wrong comes back as an error for the monitor to record.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Perform one check bounded by `deadline`
    async fn check(&self, deadline: Duration) -> Result<()>;
}

/// Construct the probe for a service, keyed on its protocol
pub fn build_probe(service: &Service) -> Result<Box<dyn Probe>> {
    match &service.config {
        ServiceConfig::Http(config) => Ok(Box::new(HttpProbe::new(config.clone())?)),
        ServiceConfig::Tcp(config) => Ok(Box::new(TcpProbe::new(config.clone()))),
        ServiceConfig::Grpc(config) => Ok(Box::new(GrpcProbe::new(config.clone()))),
    }
}
