//! Raw TCP probe
//!
//! Opens a connection under the deadline, optionally writes `send_data`,
//! and when `expect_data` is set reads up to 1 KiB and requires it to
//! appear as a substring of the response.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::trace;

use super::Probe;
use crate::model::TcpConfig;

/// Maximum bytes read when matching `expect_data`
const READ_LIMIT: usize = 1024;

/// Probe for raw TCP services
pub struct TcpProbe {
    config: TcpConfig,
}

impl TcpProbe {
    pub fn new(config: TcpConfig) -> Self {
        Self { config }
    }

    async fn run(&self) -> Result<()> {
        trace!("connecting to {}", self.config.endpoint);

        let mut stream = TcpStream::connect(&self.config.endpoint)
            .await
            .with_context(|| format!("failed to connect to {}", self.config.endpoint))?;

        if let Some(data) = &self.config.send_data {
            stream
                .write_all(data.as_bytes())
                .await
                .context("failed to write to connection")?;
        }

        if let Some(expect) = &self.config.expect_data {
            let mut buf = Vec::with_capacity(READ_LIMIT);
            let mut chunk = [0u8; 256];
            loop {
                let n = stream
                    .read(&mut chunk)
                    .await
                    .context("failed to read from connection")?;
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
                if String::from_utf8_lossy(&buf).contains(expect.as_str()) {
                    return Ok(());
                }
                if buf.len() >= READ_LIMIT {
                    break;
                }
            }

            let response: String = String::from_utf8_lossy(&buf).chars().take(128).collect();
            bail!("expected {:?} in response, got {:?}", expect, response);
        }

        Ok(())
    }
}

#[async_trait]
impl Probe for TcpProbe {
    async fn check(&self, deadline: Duration) -> Result<()> {
        timeout(deadline, self.run())
            .await
            .with_context(|| format!("tcp check of {} timed out", self.config.endpoint))?
    }
}

// ============================================================================
// Tests
// ============================================================================
