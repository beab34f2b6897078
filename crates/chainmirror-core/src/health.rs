//! Liveness and readiness probes.
//!
//! - **liveness**: the chain source answers and the mirror can read its own
//!   last indexed block.
//! - **readiness**: the indexed tip is within `readiness_max_lag` blocks of
//!   the height the source reports.

use serde::Serialize;
use std::sync::Arc;

use crate::block::BlockMapper;
use crate::source::ChainSource;

/// Result of a single probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Probe {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexed_height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Probe {
    fn down(reason: impl Into<String>) -> Self {
        Self {
            healthy: false,
            indexed_height: None,
            source_height: None,
            reason: Some(reason.into()),
        }
    }
}

pub struct HealthProbe {
    source: Arc<dyn ChainSource>,
    blocks: BlockMapper,
    max_lag: u32,
}

impl HealthProbe {
    pub fn new(source: Arc<dyn ChainSource>, blocks: BlockMapper, max_lag: u32) -> Self {
        Self {
            source,
            blocks,
            max_lag,
        }
    }

    pub async fn liveness(&self) -> Probe {
        if let Err(e) = self.source.get_connection_count().await {
            return Probe::down(format!("chain source unreachable: {e}"));
        }
        match self.blocks.get_highest().await {
            Ok(tip) => Probe {
                healthy: true,
                indexed_height: tip.map(|b| b.height),
                source_height: None,
                reason: None,
            },
            Err(e) => Probe::down(format!("cannot read indexed tip: {e}")),
        }
    }

    pub async fn readiness(&self) -> Probe {
        let info = match self.source.get_blockchain_info().await {
            Ok(info) => info,
            Err(e) => return Probe::down(format!("chain source unreachable: {e}")),
        };
        let tip = match self.blocks.get_highest().await {
            Ok(tip) => tip,
            Err(e) => return Probe::down(format!("cannot read indexed tip: {e}")),
        };
        let indexed_height = tip.map(|b| b.height);
        let (healthy, reason) = match indexed_height {
            None => (false, Some("nothing indexed yet".to_string())),
            Some(h) if info.blocks.saturating_sub(h) > self.max_lag => (
                false,
                Some(format!("indexed height {h} trails source height {}", info.blocks)),
            ),
            Some(_) => (true, None),
        };
        if !healthy {
            tracing::debug!(?indexed_height, source_height = info.blocks, "not ready");
        }
        Probe {
            healthy,
            indexed_height,
            source_height: Some(info.blocks),
            reason,
        }
    }
}
