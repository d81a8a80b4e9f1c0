//! Mock deployer
//!
//! Completes deploy items without touching any external system. The
//! provider configuration selects the outcome:
//!
//! ```yaml
//! phase: Succeeded        # phase to report, Succeeded by default
//! export:                 # exports to report
//!   key: value
//! ```

use crate::deployer::{DeployContext, Deployer};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use strata_core::types::{DeployItem, Phase, Target};
use strata_core::{Error, Result};
use tokio::sync::Mutex;

pub const MOCK_DEPLOYER_TYPE: &str = "landscaper.gardener.cloud/mock";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MockConfiguration {
    #[serde(default)]
    phase: Option<Phase>,

    #[serde(default)]
    export: Option<Value>,
}

/// Deployer for the mock type that records every call
#[derive(Default)]
pub struct MockDeployer {
    reconciles: AtomicUsize,
    aborts: AtomicUsize,
    deleted: Mutex<Vec<String>>,
}

impl MockDeployer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reconcile_count(&self) -> usize {
        self.reconciles.load(Ordering::SeqCst)
    }

    pub fn abort_count(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }

    /// Names of the deploy items deleted so far, in order
    pub async fn deleted(&self) -> Vec<String> {
        self.deleted.lock().await.clone()
    }
}

fn configuration(item: &DeployItem) -> Result<MockConfiguration> {
    if item.spec.configuration.is_null() {
        return Ok(MockConfiguration::default());
    }
    serde_json::from_value(item.spec.configuration.clone()).map_err(|e| {
        Error::operation(
            "ReconcileMock",
            "InvalidProviderConfiguration",
            Error::from(e),
        )
    })
}

#[async_trait]
impl Deployer for MockDeployer {
    fn type_name(&self) -> &str {
        MOCK_DEPLOYER_TYPE
    }

    async fn reconcile(&self, ctx: &DeployContext, item: &mut DeployItem, _target: Option<&Target>) -> Result<()> {
        if ctx.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.reconciles.fetch_add(1, Ordering::SeqCst);
        let config = configuration(item)?;
        item.status.phase = config.phase.unwrap_or(Phase::Succeeded);
        item.status.exports = config.export;
        tracing::debug!("Mock deployed {} ({})", item.metadata.name, item.status.phase);
        Ok(())
    }

    async fn delete(&self, _ctx: &DeployContext, item: &mut DeployItem, _target: Option<&Target>) -> Result<()> {
        self.deleted.lock().await.push(item.metadata.name.clone());
        Ok(())
    }

    async fn abort(&self, _ctx: &DeployContext, item: &mut DeployItem, _target: Option<&Target>) -> Result<()> {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        item.status.phase = Phase::Failed;
        Ok(())
    }
}
