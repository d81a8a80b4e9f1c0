//! Deployers for Strata
//!
//! Deploy items are dispatched to the [`Deployer`] registered for their type
//! string in a [`DeployerRegistry`]. The [`DeployItemController`] owns the
//! item lifecycle: finalizers, observed generation, abort and the
//! continuous reconcile requeue computed by [`continuous`].

pub mod continuous;
pub mod controller;
pub mod deployer;
pub mod mock;
pub mod registry;

pub use continuous::{schedule, ContinuousReconcileSpec, Schedule};
pub use controller::DeployItemController;
pub use deployer::{DeployContext, Deployer};
pub use mock::{MockDeployer, MOCK_DEPLOYER_TYPE};
pub use registry::DeployerRegistry;
