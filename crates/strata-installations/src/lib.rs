//! Installation reconciliation for Strata
//!
//! - [`InstallationReconciler`]: imports, subinstallations, executions, exports
//! - [`ExecutionReconciler`]: deploy item creation in dependency order
//! - [`deletion`]: sibling import checks and ordered teardown
//! - [`ControllerManager`]: event routing, requeues and bounded concurrency
//! - [`Simulator`]: offline rendering of a blueprint tree

pub mod deletion;
pub mod execution;
pub mod imports;
pub mod manager;
pub mod ordering;
pub mod reconciler;
pub mod scope;
pub mod simulator;
pub mod template;

pub use execution::ExecutionReconciler;
pub use imports::{resolve_imports, validate_exports, validate_imports, ImportResolution};
pub use manager::{ControllerManager, ManagerOptions, ReconcileFailure, SettleReport};
pub use reconciler::InstallationReconciler;
pub use scope::{Scope, ScopeClient};
pub use simulator::{
    root_installation, ExportTemplate, ExportTemplates, NoopCallbacks, Simulator,
    SimulatorCallbacks, SimulatorExports, ROOT_INSTALLATION_NAME, SIMULATION_NAMESPACE,
};
pub use template::{TemplateContext, TemplateState};
