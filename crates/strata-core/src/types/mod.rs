//! Type definitions for the Strata object model and configuration

mod component;
mod data_object;
mod deploy_item;
mod execution;
mod installation;
mod meta;
mod phase;
mod runtime_config;
mod target;

pub use component::*;
pub use data_object::*;
pub use deploy_item::*;
pub use execution::*;
pub use installation::*;
pub use meta::*;
pub use phase::*;
pub use runtime_config::*;
pub use target::*;
