//! Error types for strata-core
//!
//! Errors fall into four classes that callers treat differently:
//! wait conditions (`is_wait`), conflicts (`is_conflict`), fatal
//! configuration errors (`is_fatal`) and everything else, which is
//! considered recoverable and retried on the next reconcile.

use thiserror::Error;

/// Result type alias using strata-core's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for Strata
#[derive(Error, Debug)]
pub enum Error {
    /// A component version carries no repository context to dereference its references
    #[error("component descriptor {component} must at least contain one repository context with a base url")]
    RepositoryContextMissing { component: String },

    /// A component reference could not be resolved
    #[error("unable to resolve component reference {reference} with component name {component} and version {version}: {source}")]
    ComponentReference {
        reference: String,
        component: String,
        version: String,
        #[source]
        source: Box<Error>,
    },

    /// Component version unknown to the registry
    #[error("component {name}:{version} not found")]
    ComponentNotFound { name: String, version: String },

    /// Blob of a resource unknown to the registry
    #[error("blob for resource {resource} of component {component} not found")]
    BlobNotFound { component: String, resource: String },

    /// No blueprint resource with the requested name
    #[error("unable to find blueprint {name} in component descriptor {component}")]
    BlueprintResourceNotFound { name: String, component: String },

    /// Blueprint could not be read or decoded
    #[error("invalid blueprint: {message}")]
    InvalidBlueprint { message: String },

    /// Blob media type could not be parsed
    #[error("unable to parse media type {media_type:?}: {message}")]
    InvalidMediaType { media_type: String, message: String },

    /// An import is not (yet) available in the installation's scope
    #[error("import {name} is not satisfied: {reason}")]
    ImportNotSatisfied { name: String, reason: String },

    /// An import value does not match its declaration
    #[error("import {name} is invalid: {message}")]
    ImportValidation { name: String, message: String },

    /// A declared export was not produced by the export executions
    #[error("export {name} is declared by the blueprint but was not produced")]
    ExportNotProduced { name: String },

    /// An exported value does not match its declaration
    #[error("export {name} is invalid: {message}")]
    ExportValidation { name: String, message: String },

    /// A sibling still imports one of the installation's exports
    #[error("a sibling still imports some of the exports: {sibling} imports {key} exported by {installation}")]
    SiblingImport {
        installation: String,
        sibling: String,
        key: String,
    },

    /// Circular dependency
    #[error("circular dependency detected: {cycle}")]
    CircularDependency { cycle: String },

    /// Template rendering or decoding error
    #[error("template {name} failed: {message}")]
    Template { name: String, message: String },

    /// Continuous reconcile specification is invalid
    #[error("invalid continuous reconcile schedule: {message}")]
    InvalidSchedule { message: String },

    /// No deployer is registered for a deploy item type
    #[error("no deployer registered for deploy item type {deployer_type}")]
    UnknownDeployer { deployer_type: String },

    /// Object not found in the store
    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: String },

    /// Object already exists in the store
    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: &'static str, key: String },

    /// Optimistic concurrency conflict
    #[error("conflict updating {kind} {key}: resource version {expected} is outdated (current {actual})")]
    Conflict {
        kind: &'static str,
        key: String,
        expected: u64,
        actual: u64,
    },

    /// The governing cancellation token fired
    #[error("operation cancelled")]
    Cancelled,

    /// Error tagged with the operation that produced it
    #[error("{operation} ({reason}): {source}")]
    Operation {
        operation: String,
        reason: String,
        #[source]
        source: Box<Error>,
    },

    /// Several independent failures
    #[error("[{}]", .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join(", "))]
    Aggregate(Vec<Error>),

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Invalid configuration format
    #[error("Invalid configuration format: {message}")]
    InvalidConfig { message: String },

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlParse(#[from] serde_yaml_ng::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a repository context missing error
    pub fn repository_context_missing(component: impl Into<String>) -> Self {
        Self::RepositoryContextMissing {
            component: component.into(),
        }
    }

    /// Create a component not found error
    pub fn component_not_found(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self::ComponentNotFound {
            name: name.into(),
            version: version.into(),
        }
    }

    /// Create an invalid blueprint error
    pub fn invalid_blueprint(message: impl Into<String>) -> Self {
        Self::InvalidBlueprint {
            message: message.into(),
        }
    }

    /// Create an import not satisfied error
    pub fn import_not_satisfied(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ImportNotSatisfied {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create an import validation error
    pub fn import_validation(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ImportValidation {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a template error
    pub fn template(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Template {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create an invalid schedule error
    pub fn invalid_schedule(message: impl Into<String>) -> Self {
        Self::InvalidSchedule {
            message: message.into(),
        }
    }

    /// Create a circular dependency error
    pub fn circular_dependency(cycle: impl Into<String>) -> Self {
        Self::CircularDependency {
            cycle: cycle.into(),
        }
    }

    /// Create a config not found error
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    /// Create an invalid config error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create a not found error for an object kind
    pub fn not_found(kind: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            kind,
            key: key.to_string(),
        }
    }

    /// Tag an error with the operation and reason that produced it
    pub fn operation(operation: impl Into<String>, reason: impl Into<String>, source: Error) -> Self {
        Self::Operation {
            operation: operation.into(),
            reason: reason.into(),
            source: Box::new(source),
        }
    }

    /// Combine errors; a single error is returned unwrapped and an empty list yields `None`
    pub fn aggregate(mut errors: Vec<Error>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Aggregate(errors)),
        }
    }

    /// Wait conditions are not failures; the reconcile is simply retried later
    pub fn is_wait(&self) -> bool {
        match self {
            Self::ImportNotSatisfied { .. } | Self::SiblingImport { .. } => true,
            Self::Operation { source, .. } => source.is_wait(),
            _ => false,
        }
    }

    /// Fatal configuration errors require a spec change before a retry makes sense
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::RepositoryContextMissing { .. }
            | Self::BlueprintResourceNotFound { .. }
            | Self::InvalidBlueprint { .. }
            | Self::InvalidMediaType { .. }
            | Self::ImportValidation { .. }
            | Self::ExportNotProduced { .. }
            | Self::ExportValidation { .. }
            | Self::CircularDependency { .. }
            | Self::Template { .. }
            | Self::InvalidSchedule { .. }
            | Self::UnknownDeployer { .. } => true,
            Self::ComponentReference { source, .. } | Self::Operation { source, .. } => {
                source.is_fatal()
            }
            Self::Aggregate(errors) => errors.iter().any(Error::is_fatal),
            _ => false,
        }
    }

    /// Optimistic concurrency conflicts are resolved by re-reading and retrying
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Conflict { .. } => true,
            Self::Operation { source, .. } => source.is_conflict(),
            Self::Aggregate(errors) => errors.iter().any(Error::is_conflict),
            _ => false,
        }
    }

    /// Whether this error (or the error it wraps) is a not-found error
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Operation { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Stable operation name and reason for status reporting
    pub fn operation_and_reason(&self) -> (&str, &str) {
        match self {
            Self::Operation {
                operation, reason, ..
            } => (operation.as_str(), reason.as_str()),
            Self::ImportNotSatisfied { .. } => ("Reconcile", "ImportNotSatisfied"),
            Self::SiblingImport { .. } => ("Deletion", "SiblingImport"),
            Self::Conflict { .. } => ("Update", "Conflict"),
            _ => ("Reconcile", "Error"),
        }
    }
}
