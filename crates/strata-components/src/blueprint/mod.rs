//! Blueprints: descriptor, filesystem, fetch pipe and cache

mod descriptor;
mod fs;
mod reference;
mod resolve;
mod store;

pub use descriptor::*;
pub use fs::BlueprintFs;
pub use reference::{ComponentDescriptorUri, CD_URI_PREFIX};
pub use resolve::{inline_blueprint, BlueprintResolver, DEFAULT_PIPE_BUFFER_BYTES};
pub use store::BlueprintStore;

use strata_core::{Error, Result};

/// A decoded blueprint bound to its read-only filesystem
#[derive(Debug, Clone)]
pub struct Blueprint {
    pub descriptor: BlueprintDescriptor,

    /// Subinstallation templates with file entries already read
    pub subinstallations: Vec<InstallationTemplate>,

    pub fs: BlueprintFs,
}

impl Blueprint {
    /// Decode `blueprint.yaml` at the root of `fs`
    pub fn from_fs(fs: BlueprintFs) -> Result<Self> {
        let content = fs
            .read_to_string(BLUEPRINT_FILE)
            .map_err(|_| Error::invalid_blueprint(format!("no {} in blueprint filesystem", BLUEPRINT_FILE)))?;
        let descriptor: BlueprintDescriptor = serde_yaml_ng::from_str(&content)
            .map_err(|e| Error::invalid_blueprint(format!("unable to decode {}: {}", BLUEPRINT_FILE, e)))?;

        let mut subinstallations = Vec::with_capacity(descriptor.subinstallations.len());
        for entry in &descriptor.subinstallations {
            let template = match entry {
                SubinstallationEntry::Inline(template) => template.clone(),
                SubinstallationEntry::File { file } => {
                    let content = fs.read_to_string(file)?;
                    serde_yaml_ng::from_str(&content).map_err(|e| {
                        Error::invalid_blueprint(format!("unable to decode subinstallation {}: {}", file, e))
                    })?
                }
            };
            subinstallations.push(template);
        }

        Ok(Self {
            descriptor,
            subinstallations,
            fs,
        })
    }

    /// Template source of an executor, inline or from the blueprint filesystem
    pub fn template_source(&self, executor: &TemplateExecutor) -> Result<String> {
        match (&executor.template, &executor.file) {
            (Some(template), _) => Ok(template.clone()),
            (None, Some(file)) => self.fs.read_to_string(file),
            (None, None) => Err(Error::template(
                &executor.name,
                "neither template nor file is set",
            )),
        }
    }
}
