//! DataObject resource and scope naming

use super::meta::{Object, ObjectMeta};
use crate::utils::sha256_hex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Source label value for values forwarded from the parent
pub const SOURCE_PARENT: &str = "parent";

/// Source label value for values exported by an installation
pub fn export_source(installation: &str) -> String {
    format!("installation.{}", installation)
}

/// Installation name encoded in an export source label
pub fn exporting_installation(source: &str) -> Option<&str> {
    source.strip_prefix("installation.")
}

/// Deterministic object name of a scoped value.
///
/// Data objects and targets are addressed by (context, key) through labels;
/// the object name only has to be unique and stable.
pub fn scoped_object_name(context: &str, key: &str, index: Option<usize>) -> String {
    let mut input = format!("{}/{}", context, key);
    if let Some(i) = index {
        input.push_str(&format!("/{}", i));
    }
    let digest = sha256_hex(input.as_bytes());
    format!("do-{}", &digest[..16])
}

/// Arbitrary structured data addressed by scope and key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataObject {
    pub metadata: ObjectMeta,
    pub data: Value,
}

impl Object for DataObject {
    const KIND: &'static str = "DataObject";
    type Spec = Value;

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn spec(&self) -> &Value {
        &self.data
    }

    fn spec_mut(&mut self) -> &mut Value {
        &mut self.data
    }
}

impl DataObject {
    pub fn new(metadata: ObjectMeta, data: Value) -> Self {
        Self { metadata, data }
    }
}
