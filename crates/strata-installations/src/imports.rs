//! Import resolution and validation

use crate::scope::Scope;
use serde_json::{Map, Value};
use strata_components::blueprint::{
    BlueprintDescriptor, ExportType, ImportDefinition, ImportType,
};
use strata_core::types::{InstallationImports, TargetSpec};
use strata_core::utils::json_digest;
use strata_core::{Error, Result};

/// Imports of an installation resolved against its scope
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportResolution {
    /// Values keyed by blueprint import name
    pub values: Map<String, Value>,

    /// Import names whose scope keys are not available yet
    pub pending: Vec<String>,

    /// Import name and scope key of every lookup, in import order
    pub keys: Vec<(String, String)>,
}

impl ImportResolution {
    pub fn is_satisfied(&self) -> bool {
        self.pending.is_empty()
    }

    /// The resolved values, or `ImportNotSatisfied` for the first pending import
    pub fn into_values(self) -> Result<Map<String, Value>> {
        match self.pending.first() {
            Some(name) => Err(Error::import_not_satisfied(
                name,
                "no value in the installation's scope",
            )),
            None => Ok(self.values),
        }
    }
}

/// Look up every import of an installation in `scope`
pub fn resolve_imports(imports: &InstallationImports, scope: &Scope) -> ImportResolution {
    let mut resolution = ImportResolution::default();

    for import in &imports.data {
        resolution
            .keys
            .push((import.name.clone(), import.data_ref.clone()));
        match scope.data.get(&import.data_ref) {
            Some(v) => {
                resolution.values.insert(import.name.clone(), v.value.clone());
            }
            None => resolution.pending.push(import.name.clone()),
        }
    }

    for import in &imports.targets {
        resolution.keys.extend(
            import
                .scope_keys()
                .into_iter()
                .map(|k| (import.name.clone(), k.to_string())),
        );

        let value = if let Some(key) = &import.target {
            scope.targets.get(key).map(|t| t.value.clone())
        } else if let Some(keys) = &import.targets {
            keys.iter()
                .map(|k| scope.targets.get(k).map(|t| t.value.clone()))
                .collect::<Option<Vec<_>>>()
                .map(Value::Array)
        } else if let Some(key) = &import.target_list_ref {
            scope
                .target_lists
                .get(key)
                .map(|(list, _)| Value::Array(list.clone()))
        } else {
            None
        };

        match value {
            Some(v) => {
                resolution.values.insert(import.name.clone(), v);
            }
            None => resolution.pending.push(import.name.clone()),
        }
    }

    resolution
}

/// Check resolved values against the blueprint's import declarations.
///
/// Applies defaults, drops values the blueprint does not declare and
/// returns the imports in declaration order.
pub fn validate_imports(
    descriptor: &BlueprintDescriptor,
    mut values: Map<String, Value>,
) -> Result<Map<String, Value>> {
    let mut validated = Map::new();

    for def in &descriptor.imports {
        let value = match values.remove(&def.name) {
            Some(v) => v,
            None => match (&def.default, def.required) {
                (Some(default), _) => default.value.clone(),
                (None, false) => continue,
                (None, true) => {
                    return Err(Error::import_validation(
                        &def.name,
                        "required import is not defined",
                    ))
                }
            },
        };
        validate_import(def, &value)?;
        validated.insert(def.name.clone(), value);
    }

    for name in values.keys() {
        tracing::debug!("Ignoring import {} not declared by the blueprint", name);
    }

    Ok(validated)
}

fn validate_import(def: &ImportDefinition, value: &Value) -> Result<()> {
    match def.type_ {
        ImportType::Data => {
            if let Some(schema) = &def.schema {
                schema_errors(schema, value)
                    .map_err(|message| Error::import_validation(&def.name, message))?;
            }
        }
        ImportType::Target => check_target(def, value)?,
        ImportType::TargetList => {
            let Some(items) = value.as_array() else {
                return Err(Error::import_validation(&def.name, "expected a list of targets"));
            };
            for item in items {
                check_target(def, item)?;
            }
        }
    }
    Ok(())
}

fn check_target(def: &ImportDefinition, value: &Value) -> Result<()> {
    let spec = TargetSpec::from_value(value)
        .map_err(|e| Error::import_validation(&def.name, format!("not a target: {}", e)))?;
    match &def.target_type {
        Some(expected) if expected != &spec.type_ => Err(Error::import_validation(
            &def.name,
            format!("expected target type {} but got {}", expected, spec.type_),
        )),
        _ => Ok(()),
    }
}

/// Validate `value` against a JSON schema, joining all violations
pub(crate) fn schema_errors(schema: &Value, value: &Value) -> std::result::Result<(), String> {
    let validator =
        jsonschema::validator_for(schema).map_err(|e| format!("invalid schema: {}", e))?;

    let errors: Vec<String> = validator
        .iter_errors(value)
        .map(|e| {
            let path = e.instance_path().to_string();
            if path.is_empty() {
                e.to_string()
            } else {
                format!("{}: {}", path, e)
            }
        })
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}

/// Check rendered exports against the blueprint's export declarations.
///
/// Every declared export must be produced; values are checked against their
/// schema or target type.
pub fn validate_exports(descriptor: &BlueprintDescriptor, exports: &Map<String, Value>) -> Result<()> {
    for def in &descriptor.exports {
        let Some(value) = exports.get(&def.name) else {
            return Err(Error::ExportNotProduced {
                name: def.name.clone(),
            });
        };
        let invalid = |message: String| Error::ExportValidation {
            name: def.name.clone(),
            message,
        };
        match def.type_ {
            ExportType::Data => {
                if let Some(schema) = &def.schema {
                    schema_errors(schema, value).map_err(invalid)?;
                }
            }
            ExportType::Target => {
                let spec = TargetSpec::from_value(value)
                    .map_err(|e| invalid(format!("not a target: {}", e)))?;
                if let Some(expected) = def.target_type.as_ref().filter(|t| **t != spec.type_) {
                    return Err(invalid(format!(
                        "expected target type {} but got {}",
                        expected, spec.type_
                    )));
                }
            }
        }
    }
    Ok(())
}

/// SHA-256 over the canonical JSON of resolved imports
pub fn import_digest(values: &Map<String, Value>) -> String {
    json_digest(&Value::Object(values.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strata_core::types::{DataImport, TargetImport, KUBERNETES_CLUSTER_TARGET_TYPE};

    fn descriptor(yaml: &str) -> BlueprintDescriptor {
        serde_yaml_ng::from_str(yaml).unwrap()
    }

    fn cluster() -> Value {
        json!({
            "metadata": {"name": "cluster", "namespace": "default"},
            "spec": {"type": KUBERNETES_CLUSTER_TARGET_TYPE, "config": {}},
        })
    }

    fn target_import(name: &str) -> TargetImport {
        TargetImport {
            name: name.to_string(),
            target: None,
            targets: None,
            target_list_ref: None,
        }
    }

    #[test]
    fn test_resolve_reports_pending_imports() {
        let mut scope = Scope::default();
        scope.insert_data("root-param-a", json!("a"), "parent");
        scope.insert_target("cluster", cluster(), "parent");

        let imports = InstallationImports {
            data: vec![
                DataImport {
                    name: "param-a".into(),
                    data_ref: "root-param-a".into(),
                },
                DataImport {
                    name: "param-b".into(),
                    data_ref: "missing".into(),
                },
            ],
            targets: vec![
                TargetImport {
                    target: Some("cluster".into()),
                    ..target_import("cluster")
                },
                TargetImport {
                    targets: Some(vec!["cluster".into(), "cluster".into()]),
                    ..target_import("clusters")
                },
            ],
        };

        let resolution = resolve_imports(&imports, &scope);
        assert!(!resolution.is_satisfied());
        assert_eq!(resolution.pending, vec!["param-b".to_string()]);
        assert_eq!(resolution.values["param-a"], json!("a"));
        assert_eq!(resolution.values["clusters"].as_array().unwrap().len(), 2);
        assert!(resolution
            .into_values()
            .unwrap_err()
            .is_wait());
    }

    #[test]
    fn test_target_list_ref() {
        let mut scope = Scope::default();
        scope.insert_target_list("clusters", vec![cluster()], "parent");
        let imports = InstallationImports {
            data: Vec::new(),
            targets: vec![TargetImport {
                target_list_ref: Some("clusters".into()),
                ..target_import("all")
            }],
        };
        let values = resolve_imports(&imports, &scope).into_values().unwrap();
        assert_eq!(values["all"], json!([cluster()]));
    }

    #[test]
    fn test_validate_defaults_and_required() {
        let bp = descriptor(
            r#"
imports:
- name: a
- name: b
  required: false
- name: c
  default:
    value: 42
"#,
        );
        let values = validate_imports(&bp, Map::from_iter([("a".to_string(), json!(1))])).unwrap();
        assert_eq!(Value::Object(values), json!({"a": 1, "c": 42}));

        let err = validate_imports(&bp, Map::new()).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("import a"));
    }

    #[test]
    fn test_validate_schema() {
        let bp = descriptor(
            r#"
imports:
- name: replicas
  schema:
    type: integer
    minimum: 1
"#,
        );
        assert!(validate_imports(&bp, Map::from_iter([("replicas".to_string(), json!(3))])).is_ok());
        let err = validate_imports(&bp, Map::from_iter([("replicas".to_string(), json!("three"))]))
            .unwrap_err();
        assert!(matches!(err, Error::ImportValidation { .. }));
    }

    #[test]
    fn test_validate_target_type() {
        let bp = descriptor(
            r#"
imports:
- name: cluster
  type: target
  targetType: landscaper.gardener.cloud/kubernetes-cluster
- name: clusters
  type: targetList
  targetType: example.com/other
"#,
        );
        let ok = Map::from_iter([("cluster".to_string(), cluster())]);
        assert!(validate_imports(&bp, ok.clone()).is_err());

        let mut with_list = ok;
        with_list.insert("clusters".into(), json!([]));
        assert!(validate_imports(&bp, with_list.clone()).is_ok());

        with_list.insert("clusters".into(), json!([cluster()]));
        let err = validate_imports(&bp, with_list).unwrap_err();
        assert!(err.to_string().contains("example.com/other"));
    }

    #[test]
    fn test_validate_exports() {
        let bp = descriptor(
            r#"
exports:
- name: out
  schema:
    type: string
- name: cluster
  type: target
"#,
        );
        let mut exports = Map::from_iter([("out".to_string(), json!("x"))]);
        let err = validate_exports(&bp, &exports).unwrap_err();
        assert!(matches!(err, Error::ExportNotProduced { ref name } if name == "cluster"));

        exports.insert("cluster".into(), cluster());
        assert!(validate_exports(&bp, &exports).is_ok());

        exports.insert("out".into(), json!(1));
        let err = validate_exports(&bp, &exports).unwrap_err();
        assert!(matches!(err, Error::ExportValidation { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_digest_is_order_independent() {
        let a = Map::from_iter([("x".to_string(), json!(1)), ("y".to_string(), json!(2))]);
        let b = Map::from_iter([("y".to_string(), json!(2)), ("x".to_string(), json!(1))]);
        assert_eq!(import_digest(&a), import_digest(&b));
    }
}
