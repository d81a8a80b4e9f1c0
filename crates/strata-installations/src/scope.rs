//! Scoped data objects and targets
//!
//! Every installation reads its imports from the scope of its parent
//! (context label = parent name, `""` for root installations) and provides a
//! scope to its children (context label = its own name). Values are stored
//! as `DataObject`s and `Target`s carrying the context, key and source labels.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use strata_core::types::{
    exporting_installation, labels, scoped_object_name, DataObject, LabelSelector, Object,
    ObjectKey, ObjectMeta, Target, TargetSpec,
};
use strata_core::{ObjectStore, Result};

/// A value visible in a scope together with its origin
#[derive(Debug, Clone, PartialEq)]
pub struct ScopedValue {
    pub value: Value,
    pub source: String,
}

impl ScopedValue {
    pub fn new(value: Value, source: impl Into<String>) -> Self {
        Self {
            value,
            source: source.into(),
        }
    }

    /// Installation that exported this value, if it was not forwarded by the parent
    pub fn exported_by(&self) -> Option<&str> {
        exporting_installation(&self.source)
    }
}

/// Snapshot of the values visible in one scope
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scope {
    pub data: BTreeMap<String, ScopedValue>,
    pub targets: BTreeMap<String, ScopedValue>,
    pub target_lists: BTreeMap<String, (Vec<Value>, String)>,
}

impl Scope {
    pub fn insert_data(&mut self, key: impl Into<String>, value: Value, source: impl Into<String>) {
        self.data.insert(key.into(), ScopedValue::new(value, source));
    }

    pub fn insert_target(&mut self, key: impl Into<String>, value: Value, source: impl Into<String>) {
        self.targets.insert(key.into(), ScopedValue::new(value, source));
    }

    pub fn insert_target_list(
        &mut self,
        key: impl Into<String>,
        values: Vec<Value>,
        source: impl Into<String>,
    ) {
        self.target_lists.insert(key.into(), (values, source.into()));
    }

    /// Source label of whatever value is stored under `key`
    pub fn source(&self, key: &str) -> Option<&str> {
        self.data
            .get(key)
            .or_else(|| self.targets.get(key))
            .map(|v| v.source.as_str())
            .or_else(|| self.target_lists.get(key).map(|(_, s)| s.as_str()))
    }

    /// Data values keyed by scope key, as seen by export templates
    pub fn data_values(&self) -> Map<String, Value> {
        self.data
            .iter()
            .map(|(k, v)| (k.clone(), v.value.clone()))
            .collect()
    }

    /// Target values keyed by scope key, as seen by export templates
    pub fn target_values(&self) -> Map<String, Value> {
        self.targets
            .iter()
            .map(|(k, v)| (k.clone(), v.value.clone()))
            .collect()
    }
}

/// Store-backed access to one scope
pub struct ScopeClient<'a> {
    store: &'a dyn ObjectStore,
    namespace: &'a str,
    context: &'a str,
}

impl<'a> ScopeClient<'a> {
    pub fn new(store: &'a dyn ObjectStore, namespace: &'a str, context: &'a str) -> Self {
        Self {
            store,
            namespace,
            context,
        }
    }

    fn selector(&self) -> LabelSelector {
        LabelSelector::default().with(labels::CONTEXT, self.context)
    }

    fn meta(&self, key: &str, source: &str, index: Option<usize>) -> ObjectMeta {
        let mut meta = ObjectMeta::new(self.namespace, scoped_object_name(self.context, key, index))
            .with_label(labels::CONTEXT, self.context)
            .with_label(labels::KEY, key)
            .with_label(labels::SOURCE, source);
        if let Some(i) = index {
            meta = meta.with_label(labels::INDEX, i.to_string());
        }
        meta
    }

    /// Read every value of the scope
    pub async fn load(&self) -> Result<Scope> {
        let mut scope = Scope::default();
        let selector = self.selector();

        for object in self
            .store
            .data_objects()
            .list(Some(self.namespace), &selector)
            .await?
        {
            let (Some(key), Some(source)) = (
                object.metadata.label(labels::KEY),
                object.metadata.label(labels::SOURCE),
            ) else {
                continue;
            };
            scope.insert_data(key, object.data.clone(), source);
        }

        let mut lists: BTreeMap<String, (BTreeMap<usize, Value>, String)> = BTreeMap::new();
        for target in self
            .store
            .targets()
            .list(Some(self.namespace), &selector)
            .await?
        {
            let (Some(key), Some(source)) = (
                target.metadata.label(labels::KEY),
                target.metadata.label(labels::SOURCE),
            ) else {
                continue;
            };
            match target
                .metadata
                .label(labels::INDEX)
                .and_then(|i| i.parse::<usize>().ok())
            {
                Some(index) => {
                    let entry = lists
                        .entry(key.to_string())
                        .or_insert_with(|| (BTreeMap::new(), source.to_string()));
                    entry.0.insert(index, target.to_import_value());
                }
                None => scope.insert_target(key, target.to_import_value(), source),
            }
        }
        for (key, (items, source)) in lists {
            scope.insert_target_list(key, items.into_values().collect(), source);
        }

        Ok(scope)
    }

    pub async fn write_data(&self, key: &str, source: &str, value: Value) -> Result<()> {
        let object = DataObject::new(self.meta(key, source, None), value);
        self.store.data_objects().apply(object).await?;
        Ok(())
    }

    /// Store a target value and return the key of the stored object
    pub async fn write_target(&self, key: &str, source: &str, value: &Value) -> Result<ObjectKey> {
        let target = Target::new(self.meta(key, source, None), TargetSpec::from_value(value)?);
        let stored = self.store.targets().apply(target).await?;
        Ok(stored.metadata.key())
    }

    pub async fn write_target_list(&self, key: &str, source: &str, values: &[Value]) -> Result<()> {
        for (index, value) in values.iter().enumerate() {
            let target = Target::new(
                self.meta(key, source, Some(index)),
                TargetSpec::from_value(value)?,
            );
            self.store.targets().apply(target).await?;
        }

        // shrink a list that got shorter
        let selector = self.selector().with(labels::KEY, key);
        for target in self
            .store
            .targets()
            .list(Some(self.namespace), &selector)
            .await?
        {
            let stale = target
                .metadata
                .label(labels::INDEX)
                .and_then(|i| i.parse::<usize>().ok())
                .is_some_and(|i| i >= values.len());
            if stale {
                self.store.targets().delete_if_exists(&target.key()).await?;
            }
        }
        Ok(())
    }

    /// Delete values written by `source` whose key is not in `keep`
    pub async fn retain(&self, source: &str, keep: &BTreeSet<String>) -> Result<()> {
        let selector = self.selector().with(labels::SOURCE, source);
        let is_stale = |meta: &ObjectMeta| {
            meta.label(labels::KEY)
                .is_none_or(|key| !keep.contains(key))
        };

        for object in self
            .store
            .data_objects()
            .list(Some(self.namespace), &selector)
            .await?
        {
            if is_stale(&object.metadata) {
                self.store.data_objects().delete_if_exists(&object.key()).await?;
            }
        }
        for target in self
            .store
            .targets()
            .list(Some(self.namespace), &selector)
            .await?
        {
            if is_stale(&target.metadata) {
                self.store.targets().delete_if_exists(&target.key()).await?;
            }
        }
        Ok(())
    }

    /// Remove everything `source` wrote into this scope
    pub async fn remove_source(&self, source: &str) -> Result<()> {
        self.retain(source, &BTreeSet::new()).await
    }

    /// Remove every value of the scope
    pub async fn clean(&self) -> Result<()> {
        let selector = self.selector();
        for object in self
            .store
            .data_objects()
            .list(Some(self.namespace), &selector)
            .await?
        {
            self.store.data_objects().delete_if_exists(&object.key()).await?;
        }
        for target in self
            .store
            .targets()
            .list(Some(self.namespace), &selector)
            .await?
        {
            self.store.targets().delete_if_exists(&target.key()).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strata_core::types::{export_source, KUBERNETES_CLUSTER_TARGET_TYPE, SOURCE_PARENT};
    use strata_core::MemoryStore;

    fn cluster(name: &str) -> Value {
        json!({
            "metadata": {"name": name, "namespace": "default"},
            "spec": {"type": KUBERNETES_CLUSTER_TARGET_TYPE, "config": {"kubeconfig": "{}"}},
        })
    }

    #[tokio::test]
    async fn test_values_are_isolated_per_context() {
        let store = MemoryStore::new();
        let root = ScopeClient::new(&store, "default", "root");
        let other = ScopeClient::new(&store, "default", "other");

        root.write_data("param", SOURCE_PARENT, json!("a")).await.unwrap();
        other.write_data("param", SOURCE_PARENT, json!("b")).await.unwrap();

        let scope = root.load().await.unwrap();
        assert_eq!(scope.data.len(), 1);
        assert_eq!(scope.data["param"].value, json!("a"));
        assert_eq!(scope.source("param"), Some(SOURCE_PARENT));
        assert!(ScopeClient::new(&store, "default", "")
            .load()
            .await
            .unwrap()
            .data
            .is_empty());
    }

    #[tokio::test]
    async fn test_target_lists_keep_order_and_shrink() {
        let store = MemoryStore::new();
        let scope = ScopeClient::new(&store, "default", "root");
        scope
            .write_target_list("clusters", SOURCE_PARENT, &[cluster("a"), cluster("b"), cluster("c")])
            .await
            .unwrap();
        scope
            .write_target_list("clusters", SOURCE_PARENT, &[cluster("x"), cluster("y")])
            .await
            .unwrap();

        let loaded = scope.load().await.unwrap();
        let (list, source) = &loaded.target_lists["clusters"];
        assert_eq!(list.len(), 2);
        assert_eq!(source, SOURCE_PARENT);
        assert!(loaded.targets.is_empty());
        assert_eq!(
            TargetSpec::from_value(&list[0]).unwrap().type_,
            KUBERNETES_CLUSTER_TARGET_TYPE
        );
    }

    #[tokio::test]
    async fn test_retain_only_touches_one_source() {
        let store = MemoryStore::new();
        let scope = ScopeClient::new(&store, "default", "root");
        let source = export_source("root-a");
        scope.write_data("keep", &source, json!(1)).await.unwrap();
        scope.write_data("drop", &source, json!(2)).await.unwrap();
        scope.write_target("cluster", &source, &cluster("c")).await.unwrap();
        scope.write_data("forwarded", SOURCE_PARENT, json!(3)).await.unwrap();

        let keep: BTreeSet<String> = ["keep".to_string()].into();
        scope.retain(&source, &keep).await.unwrap();

        let loaded = scope.load().await.unwrap();
        assert_eq!(
            loaded.data.keys().cloned().collect::<Vec<_>>(),
            vec!["forwarded".to_string(), "keep".to_string()]
        );
        assert!(loaded.targets.is_empty());
        assert_eq!(loaded.data["keep"].exported_by(), Some("root-a"));

        scope.clean().await.unwrap();
        assert_eq!(scope.load().await.unwrap(), Scope::default());
    }
}
