//! Write-once blueprint cache

use super::{Blueprint, BlueprintFs};
use camino::{Utf8Path, Utf8PathBuf};
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use strata_core::types::{ComponentIdentity, ResourceIdentity};
use strata_core::utils::sha256_hex;
use strata_core::{Error, Result};
use tokio::sync::OnceCell;

type Slot = Arc<OnceCell<Arc<Blueprint>>>;

/// Blueprints keyed by (component identity, resource identity).
///
/// An entry is written once and only after a complete, successful decode.
/// With a cache directory, extracted blueprints are mirrored to disk and
/// reloaded from there on a memory miss.
#[derive(Default)]
pub struct BlueprintStore {
    entries: DashMap<(ComponentIdentity, ResourceIdentity), Slot>,
    cache_dir: Option<Utf8PathBuf>,
}

impl BlueprintStore {
    pub fn new(cache_dir: Option<Utf8PathBuf>) -> Self {
        Self {
            entries: DashMap::new(),
            cache_dir,
        }
    }

    pub fn cache_dir(&self) -> Option<&Utf8Path> {
        self.cache_dir.as_deref()
    }

    /// Cached blueprint, memory only
    pub fn get(&self, component: &ComponentIdentity, resource: &ResourceIdentity) -> Option<Arc<Blueprint>> {
        self.entries
            .get(&(component.clone(), resource.clone()))
            .and_then(|slot| slot.get().cloned())
    }

    /// Number of stored blueprints
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.value().initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the cached blueprint or run `fetch` to produce it.
    ///
    /// Concurrent callers for the same key share a single `fetch`; if it
    /// fails nothing is stored and the next caller fetches again.
    pub async fn get_or_try_init<F, Fut>(
        &self,
        component: &ComponentIdentity,
        resource: &ResourceIdentity,
        fetch: F,
    ) -> Result<Arc<Blueprint>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Blueprint>>,
    {
        let slot: Slot = self
            .entries
            .entry((component.clone(), resource.clone()))
            .or_default()
            .clone();

        let blueprint = slot
            .get_or_try_init(|| async {
                let dir = self.entry_dir(component, resource);
                if let Some(dir) = &dir {
                    if let Some(bp) = load(dir) {
                        tracing::debug!("Loaded blueprint {} of {} from {}", resource, component, dir);
                        return Ok::<_, Error>(Arc::new(bp));
                    }
                }

                let bp = fetch().await?;
                if let Some(dir) = &dir {
                    if let Err(e) = mirror(&bp.fs, dir) {
                        tracing::warn!("Unable to mirror blueprint to {}: {}", dir, e);
                    }
                }
                Ok(Arc::new(bp))
            })
            .await?;
        Ok(blueprint.clone())
    }

    fn entry_dir(&self, component: &ComponentIdentity, resource: &ResourceIdentity) -> Option<Utf8PathBuf> {
        let key = sha256_hex(format!("{}/{}", component, resource).as_bytes());
        self.cache_dir.as_ref().map(|d| d.join(key))
    }
}

fn load(dir: &Utf8Path) -> Option<Blueprint> {
    if !dir.is_dir() {
        return None;
    }
    match BlueprintFs::from_dir(dir).and_then(Blueprint::from_fs) {
        Ok(bp) => Some(bp),
        Err(e) => {
            tracing::warn!("Ignoring unreadable cached blueprint {}: {}", dir, e);
            None
        }
    }
}

/// Write into a sibling directory first so readers never see a partial entry
fn mirror(fs: &BlueprintFs, dir: &Utf8Path) -> Result<()> {
    let partial = Utf8PathBuf::from(format!("{}.partial", dir));
    if partial.exists() {
        std::fs::remove_dir_all(&partial)?;
    }
    std::fs::create_dir_all(&partial)?;
    fs.write_to_dir(&partial)?;
    if dir.exists() {
        std::fs::remove_dir_all(&partial)?;
        return Ok(());
    }
    std::fs::rename(&partial, dir)?;
    Ok(())
}
