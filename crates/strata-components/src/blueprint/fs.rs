//! Read-only in-memory blueprint filesystem

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use flate2::read::GzDecoder;
use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Arc;
use strata_core::{Error, Result};

/// Files of an extracted blueprint keyed by normalised relative path.
///
/// Cloning is cheap; the content is shared and never mutated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlueprintFs {
    files: Arc<BTreeMap<String, Vec<u8>>>,
}

impl BlueprintFs {
    /// Build from path to text content (inline blueprints)
    pub fn from_files(files: &BTreeMap<String, String>) -> Result<Self> {
        let mut out = BTreeMap::new();
        for (path, content) in files {
            out.insert(normalize(path)?, content.clone().into_bytes());
        }
        Ok(Self {
            files: Arc::new(out),
        })
    }

    /// Extract a tar archive, gunzipping first when `gzip` is set.
    ///
    /// The reader is drained to its end so a streaming producer never blocks
    /// on trailing padding.
    pub fn from_archive<R: Read>(reader: R, gzip: bool) -> Result<Self> {
        if gzip {
            Self::from_tar(GzDecoder::new(reader))
        } else {
            Self::from_tar(reader)
        }
    }

    fn from_tar<R: Read>(reader: R) -> Result<Self> {
        let mut archive = tar::Archive::new(reader);
        let mut files = BTreeMap::new();
        for entry in archive.entries()? {
            let mut entry = entry?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let path = entry.path()?;
            let path = path
                .to_str()
                .ok_or_else(|| Error::invalid_blueprint("archive contains a non UTF-8 path"))?;
            let path = normalize(path)?;
            let mut content = Vec::new();
            entry.read_to_end(&mut content)?;
            files.insert(path, content);
        }
        let mut rest = archive.into_inner();
        std::io::copy(&mut rest, &mut std::io::sink())?;

        Ok(Self {
            files: Arc::new(files),
        })
    }

    /// Load every file below `dir`
    pub fn from_dir(dir: &Utf8Path) -> Result<Self> {
        let mut files = BTreeMap::new();
        read_dir_into(dir, dir, &mut files)?;
        Ok(Self {
            files: Arc::new(files),
        })
    }

    /// Write every file below `dir`, creating directories as needed
    pub fn write_to_dir(&self, dir: &Utf8Path) -> Result<()> {
        for (path, content) in self.files.iter() {
            let target = dir.join(path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&target, content)?;
        }
        Ok(())
    }

    pub fn exists(&self, path: &str) -> bool {
        normalize(path).is_ok_and(|p| self.files.contains_key(&p))
    }

    pub fn read(&self, path: &str) -> Result<&[u8]> {
        let key = normalize(path)?;
        self.files
            .get(&key)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::invalid_blueprint(format!("file {} not found in blueprint", path)))
    }

    pub fn read_to_string(&self, path: &str) -> Result<String> {
        let bytes = self.read(path)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::invalid_blueprint(format!("file {} is not valid UTF-8", path)))
    }

    /// Relative paths of all files, sorted
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Normalise to a relative `a/b/c` path; `..` is rejected
fn normalize(path: &str) -> Result<String> {
    let mut parts: Vec<&str> = Vec::new();
    for component in Utf8Path::new(path).components() {
        match component {
            Utf8Component::Normal(p) => parts.push(p),
            Utf8Component::RootDir | Utf8Component::CurDir | Utf8Component::Prefix(_) => {}
            Utf8Component::ParentDir => {
                return Err(Error::invalid_blueprint(format!(
                    "path {} escapes the blueprint root",
                    path
                )))
            }
        }
    }
    if parts.is_empty() {
        return Err(Error::invalid_blueprint(format!("invalid file path {:?}", path)));
    }
    Ok(parts.join("/"))
}

fn read_dir_into(root: &Utf8Path, dir: &Utf8Path, files: &mut BTreeMap<String, Vec<u8>>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = Utf8PathBuf::try_from(entry.path())
            .map_err(|e| Error::invalid_blueprint(format!("non UTF-8 path: {}", e)))?;
        if path.is_dir() {
            read_dir_into(root, &path, files)?;
        } else {
            let relative = path
                .strip_prefix(root)
                .map_err(|_| Error::invalid_blueprint(format!("{} is outside {}", path, root)))?;
            files.insert(normalize(relative.as_str())?, std::fs::read(&path)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn tar_bytes(files: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, path, content.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap()
    }

    #[test]
    fn test_from_archive_plain_and_gzip() {
        let tar = tar_bytes(&[("./blueprint.yaml", "imports: []\n"), ("templates/a.yaml", "a")]);
        let plain = BlueprintFs::from_archive(tar.as_slice(), false).unwrap();

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&tar).unwrap();
        let gz = encoder.finish().unwrap();
        let gzipped = BlueprintFs::from_archive(gz.as_slice(), true).unwrap();

        assert_eq!(plain, gzipped);
        assert_eq!(plain.read_to_string("/blueprint.yaml").unwrap(), "imports: []\n");
        assert!(plain.exists("templates/a.yaml"));
        assert_eq!(plain.paths().collect::<Vec<_>>(), vec!["blueprint.yaml", "templates/a.yaml"]);
    }

    #[test]
    fn test_rejects_parent_paths() {
        let mut files = BTreeMap::new();
        files.insert("../escape".to_string(), "x".to_string());
        assert!(matches!(
            BlueprintFs::from_files(&files),
            Err(Error::InvalidBlueprint { .. })
        ));
    }

    #[test]
    fn test_dir_roundtrip() {
        let mut files = BTreeMap::new();
        files.insert("/blueprint.yaml".to_string(), "exports: []\n".to_string());
        files.insert("nested/deploy.yaml".to_string(), "deployItems: []\n".to_string());
        let fs = BlueprintFs::from_files(&files).unwrap();

        let temp = tempfile::TempDir::new().unwrap();
        let dir = Utf8Path::from_path(temp.path()).unwrap();
        fs.write_to_dir(dir).unwrap();
        assert_eq!(BlueprintFs::from_dir(dir).unwrap(), fs);
    }

    #[test]
    fn test_missing_file() {
        let fs = BlueprintFs::default();
        assert!(fs.is_empty());
        assert!(fs.read("blueprint.yaml").is_err());
    }
}
