//! Extension resource bundles.

use delve_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Name of the manifest every bundle carries at its root
pub const MANIFEST_PATH: &str = "mod.json";

/// Declared identity of an extension
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModManifest {
    pub name: String,
    pub version: String,
    /// WebAssembly entry module inside the bundle, if the extension has code
    #[serde(default)]
    pub entry: Option<String>,
    /// Further resources a remote loader should fetch alongside the entry
    #[serde(default)]
    pub resources: Vec<String>,
}

impl ModManifest {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            entry: None,
            resources: Vec::new(),
        }
    }
}

/// Opaque resources keyed by relative path
#[derive(Debug, Clone, Default)]
pub struct ModBundle {
    files: HashMap<String, Vec<u8>>,
}

impl ModBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read every file below `root`, keyed by its path relative to `root`
    pub fn from_dir(root: &Path) -> Result<Self> {
        let mut bundle = Self::new();
        let mut pending = vec![root.to_path_buf()];

        while let Some(dir) = pending.pop() {
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.is_dir() {
                    pending.push(path);
                    continue;
                }

                let relative = path
                    .strip_prefix(root)
                    .map_err(|e| Error::Other(format!("Bad bundle path {path:?}: {e}")))?;
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                bundle.insert(key, fs::read(&path)?);
            }
        }

        Ok(bundle)
    }

    pub fn insert(&mut self, path: impl AsRef<str>, bytes: Vec<u8>) {
        self.files.insert(normalize(path.as_ref()), bytes);
    }

    pub fn resource(&self, path: &str) -> Option<&[u8]> {
        self.files.get(&normalize(path)).map(Vec::as_slice)
    }

    pub fn manifest(&self) -> Result<ModManifest> {
        let bytes = self
            .resource(MANIFEST_PATH)
            .ok_or_else(|| Error::NotFound(format!("bundle has no {MANIFEST_PATH}")))?;
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn normalize(path: &str) -> String {
    path.trim_start_matches("./").trim_start_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_paths_are_normalized() {
        let mut bundle = ModBundle::new();
        bundle.insert("./images/tnt.png", vec![1, 2, 3]);

        assert_eq!(bundle.resource("images/tnt.png"), Some(&[1u8, 2, 3][..]));
        assert_eq!(bundle.resource("/images/tnt.png"), Some(&[1u8, 2, 3][..]));
        assert!(bundle.resource("images/other.png").is_none());
    }

    #[test]
    fn test_manifest_parsing() {
        let mut bundle = ModBundle::new();
        assert!(bundle.manifest().is_err());

        bundle.insert(
            MANIFEST_PATH,
            br#"{"name":"boom","version":"1.2.0","entry":"main.wasm"}"#.to_vec(),
        );
        let manifest = bundle.manifest().unwrap();
        assert_eq!(manifest.name, "boom");
        assert_eq!(manifest.entry.as_deref(), Some("main.wasm"));
        assert!(manifest.resources.is_empty());
    }
}
