use crate::finalize::CompileResult;
use crate::options::CompileOptions;
use crate::validate::ComponentIR;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Serialize, Deserialize)]
pub struct CacheEntry {
    pub hash: String,
    pub result: CompileResult,
}

/// Compile results on disk, keyed by component and validated by content hash.
pub struct IncrementalCache {
    cache_dir: PathBuf,
}

impl IncrementalCache {
    pub fn new(cache_dir: &Path) -> Self {
        if !cache_dir.exists() {
            if let Err(e) = fs::create_dir_all(cache_dir) {
                tracing::warn!(dir = %cache_dir.display(), error = %e, "cannot create cache directory");
            }
        }
        Self {
            cache_dir: cache_dir.to_path_buf(),
        }
    }

    /// Hash of everything that influences a compile result. `None` when the
    /// input cannot be serialized, in which case nothing is cached.
    pub fn compute_hash(ir: &ComponentIR, options: &CompileOptions) -> Option<String> {
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_string(ir).ok()?.as_bytes());
        hasher.update(serde_json::to_string(&options.runtime()).ok()?.as_bytes());
        hasher.update([options.emit_exported as u8]);
        Some(format!("{:x}", hasher.finalize()))
    }

    fn get_cache_path(&self, component: &str, file_path: &str) -> PathBuf {
        let safe_name = format!("{}_{}", file_path, component)
            .replace(['/', '\\', ':'], "_");
        self.cache_dir.join(format!("{}.json", safe_name))
    }

    pub fn get(&self, ir: &ComponentIR, hash: &str) -> Option<CompileResult> {
        let cache_path = self.get_cache_path(&ir.name, &ir.file_path);
        let data = fs::read_to_string(&cache_path).ok()?;

        let entry: CacheEntry = match serde_json::from_str(&data) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(
                    component = %ir.name,
                    error = %e,
                    "discarding corrupt cache entry"
                );
                fs::remove_file(cache_path).ok();
                return None;
            }
        };

        (entry.hash == hash).then_some(entry.result)
    }

    pub fn set(&self, ir: &ComponentIR, hash: &str, result: &CompileResult) {
        let cache_path = self.get_cache_path(&ir.name, &ir.file_path);
        let entry = CacheEntry {
            hash: hash.to_string(),
            result: result.clone(),
        };

        match serde_json::to_string(&entry) {
            Ok(data) => {
                if let Err(e) = fs::write(&cache_path, data) {
                    tracing::warn!(component = %ir.name, error = %e, "cannot write cache entry");
                }
            }
            Err(e) => tracing::warn!(component = %ir.name, error = %e, "cannot serialize cache entry"),
        }
    }
}
