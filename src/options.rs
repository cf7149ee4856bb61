use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// What happens to names requested while bindings are being written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum ReentrancyPolicy {
    /// Run the derived pass and the binding update again while `pending` is
    /// non-empty, up to `max_redrain_passes` extra passes.
    #[default]
    Redrain,
    /// Leave the names in `pending` until the next external trigger.
    Buffer,
}

/// What a parent's `unmount` does with nested instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum TeardownPolicy {
    #[default]
    Recursive,
    /// Children stay mounted; their owner unmounts them.
    Explicit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompileOptions {
    pub file_path: String,
    pub reentrancy: ReentrancyPolicy,
    pub teardown: TeardownPolicy,
    pub max_redrain_passes: u32,
    /// Emit the `exported()` query on the generated lifecycle object.
    pub emit_exported: bool,
    pub cache_dir: Option<PathBuf>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            file_path: String::new(),
            reentrancy: ReentrancyPolicy::default(),
            teardown: TeardownPolicy::default(),
            max_redrain_passes: 32,
            emit_exported: true,
            cache_dir: None,
        }
    }
}

impl CompileOptions {
    pub fn runtime(&self) -> RuntimeOptions {
        RuntimeOptions {
            reentrancy: self.reentrancy,
            teardown: self.teardown,
            max_redrain_passes: self.max_redrain_passes,
        }
    }
}

/// The subset of [`CompileOptions`] the Rust runtime honours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeOptions {
    pub reentrancy: ReentrancyPolicy,
    pub teardown: TeardownPolicy,
    pub max_redrain_passes: u32,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        CompileOptions::default().runtime()
    }
}
