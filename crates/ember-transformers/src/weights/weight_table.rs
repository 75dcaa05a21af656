//! Name → tensor table built from one or more safetensors shards.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use half::{bf16, f16};
use memmap2::Mmap;
use ndarray::{ArrayD, IxDyn};
use safetensors::{Dtype, SafeTensors};

use crate::error::{InferenceError, InferenceResult};

/// Owned f32 copies of every tensor in a checkpoint.
///
/// Shards are processed in file-name order so duplicate resolution and
/// progress reporting are deterministic.
#[derive(Debug, Default)]
pub struct WeightTable {
    tensors: HashMap<String, ArrayD<f32>>,
    /// Names stored in a dtype we do not widen, with that dtype.
    unsupported: HashMap<String, String>,
    shard_count: usize,
}

fn decode_payload(dtype: Dtype, bytes: &[u8]) -> Option<Vec<f32>> {
    match dtype {
        Dtype::F32 => Some(
            bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        ),
        Dtype::F16 => Some(
            bytes
                .chunks_exact(2)
                .map(|c| f16::from_le_bytes([c[0], c[1]]).to_f32())
                .collect(),
        ),
        Dtype::BF16 => Some(
            bytes
                .chunks_exact(2)
                .map(|c| bf16::from_le_bytes([c[0], c[1]]).to_f32())
                .collect(),
        ),
        _ => None,
    }
}

impl WeightTable {
    /// Builds a table from in-memory tensors.
    pub fn from_tensors(tensors: HashMap<String, ArrayD<f32>>) -> Self {
        Self {
            tensors,
            unsupported: HashMap::new(),
            shard_count: 0,
        }
    }

    /// Loads every shard, reporting `(i + 1) / n` to `progress` after shard `i`.
    pub fn load<P: AsRef<Path>>(paths: &[P], mut progress: impl FnMut(f32)) -> InferenceResult<Self> {
        if paths.is_empty() {
            return Err(InferenceError::Checkpoint(anyhow!("no checkpoint shards given")));
        }
        let mut sorted: Vec<PathBuf> = paths.iter().map(|p| p.as_ref().to_path_buf()).collect();
        sorted.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        let mut table = WeightTable::default();
        let total = sorted.len();
        log::info!("Loading checkpoint: {} shard(s)", total);

        for (idx, path) in sorted.iter().enumerate() {
            table.load_shard(path).map_err(InferenceError::Checkpoint)?;
            table.shard_count += 1;
            log::debug!(
                "loaded shard {}/{}: {:?}",
                idx + 1,
                total,
                path.file_name().unwrap_or_default()
            );
            progress((idx + 1) as f32 / total as f32);
        }

        log::info!(
            "Checkpoint loaded: {} tensors from {} shard(s)",
            table.tensors.len(),
            table.shard_count
        );
        Ok(table)
    }

    /// Discovers `*.safetensors` files directly inside `dir` and loads them.
    pub fn from_directory(dir: impl AsRef<Path>, progress: impl FnMut(f32)) -> InferenceResult<Self> {
        let shards = Self::discover_shards(dir.as_ref())?;
        Self::load(&shards, progress)
    }

    pub fn discover_shards(dir: &Path) -> InferenceResult<Vec<PathBuf>> {
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("failed to read model directory {}", dir.display()))
            .map_err(InferenceError::Checkpoint)?;
        let mut shards = Vec::new();
        for entry in entries {
            let path = entry
                .context("failed to read directory entry")
                .map_err(InferenceError::Checkpoint)?
                .path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "safetensors") {
                shards.push(path);
            }
        }
        if shards.is_empty() {
            return Err(InferenceError::Checkpoint(anyhow!(
                "no .safetensors files found in {}",
                dir.display()
            )));
        }
        shards.sort();
        Ok(shards)
    }

    fn load_shard(&mut self, path: &Path) -> anyhow::Result<()> {
        let file = File::open(path).with_context(|| format!("failed to open {:?}", path))?;
        // SAFETY: the map is read-only and dropped before this function returns;
        // all tensor data is copied out.
        let mmap = unsafe { Mmap::map(&file) }.with_context(|| format!("failed to mmap {:?}", path))?;
        let tensors = SafeTensors::deserialize(&mmap[..])
            .with_context(|| format!("failed to parse safetensors: {:?}", path))?;

        for (name, view) in tensors.tensors() {
            let Some(values) = decode_payload(view.dtype(), view.data()) else {
                log::warn!("skipping '{}': unsupported dtype {:?}", name, view.dtype());
                self.unsupported.insert(name, format!("{:?}", view.dtype()));
                continue;
            };
            let array = ArrayD::from_shape_vec(IxDyn(view.shape()), values)
                .with_context(|| format!("tensor '{}' payload does not match its shape", name))?;
            if self.tensors.insert(name.clone(), array).is_some() {
                log::warn!("tensor '{}' appears in more than one shard; using {:?}", name, path);
            }
            self.unsupported.remove(&name);
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ArrayD<f32>> {
        self.tensors.get(name)
    }

    /// Removes and returns a tensor, avoiding a copy when binding.
    pub fn take(&mut self, name: &str) -> Option<ArrayD<f32>> {
        self.tensors.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tensors.contains_key(name)
    }

    /// Source dtype of a tensor that was skipped during loading.
    pub fn unsupported_dtype(&self, name: &str) -> Option<&str> {
        self.unsupported.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn shard_count(&self) -> usize {
        self.shard_count
    }

    /// Remaining tensor names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tensors.keys().cloned().collect();
        names.sort();
        names
    }
}
