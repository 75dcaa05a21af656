//! Single-model inference service: load, unload and streaming generation.

use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_stream::stream;
use futures_core::stream::Stream;
use futures_util::TryStreamExt;

use ember_transformers::error::{InferenceError, InferenceResult};
use ember_transformers::tokenizer::{HfTokenizer, TextTokenizer};
use ember_transformers::weights::{LoadReport, WeightTable};
use ember_transformers::{
    CancellationToken, GenerationConfig, GenerationLoop, GenerationStats, ModelConfiguration,
};

use crate::model::{BoundModel, LoadOptions};
use crate::prompt::{PromptFormatter, RawPrompt};

/// Lifecycle flag guarding the loaded model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServiceState {
    #[default]
    Unloaded,
    Loading,
    Ready,
}

impl ServiceState {
    pub fn name(&self) -> &'static str {
        match self {
            ServiceState::Unloaded => "Unloaded",
            ServiceState::Loading => "Loading",
            ServiceState::Ready => "Ready",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Owns at most one [`BoundModel`].
///
/// Load and unload take `&mut self`, so they cannot overlap a call that
/// borrows the service. A stream returned by [`generate_stream`] keeps its own
/// handle on the weights and stays valid after `unload`.
///
/// [`generate_stream`]: InferenceService::generate_stream
pub struct InferenceService {
    state: ServiceState,
    model: Option<BoundModel>,
    formatter: Arc<dyn PromptFormatter>,
    last_stats: Arc<Mutex<Option<GenerationStats>>>,
}

impl Default for InferenceService {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceService {
    pub fn new() -> Self {
        Self {
            state: ServiceState::Unloaded,
            model: None,
            formatter: Arc::new(RawPrompt),
            last_stats: Arc::new(Mutex::new(None)),
        }
    }

    /// Loads a HF-style model directory: `config.json`, `*.safetensors` and,
    /// when present, `tokenizer.json`.
    pub fn from_pretrained(dir: impl AsRef<Path>, options: &LoadOptions) -> InferenceResult<Self> {
        let mut service = Self::new();
        service.load_pretrained(dir, options, |_| {})?;
        Ok(service)
    }

    pub fn with_formatter(mut self, formatter: Arc<dyn PromptFormatter>) -> Self {
        self.formatter = formatter;
        self
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    pub fn model(&self) -> Option<&BoundModel> {
        self.model.as_ref()
    }

    fn expect_state(&self, expected: ServiceState) -> InferenceResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(InferenceError::InvalidState {
                expected: expected.name(),
                actual: self.state.name(),
            })
        }
    }

    fn ready_model(&self) -> InferenceResult<&BoundModel> {
        match (&self.state, &self.model) {
            (ServiceState::Ready, Some(model)) => Ok(model),
            _ => Err(InferenceError::ModelNotLoaded),
        }
    }

    /// Binds a model from checkpoint shards. Only valid from `Unloaded`; any
    /// failure leaves the service `Unloaded`.
    pub fn load_model<P: AsRef<Path>>(
        &mut self,
        paths: &[P],
        manifest: &ModelConfiguration,
        options: &LoadOptions,
        progress: impl FnMut(f32),
    ) -> InferenceResult<&LoadReport> {
        self.expect_state(ServiceState::Unloaded)?;
        self.state = ServiceState::Loading;
        log::info!("Loading {} from {} shard(s)", manifest.architecture, paths.len());

        match BoundModel::load(paths, manifest, options, progress) {
            Ok(model) => self.install(model),
            Err(e) => {
                log::error!("Failed to load {}: {}", manifest.architecture, e);
                self.state = ServiceState::Unloaded;
                Err(e)
            }
        }
    }

    pub fn load_pretrained(
        &mut self,
        dir: impl AsRef<Path>,
        options: &LoadOptions,
        progress: impl FnMut(f32),
    ) -> InferenceResult<&LoadReport> {
        let dir = dir.as_ref();
        self.expect_state(ServiceState::Unloaded)?;
        self.state = ServiceState::Loading;

        let loaded = Self::read_pretrained(dir, options, progress);
        match loaded {
            Ok(model) => self.install(model),
            Err(e) => {
                log::error!("Failed to load {}: {}", dir.display(), e);
                self.state = ServiceState::Unloaded;
                Err(e)
            }
        }
    }

    fn read_pretrained(dir: &Path, options: &LoadOptions, progress: impl FnMut(f32)) -> InferenceResult<BoundModel> {
        let manifest = ModelConfiguration::from_file(dir.join("config.json"))?;
        let tokenizer_path = dir.join("tokenizer.json");
        let tokenizer = if tokenizer_path.is_file() {
            Some(HfTokenizer::from_file(&tokenizer_path)?)
        } else {
            log::warn!("No tokenizer.json in {}; generation needs a tokenizer", dir.display());
            None
        };

        let table = WeightTable::from_directory(dir, progress)?;
        let model = BoundModel::from_table(table, &manifest, options)?;
        Ok(match tokenizer {
            Some(t) => model.with_tokenizer(Arc::new(t)),
            None => model,
        })
    }

    fn install(&mut self, model: BoundModel) -> InferenceResult<&LoadReport> {
        self.state = ServiceState::Ready;
        let model = self.model.insert(model);
        Ok(model.load_report())
    }

    pub fn set_tokenizer(&mut self, tokenizer: Arc<dyn TextTokenizer>) -> InferenceResult<()> {
        self.expect_state(ServiceState::Ready)?;
        let model = self.model.as_mut().ok_or(InferenceError::ModelNotLoaded)?;
        model.set_tokenizer(tokenizer);
        Ok(())
    }

    /// Drops the bound model. Unloading an unloaded service is a no-op.
    pub fn unload(&mut self) -> InferenceResult<()> {
        if self.state == ServiceState::Loading {
            return Err(InferenceError::InvalidState {
                expected: ServiceState::Ready.name(),
                actual: self.state.name(),
            });
        }
        if let Some(model) = self.model.take() {
            log::info!("Unloaded {}", model.architecture());
        }
        self.state = ServiceState::Unloaded;
        Ok(())
    }

    /// Stats of the last stream that ended, whether it finished, failed or was dropped.
    pub fn last_generation_stats(&self) -> Option<GenerationStats> {
        self.last_stats.lock().ok().and_then(|slot| slot.clone())
    }

    pub fn generate_stream(
        &self,
        prompt: &str,
        max_new_tokens: usize,
        cancel: CancellationToken,
    ) -> InferenceResult<impl Stream<Item = InferenceResult<String>> + Send + 'static> {
        self.generate_stream_with(prompt, GenerationConfig::with_max_new_tokens(max_new_tokens), cancel)
    }

    /// Streams decoded fragments. Each decoding step runs on tokio's blocking
    /// pool, so the stream must be polled inside a tokio runtime.
    ///
    /// Stats are published when the stream finishes, fails, or is dropped.
    pub fn generate_stream_with(
        &self,
        prompt: &str,
        config: GenerationConfig,
        cancel: CancellationToken,
    ) -> InferenceResult<impl Stream<Item = InferenceResult<String>> + Send + 'static> {
        let model = self.ready_model()?;
        let formatted = self.formatter.format(prompt);
        let generation = model.generate(&formatted, config, cancel)?;
        let mut pending = Some(StatsPublisher {
            slot: Arc::clone(&self.last_stats),
            generation,
        });

        Ok(stream! {
            while let Some(mut publisher) = pending.take() {
                let step = tokio::task::spawn_blocking(move || {
                    let item = publisher.generation.next();
                    (publisher, item)
                })
                .await;
                match step {
                    Ok((publisher, Some(item))) => {
                        pending = Some(publisher);
                        yield item;
                    }
                    Ok((_, None)) => {}
                    Err(e) => {
                        yield Err(InferenceError::ForwardPassFailure(anyhow::Error::new(e)));
                    }
                }
            }
        })
    }

    /// Concatenates the whole stream.
    pub async fn generate_text(
        &self,
        prompt: &str,
        max_new_tokens: usize,
        cancel: CancellationToken,
    ) -> InferenceResult<String> {
        let stream = self.generate_stream(prompt, max_new_tokens, cancel)?;
        let fragments: Vec<String> = stream.try_collect().await?;
        Ok(fragments.concat())
    }
}

/// Owns a running generation and writes its stats to the service slot on drop.
///
/// Moves into the blocking task for each step, so a stream dropped mid-step
/// still publishes once that step returns.
struct StatsPublisher {
    slot: Arc<Mutex<Option<GenerationStats>>>,
    generation: GenerationLoop,
}

impl Drop for StatsPublisher {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some(self.generation.stats().clone());
        }
    }
}
