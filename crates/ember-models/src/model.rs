//! A loaded, ready-to-generate model.

use std::path::Path;
use std::sync::Arc;

use ember_transformers::decoder::DecoderStack;
use ember_transformers::error::{InferenceError, InferenceResult};
use ember_transformers::tokenizer::TextTokenizer;
use ember_transformers::weights::{BindingMode, LoadReport, ParameterBinder, WeightTable};
use ember_transformers::{
    CancellationToken, DType, Device, GenerationConfig, GenerationLoop, ModelConfiguration,
    PrecisionPolicy,
};

use crate::architecture::{ArchitectureFamily, ArchitectureTag};
use crate::factory::ArchitectureFactory;

/// Settings for one load call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    pub device: Device,
    /// Working dtype for activations and stored weights.
    pub dtype: DType,
    /// Abort on the first missing or mis-shaped weight instead of default-initialising it.
    pub strict_weight_binding: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            device: Device::Cpu,
            dtype: DType::F32,
            strict_weight_binding: true,
        }
    }
}

impl LoadOptions {
    pub fn lenient(mut self) -> Self {
        self.strict_weight_binding = false;
        self
    }

    pub fn with_dtype(mut self, dtype: DType) -> Self {
        self.dtype = dtype;
        self
    }

    fn binding_mode(&self) -> BindingMode {
        if self.strict_weight_binding {
            BindingMode::Strict
        } else {
            BindingMode::Lenient
        }
    }
}

/// A bound [`DecoderStack`] plus everything generation needs around it.
pub struct BoundModel {
    config: ModelConfiguration,
    tag: ArchitectureTag,
    family: ArchitectureFamily,
    stack: Arc<DecoderStack>,
    eos_token_ids: Vec<u32>,
    tokenizer: Option<Arc<dyn TextTokenizer>>,
    report: LoadReport,
    options: LoadOptions,
}

impl BoundModel {
    /// Reads the shards in file-name order and binds every declared parameter.
    ///
    /// `progress` receives a fraction in `(0, 1]` after each shard. In strict
    /// mode any binding error aborts and the partially bound state is dropped.
    pub fn load<P: AsRef<Path>>(
        paths: &[P],
        manifest: &ModelConfiguration,
        options: &LoadOptions,
        progress: impl FnMut(f32),
    ) -> InferenceResult<Self> {
        // Reject the tag before touching any shard.
        ArchitectureTag::parse(&manifest.architecture)?;
        let table = WeightTable::load(paths, progress)?;
        Self::from_table(table, manifest, options)
    }

    pub fn from_table(
        table: WeightTable,
        manifest: &ModelConfiguration,
        options: &LoadOptions,
    ) -> InferenceResult<Self> {
        let start = std::time::Instant::now();
        let policy = PrecisionPolicy::new(options.dtype);
        let mut binder = ParameterBinder::new(table, options.binding_mode(), policy);

        let (tag, spec) = ArchitectureFactory::resolve(&manifest.architecture, manifest)?;
        let stack = ArchitectureFactory::bind(manifest, &spec, &mut binder)?;
        let report = binder.finish();

        log::info!(
            "Loaded {} ({} layers, {} parameters bound, dtype {}) in {:.2}s",
            tag,
            stack.num_layers(),
            report.bound,
            options.dtype,
            start.elapsed().as_secs_f32()
        );

        Ok(Self {
            config: manifest.clone(),
            family: spec.family,
            tag,
            stack: Arc::new(stack),
            eos_token_ids: spec.eos_token_ids,
            tokenizer: None,
            report,
            options: *options,
        })
    }

    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn TextTokenizer>) -> Self {
        self.tokenizer = Some(tokenizer);
        self
    }

    pub fn set_tokenizer(&mut self, tokenizer: Arc<dyn TextTokenizer>) {
        self.tokenizer = Some(tokenizer);
    }

    pub fn config(&self) -> &ModelConfiguration {
        &self.config
    }

    pub fn architecture(&self) -> &ArchitectureTag {
        &self.tag
    }

    pub fn family(&self) -> ArchitectureFamily {
        self.family
    }

    pub fn stack(&self) -> &Arc<DecoderStack> {
        &self.stack
    }

    pub fn eos_token_ids(&self) -> &[u32] {
        &self.eos_token_ids
    }

    pub fn tokenizer(&self) -> Option<&Arc<dyn TextTokenizer>> {
        self.tokenizer.as_ref()
    }

    pub fn load_report(&self) -> &LoadReport {
        &self.report
    }

    pub fn options(&self) -> &LoadOptions {
        &self.options
    }

    /// Starts a greedy generation over `prompt`, which must already be formatted.
    pub fn generate(
        &self,
        prompt: &str,
        config: GenerationConfig,
        cancel: CancellationToken,
    ) -> InferenceResult<GenerationLoop> {
        let tokenizer = self.tokenizer.clone().ok_or(InferenceError::TokenizerNotLoaded)?;
        Ok(GenerationLoop::new(
            self.stack.clone(),
            tokenizer,
            prompt,
            self.eos_token_ids.clone(),
            config,
            cancel,
        ))
    }
}
