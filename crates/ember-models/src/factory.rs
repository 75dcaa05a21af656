//! Maps a model-type tag and a manifest to a bound [`DecoderStack`].

use ember_transformers::decoder::{DecoderBuilder, DecoderStack};
use ember_transformers::error::InferenceResult;
use ember_transformers::weights::ParameterBinder;
use ember_transformers::ModelConfiguration;

use crate::architecture::ArchitectureTag;
use crate::models::{variant_for, VariantSpec};

pub struct ArchitectureFactory;

impl ArchitectureFactory {
    /// Parses `tag` and picks the family variant for `config`.
    pub fn resolve(tag: &str, config: &ModelConfiguration) -> InferenceResult<(ArchitectureTag, VariantSpec)> {
        let tag = ArchitectureTag::parse(tag)?;
        let spec = variant_for(&tag, config);
        log::debug!(
            "Resolved '{}' to {} (qk_norm: {}, qkv_bias: {}, eos: {:?})",
            tag,
            spec.family,
            spec.has_qk_norm(),
            spec.has_qkv_bias(),
            spec.eos_token_ids
        );
        Ok((tag, spec))
    }

    /// Names and shapes of every parameter the variant binds, in binding order.
    pub fn declared_parameters(tag: &str, config: &ModelConfiguration) -> InferenceResult<Vec<(String, Vec<usize>)>> {
        let (_, spec) = Self::resolve(tag, config)?;
        Ok(DecoderBuilder::new(config, &spec.layout, spec.options).declared_parameters())
    }

    pub fn build(
        tag: &str,
        config: &ModelConfiguration,
        binder: &mut ParameterBinder,
    ) -> InferenceResult<(DecoderStack, VariantSpec)> {
        let (_, spec) = Self::resolve(tag, config)?;
        let stack = Self::bind(config, &spec, binder)?;
        Ok((stack, spec))
    }

    /// Builds an already resolved variant.
    pub fn bind(config: &ModelConfiguration, spec: &VariantSpec, binder: &mut ParameterBinder) -> InferenceResult<DecoderStack> {
        DecoderBuilder::new(config, &spec.layout, spec.options).build(binder)
    }
}
