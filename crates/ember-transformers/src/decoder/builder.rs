//! Assembles a [`DecoderStack`] by binding every declared parameter.

use std::sync::Arc;

use ndarray::Array2;

use crate::activations::Activation;
use crate::attention::SelfAttention;
use crate::config::{LayerKind, ModelConfiguration};
use crate::embeddings::Embeddings;
use crate::error::{InferenceError, InferenceResult};
use crate::feedforward::SwiGluFeedForward;
use crate::linear_layer::LinearLayer;
use crate::normalization::{NormStyle, RMSNorm};
use crate::rope::{RoPE, DEFAULT_ROPE_CACHE};
use crate::short_conv::ShortConv;
use crate::traits::{layer_name, ArchitectureOptions, DecoderLayout};
use crate::weights::{DefaultInit, ParameterBinder};

use super::{DecoderStack, OutputHead, TokenMixer, TransformerLayer};

fn norm_init(style: NormStyle) -> DefaultInit {
    DefaultInit::Constant(style.identity_weight())
}

pub struct DecoderBuilder<'a> {
    config: &'a ModelConfiguration,
    layout: &'a DecoderLayout,
    options: ArchitectureOptions,
}

impl<'a> DecoderBuilder<'a> {
    pub fn new(config: &'a ModelConfiguration, layout: &'a DecoderLayout, options: ArchitectureOptions) -> Self {
        Self { config, layout, options }
    }

    /// Binds all parameters in declaration order. In strict mode the first
    /// binding error aborts and everything bound so far is dropped.
    pub fn build(&self, binder: &mut ParameterBinder) -> InferenceResult<DecoderStack> {
        let cfg = self.config;
        let policy = binder.policy();
        let hidden = cfg.hidden_size;

        log::info!(
            "Building {} decoder: {} layers, hidden {}, {} heads / {} kv heads, dtype {}",
            cfg.architecture,
            cfg.num_layers,
            hidden,
            cfg.num_attention_heads,
            cfg.num_kv_heads,
            policy.working_dtype()
        );

        let embed = binder.bind_2d(&self.layout.token_embedding, [cfg.vocab_size, hidden], DefaultInit::Zeros)?;
        let mut embeddings = Embeddings::new(Arc::new(embed), policy);
        if self.options.scale_embeddings {
            embeddings = embeddings.with_sqrt_hidden_scale();
        }

        let rope = Arc::new(RoPE::new(cfg.head_dim, DEFAULT_ROPE_CACHE, cfg.rope_theta, policy));

        let mut layers = Vec::with_capacity(cfg.num_layers);
        for i in 0..cfg.num_layers {
            layers.push(self.build_layer(i, binder, &rope)?);
            log::debug!("bound layer {}/{}", i + 1, cfg.num_layers);
        }

        let final_norm = RMSNorm::new(
            binder.bind_1d(&self.layout.final_norm, hidden, norm_init(self.options.norm_style))?,
            cfg.rms_norm_eps,
            self.options.norm_style,
            policy,
        );

        let head = if cfg.tie_word_embeddings {
            OutputHead::Tied
        } else {
            let w = binder.bind_2d(&self.layout.lm_head, [cfg.vocab_size, hidden], DefaultInit::Zeros)?;
            OutputHead::Dedicated(LinearLayer::new(w, None))
        };

        Ok(DecoderStack::new(
            embeddings,
            layers,
            final_norm,
            head,
            cfg.final_logit_softcapping,
            policy,
        ))
    }

    /// Every parameter name and shape `build` will request, in binding order.
    pub fn declared_parameters(&self) -> Vec<(String, Vec<usize>)> {
        let cfg = self.config;
        let layout = &self.layout.layer;
        let hidden = cfg.hidden_size;
        let mut params = vec![(self.layout.token_embedding.clone(), vec![cfg.vocab_size, hidden])];

        for i in 0..cfg.num_layers {
            let mut push = |template: &str, shape: Vec<usize>| params.push((layer_name(template, i), shape));
            push(&layout.attn_norm, vec![hidden]);
            match cfg.layer_kind(i) {
                LayerKind::Attention => {
                    let a = &layout.self_attn;
                    push(&a.q_weight, vec![cfg.q_dim(), hidden]);
                    if let Some(b) = &a.q_bias {
                        push(b, vec![cfg.q_dim()]);
                    }
                    push(&a.k_weight, vec![cfg.kv_dim(), hidden]);
                    if let Some(b) = &a.k_bias {
                        push(b, vec![cfg.kv_dim()]);
                    }
                    push(&a.v_weight, vec![cfg.kv_dim(), hidden]);
                    if let Some(b) = &a.v_bias {
                        push(b, vec![cfg.kv_dim()]);
                    }
                    push(&a.o_weight, vec![hidden, cfg.q_dim()]);
                    if let (Some(qn), Some(kn)) = (&a.q_norm, &a.k_norm) {
                        push(qn, vec![cfg.head_dim]);
                        push(kn, vec![cfg.head_dim]);
                    }
                }
                LayerKind::ShortConv => {
                    if let Some(c) = &layout.short_conv {
                        push(&c.in_proj_weight, vec![3 * hidden, hidden]);
                        push(&c.conv_weight, vec![hidden, 1, cfg.conv_kernel_size]);
                        if let (Some(b), true) = (&c.conv_bias, cfg.conv_bias) {
                            push(b, vec![hidden]);
                        }
                        push(&c.out_proj_weight, vec![hidden, hidden]);
                    }
                }
            }
            if let Some(n) = &layout.post_attn_norm {
                push(n, vec![hidden]);
            }
            push(&layout.ffn_norm, vec![hidden]);
            push(&layout.ffn.gate_weight, vec![cfg.intermediate_size, hidden]);
            push(&layout.ffn.up_weight, vec![cfg.intermediate_size, hidden]);
            push(&layout.ffn.down_weight, vec![hidden, cfg.intermediate_size]);
            if let Some(n) = &layout.post_ffn_norm {
                push(n, vec![hidden]);
            }
        }

        params.push((self.layout.final_norm.clone(), vec![hidden]));
        if !cfg.tie_word_embeddings {
            params.push((self.layout.lm_head.clone(), vec![cfg.vocab_size, hidden]));
        }
        params
    }

    fn norm(&self, binder: &mut ParameterBinder, template: &str, i: usize, dim: usize, style: NormStyle) -> InferenceResult<RMSNorm> {
        let weight = binder.bind_1d(&layer_name(template, i), dim, norm_init(style))?;
        Ok(RMSNorm::new(weight, self.config.rms_norm_eps, style, binder.policy()))
    }

    fn linear(
        &self,
        binder: &mut ParameterBinder,
        weight: &str,
        bias: Option<&String>,
        i: usize,
        out_features: usize,
        in_features: usize,
    ) -> InferenceResult<LinearLayer> {
        let w = binder.bind_2d(&layer_name(weight, i), [out_features, in_features], DefaultInit::Zeros)?;
        let b = bias
            .map(|name| binder.bind_1d(&layer_name(name, i), out_features, DefaultInit::Zeros))
            .transpose()?;
        Ok(LinearLayer::new(w, b))
    }

    fn build_layer(&self, i: usize, binder: &mut ParameterBinder, rope: &Arc<RoPE>) -> InferenceResult<TransformerLayer> {
        let cfg = self.config;
        let layout = &self.layout.layer;
        let hidden = cfg.hidden_size;
        let style = self.options.norm_style;
        let policy = binder.policy();

        let attn_norm = self.norm(binder, &layout.attn_norm, i, hidden, style)?;

        let mixer = match cfg.layer_kind(i) {
            LayerKind::Attention => {
                let a = &layout.self_attn;
                let q = self.linear(binder, &a.q_weight, a.q_bias.as_ref(), i, cfg.q_dim(), hidden)?;
                let k = self.linear(binder, &a.k_weight, a.k_bias.as_ref(), i, cfg.kv_dim(), hidden)?;
                let v = self.linear(binder, &a.v_weight, a.v_bias.as_ref(), i, cfg.kv_dim(), hidden)?;
                let o = self.linear(binder, &a.o_weight, None, i, hidden, cfg.q_dim())?;
                let qk_norm = match (&a.q_norm, &a.k_norm) {
                    (Some(qn), Some(kn)) => {
                        let qk_style = self.options.qk_norm_style;
                        Some((
                            self.norm(binder, qn, i, cfg.head_dim, qk_style)?,
                            self.norm(binder, kn, i, cfg.head_dim, qk_style)?,
                        ))
                    }
                    _ => None,
                };
                TokenMixer::Attention(SelfAttention::new(
                    q,
                    k,
                    v,
                    o,
                    qk_norm,
                    cfg.num_attention_heads,
                    cfg.num_kv_heads,
                    cfg.head_dim,
                    cfg.attn_logit_softcapping,
                    Arc::clone(rope),
                    policy,
                ))
            }
            LayerKind::ShortConv => {
                let c = layout.short_conv.as_ref().ok_or_else(|| {
                    InferenceError::InvalidConfig(format!(
                        "layer {} is a short-conv layer but {} has no conv layout",
                        i, cfg.architecture
                    ))
                })?;
                let kernel = cfg.conv_kernel_size;
                let in_proj = self.linear(binder, &c.in_proj_weight, None, i, 3 * hidden, hidden)?;
                let conv = binder.bind_3d(&layer_name(&c.conv_weight, i), [hidden, 1, kernel], DefaultInit::Zeros)?;
                let conv: Array2<f32> = conv
                    .into_shape_with_order((hidden, kernel))
                    .map_err(|e| InferenceError::Checkpoint(anyhow::anyhow!("conv kernel reshape: {}", e)))?;
                let conv_bias = match (&c.conv_bias, cfg.conv_bias) {
                    (Some(name), true) => Some(binder.bind_1d(&layer_name(name, i), hidden, DefaultInit::Zeros)?),
                    _ => None,
                };
                let out_proj = self.linear(binder, &c.out_proj_weight, None, i, hidden, hidden)?;
                TokenMixer::ShortConv(
                    ShortConv::new(in_proj, conv, conv_bias, out_proj, policy)
                        .map_err(|e| InferenceError::InvalidConfig(e.to_string()))?,
                )
            }
        };

        let post_attn_norm = layout
            .post_attn_norm
            .as_ref()
            .map(|name| self.norm(binder, name, i, hidden, style))
            .transpose()?;
        let ffn_norm = self.norm(binder, &layout.ffn_norm, i, hidden, style)?;
        let f = &layout.ffn;
        let inter = cfg.intermediate_size;
        let feedforward = SwiGluFeedForward::new(
            self.linear(binder, &f.gate_weight, None, i, inter, hidden)?,
            self.linear(binder, &f.up_weight, None, i, inter, hidden)?,
            self.linear(binder, &f.down_weight, None, i, hidden, inter)?,
            Activation::from_name(&cfg.hidden_activation),
            policy,
        );

        let post_ffn_norm = layout
            .post_ffn_norm
            .as_ref()
            .map(|name| self.norm(binder, name, i, hidden, style))
            .transpose()?;

        Ok(TransformerLayer::new(attn_norm, mixer, ffn_norm, feedforward, policy)
            .with_sandwich_norms(post_attn_norm, post_ffn_norm))
    }
}
