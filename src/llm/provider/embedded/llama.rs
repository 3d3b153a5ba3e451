//! GGUF inference through llama.cpp
//!
//! Only compiled with the `llama` feature.

use std::num::NonZeroU32;
use std::ops::ControlFlow;

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;

use super::backend::{render_chatml, InferenceBackend, ModelCache};
use crate::core::{ChatMessage, QuillError, Result};

/// llama.cpp limits a single decode batch
const PREFILL_BATCH_SIZE: usize = 512;
const CONTEXT_SIZE: u32 = 4096;
const MAX_NEW_TOKENS: usize = 1024;

pub struct LlamaCppBackend {
    cache: ModelCache,
    backend: Option<LlamaBackend>,
    model: Option<LlamaModel>,
}

impl LlamaCppBackend {
    pub fn new(cache: ModelCache) -> Self {
        Self {
            cache,
            backend: None,
            model: None,
        }
    }
}

fn inference_error(e: impl std::fmt::Display) -> QuillError {
    QuillError::embedded(e.to_string())
}

impl InferenceBackend for LlamaCppBackend {
    fn load(&mut self, model_id: &str, on_progress: &mut dyn FnMut(f32, &str)) -> Result<()> {
        let path = self.cache.path_for(model_id);
        if !path.is_file() {
            return Err(QuillError::embedded(format!(
                "model file not found: {}",
                path.display()
            )));
        }

        on_progress(0.05, "Initializing llama.cpp");
        // The llama.cpp backend may only be initialized once per process
        if self.backend.is_none() {
            self.backend = Some(LlamaBackend::init().map_err(inference_error)?);
        }
        let Some(backend) = self.backend.as_ref() else {
            return Err(QuillError::embedded("llama.cpp backend unavailable"));
        };

        self.model = None;
        on_progress(0.2, "Loading model weights");
        let model = LlamaModel::load_from_file(backend, &path, &LlamaModelParams::default())
            .map_err(inference_error)?;
        self.model = Some(model);

        on_progress(1.0, "Model loaded");
        Ok(())
    }

    fn generate(
        &mut self,
        messages: &[ChatMessage],
        on_token: &mut dyn FnMut(&str) -> ControlFlow<()>,
    ) -> Result<()> {
        let (Some(backend), Some(model)) = (self.backend.as_ref(), self.model.as_ref()) else {
            return Err(QuillError::embedded("no model loaded"));
        };

        let n_threads = std::thread::available_parallelism()
            .map(|n| n.get() as i32)
            .unwrap_or(4);
        let ctx_params = LlamaContextParams::default()
            .with_n_ctx(NonZeroU32::new(CONTEXT_SIZE))
            .with_n_threads(n_threads)
            .with_n_threads_batch(n_threads);

        let mut ctx = model
            .new_context(backend, ctx_params)
            .map_err(inference_error)?;

        let prompt = render_chatml(messages);
        let tokens = model
            .str_to_token(&prompt, AddBos::Always)
            .map_err(inference_error)?;

        let mut batch = LlamaBatch::new(PREFILL_BATCH_SIZE, 1);
        let n_tokens = tokens.len();
        let last_pos = (n_tokens as i32).saturating_sub(1);

        // Prefill in slices no larger than one batch
        let mut pos = 0i32;
        for chunk in tokens.chunks(PREFILL_BATCH_SIZE) {
            batch.clear();
            for (j, &token) in chunk.iter().enumerate() {
                let p = pos + j as i32;
                batch
                    .add(token, p, &[0], p == last_pos)
                    .map_err(inference_error)?;
            }
            ctx.decode(&mut batch).map_err(inference_error)?;
            pos += chunk.len() as i32;
        }

        let mut sampler =
            LlamaSampler::chain_simple([LlamaSampler::dist(1234), LlamaSampler::greedy()]);
        let mut n_cur = n_tokens as i32;

        for _ in 0..MAX_NEW_TOKENS {
            let token = sampler.sample(&ctx, batch.n_tokens() - 1);
            sampler.accept(token);

            if model.is_eog_token(token) {
                break;
            }

            let piece = model
                .token_to_str(token, Special::Tokenize)
                .unwrap_or_default();
            if !piece.is_empty() && on_token(&piece).is_break() {
                break;
            }

            batch.clear();
            batch
                .add(token, n_cur, &[0], true)
                .map_err(inference_error)?;
            n_cur += 1;

            ctx.decode(&mut batch).map_err(inference_error)?;
        }

        Ok(())
    }
}
