//! Inference backends the embedded worker can own
//!
//! Backends are blocking and single-threaded; the worker thread is their only
//! caller, so they need `Send` but not `Sync`.

use std::fs;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use crate::core::{ChatMessage, QuillError, Result, Settings};

/// A model runtime driven by the embedded worker
pub trait InferenceBackend: Send + 'static {
    /// Load `model_id`, reporting progress as a fraction in 0.0..=1.0
    fn load(&mut self, model_id: &str, on_progress: &mut dyn FnMut(f32, &str)) -> Result<()>;

    /// Generate a reply; stop as soon as `on_token` returns `Break`
    fn generate(
        &mut self,
        messages: &[ChatMessage],
        on_token: &mut dyn FnMut(&str) -> ControlFlow<()>,
    ) -> Result<()>;
}

/// Model files on disk, one `<model_id>.gguf` per model
#[derive(Debug, Clone)]
pub struct ModelCache {
    dir: PathBuf,
}

impl ModelCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.model_dir())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, model_id: &str) -> PathBuf {
        self.dir.join(format!("{}.gguf", model_id))
    }

    /// Whether the model file is already downloaded
    pub fn is_cached(&self, model_id: &str) -> bool {
        self.path_for(model_id).is_file()
    }

    /// Ids of every cached model, sorted
    pub fn cached_models(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };

        let mut models: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "gguf"))
            .filter_map(|path| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .collect();
        models.sort();
        models
    }
}

/// Used when no inference runtime is compiled in; every load fails cleanly
#[derive(Debug, Default)]
pub struct UnavailableBackend;

impl InferenceBackend for UnavailableBackend {
    fn load(&mut self, model_id: &str, _on_progress: &mut dyn FnMut(f32, &str)) -> Result<()> {
        Err(QuillError::embedded(format!(
            "cannot load '{}': built without an embedded runtime (rebuild with --features llama)",
            model_id
        )))
    }

    fn generate(
        &mut self,
        _messages: &[ChatMessage],
        _on_token: &mut dyn FnMut(&str) -> ControlFlow<()>,
    ) -> Result<()> {
        Err(QuillError::embedded("no model loaded"))
    }
}

/// Backend selected by the enabled cargo features
pub fn default_backend(settings: &Settings) -> Box<dyn InferenceBackend> {
    #[cfg(feature = "llama")]
    {
        Box::new(super::llama::LlamaCppBackend::new(ModelCache::from_settings(
            settings,
        )))
    }

    #[cfg(not(feature = "llama"))]
    {
        let _ = settings;
        Box::new(UnavailableBackend)
    }
}

/// ChatML prompt, understood by most small instruct GGUF models
pub fn render_chatml(messages: &[ChatMessage]) -> String {
    let mut prompt = String::new();
    for msg in messages {
        prompt.push_str("<|im_start|>");
        prompt.push_str(msg.role.as_str());
        prompt.push('\n');
        prompt.push_str(&msg.content);
        prompt.push_str("<|im_end|>\n");
    }
    prompt.push_str("<|im_start|>assistant\n");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_detection() {
        let dir = std::env::temp_dir().join(format!("quillmind-models-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("tiny-q4.gguf"), b"GGUF").unwrap();
        fs::write(dir.join("alpha.gguf"), b"GGUF").unwrap();
        fs::write(dir.join("notes.txt"), b"x").unwrap();

        let cache = ModelCache::new(&dir);
        assert!(cache.is_cached("tiny-q4"));
        assert!(!cache.is_cached("missing"));
        assert_eq!(cache.cached_models(), vec!["alpha", "tiny-q4"]);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_missing_cache_dir_is_empty() {
        let cache = ModelCache::new("/nonexistent/quillmind/models");
        assert!(cache.cached_models().is_empty());
    }

    #[test]
    fn test_unavailable_backend_fails_load() {
        let mut backend = UnavailableBackend;
        let err = backend.load("tiny", &mut |_, _| {}).unwrap_err();
        assert!(err.to_string().contains("tiny"));
    }

    #[test]
    fn test_chatml_prompt() {
        let prompt = render_chatml(&[ChatMessage::system("be brief"), ChatMessage::user("hi")]);
        assert_eq!(
            prompt,
            "<|im_start|>system\nbe brief<|im_end|>\n<|im_start|>user\nhi<|im_end|>\n<|im_start|>assistant\n"
        );
    }
}
