//! Pretrained model registry: maps a model-type key to its checkpoint,
//! encoder config, tokenizer and casing convention.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TagtuneError};

/// Default directory that holds pretrained model folders.
pub const DEFAULT_MODEL_ROOT: &str = "models";

/// Files and conventions of one pretrained encoder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// safetensors weights of the pretrained encoder.
    pub checkpoint: PathBuf,
    /// HuggingFace `config.json` of the encoder.
    pub config: PathBuf,
    /// HuggingFace `tokenizer.json`.
    pub tokenizer: PathBuf,
    /// Whether words are lowercased before word-piece lookup.
    pub do_lower_case: bool,
    /// Name of the base checkpoint the weights derive from.
    pub pretrained_model_name: String,
}

impl ModelSpec {
    fn in_dir(dir: &str, do_lower_case: bool, pretrained_model_name: &str) -> Self {
        let dir = PathBuf::from(dir);
        Self {
            checkpoint: dir.join("model.safetensors"),
            config: dir.join("config.json"),
            tokenizer: dir.join("tokenizer.json"),
            do_lower_case,
            pretrained_model_name: pretrained_model_name.to_string(),
        }
    }

    /// Resolve relative paths against `root`.
    pub fn resolve(&self, root: &Path) -> Self {
        let join = |p: &PathBuf| {
            if p.is_absolute() {
                p.clone()
            } else {
                root.join(p)
            }
        };
        Self {
            checkpoint: join(&self.checkpoint),
            config: join(&self.config),
            tokenizer: join(&self.tokenizer),
            do_lower_case: self.do_lower_case,
            pretrained_model_name: self.pretrained_model_name.clone(),
        }
    }
}

/// Fixed mapping from model-type keys to pretrained model specs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRegistry {
    #[serde(default = "default_root")]
    root: PathBuf,
    models: BTreeMap<String, ModelSpec>,
}

fn default_root() -> PathBuf {
    PathBuf::from(DEFAULT_MODEL_ROOT)
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ModelRegistry {
    /// Registry with the built-in model types.
    pub fn builtin() -> Self {
        let mut models = BTreeMap::new();
        models.insert(
            "bert-base-cased".to_string(),
            ModelSpec::in_dir("bert-base-cased", false, "bert-base-cased"),
        );
        models.insert(
            "bert-base-uncased".to_string(),
            ModelSpec::in_dir("bert-base-uncased", true, "bert-base-uncased"),
        );
        models.insert(
            "biobert".to_string(),
            ModelSpec::in_dir("biobert", false, "bert-base-cased"),
        );
        models.insert(
            "biomegatron".to_string(),
            ModelSpec::in_dir("biomegatron", false, "megatron-bert-345m-cased"),
        );

        Self {
            root: default_root(),
            models,
        }
    }

    /// Load a registry file. Entries override or extend the built-ins.
    pub fn from_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| TagtuneError::io(path, e))?;
        let loaded: ModelRegistry = serde_json::from_str(&content)?;

        let mut registry = Self::builtin();
        registry.root = loaded.root;
        registry.models.extend(loaded.models);
        Ok(registry)
    }

    pub fn with_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.root = root.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Spec for `key` with paths resolved against the model root.
    pub fn get(&self, key: &str) -> Result<ModelSpec> {
        self.models
            .get(key)
            .map(|spec| spec.resolve(&self.root))
            .ok_or_else(|| TagtuneError::UnknownModel(key.to_string()))
    }

    pub fn insert(&mut self, key: impl Into<String>, spec: ModelSpec) {
        self.models.insert(key.into(), spec);
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }
}
