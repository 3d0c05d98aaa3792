//! Read-only model metadata.
//!
//! The registry is built once from the built-in table plus any entries in the
//! `registry` config section and then shared by reference.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::RegistryConfig;

/// Token budget used for models the registry does not know.
pub const DEFAULT_MAX_TOKENS: u32 = 4000;

/// Metadata for one backend model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub category: String,
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature_default: f32,

    #[serde(default = "default_true")]
    pub supports_web_search: bool,

    #[serde(default)]
    pub is_free: bool,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_true() -> bool {
    true
}

impl ModelInfo {
    fn new(id: &str, name: &str, category: &str, max_tokens: u32) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            category: category.to_string(),
            max_tokens,
            temperature_default: default_temperature(),
            supports_web_search: true,
            is_free: id.ends_with(":free"),
        }
    }

    fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature_default = temperature;
        self
    }

    /// Metadata for a model that is not in the registry.
    ///
    /// `vendor/some-model-name` becomes `Some Model Name`.
    pub fn unknown(id: &str) -> Self {
        let tail = id.rsplit('/').next().unwrap_or(id);
        let name = tail
            .split('-')
            .filter(|w| !w.is_empty())
            .map(title_case)
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            is_free: false,
            ..Self::new(id, &name, "unknown", DEFAULT_MAX_TOKENS)
        }
    }
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Minimum token budget for models whose id contains `pattern`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenFloor {
    pub pattern: String,
    pub min_tokens: u32,
}

impl TokenFloor {
    pub fn new(pattern: impl Into<String>, min_tokens: u32) -> Self {
        Self {
            pattern: pattern.into(),
            min_tokens,
        }
    }
}

/// Raise `requested` to the first matching floor. Matching is a
/// case-insensitive substring test on the model id.
pub fn apply_token_floor(floors: &[TokenFloor], model_id: &str, requested: u32) -> u32 {
    let id = model_id.to_lowercase();
    floors
        .iter()
        .find(|f| id.contains(&f.pattern.to_lowercase()))
        .map(|f| requested.max(f.min_tokens))
        .unwrap_or(requested)
}

/// Model metadata and named groups.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: BTreeMap<String, ModelInfo>,
    groups: BTreeMap<String, Vec<String>>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ModelRegistry {
    /// An empty registry. Every lookup falls back to [`ModelInfo::unknown`].
    pub fn empty() -> Self {
        Self {
            models: BTreeMap::new(),
            groups: BTreeMap::new(),
        }
    }

    /// The built-in model table and groups.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        for info in builtin_models() {
            registry.insert(info);
        }
        for (name, ids) in builtin_groups() {
            registry
                .groups
                .insert(name.to_string(), ids.iter().map(|s| s.to_string()).collect());
        }
        registry
    }

    /// Built-in entries with the config additions merged on top.
    pub fn from_config(config: &RegistryConfig) -> Self {
        let mut registry = Self::builtin();
        for info in &config.models {
            registry.insert(info.clone());
        }
        for (name, ids) in &config.groups {
            registry.groups.insert(name.clone(), ids.clone());
        }
        registry
    }

    /// Add or replace a model.
    pub fn insert(&mut self, info: ModelInfo) {
        self.models.insert(info.id.clone(), info);
    }

    /// Metadata for `model_id`, derived defaults when unknown.
    pub fn get(&self, model_id: &str) -> ModelInfo {
        self.models
            .get(model_id)
            .cloned()
            .unwrap_or_else(|| ModelInfo::unknown(model_id))
    }

    pub fn is_known(&self, model_id: &str) -> bool {
        self.models.contains_key(model_id)
    }

    /// Whether requests to `model_id` may carry the web-search flag.
    pub fn supports_web_search(&self, model_id: &str) -> bool {
        self.models
            .get(model_id)
            .map(|m| m.supports_web_search)
            .unwrap_or(true)
    }

    pub fn models(&self) -> impl Iterator<Item = &ModelInfo> {
        self.models.values()
    }

    pub fn by_category(&self, category: &str) -> Vec<&ModelInfo> {
        self.models.values().filter(|m| m.category == category).collect()
    }

    pub fn free_models(&self) -> Vec<&ModelInfo> {
        self.models.values().filter(|m| m.is_free).collect()
    }

    /// Model ids in a named group.
    pub fn group(&self, name: &str) -> Option<&[String]> {
        self.groups.get(name).map(Vec::as_slice)
    }

    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }
}

fn builtin_models() -> Vec<ModelInfo> {
    vec![
        // Research ensemble
        ModelInfo::new("google/gemini-2.5-pro-preview", "Gemini 2.5 Pro Preview", "flagship", 8000),
        ModelInfo::new("openai/gpt-5-chat", "GPT-5 Chat", "flagship", 4000),
        ModelInfo::new("anthropic/claude-opus-4.1", "Claude Opus 4.1", "flagship", 4000),
        ModelInfo::new("x-ai/grok-4", "Grok 4", "flagship", 8000),
        ModelInfo::new("deepseek/deepseek-chat-v3.1", "DeepSeek Chat V3.1", "flagship", 8000),
        // Free tier
        ModelInfo::new("tngtech/deepseek-r1t2-chimera:free", "TNG DeepSeek R1T2 Chimera", "reasoning", 16384),
        ModelInfo::new("tngtech/deepseek-r1t-chimera:free", "TNG DeepSeek R1T Chimera", "reasoning", 16384),
        ModelInfo::new("x-ai/grok-4-fast:free", "Grok 4 Fast", "flagship", 8000),
        ModelInfo::new("nvidia/nemotron-nano-9b-v2:free", "NVIDIA Nemotron Nano 9B V2", "general", 4000),
        ModelInfo::new("openai/gpt-oss-120b:free", "OpenAI GPT-OSS 120B", "flagship", 4000),
        ModelInfo::new("openai/gpt-oss-20b:free", "OpenAI GPT-OSS 20B", "general", 4000),
        ModelInfo::new("z-ai/glm-4.5-air:free", "Z.AI GLM 4.5 Air", "general", 4000),
        ModelInfo::new("qwen/qwen3-coder:free", "Qwen3 Coder 480B A35B", "coding", 8000),
        ModelInfo::new("moonshotai/kimi-k2:free", "MoonshotAI Kimi K2 0711", "general", 4000),
        ModelInfo::new(
            "nousresearch/deephermes-3-llama-3-8b-preview:free",
            "Nous DeepHermes 3 Llama 3 8B",
            "general",
            4000,
        ),
        ModelInfo::new("deepseek/deepseek-chat-v3.1:free", "DeepSeek Chat V3.1", "flagship", 8000),
        ModelInfo::new("deepseek/deepseek-r1-0528-qwen3-8b:free", "DeepSeek R1 Qwen3 8B", "reasoning", 6000),
        ModelInfo::new("deepseek/r1-0528:free", "DeepSeek R1 0528", "reasoning", 6000),
        ModelInfo::new("deepseek/deepseek-chat-v3-0324:free", "DeepSeek Chat V3 0324", "general", 6000),
        ModelInfo::new("deepseek/r1-distill-llama-70b:free", "DeepSeek R1 Distill Llama 70B", "reasoning", 6000),
        ModelInfo::new("deepseek/r1:free", "DeepSeek R1", "reasoning", 6000),
        ModelInfo::new("agentica-org/deepcoder-14b-preview:free", "Agentica Deepcoder 14B Preview", "coding", 6000),
        ModelInfo::new(
            "cognitivecomputations/dolphin-mistral-24b-venice-edition:free",
            "Venice Uncensored (Dolphin Mistral 24B)",
            "general",
            4000,
        ),
        // Reasoning
        ModelInfo::new("openai/o1-preview", "OpenAI o1 Preview", "reasoning", 10000).with_temperature(1.0),
        ModelInfo::new("openai/o1-mini", "OpenAI o1 Mini", "reasoning", 6000).with_temperature(1.0),
        ModelInfo::new("qwen/qwq-32b-preview", "Qwen QwQ 32B", "reasoning", 8000),
        // Legacy
        ModelInfo::new("google/gemini-2.0-flash-exp", "Gemini 2.0 Flash Experimental", "general", 8000),
        ModelInfo::new("openai/gpt-4-turbo-preview", "GPT-4 Turbo Preview", "general", 4000),
        ModelInfo::new("anthropic/claude-3-opus-20240229", "Claude 3 Opus", "general", 4000),
    ]
}

fn builtin_groups() -> Vec<(&'static str, &'static [&'static str])> {
    vec![
        (
            "research_paper",
            &[
                "google/gemini-2.5-pro-preview",
                "openai/gpt-5-chat",
                "anthropic/claude-opus-4.1",
                "x-ai/grok-4",
                "deepseek/deepseek-chat-v3.1",
            ],
        ),
        (
            "flagship_free",
            &[
                "x-ai/grok-4-fast:free",
                "openai/gpt-oss-120b:free",
                "deepseek/deepseek-chat-v3.1:free",
                "google/gemini-2.0-flash-exp:free",
            ],
        ),
        (
            "reasoning_free",
            &[
                "tngtech/deepseek-r1t2-chimera:free",
                "tngtech/deepseek-r1t-chimera:free",
                "deepseek/r1-0528:free",
                "deepseek/r1-distill-llama-70b:free",
                "deepseek/r1:free",
                "microsoft/mai-ds-r1:free",
            ],
        ),
        (
            "coding_free",
            &[
                "qwen/qwen3-coder:free",
                "agentica-org/deepcoder-14b-preview:free",
                "qwen/qwen-2.5-coder-32b-instruct:free",
            ],
        ),
        (
            "general_free",
            &[
                "nvidia/nemotron-nano-9b-v2:free",
                "openai/gpt-oss-20b:free",
                "z-ai/glm-4.5-air:free",
                "moonshotai/kimi-k2:free",
                "nousresearch/deephermes-3-llama-3-8b-preview:free",
                "meta-llama/llama-3.3-70b-instruct:free",
            ],
        ),
    ]
}
