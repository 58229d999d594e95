use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Together,
    OpenAI,
    Replicate,
}

impl Provider {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::Together => "https://api.together.xyz",
            Provider::OpenAI => "https://api.openai.com",
            Provider::Replicate => "https://api.replicate.com",
        }
    }

    /// Whether the provider speaks the OpenAI chat-completions protocol.
    pub fn is_chat_completions(&self) -> bool {
        matches!(self, Provider::Together | Provider::OpenAI)
    }

    pub fn default_models(&self) -> &[&str] {
        match self {
            Provider::Together => &[
                "meta-llama/Llama-3.3-70B-Instruct-Turbo",
                "meta-llama/Llama-3.2-90B-Vision-Instruct-Turbo",
                "Qwen/Qwen2.5-72B-Instruct-Turbo",
                "deepseek-ai/DeepSeek-V3",
            ],
            Provider::OpenAI => &["gpt-4.1", "gpt-4.1-mini", "gpt-4o-mini"],
            Provider::Replicate => &[
                "lucataco/llava-13b",
                "lucataco/video-llava",
                "openai/whisper",
            ],
        }
    }
}

pub fn model_map() -> HashMap<Provider, Vec<&'static str>> {
    HashMap::from([
        (Provider::Together, Provider::Together.default_models().to_vec()),
        (Provider::OpenAI, Provider::OpenAI.default_models().to_vec()),
        (Provider::Replicate, Provider::Replicate.default_models().to_vec()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_serialize() {
        assert_eq!(serde_json::to_string(&Provider::Together).unwrap(), "\"together\"");
        assert_eq!(serde_json::to_string(&Provider::OpenAI).unwrap(), "\"openai\"");
        assert_eq!(serde_json::to_string(&Provider::Replicate).unwrap(), "\"replicate\"");
    }

    #[test]
    fn provider_deserialize() {
        let p: Provider = serde_json::from_str("\"replicate\"").unwrap();
        assert_eq!(p, Provider::Replicate);
    }

    #[test]
    fn chat_completions_providers() {
        assert!(Provider::Together.is_chat_completions());
        assert!(Provider::OpenAI.is_chat_completions());
        assert!(!Provider::Replicate.is_chat_completions());
    }

    #[test]
    fn model_map_has_all_providers() {
        let map = model_map();
        assert_eq!(map.len(), 3);
        for models in map.values() {
            assert!(!models.is_empty());
        }
    }
}
