//! Built-in models usable without an API key

use crate::catalog::model::{Capabilities, ModelDescriptor, Pricing};

/// Prefix OpenCode Zen puts in front of its own model ids
pub const ZEN_PREFIX: &str = "opencode/";

/// Model used when nothing else was chosen and free mode is on
pub const DEFAULT_FREE_MODEL_ID: &str = "opencode/sonic";

struct FreeModel {
    id: &'static str,
    name: &'static str,
    provider: &'static str,
    description: &'static str,
    streaming: bool,
    tools: bool,
}

const BUILTIN_FREE_MODELS: &[FreeModel] = &[
    FreeModel {
        id: "sonic",
        name: "Sonic",
        provider: "OpenCode",
        description: "Fast and lightweight coding assistant",
        streaming: true,
        tools: false,
    },
    FreeModel {
        id: "sonic-code",
        name: "Sonic Code",
        provider: "OpenCode",
        description: "Code-optimized Sonic variant",
        streaming: true,
        tools: true,
    },
    FreeModel {
        id: "grok-code-fast",
        name: "Grok Code Fast",
        provider: "xAI",
        description: "Fast coding assistance from Grok",
        streaming: false,
        tools: true,
    },
    FreeModel {
        id: "big-pickle",
        name: "Big Pickle",
        provider: "OpenCode",
        description: "High-capability general purpose model",
        streaming: false,
        tools: true,
    },
    FreeModel {
        id: "minimax-m2.1",
        name: "MiniMax M2.1",
        provider: "MiniMax",
        description: "Efficient multi-purpose model",
        streaming: false,
        tools: true,
    },
    FreeModel {
        id: "glm-4.7",
        name: "GLM 4.7",
        provider: "Zhipu AI",
        description: "Advanced Chinese-English bilingual model",
        streaming: false,
        tools: true,
    },
    FreeModel {
        id: "gpt-5-nano",
        name: "GPT-5 Nano",
        provider: "OpenAI",
        description: "Compact GPT-5 variant for efficiency",
        streaming: false,
        tools: true,
    },
];

/// Strip the `opencode/` prefix, if present
pub fn canonical_model_id(id: &str) -> &str {
    id.strip_prefix(ZEN_PREFIX).unwrap_or(id)
}

/// Whether `id` names a built-in free model, bare or `opencode/`-prefixed
///
/// # Examples
///
/// ```
/// use zenchat::catalog::is_builtin_free_id;
///
/// assert!(is_builtin_free_id("sonic"));
/// assert!(is_builtin_free_id("opencode/glm-4.7"));
/// assert!(!is_builtin_free_id("opencode/claude-opus"));
/// ```
pub fn is_builtin_free_id(id: &str) -> bool {
    let bare = canonical_model_id(id);
    BUILTIN_FREE_MODELS.iter().any(|m| m.id == bare)
}

/// The built-in free set, exposed under `opencode/<id>`
pub fn builtin_free_models() -> Vec<ModelDescriptor> {
    BUILTIN_FREE_MODELS
        .iter()
        .map(|m| ModelDescriptor {
            id: format!("{}{}", ZEN_PREFIX, m.id),
            display_name: m.name.to_string(),
            provider_name: m.provider.to_string(),
            description: Some(m.description.to_string()),
            capabilities: Capabilities {
                streaming: m.streaming,
                tools: m.tools,
                vision: false,
            },
            pricing: Pricing::FREE,
            is_free: true,
        })
        .collect()
}

/// Look up one built-in model by bare or prefixed id
pub fn builtin_free_model(id: &str) -> Option<ModelDescriptor> {
    let bare = canonical_model_id(id);
    builtin_free_models()
        .into_iter()
        .find(|m| m.canonical_id() == bare)
}
