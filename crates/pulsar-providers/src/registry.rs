//! Provider registry — static specs for every supported language model vendor.
//!
//! Each `ProviderSpec` says which wire API a vendor speaks, where it lives by
//! default, and where its API key comes from. Lookup is by configuration
//! name (case-insensitive), never by type.

// ─────────────────────────────────────────────
// ProviderSpec — static metadata for one provider
// ─────────────────────────────────────────────

/// Wire API spoken by a provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApiFlavor {
    /// `GET <base>/<url-encoded prompt>`, plain text back.
    Pollinations,
    /// `POST <base>/api/generate`, `{response}` back.
    Ollama,
    /// `POST <base>/chat/completions`, `choices[0].message.content` back.
    ChatCompletions,
    /// `POST <base>/responses`, `output[0].content[0].text` back.
    Responses,
    /// `POST <base>/messages`, `content[0].text` back.
    Messages,
    /// `POST <base>/models/<model>:generateContent`, `candidates[0].content.parts[0].text` back.
    GenerateContent,
}

/// Static specification describing one provider.
#[derive(Clone, Debug)]
pub struct ProviderSpec {
    /// Config name (e.g. `"ollama"`).
    pub name: &'static str,
    /// Other accepted config names.
    pub aliases: &'static [&'static str],
    /// Human-readable name for logs. E.g. `"OpenRouter"`.
    pub display_name: &'static str,
    pub flavor: ApiFlavor,
    /// Environment variable for the API key, if the vendor needs one.
    pub env_key: Option<&'static str>,
    /// Default API base URL.
    pub default_api_base: Option<&'static str>,
    /// Model used when the config leaves it empty.
    pub default_model: &'static str,
}

impl ProviderSpec {
    /// Whether `name` selects this provider.
    pub fn matches(&self, name: &str) -> bool {
        let name = name.trim();
        self.name.eq_ignore_ascii_case(name)
            || self.aliases.iter().any(|a| a.eq_ignore_ascii_case(name))
    }
}

// ─────────────────────────────────────────────
// All providers
// ─────────────────────────────────────────────

/// Complete list of supported provider specifications.
pub static PROVIDERS: &[ProviderSpec] = &[
    ProviderSpec {
        name: "pollinations",
        aliases: &[],
        display_name: "Pollinations",
        flavor: ApiFlavor::Pollinations,
        env_key: None,
        default_api_base: Some("https://text.pollinations.ai"),
        default_model: "",
    },
    ProviderSpec {
        name: "ollama",
        aliases: &[],
        display_name: "Ollama",
        flavor: ApiFlavor::Ollama,
        env_key: None,
        default_api_base: Some("http://127.0.0.1:11434"),
        default_model: "llama3.2",
    },
    ProviderSpec {
        name: "openai",
        aliases: &[],
        display_name: "OpenAI",
        flavor: ApiFlavor::Responses,
        env_key: Some("OPENAI_API_KEY"),
        default_api_base: Some("https://api.openai.com/v1"),
        default_model: "gpt-4o-mini",
    },
    ProviderSpec {
        name: "anthropic",
        aliases: &[],
        display_name: "Anthropic",
        flavor: ApiFlavor::Messages,
        env_key: Some("ANTHROPIC_API_KEY"),
        default_api_base: Some("https://api.anthropic.com/v1"),
        default_model: "claude-3-5-haiku-latest",
    },
    ProviderSpec {
        name: "gemini",
        aliases: &[],
        display_name: "Gemini",
        flavor: ApiFlavor::GenerateContent,
        env_key: Some("GEMINI_API_KEY"),
        default_api_base: Some("https://generativelanguage.googleapis.com/v1beta"),
        default_model: "gemini-1.5-flash",
    },
    // OpenAI-compatible endpoints: base URL and model come from config.
    ProviderSpec {
        name: "open",
        aliases: &["openai-compatible"],
        display_name: "OpenAI-compatible",
        flavor: ApiFlavor::ChatCompletions,
        env_key: None,
        default_api_base: None,
        default_model: "",
    },
    ProviderSpec {
        name: "openrouter",
        aliases: &[],
        display_name: "OpenRouter",
        flavor: ApiFlavor::ChatCompletions,
        env_key: Some("OPENROUTER_API_KEY"),
        default_api_base: Some("https://openrouter.ai/api/v1"),
        default_model: "",
    },
    ProviderSpec {
        name: "doubao",
        aliases: &["ark"],
        display_name: "Doubao",
        flavor: ApiFlavor::ChatCompletions,
        env_key: Some("ARK_API_KEY"),
        default_api_base: Some("https://ark.cn-beijing.volces.com/api/v3"),
        default_model: "",
    },
    ProviderSpec {
        name: "qwen",
        aliases: &["dashscope"],
        display_name: "Qwen",
        flavor: ApiFlavor::ChatCompletions,
        env_key: Some("DASHSCOPE_API_KEY"),
        default_api_base: Some("https://dashscope.aliyuncs.com/compatible-mode/v1"),
        default_model: "qwen-plus",
    },
];

// ─────────────────────────────────────────────
// Lookup
// ─────────────────────────────────────────────

/// Find a provider spec by config name or alias.
pub fn find_by_name(name: &str) -> Option<&'static ProviderSpec> {
    PROVIDERS.iter().find(|spec| spec.matches(name))
}

/// Config names of every supported provider, for error messages.
pub fn supported_names() -> Vec<&'static str> {
    PROVIDERS.iter().map(|spec| spec.name).collect()
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
