//! Model descriptors and pricing
//!
//! Remote listings are normalized here once, at ingestion: price strings
//! become [`Price`] values and `is_free` is computed and stored.

use crate::catalog::free::{canonical_model_id, is_builtin_free_id};
use crate::providers::{RemoteModel, RemotePricing};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A price per million tokens, held as whole micro-dollars
///
/// Zero is exact, so "free" never depends on float comparison. Serialized
/// as dollars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "f64", try_from = "f64")]
pub struct Price(u64);

const MICROS_PER_DOLLAR: u64 = 1_000_000;
const FRACTION_DIGITS: usize = 6;

impl Price {
    /// Zero cost
    pub const ZERO: Price = Price(0);

    /// Price of `micros` millionths of a dollar
    pub const fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    /// Parse strings such as `"$0.50"` or `"1.25"`
    ///
    /// Digits past the sixth decimal round up, so a non-zero price never
    /// parses as zero.
    ///
    /// # Examples
    ///
    /// ```
    /// use zenchat::catalog::Price;
    ///
    /// assert_eq!(Price::parse("$0.50").unwrap().micros(), 500_000);
    /// assert_eq!(Price::parse(" 3 ").unwrap().per_million(), 3.0);
    /// assert!(Price::parse("$-1").is_none());
    /// assert!(Price::parse("free").is_none());
    /// ```
    pub fn parse(raw: &str) -> Option<Self> {
        let cleaned = raw.trim().trim_start_matches('$').trim();
        let (whole, fraction) = cleaned.split_once('.').unwrap_or((cleaned, ""));
        let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if (whole.is_empty() && fraction.is_empty()) || !all_digits(whole) || !all_digits(fraction)
        {
            return None;
        }

        let whole: u64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
        let (kept, rest) = fraction.split_at(fraction.len().min(FRACTION_DIGITS));
        let mut micros: u64 = if kept.is_empty() { 0 } else { kept.parse().ok()? };
        micros *= 10u64.pow((FRACTION_DIGITS - kept.len()) as u32);
        if rest.bytes().any(|b| b != b'0') {
            micros += 1;
        }
        whole
            .checked_mul(MICROS_PER_DOLLAR)?
            .checked_add(micros)
            .map(Self)
    }

    /// Micro-dollars per million tokens
    pub fn micros(&self) -> u64 {
        self.0
    }

    /// Dollars per million tokens
    pub fn per_million(&self) -> f64 {
        self.0 as f64 / MICROS_PER_DOLLAR as f64
    }

    /// Whether this price is zero
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl From<Price> for f64 {
    fn from(price: Price) -> f64 {
        price.per_million()
    }
}

impl TryFrom<f64> for Price {
    type Error = String;

    fn try_from(dollars: f64) -> std::result::Result<Self, Self::Error> {
        if !dollars.is_finite() || dollars < 0.0 {
            return Err(format!("invalid price: {}", dollars));
        }
        Ok(Self((dollars * MICROS_PER_DOLLAR as f64).round() as u64))
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${:.2}", self.per_million())
    }
}

/// Per-million-token pricing; `None` means the listing omitted the field
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    /// Prompt (input) price
    pub prompt: Option<Price>,
    /// Completion (output) price
    pub completion: Option<Price>,
}

impl Pricing {
    /// Both rates zero
    pub const FREE: Pricing = Pricing {
        prompt: Some(Price::ZERO),
        completion: Some(Price::ZERO),
    };

    fn from_remote(id: &str, remote: Option<&RemotePricing>) -> Self {
        let parse = |field: &str, raw: Option<&String>| {
            let raw = raw.map(|s| s.trim()).filter(|s| !s.is_empty())?;
            let price = Price::parse(raw);
            if price.is_none() {
                tracing::warn!("Ignoring unparsable {} price {:?} for model {}", field, raw, id);
            }
            price
        };
        match remote {
            Some(p) => Self {
                prompt: parse("prompt", p.prompt_tokens.as_ref()),
                completion: parse("completion", p.completion_tokens.as_ref()),
            },
            None => Self::default(),
        }
    }

    /// Prompt and completion are each zero or absent
    pub fn is_zero(&self) -> bool {
        self.prompt.map_or(true, |p| p.is_zero()) && self.completion.map_or(true, |p| p.is_zero())
    }
}

/// Capability flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Supports incremental streaming
    pub streaming: bool,
    /// Supports tool calls
    pub tools: bool,
    /// Accepts images
    pub vision: bool,
}

/// A usable model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Id sent in completion requests
    pub id: String,
    /// Human-readable name
    pub display_name: String,
    /// Vendor name
    pub provider_name: String,
    /// Short description, for built-in models
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Capability flags
    pub capabilities: Capabilities,
    /// Parsed pricing
    pub pricing: Pricing,
    /// Usable without paying; fixed at ingestion
    pub is_free: bool,
}

impl ModelDescriptor {
    /// Normalize a remote listing entry
    ///
    /// # Examples
    ///
    /// ```
    /// use zenchat::catalog::ModelDescriptor;
    /// use zenchat::providers::{RemoteModel, RemotePricing};
    ///
    /// let remote = RemoteModel {
    ///     id: "gpt-5".to_string(),
    ///     owned_by: None,
    ///     capabilities: None,
    ///     pricing: Some(RemotePricing {
    ///         prompt_tokens: Some("$1.25".to_string()),
    ///         completion_tokens: Some("$10.00".to_string()),
    ///     }),
    /// };
    /// let model = ModelDescriptor::from_remote(remote);
    /// assert_eq!(model.provider_name, "OpenAI");
    /// assert!(!model.is_free);
    /// ```
    pub fn from_remote(remote: RemoteModel) -> Self {
        let pricing = Pricing::from_remote(&remote.id, remote.pricing.as_ref());
        let reported = remote.capabilities.unwrap_or_default();
        let capabilities = Capabilities {
            streaming: reported.stream,
            tools: reported.tools,
            vision: reported.vision,
        };
        let is_free = pricing.is_zero() || is_builtin_free_id(&remote.id);

        Self {
            display_name: display_name_for(&remote.id),
            provider_name: provider_name_for(&remote.id),
            description: None,
            capabilities,
            pricing,
            is_free,
            id: remote.id,
        }
    }

    /// Descriptor for an id that is not in any listing
    ///
    /// Streaming is assumed; cost is known only for built-in free ids.
    pub fn unlisted(id: &str) -> Self {
        let is_free = is_builtin_free_id(id);
        Self {
            id: id.to_string(),
            display_name: display_name_for(id),
            provider_name: provider_name_for(id),
            description: None,
            capabilities: Capabilities {
                streaming: true,
                tools: false,
                vision: false,
            },
            pricing: if is_free {
                Pricing::FREE
            } else {
                Pricing::default()
            },
            is_free,
        }
    }

    /// Key used to treat `sonic` and `opencode/sonic` as one model
    pub fn canonical_id(&self) -> &str {
        canonical_model_id(&self.id)
    }
}

/// Vendor name derived from a model id prefix
///
/// # Examples
///
/// ```
/// use zenchat::catalog::provider_name_for;
///
/// assert_eq!(provider_name_for("claude-sonnet-4"), "Anthropic");
/// assert_eq!(provider_name_for("opencode/sonic"), "OpenCode Zen");
/// assert_eq!(provider_name_for("mystery"), "Other");
/// ```
pub fn provider_name_for(id: &str) -> String {
    const PREFIXES: &[(&str, &str)] = &[
        ("gpt-", "OpenAI"),
        ("claude-", "Anthropic"),
        ("gemini-", "Google"),
        ("glm-", "Zhipu AI"),
        ("kimi-", "Zhipu AI"),
        ("qwen-", "Alibaba"),
        ("grok-", "xAI"),
        ("opencode/", "OpenCode Zen"),
    ];
    PREFIXES
        .iter()
        .find(|(prefix, _)| id.starts_with(prefix))
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| "Other".to_string())
}

/// Display name: drop the `opencode/` prefix and turn `-`/`_` into spaces
pub fn display_name_for(id: &str) -> String {
    canonical_model_id(id)
        .replace(|c: char| c == '-' || c == '_', " ")
        .trim()
        .to_string()
}
