//! LLM provider implementations for opsclaw.
//!
//! Every backend speaks the OpenAI chat-completions dialect (DeepSeek,
//! Ollama, vLLM, LM Studio), so a single implementation covers them all.

pub mod openai_compat;

pub use openai_compat::{OpenAiCompatProvider, normalize_base_url};

use opsclaw_config::AppConfig;
use opsclaw_core::{Provider, ProviderError};
use std::sync::Arc;

/// Build the configured provider.
///
/// Fails with [`ProviderError::NotConfigured`] when the config points at the
/// official DeepSeek endpoint without an API key. Keyless local servers are
/// accepted as-is.
pub fn build_from_config(config: &AppConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    if config.needs_api_key() {
        return Err(ProviderError::NotConfigured(
            "未配置 API Key。使用 DeepSeek 官方接口时请在配置文件 [provider] 中填写 api_key \
             或设置 OPSCLAW_API_KEY；使用本地 Ollama 时请将 base_url 设为如 http://127.0.0.1:11434/v1"
                .into(),
        ));
    }

    let base_url = normalize_base_url(&config.provider.base_url);
    let name = if base_url.contains("deepseek.com") {
        "deepseek"
    } else {
        "openai-compat"
    };

    let provider = OpenAiCompatProvider::new(
        name,
        base_url,
        config.provider.api_key.clone().unwrap_or_default(),
    )
    .with_timeout_secs(config.provider.request_timeout_secs);

    Ok(Arc::new(provider))
}
