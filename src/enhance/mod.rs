//! Optional readability pass over a finished transcript.
//!
//! Callers check [`TextEnhancer::is_available`] before calling
//! [`TextEnhancer::enhance`] and keep the original text on any error.

use async_trait::async_trait;
use std::sync::Arc;

pub mod claude;

pub use claude::ClaudeEnhancer;

use crate::config::EnhancementConfig;
use crate::Result;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextEnhancer: Send + Sync {
    /// Whether the backend is configured well enough to be called
    fn is_available(&self) -> bool;

    /// Return a cleaned-up version of `text`. `language` is a code or "auto".
    async fn enhance(&self, text: &str, language: &str) -> Result<String>;

    fn name(&self) -> &'static str;
}

/// Enhancer used when no backend is configured
pub struct DisabledEnhancer;

#[async_trait]
impl TextEnhancer for DisabledEnhancer {
    fn is_available(&self) -> bool {
        false
    }

    async fn enhance(&self, _text: &str, _language: &str) -> Result<String> {
        Err(crate::TranscriberError::Enhancement(
            "Text enhancement is not available: API key not set".to_string(),
        ))
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}

/// Pick the enhancer for a configuration
pub fn from_config(config: &EnhancementConfig) -> Arc<dyn TextEnhancer> {
    let Some(api_key) = config.api_key.clone().filter(|key| !key.trim().is_empty()) else {
        return Arc::new(DisabledEnhancer);
    };

    match ClaudeEnhancer::new(api_key, config.model.clone(), config.max_tokens) {
        Ok(enhancer) => Arc::new(enhancer),
        Err(e) => {
            tracing::warn!("Text enhancement disabled: {}", e);
            Arc::new(DisabledEnhancer)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_enhancer() {
        let enhancer = DisabledEnhancer;
        assert!(!enhancer.is_available());
        assert!(enhancer.enhance("text", "en").await.is_err());
    }

    #[test]
    fn test_from_config_requires_key() {
        let mut config = EnhancementConfig::default();
        assert_eq!(from_config(&config).name(), "disabled");

        config.api_key = Some("   ".to_string());
        assert!(!from_config(&config).is_available());

        config.api_key = Some("sk-test".to_string());
        let enhancer = from_config(&config);
        assert_eq!(enhancer.name(), "claude");
        assert!(enhancer.is_available());
    }
}
