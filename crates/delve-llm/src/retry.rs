use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use tracing::{info, warn};

use delve_core::config::{ModelConfig, RetryConfig};
use delve_core::error::{DelveError, Result};
use delve_core::traits::LlmClient;
use delve_core::types::*;

/// An LLM client that retries failed requests and falls back to alternative models.
///
/// Each attempt gets its own `timeout_secs` (the primary's or the
/// fallback's) to open a response, so a hung backend costs one attempt.
pub struct RetryingClient {
    primary: Box<dyn LlmClient>,
    fallbacks: Vec<(ModelConfig, Box<dyn LlmClient>)>,
    retry_config: RetryConfig,
}

impl RetryingClient {
    pub fn new(
        primary: Box<dyn LlmClient>,
        fallbacks: Vec<(ModelConfig, Box<dyn LlmClient>)>,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            primary,
            fallbacks,
            retry_config,
        }
    }
}

pub(crate) fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let ms = config
        .initial_backoff_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(config.max_backoff_ms);
    // Add jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

/// One request, bounded by the model's own timeout.
async fn attempt<'a>(
    client: &'a dyn LlmClient,
    config: &ModelConfig,
    messages: Vec<ChatMessage>,
    schema: Option<&ResponseSchema>,
) -> Result<BoxStream<'a, Result<StreamDelta>>> {
    let timeout = Duration::from_secs(config.timeout_secs);
    match tokio::time::timeout(timeout, client.chat_stream(config, messages, schema)).await {
        Ok(result) => result,
        Err(_) => Err(DelveError::LlmTimeout(config.timeout_secs)),
    }
}

impl LlmClient for RetryingClient {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        schema: Option<&ResponseSchema>,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let config = config.clone();
        let schema = schema.cloned();

        Box::pin(async move {
            let max_retries = self.retry_config.max_retries;

            let mut last_err = None;
            for n in 0..=max_retries {
                match attempt(
                    self.primary.as_ref(),
                    &config,
                    messages.clone(),
                    schema.as_ref(),
                )
                .await
                {
                    Ok(stream) => return Ok(stream),
                    Err(e) => {
                        if e.is_retryable() && n < max_retries {
                            let backoff = calculate_backoff(n, &self.retry_config);
                            warn!(
                                attempt = n + 1,
                                max_retries,
                                backoff_ms = backoff.as_millis() as u64,
                                error = %e,
                                "Retrying LLM request"
                            );
                            tokio::time::sleep(backoff).await;
                            last_err = Some(e);
                            continue;
                        }
                        last_err = Some(e);
                        break;
                    }
                }
            }

            if !self.fallbacks.is_empty() {
                info!("Primary LLM exhausted, trying fallback models");
            }
            for (fb_config, fb_client) in &self.fallbacks {
                match attempt(
                    fb_client.as_ref(),
                    fb_config,
                    messages.clone(),
                    schema.as_ref(),
                )
                .await
                {
                    Ok(stream) => {
                        info!(
                            model = %fb_config.model_id,
                            provider = %fb_config.provider,
                            "Fell back to alternative model"
                        );
                        return Ok(stream);
                    }
                    Err(e) => {
                        warn!(
                            model = %fb_config.model_id,
                            error = %e,
                            "Fallback model also failed"
                        );
                    }
                }
            }

            Err(last_err.unwrap_or_else(|| DelveError::llm_transport("All providers failed")))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Fails with the given error `failures` times, then streams "ok".
    struct Flaky {
        failures: u32,
        error: fn() -> DelveError,
        calls: Arc<AtomicU32>,
    }

    impl LlmClient for Flaky {
        fn chat_stream(
            &self,
            _config: &ModelConfig,
            _messages: Vec<ChatMessage>,
            _schema: Option<&ResponseSchema>,
        ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if n < self.failures {
                    return Err((self.error)());
                }
                let items = vec![
                    Ok(StreamDelta::TextDelta("ok".into())),
                    Ok(StreamDelta::Stop(StopReason::EndTurn)),
                ];
                Ok(Box::pin(futures::stream::iter(items)) as BoxStream<'_, Result<StreamDelta>>)
            })
        }
    }

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = RetryConfig {
            max_retries: 10,
            initial_backoff_ms: 1000,
            max_backoff_ms: 5000,
        };
        let d = calculate_backoff(9, &config);
        assert!(d <= Duration::from_millis(6000));
    }

    #[tokio::test]
    async fn test_retries_transient_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let client = RetryingClient::new(
            Box::new(Flaky {
                failures: 2,
                error: || DelveError::llm_http(503, "busy"),
                calls: calls.clone(),
            }),
            vec![],
            fast_retry(3),
        );
        let config = ModelConfig::new("openai", "m");
        assert!(client.chat_stream(&config, vec![], None).await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_goes_to_fallback() {
        let primary_calls = Arc::new(AtomicU32::new(0));
        let fallback_calls = Arc::new(AtomicU32::new(0));
        let client = RetryingClient::new(
            Box::new(Flaky {
                failures: u32::MAX,
                error: || DelveError::llm_http(401, "bad key"),
                calls: primary_calls.clone(),
            }),
            vec![(
                ModelConfig::new("ollama", "llama3"),
                Box::new(Flaky {
                    failures: 0,
                    error: || DelveError::llm_http(500, "unused"),
                    calls: fallback_calls.clone(),
                }) as Box<dyn LlmClient>,
            )],
            fast_retry(3),
        );
        let config = ModelConfig::new("openai", "m");
        assert!(client.chat_stream(&config, vec![], None).await.is_ok());
        assert_eq!(primary_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 1);
    }

    /// Never answers.
    struct Hung {
        calls: Arc<AtomicU32>,
    }

    impl LlmClient for Hung {
        fn chat_stream(
            &self,
            _config: &ModelConfig,
            _messages: Vec<ChatMessage>,
            _schema: Option<&ResponseSchema>,
        ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(futures::future::pending())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_primary_times_out_per_attempt_then_falls_back() {
        let primary_calls = Arc::new(AtomicU32::new(0));
        let fallback_calls = Arc::new(AtomicU32::new(0));
        let client = RetryingClient::new(
            Box::new(Hung {
                calls: primary_calls.clone(),
            }),
            vec![(
                ModelConfig::new("ollama", "llama3"),
                Box::new(Flaky {
                    failures: 0,
                    error: || DelveError::llm_http(500, "unused"),
                    calls: fallback_calls.clone(),
                }) as Box<dyn LlmClient>,
            )],
            fast_retry(1),
        );
        let mut config = ModelConfig::new("openai", "m");
        config.timeout_secs = 10;

        let started = tokio::time::Instant::now();
        assert!(client.chat_stream(&config, vec![], None).await.is_ok());
        assert_eq!(primary_calls.load(Ordering::SeqCst), 2);
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 1);
        // Two bounded attempts plus a tiny backoff, nowhere near a shared budget.
        assert!(started.elapsed() < Duration::from_secs(21));
    }
}
