use chrono::Utc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::request::GenerationRequest;
use super::{GenerationResult, response};
use crate::core::errors::InvokeError;
use crate::core::llm::ProviderRouter;

/// Calls a model under a deadline and validates what comes back.
///
/// Exactly one outbound call per `invoke`. Retrying is the worker loop's job.
#[derive(Clone)]
pub struct ModelInvoker {
    router: ProviderRouter,
}

impl ModelInvoker {
    pub fn new(router: ProviderRouter) -> Self {
        Self { router }
    }

    pub async fn invoke(
        &self,
        request: &GenerationRequest,
        deadline: Duration,
    ) -> Result<GenerationResult, InvokeError> {
        let provider = self
            .router
            .provider_for(&request.model_id)
            .ok_or_else(|| InvokeError::UnknownModel(request.model_id.clone()))?;

        let started = Instant::now();
        // Dropping the in-flight future on timeout tears down its connection.
        let call = provider.generate(&request.model_id, &request.messages);
        let text = match tokio::time::timeout(deadline, call).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    "Model '{}' ({}) gave no answer within {:?} for match {}",
                    request.model_id,
                    provider.name(),
                    deadline,
                    request.match_id
                );
                return Err(InvokeError::Timeout(deadline));
            }
        };
        debug!(
            "Model '{}' answered in {:?} ({} chars)",
            request.model_id,
            started.elapsed(),
            text.len()
        );

        let payload = response::parse(request.kind, &request.match_id, &text)?;
        Ok(GenerationResult {
            match_id: request.match_id.clone(),
            model_id: request.model_id.clone(),
            payload,
            generated_at: Utc::now(),
        })
    }
}
