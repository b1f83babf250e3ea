use async_trait::async_trait;
use std::time::Duration;

use crate::{ScribeError, ScribeResult};

/// Asks the operator to approve a playlist batch
#[async_trait]
pub trait Confirmer: Send + Sync {
    async fn confirm(&self, prompt: &str) -> bool;
}

/// Answers every prompt the same way without asking
#[derive(Debug, Clone, Copy)]
pub struct AutoConfirm(pub bool);

#[async_trait]
impl Confirmer for AutoConfirm {
    async fn confirm(&self, _prompt: &str) -> bool {
        self.0
    }
}

/// Wait up to `timeout` for approval; a decline or no answer abandons the batch
pub async fn confirm_batch(confirmer: &dyn Confirmer, prompt: &str, timeout: Duration) -> ScribeResult<()> {
    match tokio::time::timeout(timeout, confirmer.confirm(prompt)).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(ScribeError::BatchAbandoned("declined".to_string())),
        Err(_) => Err(ScribeError::BatchAbandoned(format!(
            "no confirmation within {}s",
            timeout.as_secs()
        ))),
    }
}
