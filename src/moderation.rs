use crate::error::TurnError;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Content-safety classifier.
#[async_trait]
pub trait Moderator: Send + Sync {
    /// One verdict per input text, in input order.
    async fn classify(&self, texts: &[String]) -> anyhow::Result<Vec<bool>>;
}

/// Batches texts into a single moderation call and reports which were flagged.
///
/// Results are never cached: the same text is re-checked on every turn.
#[derive(Clone)]
pub struct ModerationGate {
    moderator: Arc<dyn Moderator>,
}

impl ModerationGate {
    pub fn new(moderator: Arc<dyn Moderator>) -> Self {
        Self { moderator }
    }

    pub async fn find_flagged(&self, texts: &[String]) -> Result<HashSet<String>, TurnError> {
        if texts.is_empty() {
            return Ok(HashSet::new());
        }

        let verdicts = match self.moderator.classify(texts).await {
            Ok(verdicts) => verdicts,
            Err(first) => {
                warn!("Moderation request failed, retrying once: {}", first);
                self.moderator
                    .classify(texts)
                    .await
                    .map_err(|e| TurnError::ModerationService(e.to_string()))?
            }
        };

        if verdicts.len() != texts.len() {
            return Err(TurnError::ModerationService(format!(
                "expected {} moderation results, got {}",
                texts.len(),
                verdicts.len()
            )));
        }

        let flagged: HashSet<String> = texts
            .iter()
            .zip(verdicts)
            .filter(|(_, flagged)| *flagged)
            .map(|(text, _)| text.clone())
            .collect();
        debug!("Moderation checked {} texts, {} flagged", texts.len(), flagged.len());
        Ok(flagged)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedModerator;
    use super::*;
    use std::sync::atomic::Ordering;

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_flags_by_value_in_one_batch() {
        let moderator = Arc::new(ScriptedModerator::blocking(&["b"]));
        let gate = ModerationGate::new(moderator.clone());

        let flagged = gate.find_flagged(&texts(&["a", "b", "c"])).await.unwrap();
        assert_eq!(flagged, ["b".to_string()].into_iter().collect());
        assert_eq!(moderator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_input_skips_the_call() {
        let moderator = Arc::new(ScriptedModerator::default());
        let gate = ModerationGate::new(moderator.clone());
        assert!(gate.find_flagged(&[]).await.unwrap().is_empty());
        assert_eq!(moderator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_retries_once_then_fails() {
        let moderator = Arc::new(ScriptedModerator::default());
        moderator.failures_left.store(1, Ordering::SeqCst);
        let gate = ModerationGate::new(moderator.clone());
        assert!(gate.find_flagged(&texts(&["x"])).await.unwrap().is_empty());
        assert_eq!(moderator.calls.load(Ordering::SeqCst), 2);

        moderator.failures_left.store(2, Ordering::SeqCst);
        let err = gate.find_flagged(&texts(&["x"])).await.unwrap_err();
        assert!(matches!(err, TurnError::ModerationService(_)));
    }

    #[tokio::test]
    async fn test_never_caches() {
        let moderator = Arc::new(ScriptedModerator::default());
        let gate = ModerationGate::new(moderator.clone());
        gate.find_flagged(&texts(&["later bad"])).await.unwrap();
        moderator.blocked.lock().unwrap().push("bad".to_string());
        let flagged = gate.find_flagged(&texts(&["later bad"])).await.unwrap();
        assert_eq!(flagged.len(), 1);
    }
}
