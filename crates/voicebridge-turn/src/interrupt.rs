//! The per-turn interruption signal: single-shot, broadcast to all awaiters,
//! idempotent. A new one is created for each turn; the orchestrator never
//! reuses a fired signal across turns.

use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct Interrupt(CancellationToken);

impl Interrupt {
    pub fn new() -> Self {
        Self(CancellationToken::new())
    }

    /// Raise the signal. Idempotent: raising twice has the same effect as
    /// raising once.
    pub fn raise(&self) {
        self.0.cancel();
    }

    pub fn is_raised(&self) -> bool {
        self.0.is_cancelled()
    }

    /// Resolves once the signal has been raised; resolves immediately on
    /// every subsequent call once it has.
    pub async fn raised(&self) {
        self.0.cancelled().await;
    }
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_raise_is_idempotent() {
        let i = Interrupt::new();
        i.raise();
        i.raise();
        assert!(i.is_raised());
    }

    #[tokio::test]
    async fn test_raised_resolves_after_raise() {
        let i = Interrupt::new();
        let waiter = i.clone();
        let handle = tokio::spawn(async move {
            waiter.raised().await;
        });
        i.raise();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_fresh_instance_is_not_raised() {
        let i = Interrupt::new();
        assert!(!i.is_raised());
    }

    #[tokio::test]
    async fn test_clone_shares_state() {
        let i = Interrupt::new();
        let clone = i.clone();
        clone.raise();
        assert!(i.is_raised());
    }
}
