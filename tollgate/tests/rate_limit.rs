use std::sync::Arc;

use tollgate::{CounterStore, MemoryCounterStore, RateLimitAction, RateLimitConfig, RateLimiter};

const RACERS: usize = 40;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_attempts_are_eventually_locked() {
    let store: Arc<dyn CounterStore> = Arc::new(MemoryCounterStore::new());
    let limiter = RateLimiter::new(store);
    let config = RateLimitConfig::default();

    let handles: Vec<_> = (0..RACERS)
        .map(|_| {
            let limiter = limiter.clone();
            let config = config.clone();
            tokio::spawn(async move {
                limiter
                    .check("203.0.113.50", &RateLimitAction::Login, Some(&config))
                    .await
                    .allowed
            })
        })
        .collect();

    let mut allowed = 0;
    for handle in handles {
        if handle.await.unwrap() {
            allowed += 1;
        }
    }

    // counts may be lost to races, but never by more than the racers
    assert!(allowed >= config.max_attempts as usize);
    assert!(allowed <= config.max_attempts as usize + RACERS);
    assert!(allowed < RACERS);

    let status = limiter
        .check("203.0.113.50", &RateLimitAction::Login, Some(&config))
        .await;
    assert!(!status.allowed);
    assert!(status.is_locked);
}

#[tokio::test]
async fn test_identifiers_do_not_share_budget() {
    let limiter = RateLimiter::new(Arc::new(MemoryCounterStore::new()));
    for _ in 0..6 {
        limiter.check("a", &RateLimitAction::Login, None).await;
    }
    assert!(!limiter.check("a", &RateLimitAction::Login, None).await.allowed);

    let status = limiter.check("b", &RateLimitAction::Login, None).await;
    assert!(status.allowed);
    assert_eq!(status.attempts_remaining, 4);
}
