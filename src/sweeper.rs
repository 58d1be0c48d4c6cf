use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::model::Ms;
use crate::registry::Registry;

fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

/// Background task driving the time-based side of the lifecycle: promotes
/// SCHEDULED allocations to ALLOCATED when their slot starts, and releases
/// allocations whose slot has fully elapsed.
///
/// Conflict checks already ignore elapsed entries at decision time, so the
/// release half never changes a decision — it only bounds the live map.
pub async fn run_sweeper(registry: Arc<Registry>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        let now = now_ms();

        for id in registry.activate_due(now).await {
            info!("activated allocation {id} at slot start");
        }

        for id in registry.collect_expired(now).await {
            if registry.release_expired(&id, now).await {
                info!("released expired allocation {id}");
            } else {
                // Raced with a client finalization, nothing left to do.
                debug!("expired allocation {id} already gone");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use crate::notify::NotifyHub;

    fn request(id: &str, slot: Span) -> Allocation {
        Allocation {
            id: id.into(),
            state: State::Requested,
            slot,
            constraints: None,
            policy: Policy::First,
            priority: Priority::Normal,
            initiator: Initiator::System,
            resource_ids: vec!["r".into()],
            description: None,
            reasons: Annotations::default(),
        }
    }

    #[tokio::test]
    async fn expired_allocation_is_released() {
        let registry = Registry::new(Arc::new(NotifyHub::new()));
        let now = now_ms();

        registry
            .handle(request("job#1", Span::new(now - 100, now + 60_000)))
            .await
            .unwrap();
        assert_eq!(registry.get_state("job#1").await, Some(State::Scheduled));

        // Not yet elapsed.
        assert!(registry.collect_expired(now).await.is_empty());
        assert!(!registry.release_expired("job#1", now).await);

        // Past the slot end it is collected and dropped.
        let later = now + 120_000;
        assert_eq!(registry.collect_expired(later).await, vec!["job#1".to_string()]);
        assert!(registry.release_expired("job#1", later).await);
        assert_eq!(registry.get("job#1").await, None);
    }

    #[tokio::test]
    async fn due_allocation_is_activated() {
        let registry = Registry::new(Arc::new(NotifyHub::new()));
        let now = now_ms();

        registry
            .handle(request("job#1", Span::new(now - 100, now + 60_000)))
            .await
            .unwrap();

        let promoted = registry.activate_due(now).await;
        assert_eq!(promoted, vec!["job#1".to_string()]);
        assert_eq!(registry.get_state("job#1").await, Some(State::Allocated));

        // A second pass finds nothing to do.
        assert!(registry.activate_due(now).await.is_empty());
    }

    #[tokio::test]
    async fn future_allocation_left_alone() {
        let registry = Registry::new(Arc::new(NotifyHub::new()));
        let now = now_ms();

        registry
            .handle(request("job#1", Span::new(now + 60_000, now + 120_000)))
            .await
            .unwrap();

        assert!(registry.activate_due(now).await.is_empty());
        assert!(registry.collect_expired(now).await.is_empty());
        assert_eq!(registry.get_state("job#1").await, Some(State::Scheduled));
    }

    #[tokio::test]
    async fn sweeper_task_releases_elapsed_slot() {
        let registry = Arc::new(Registry::new(Arc::new(NotifyHub::new())));
        let now = now_ms();

        registry
            .handle(request("job#1", Span::new(now - 50, now + 80)))
            .await
            .unwrap();

        let sweeper = tokio::spawn(run_sweeper(registry.clone(), Duration::from_millis(10)));

        // The slot elapses within ~80ms; give the sweeper room to catch it.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(registry.get("job#1").await, None);

        sweeper.abort();
    }
}
