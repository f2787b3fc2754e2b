pub mod fixtures;

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use std::time::Duration;
    use tbus_event_bus::*;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_wait_resolves_with_next_raise() {
        let registry = EventRegistry::<Ping>::new();
        let next = registry.wait_for_event(CancellationToken::new());
        assert_eq!(registry.binding_count(), 1, "listener registers before first poll");

        registry.raise(Ping { n: 11 }).unwrap();
        registry.raise(Ping { n: 12 }).unwrap();

        assert_eq!(*next.await.unwrap(), Ping { n: 11 });
        assert_eq!(registry.binding_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ignores_earlier_raises() {
        let registry = EventRegistry::<Ping>::new();
        registry.raise(Ping { n: 1 }).unwrap();

        let result = registry
            .wait_for_event_timeout(Duration::from_millis(50), CancellationToken::new())
            .await;

        assert!(matches!(result, Err(EventBusError::Timeout { .. })), "got {result:?}");
        assert!(registry.has_last_event(), "the cache is not a substitute for a new raise");
    }

    #[tokio::test]
    async fn test_wait_cancelled() {
        let registry = EventRegistry::<Pong>::new();
        let cancel = CancellationToken::new();
        let next = registry.wait_for_event(cancel.clone());

        cancel.cancel();
        let result = next.await;

        assert!(matches!(result, Err(EventBusError::Cancelled { .. })), "got {result:?}");
        assert_eq!(registry.binding_count(), 0);

        let delivered = registry.raise(Pong(1)).unwrap();
        assert_eq!(delivered, 0, "nothing left to deliver to");
    }

    #[tokio::test]
    async fn test_event_wins_when_cancel_fires_afterwards() {
        let registry = EventRegistry::<Pong>::new();
        let cancel = CancellationToken::new();
        let next = registry.wait_for_event(cancel.clone());

        registry.raise(Pong(5)).unwrap();
        cancel.cancel();

        assert_eq!(*next.await.unwrap(), Pong(5));
    }

    #[tokio::test]
    async fn test_cancel_then_raise_is_cancelled() {
        let registry = EventRegistry::<Ping>::new();
        let cancel = CancellationToken::new();
        let next = registry.wait_for_event(cancel.clone());

        cancel.cancel();
        let delivered = registry.raise(Ping { n: 1 }).unwrap();

        assert_eq!(delivered, 0, "a cancelled wait no longer receives events");
        assert_eq!(registry.binding_count(), 0);
        let result = next.await;
        assert!(matches!(result, Err(EventBusError::Cancelled { .. })), "got {result:?}");
    }

    #[tokio::test]
    async fn test_cancelled_wait_is_dropped_beside_live_bindings() {
        let registry = EventRegistry::<Ping>::new();
        let journal = Journal::new();
        let permanent = recording(&journal, |ping: &Ping| ping.n);
        registry.register(&permanent);
        let cancel = CancellationToken::new();
        let next = registry.wait_for_event(cancel.clone());
        assert_eq!(registry.binding_count(), 2);

        cancel.cancel();
        assert_eq!(registry.raise(Ping { n: 4 }).unwrap(), 1);

        assert!(registry.contains(&permanent));
        assert_eq!(journal.entries(), vec![4]);
        assert!(matches!(next.await, Err(EventBusError::Cancelled { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_raise_after_deadline_times_out() {
        let registry = EventRegistry::<Ping>::new();
        let next = registry.wait_for_event_timeout(Duration::from_millis(100), CancellationToken::new());

        tokio::time::sleep(Duration::from_millis(150)).await;
        let delivered = registry.raise(Ping { n: 150 }).unwrap();

        assert_eq!(delivered, 0, "the wait expired before this raise");
        let result = next.await;
        assert!(matches!(result, Err(EventBusError::Timeout { .. })), "got {result:?}");
        assert_eq!(registry.binding_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_raise_before_deadline_wins_over_late_await() {
        let registry = EventRegistry::<Ping>::new();
        let next = registry.wait_for_event_timeout(Duration::from_millis(100), CancellationToken::new());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(registry.raise(Ping { n: 50 }).unwrap(), 1);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(*next.await.unwrap(), Ping { n: 50 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let registry = EventRegistry::<Ping>::new();
        let started = tokio::time::Instant::now();

        let result = registry
            .wait_for_event_timeout(Duration::from_secs(2), CancellationToken::new())
            .await;

        assert!(matches!(result, Err(EventBusError::Timeout { .. })), "got {result:?}");
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert_eq!(registry.binding_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_resolves_before_deadline() {
        let registry = EventRegistry::<Ping>::new();
        let next = registry.wait_for_event_timeout(Duration::from_secs(1), CancellationToken::new());

        let producer = registry.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            producer.raise(Ping { n: 250 }).unwrap();
        });

        assert_eq!(*next.await.unwrap(), Ping { n: 250 });
        assert_eq!(registry.binding_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_timeout_is_not_a_timeout() {
        let registry = EventRegistry::<Ping>::new();
        let cancel = CancellationToken::new();
        let next = registry.wait_for_event_timeout(Duration::from_secs(5), cancel.clone());

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let result = next.await;
        assert!(matches!(result, Err(EventBusError::Cancelled { .. })), "got {result:?}");
    }

    #[tokio::test]
    async fn test_dropping_the_wait_deregisters() {
        let registry = EventRegistry::<Ping>::new();
        let next = registry.wait_for_event(CancellationToken::new());
        assert_eq!(registry.binding_count(), 1);

        drop(next);
        assert_eq!(registry.binding_count(), 0);
    }

    #[tokio::test]
    async fn test_reset_while_waiting_closes_the_wait() {
        let bus = EventBus::new();
        let registry = bus.registry::<Shutdown>().unwrap();
        let next = registry.wait_for_event(CancellationToken::new());

        bus.reset_all();

        let result = next.await;
        assert!(matches!(result, Err(EventBusError::Closed { .. })), "got {result:?}");
    }

    #[tokio::test]
    async fn test_concurrent_waiters_share_one_event() {
        let registry = EventRegistry::<Ping>::new();
        let first = registry.wait_for_event(CancellationToken::new());
        let second = registry.wait_for_event(CancellationToken::new());
        let journal = Journal::new();
        registry.register(&recording(&journal, |ping: &Ping| ping.n));

        assert_eq!(registry.raise(Ping { n: 3 }).unwrap(), 3);

        let (first, second) = tokio::join!(first, second);
        assert_eq!(*first.unwrap(), Ping { n: 3 });
        assert_eq!(*second.unwrap(), Ping { n: 3 });
        assert_eq!(registry.binding_count(), 1, "only the permanent binding remains");
        assert_eq!(journal.entries(), vec![3]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_wait_across_threads() {
        let bus = EventBus::new();
        let registry = bus.registry::<Pong>().unwrap();
        let next = registry.wait_for_event_timeout(Duration::from_secs(5), CancellationToken::new());

        let producer = bus.clone();
        let raised = std::thread::spawn(move || producer.raise(Pong(99)));

        assert_eq!(*next.await.unwrap(), Pong(99));
        assert_eq!(raised.join().unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_wait_via_bus_registry_sees_bus_raise() {
        let bus = EventBus::builder().event::<Ping>().build().unwrap();
        let next = bus.registry::<Ping>().unwrap().wait_for_event(CancellationToken::new());

        bus.raise(Ping { n: 8 }).unwrap();

        let event = next.await.context("Awaiting ping").unwrap();
        assert_eq!(event.n, 8);
    }
}
