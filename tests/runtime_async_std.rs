use std::{convert::Infallible, sync::Arc, time::Duration};

use async_lock::Barrier;
use lookup_cache::future::{Cache, ScopedCache};

#[async_std::test]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    const NUM_TASKS: usize = 16;
    const NUM_KEYS_PER_TASK: usize = 64;

    fn value(n: usize) -> String {
        format!("value {n}")
    }

    // Create a cache that can store up to 10,000 entries.
    let cache = Cache::new(10_000, Duration::from_secs(60), |key: usize| async move {
        Ok::<_, Infallible>(value(key))
    });

    let barrier = Arc::new(Barrier::new(NUM_TASKS));

    // Spawn async tasks and write to and read from the cache.
    let tasks: Vec<_> = (0..NUM_TASKS)
        .map(|i| {
            // To share the same cache across the async tasks, clone it.
            // This is a cheap operation.
            let my_cache = cache.clone();
            let my_barrier = Arc::clone(&barrier);
            let start = i * NUM_KEYS_PER_TASK;
            let end = (i + 1) * NUM_KEYS_PER_TASK;

            async_std::task::spawn(async move {
                my_barrier.wait().await;

                for key in start..end {
                    if key % 2 == 0 {
                        my_cache.set(key, format!("set {key}"));
                    }
                    let expected = if key % 2 == 0 {
                        format!("set {key}")
                    } else {
                        value(key)
                    };
                    assert_eq!(my_cache.get(&key).await.unwrap(), expected);
                }

                // Invalidate every 4 element of the inserted entries.
                for key in (start..end).step_by(4) {
                    my_cache.invalidate(&key);
                }
            })
        })
        .collect();

    futures_util::future::join_all(tasks).await;

    // Verify the result.
    for key in 0..(NUM_TASKS * NUM_KEYS_PER_TASK) {
        if key % 4 == 0 {
            assert!(!cache.contains(&key));
        } else if key % 2 == 0 {
            assert_eq!(cache.get(&key).await.unwrap(), format!("set {key}"));
        } else {
            assert_eq!(cache.get(&key).await.unwrap(), value(key));
        }
    }

    Ok(())
}

#[async_std::test]
async fn scoped_cache_on_async_std() {
    let cache = ScopedCache::builder(4).build(|key: u32, scope| async move {
        async_std::task::sleep(Duration::from_millis(1)).await;
        scope.add_finalizer(|| ());
        Ok::<_, Infallible>(key + 1)
    });

    let tasks: Vec<_> = (0..8u32)
        .map(|key| {
            let my_cache = cache.clone();
            async_std::task::spawn(async move { *my_cache.get(&key).await.unwrap() })
        })
        .collect();

    let values = futures_util::future::join_all(tasks).await;
    assert_eq!(values, (1..=8).collect::<Vec<_>>());
}
