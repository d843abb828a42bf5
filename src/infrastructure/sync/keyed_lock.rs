use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};

/// 文字列キー単位の排他。同一キーの処理は投入順（FIFO）に直列化される。
///
/// tokio の Mutex はフェアなので、待機順がそのまま実行順になる。
/// タイムアウトは持たない。ハングした処理は同一キューを止め続ける。
pub struct KeyedMutex {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedMutex {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn with_lock<F, Fut, T>(&self, key: &str, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let lock = {
            let mut guard = self.locks.lock().await;
            guard
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        let result = {
            let _held = lock.lock().await;
            f().await
        };

        self.prune(key, &lock).await;
        result
    }

    /// 誰も待っていないキーをマップから外す
    async fn prune(&self, key: &str, lock: &Arc<Mutex<()>>) {
        let mut guard = self.locks.lock().await;
        if let Some(existing) = guard.get(key) {
            if Arc::ptr_eq(existing, lock) && Arc::strong_count(existing) == 2 {
                guard.remove(key);
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }
}

impl Default for KeyedMutex {
    fn default() -> Self {
        Self::new()
    }
}

/// 文字列キー単位で同時実行数を permits 件まで許可する。超過分は FIFO で待つ。
pub struct KeyedSemaphore {
    semaphores: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl KeyedSemaphore {
    pub fn new() -> Self {
        Self {
            semaphores: Mutex::new(HashMap::new()),
        }
    }

    /// 同一キーの最初の呼び出しが permits を決める
    pub async fn with_permit<F, Fut, T>(&self, key: &str, permits: usize, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let semaphore = {
            let mut guard = self.semaphores.lock().await;
            guard
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(permits.max(1))))
                .clone()
        };

        // クローズしないので acquire は失敗しない
        let permit = semaphore
            .acquire()
            .await
            .expect("keyed semaphore is never closed");
        let result = f().await;
        drop(permit);

        let mut guard = self.semaphores.lock().await;
        if let Some(existing) = guard.get(key) {
            if Arc::ptr_eq(existing, &semaphore) && Arc::strong_count(existing) == 2 {
                guard.remove(key);
            }
        }
        result
    }
}

impl Default for KeyedSemaphore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Mutex as AsyncMutex;

    #[tokio::test]
    async fn test_with_lock_serializes_same_key() {
        let mutex = Arc::new(KeyedMutex::new());
        let events: Arc<AsyncMutex<Vec<&'static str>>> = Arc::new(AsyncMutex::new(Vec::new()));

        let first = {
            let mutex = mutex.clone();
            let events = events.clone();
            tokio::spawn(async move {
                mutex
                    .with_lock("item:1", || async {
                        events.lock().await.push("a_start");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        events.lock().await.push("a_end");
                    })
                    .await;
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let second = {
            let mutex = mutex.clone();
            let events = events.clone();
            tokio::spawn(async move {
                mutex
                    .with_lock("item:1", || async {
                        events.lock().await.push("b_start");
                    })
                    .await;
            })
        };

        first.await.unwrap();
        second.await.unwrap();

        let events = events.lock().await;
        assert_eq!(*events, vec!["a_start", "a_end", "b_start"]);
    }

    #[tokio::test]
    async fn test_with_lock_fifo_order_for_waiters() {
        let mutex = Arc::new(KeyedMutex::new());
        let order: Arc<AsyncMutex<Vec<usize>>> = Arc::new(AsyncMutex::new(Vec::new()));

        let holder = {
            let mutex = mutex.clone();
            tokio::spawn(async move {
                mutex
                    .with_lock("k", || async {
                        tokio::time::sleep(Duration::from_millis(80)).await;
                    })
                    .await;
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut waiters = Vec::new();
        for i in 0..4 {
            let mutex = mutex.clone();
            let order = order.clone();
            waiters.push(tokio::spawn(async move {
                mutex
                    .with_lock("k", || async {
                        order.lock().await.push(i);
                    })
                    .await;
            }));
            // 各タスクが待ち行列に並んだことを確実にする
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        holder.await.unwrap();
        for waiter in waiters {
            waiter.await.unwrap();
        }
        assert_eq!(*order.lock().await, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let mutex = Arc::new(KeyedMutex::new());
        let started = Arc::new(AtomicUsize::new(0));

        let slow = {
            let mutex = mutex.clone();
            tokio::spawn(async move {
                mutex
                    .with_lock("slow", || async {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    })
                    .await;
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        {
            let started = started.clone();
            mutex
                .with_lock("fast", || async {
                    started.fetch_add(1, Ordering::SeqCst);
                })
                .await;
        }
        assert_eq!(started.load(Ordering::SeqCst), 1);
        slow.await.unwrap();
    }

    #[tokio::test]
    async fn test_idle_keys_are_pruned() {
        let mutex = KeyedMutex::new();
        mutex.with_lock("k", || async {}).await;
        assert_eq!(mutex.len().await, 0);
    }

    #[tokio::test]
    async fn test_semaphore_caps_concurrency() {
        let semaphore = Arc::new(KeyedSemaphore::new());
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..6 {
            let semaphore = semaphore.clone();
            let current = current.clone();
            let peak = peak.clone();
            tasks.push(tokio::spawn(async move {
                semaphore
                    .with_permit("uploads", 2, || async {
                        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        current.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
