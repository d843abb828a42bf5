use crate::shared::error::AppError;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

type SharedOp<T> = Shared<BoxFuture<'static, Result<T, AppError>>>;

struct InFlight<T: Clone> {
    generation: u64,
    future: SharedOp<T>,
}

/// 同一キーの同時リクエストをひとつの実行に束ねる。
///
/// 先行リクエストが未解決のうちは後続も同じ Future を待ち、全員が同じ結果の
/// クローンを受け取る。決着したらキーは解放され、次の呼び出しは新規実行になる。
pub struct RequestDeduplicator<T: Clone> {
    in_flight: Mutex<HashMap<String, InFlight<T>>>,
    generation: AtomicU64,
}

impl<T> RequestDeduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    pub async fn run<F>(&self, key: &str, op: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>> + Send + 'static,
    {
        let (generation, future) = {
            let mut guard = self.in_flight.lock().await;
            match guard.get(key) {
                Some(existing) => {
                    debug!(key = key, "joining in-flight request");
                    (existing.generation, existing.future.clone())
                }
                None => {
                    let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                    let shared = op.boxed().shared();
                    guard.insert(
                        key.to_string(),
                        InFlight {
                            generation,
                            future: shared.clone(),
                        },
                    );
                    (generation, shared)
                }
            }
        };

        let result = future.await;

        // 自分が待っていた世代のエントリだけ解放する。決着後に始まった
        // 新しい実行を誤って消さないための世代チェック。
        let mut guard = self.in_flight.lock().await;
        if let Some(existing) = guard.get(key) {
            if existing.generation == generation {
                guard.remove(key);
            }
        }

        result
    }

    pub async fn is_in_flight(&self, key: &str) -> bool {
        self.in_flight.lock().await.contains_key(key)
    }
}

impl<T> Default for RequestDeduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
