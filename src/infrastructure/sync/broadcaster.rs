use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, warn};

struct SubscriberEntry<T> {
    id: u64,
    sender: mpsc::UnboundedSender<T>,
}

struct ChannelState<T> {
    last_value: Option<T>,
    subscribers: Vec<SubscriberEntry<T>>,
}

impl<T> Default for ChannelState<T> {
    fn default() -> Self {
        Self {
            last_value: None,
            subscribers: Vec::new(),
        }
    }
}

struct Inner<T> {
    channels: HashMap<String, ChannelState<T>>,
    next_id: u64,
}

/// キー単位の状態同期ブロードキャスタ。
///
/// 購読時に最後の値を即時再生し、通知は登録順に同期配送する。
/// 直前の値と等しい通知は配送ごとスキップする（構造的等価で比較）。
/// 受信側が閉じていた購読者はログに残して外すだけで、他の購読者は止めない。
pub struct StateSyncBroadcaster<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for StateSyncBroadcaster<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> StateSyncBroadcaster<T>
where
    T: Clone + PartialEq + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                channels: HashMap::new(),
                next_id: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// 購読を登録する。キーに既知の値があれば即座に流す。
    /// 返った `Subscription` を drop すると購読解除。
    pub fn subscribe(&self, key: &str) -> (Subscription<T>, mpsc::UnboundedReceiver<T>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = {
            let mut inner = self.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            let channel = inner.channels.entry(key.to_string()).or_default();
            if let Some(last) = &channel.last_value {
                // 作りたての channel なので送信は失敗しない
                let _ = sender.send(last.clone());
            }
            channel.subscribers.push(SubscriberEntry { id, sender });
            id
        };
        (
            Subscription {
                key: key.to_string(),
                id,
                inner: Arc::clone(&self.inner),
            },
            receiver,
        )
    }

    /// 値を保存して全購読者へ配送する。直前の値と等しければ何もしない。
    pub fn notify(&self, key: &str, value: T) {
        let mut inner = self.lock();
        let channel = inner.channels.entry(key.to_string()).or_default();

        if channel.last_value.as_ref() == Some(&value) {
            debug!(key = key, "skipping notify for unchanged value");
            return;
        }
        channel.last_value = Some(value.clone());

        let mut dead = Vec::new();
        for subscriber in &channel.subscribers {
            if subscriber.sender.send(value.clone()).is_err() {
                warn!(
                    key = key,
                    subscriber_id = subscriber.id,
                    "subscriber channel closed, removing"
                );
                dead.push(subscriber.id);
            }
        }
        if !dead.is_empty() {
            channel
                .subscribers
                .retain(|subscriber| !dead.contains(&subscriber.id));
        }
    }

    pub fn last_value(&self, key: &str) -> Option<T> {
        self.lock()
            .channels
            .get(key)
            .and_then(|channel| channel.last_value.clone())
    }

    pub fn subscriber_count(&self, key: &str) -> usize {
        self.lock()
            .channels
            .get(key)
            .map(|channel| channel.subscribers.len())
            .unwrap_or(0)
    }

    /// 保持している最終値と購読者をすべて破棄する
    pub fn clear(&self) {
        self.lock().channels.clear();
    }
}

impl<T> Default for StateSyncBroadcaster<T>
where
    T: Clone + PartialEq + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// 購読ハンドル。drop で購読解除する。
pub struct Subscription<T> {
    key: String,
    id: u64,
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Subscription<T> {
    pub fn unsubscribe(self) {}
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(channel) = inner.channels.get_mut(&self.key) {
            channel
                .subscribers
                .retain(|subscriber| subscriber.id != self.id);
        }
    }
}
