//! PUB/SUB subsystem (component E): the subscriber callback registry with
//! prefix filtering, the background listener thread that drains the
//! subscription client, and the `SUBSCRIBE`/`PSUBSCRIBE` pattern choice.
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use logger::logger::Logger;

use crate::connection::ClientConnection;
use crate::resp::Value;

/// `(pattern_or_none, channel, payload)`. Callbacks must not retain borrowed
/// slices past their call (§4.E's callback contract) and must return
/// promptly since they run from the listener thread.
pub type MessageCallback = Arc<dyn Fn(Option<&[u8]>, &[u8], &[u8]) + Send + Sync>;

struct SubscriberEntry {
    prefix: Vec<u8>,
    callback: MessageCallback,
}

/// Registry of `(prefix, callback)` subscriptions, guarded by its own lock
/// per §3's server-instance invariant (never held together with the
/// configuration lock).
#[derive(Default)]
pub struct SubscriberRegistry {
    entries: Mutex<Vec<SubscriberEntry>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        SubscriberRegistry { entries: Mutex::new(Vec::new()) }
    }

    /// Inserts `(prefix, callback)` unless an entry with the same prefix and
    /// callback identity is already registered.
    pub fn add(&self, prefix: impl Into<Vec<u8>>, callback: MessageCallback) {
        let prefix = prefix.into();
        let mut entries = self.entries.lock();
        let duplicate = entries
            .iter()
            .any(|e| e.prefix == prefix && Arc::ptr_eq(&e.callback, &callback));
        if !duplicate {
            entries.push(SubscriberEntry { prefix, callback });
        }
    }

    /// Removes every entry whose callback shares `callback`'s identity,
    /// regardless of prefix.
    pub fn remove(&self, callback: &MessageCallback) {
        self.entries.lock().retain(|e| !Arc::ptr_eq(&e.callback, callback));
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Snapshots the callbacks whose prefix is empty or a prefix of
    /// `channel`, then releases the lock before the caller invokes any of
    /// them (§4.E: "releases the lock, and invokes each callback").
    fn matching(&self, channel: &[u8]) -> Vec<MessageCallback> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.prefix.is_empty() || channel.starts_with(&e.prefix[..]))
            .map(|e| e.callback.clone())
            .collect()
    }
}

/// Glob metacharacters that select `PSUBSCRIBE` over `SUBSCRIBE`.
pub fn is_glob_pattern(pattern: &str) -> bool {
    pattern.chars().any(|c| matches!(c, '*' | '?' | '['))
}

/// Spawns the subscription listener thread for one server instance. The
/// thread loops reading frames from `conn` while `enabled` stays set and the
/// server's current generation still matches `my_generation` — a newer
/// listener (spawned by a later `subscribe` call after `end_subscription`)
/// supersedes this one without the two ever racing on the same socket.
pub fn spawn_listener(
    conn: Arc<ClientConnection>,
    registry: Arc<SubscriberRegistry>,
    enabled: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
    my_generation: u64,
    logger: Logger,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        while enabled.load(Ordering::Acquire) && generation.load(Ordering::Acquire) == my_generation {
            let frame = match conn.read_reply() {
                Ok(frame) => frame,
                Err(e) => {
                    logger.debug("subscription read failed, listener exiting", "pubsub", e);
                    break;
                }
            };
            dispatch(&frame, &registry, &logger);
        }
        logger.info("subscription listener exiting", "pubsub");
    })
}

/// Also used directly as the subscription connection's RESP3 push
/// consumer: under RESP3 every subscribe ack and message arrives as a
/// `Push` frame, which [`ClientConnection::read_reply`] intercepts and
/// hands to the push consumer without ever returning it to the listener
/// loop below, so both protocol versions funnel through this one function.
pub(crate) fn dispatch(frame: &Value, registry: &SubscriberRegistry, logger: &Logger) {
    let items = match frame.as_array() {
        Some(items) => items,
        None => {
            logger.debug("ignoring non-array subscription frame", "pubsub", frame);
            return;
        }
    };

    let (pattern, channel, payload): (Option<&[u8]>, &[u8], &[u8]) = match items {
        [kind, channel, payload] if kind.as_bytes() == Some(b"message") => {
            match (channel.as_bytes(), payload.as_bytes()) {
                (Some(c), Some(p)) => (None, c, p),
                _ => return logger.debug("malformed message frame", "pubsub", frame),
            }
        }
        [kind, pattern, channel, payload] if kind.as_bytes() == Some(b"pmessage") => {
            match (pattern.as_bytes(), channel.as_bytes(), payload.as_bytes()) {
                (Some(pt), Some(c), Some(p)) => (Some(pt), c, p),
                _ => return logger.debug("malformed pmessage frame", "pubsub", frame),
            }
        }
        _ => {
            logger.debug("skipping unrecognized subscription frame shape", "pubsub", frame);
            return;
        }
    };

    for callback in registry.matching(channel) {
        callback(pattern, channel, payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn is_glob_pattern_detects_metacharacters() {
        assert!(is_glob_pattern("news.*"));
        assert!(is_glob_pattern("ab?c"));
        assert!(is_glob_pattern("[ab]c"));
        assert!(!is_glob_pattern("news.fire"));
    }

    #[test]
    fn registry_elides_duplicate_prefix_callback_pairs() {
        let registry = SubscriberRegistry::new();
        let cb: MessageCallback = Arc::new(|_, _, _| {});
        registry.add("alerts.", cb.clone());
        registry.add("alerts.", cb.clone());
        assert_eq!(registry.matching(b"alerts.fire").len(), 1);
    }

    #[test]
    fn matching_filters_by_prefix() {
        let registry = SubscriberRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        let cb: MessageCallback = Arc::new(move |_, _, _| {
            hits2.fetch_add(1, Ordering::SeqCst);
        });
        registry.add("alerts.", cb);

        assert_eq!(registry.matching(b"alerts.fire").len(), 1);
        assert_eq!(registry.matching(b"weather.rain").len(), 0);
    }

    #[test]
    fn empty_prefix_matches_every_channel() {
        let registry = SubscriberRegistry::new();
        let cb: MessageCallback = Arc::new(|_, _, _| {});
        registry.add("", cb);
        assert_eq!(registry.matching(b"anything").len(), 1);
    }

    #[test]
    fn remove_drops_all_entries_for_callback() {
        let registry = SubscriberRegistry::new();
        let cb: MessageCallback = Arc::new(|_, _, _| {});
        registry.add("a", cb.clone());
        registry.add("b", cb.clone());
        registry.remove(&cb);
        assert!(registry.is_empty());
    }

    #[test]
    fn dispatch_invokes_callback_for_message_frame() {
        let registry = SubscriberRegistry::new();
        let seen = Arc::new(Mutex::new(None));
        let seen2 = seen.clone();
        let cb: MessageCallback = Arc::new(move |pattern, channel, payload| {
            *seen2.lock() = Some((pattern.map(|p| p.to_vec()), channel.to_vec(), payload.to_vec()));
        });
        registry.add("alerts.", cb);

        let frame = Value::Array(vec![
            Value::bulk_string(&b"message"[..]),
            Value::bulk_string(&b"alerts.fire"[..]),
            Value::bulk_string(&b"3"[..]),
        ]);
        let logger = Logger::null();
        dispatch(&frame, &registry, &logger);

        let got = seen.lock().take().unwrap();
        assert_eq!(got.0, None);
        assert_eq!(got.1, b"alerts.fire");
        assert_eq!(got.2, b"3");
    }
}
