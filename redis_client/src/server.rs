//! The server instance (component D): three multiplexed clients to one
//! endpoint, its configuration, hooks, the subscriber registry and the
//! pipeline/subscription listener threads.
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use sha1::{Digest, Sha1};

use logger::logger::Logger;

use crate::cluster::ClusterWeakRef;
use crate::config::ClientConfig;
use crate::connection::{ClientConnection, Role};
use crate::error::{ClientError, ClientErrorKind, ClientResult};
use crate::hooks::{self, ConnectHook, DisconnectHook};
use crate::pipeline::{self, PipelineConsumer};
use crate::pubsub::{self, MessageCallback, SubscriberRegistry};
use crate::resp::Value;
use crate::sentinel::{self, SentinelDescriptor};

type TransmitErrorHook = Arc<dyn Fn(&str, Role, &str) + Send + Sync>;
type PushConsumer = Arc<dyn Fn(&Value) + Send + Sync>;

/// Groups the interactive, pipeline and subscription clients to one
/// Redis/Valkey endpoint. The pipeline and subscription connections are
/// held behind an `Arc` because their listener threads need an owned
/// handle that outlives any single call into this struct.
pub struct ServerInstance {
    id: String,
    endpoint: Mutex<(String, u16)>,
    interactive: Arc<ClientConnection>,
    pipeline: Arc<ClientConnection>,
    subscription: Arc<ClientConnection>,
    config: Mutex<ClientConfig>,
    transmit_error: Mutex<Option<TransmitErrorHook>>,
    pipeline_consumer: Mutex<Option<PipelineConsumer>>,
    push_consumer: Mutex<Option<PushConsumer>>,
    subscribers: Arc<SubscriberRegistry>,
    pipeline_enabled: Arc<AtomicBool>,
    pipeline_handle: Mutex<Option<JoinHandle<()>>>,
    subscription_enabled: Arc<AtomicBool>,
    subscription_generation: Arc<AtomicU64>,
    subscription_handle: Mutex<Option<JoinHandle<()>>>,
    sentinel: Option<Arc<SentinelDescriptor>>,
    cluster: Mutex<Option<ClusterWeakRef>>,
    logger: Logger,
}

impl ServerInstance {
    pub fn new(id: impl Into<String>, host: impl Into<String>, port: u16, config: ClientConfig, logger: Logger) -> Self {
        let id = id.into();
        ServerInstance {
            endpoint: Mutex::new((host.into(), port)),
            interactive: Arc::new(ClientConnection::new(Role::Interactive, id.clone())),
            pipeline: Arc::new(ClientConnection::new(Role::Pipeline, id.clone())),
            subscription: Arc::new(ClientConnection::new(Role::Subscription, id.clone())),
            id,
            config: Mutex::new(config),
            transmit_error: Mutex::new(None),
            pipeline_consumer: Mutex::new(None),
            push_consumer: Mutex::new(None),
            subscribers: Arc::new(SubscriberRegistry::new()),
            pipeline_enabled: Arc::new(AtomicBool::new(false)),
            pipeline_handle: Mutex::new(None),
            subscription_enabled: Arc::new(AtomicBool::new(false)),
            subscription_generation: Arc::new(AtomicU64::new(0)),
            subscription_handle: Mutex::new(None),
            sentinel: None,
            cluster: Mutex::new(None),
            logger,
        }
    }

    /// Builds a server instance whose address is discovered (and
    /// re-discovered on every `connect`/`reconnect`) through Sentinel.
    pub fn with_sentinel(
        id: impl Into<String>,
        sentinel: Arc<SentinelDescriptor>,
        config: ClientConfig,
        logger: Logger,
    ) -> Self {
        let mut instance = ServerInstance::new(id, String::new(), 0, config, logger);
        instance.sentinel = Some(sentinel);
        instance
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn host(&self) -> String {
        self.endpoint.lock().0.clone()
    }

    pub fn port(&self) -> u16 {
        self.endpoint.lock().1
    }

    pub fn set_transmit_error_hook(&self, hook: TransmitErrorHook) {
        *self.transmit_error.lock() = Some(hook.clone());
        self.interactive.set_transmit_error_hook(hook.clone());
        self.pipeline.set_transmit_error_hook(hook.clone());
        self.subscription.set_transmit_error_hook(hook);
    }

    pub fn set_pipeline_consumer(&self, consumer: PipelineConsumer) {
        *self.pipeline_consumer.lock() = Some(consumer);
    }

    pub fn set_push_consumer(&self, consumer: PushConsumer) {
        *self.push_consumer.lock() = Some(consumer);
    }

    /// Attaches a weak back-reference to the owning cluster router, so a
    /// `MOVED` reply observed on the interactive client schedules a
    /// reconfiguration (§4.B step 5, §9 cyclic-reference note).
    pub fn set_cluster_back_reference(&self, cluster: ClusterWeakRef) {
        *self.cluster.lock() = Some(cluster.clone());
        self.interactive.set_moved_hook(Arc::new(move || {
            if let Some(router) = cluster.upgrade() {
                router.schedule_reconfigure();
            }
        }));
    }

    fn connection(&self, role: Role) -> &ClientConnection {
        match role {
            Role::Interactive => &self.interactive,
            Role::Pipeline => &self.pipeline,
            Role::Subscription => &self.subscription,
        }
    }

    fn resolve_endpoint(&self) -> ClientResult<(String, u16)> {
        match &self.sentinel {
            Some(sentinel) => {
                let (host, port) = sentinel.discover_master()?;
                *self.endpoint.lock() = (host.clone(), port);
                Ok((host, port))
            }
            None => Ok(self.endpoint.lock().clone()),
        }
    }

    /// Connects the interactive client (and, if Sentinel-backed, verifies
    /// the discovered endpoint is really the master) and, optionally, the
    /// pipeline client plus its listener thread.
    pub fn connect(&self, use_pipeline: bool) -> ClientResult<()> {
        const MAX_SENTINEL_ATTEMPTS: usize = 3;

        let mut attempts = 0;
        loop {
            let (host, port) = self.resolve_endpoint()?;
            let cfg = self.config.lock().clone();

            self.interactive.set_push_consumer(self.wire_push_consumer());
            self.interactive.connect(&host, port, &cfg)?;

            if self.sentinel.is_some() {
                let is_master = match self.request(&["ROLE".to_string()]) {
                    Ok(reply) => sentinel::reply_indicates_master(&reply),
                    Err(_) => match self.request(&["INFO".to_string(), "replication".to_string()]) {
                        Ok(reply) => sentinel::info_indicates_master(&reply),
                        Err(_) => false,
                    },
                };
                if !is_master {
                    self.interactive.disconnect();
                    attempts += 1;
                    if attempts >= MAX_SENTINEL_ATTEMPTS {
                        return Err(ClientError::new(
                            ClientErrorKind::NoService,
                            "sentinel never produced a reachable master",
                        ));
                    }
                    continue;
                }
            }
            break;
        }

        self.run_connect_hooks();

        if use_pipeline {
            let cfg = self.config.lock().clone();
            let (host, port) = self.endpoint.lock().clone();
            self.pipeline.set_push_consumer(self.wire_push_consumer());
            self.pipeline.connect(&host, port, &cfg)?;
            self.start_pipeline_listener();
        }

        Ok(())
    }

    fn wire_push_consumer(&self) -> PushConsumer {
        let outer = self.push_consumer.lock().clone();
        Arc::new(move |value: &Value| {
            if let Some(outer) = &outer {
                outer(value);
            }
        })
    }

    fn start_pipeline_listener(&self) {
        self.pipeline_enabled.store(true, Ordering::Release);
        let consumer = self
            .pipeline_consumer
            .lock()
            .clone()
            .unwrap_or_else(|| Arc::new(|_: Value| {}));
        let handle = pipeline::spawn_listener(
            self.pipeline.clone(),
            consumer,
            self.pipeline_enabled.clone(),
            self.logger.clone(),
        );
        *self.pipeline_handle.lock() = Some(handle);
    }

    pub fn disconnect(&self) {
        self.end_subscription();
        self.pipeline_enabled.store(false, Ordering::Release);
        self.pipeline.disconnect();
        self.interactive.disconnect();
        if let Some(handle) = self.pipeline_handle.lock().take() {
            let _ = handle.join();
        }
        self.run_disconnect_hooks();
    }

    pub fn reconnect(&self) -> ClientResult<()> {
        let had_pipeline = self.has_pipeline();
        self.disconnect();
        self.connect(had_pipeline)
    }

    pub fn is_connected(&self) -> bool {
        self.interactive.is_enabled()
    }

    pub fn has_pipeline(&self) -> bool {
        self.pipeline.is_enabled()
    }

    fn run_connect_hooks(&self) {
        let hooks = self.config.lock().connect_hooks.clone();
        for hook in hooks {
            hook(self);
        }
    }

    fn run_disconnect_hooks(&self) {
        let hooks = self.config.lock().disconnect_hooks.clone();
        for hook in hooks {
            hook(self);
        }
    }

    pub fn add_connect_hook(&self, hook: ConnectHook) {
        hooks::insert_unique(&mut self.config.lock().connect_hooks, hook);
    }

    pub fn remove_connect_hook(&self, hook: &ConnectHook) {
        hooks::remove_by_identity(&mut self.config.lock().connect_hooks, hook);
    }

    pub fn clear_connect_hooks(&self) {
        self.config.lock().connect_hooks.clear();
    }

    pub fn add_disconnect_hook(&self, hook: DisconnectHook) {
        hooks::insert_unique(&mut self.config.lock().disconnect_hooks, hook);
    }

    pub fn remove_disconnect_hook(&self, hook: &DisconnectHook) {
        hooks::remove_by_identity(&mut self.config.lock().disconnect_hooks, hook);
    }

    pub fn clear_disconnect_hooks(&self) {
        self.config.lock().disconnect_hooks.clear();
    }

    /// Sends `args` on the interactive client and reads exactly one reply,
    /// holding the connection's block lock for the duration so an
    /// in-flight transaction block on another thread cannot interleave.
    pub fn request<A: AsRef<[u8]>>(&self, args: &[A]) -> ClientResult<Value> {
        let _guard = self.interactive.exclusive();
        self.interactive.send(args)?;
        self.interactive.read_reply()
    }

    pub fn array_request<A: AsRef<[u8]>>(&self, args: &[A]) -> ClientResult<Value> {
        self.request(args)
    }

    pub(crate) fn request_args(&self, args: &[Vec<u8>]) -> ClientResult<Value> {
        self.request(args)
    }

    pub fn send_async<A: AsRef<[u8]>>(&self, role: Role, args: &[A]) -> ClientResult<()> {
        self.connection(role).send(args)
    }

    pub fn read_reply_async(&self, role: Role) -> ClientResult<Value> {
        self.connection(role).read_reply()
    }

    pub fn ignore_reply_async(&self, role: Role) -> ClientResult<()> {
        self.connection(role).read_reply().map(|_| ())
    }

    pub fn skip_reply_async(&self, role: Role) -> ClientResult<()> {
        self.connection(role).send(&["CLIENT", "REPLY", "SKIP"])
    }

    pub fn get_attributes_async(&self, role: Role) -> Option<Value> {
        self.connection(role).attribute()
    }

    pub fn clear_attributes_async(&self, role: Role) {
        self.connection(role).clear_attribute();
    }

    /// Thin `MULTI` wrapper; returns a [`TransactionBlock`] that owns the
    /// interactive connection's block lock until `exec`/`abort` consumes it.
    pub fn start_block(&self) -> ClientResult<TransactionBlock<'_>> {
        let guard = self.interactive.exclusive();
        self.interactive.send(&["MULTI"])?;
        expect_simple_string(&self.interactive.read_reply()?, "OK")?;
        Ok(TransactionBlock { server: self, _guard: guard })
    }

    pub fn get_time(&self) -> ClientResult<(i64, i64)> {
        let reply = self.request(&["TIME"])?;
        let items = reply
            .as_array()
            .ok_or_else(|| ClientError::new(ClientErrorKind::UnexpectedResp, "TIME did not return an array"))?;
        let [secs, micros] = items else {
            return Err(ClientError::new(ClientErrorKind::UnexpectedArraySize, "TIME expects exactly 2 elements"));
        };
        let secs = parse_bulk_int(secs)?;
        let micros = parse_bulk_int(micros)?;
        Ok((secs, micros * 1_000))
    }

    pub fn get_available(&self, role: Role) -> ClientResult<usize> {
        self.connection(role).available()
    }

    pub fn publish(&self, channel: &[u8], payload: &[u8]) -> ClientResult<()> {
        self.request(&[b"PUBLISH".as_slice(), channel, payload])?;
        Ok(())
    }

    pub fn publish_async(&self, channel: &[u8], payload: &[u8]) -> ClientResult<()> {
        let role = if self.has_pipeline() { Role::Pipeline } else { Role::Interactive };
        self.send_async(role, &[b"PUBLISH".as_slice(), channel, payload])
    }

    /// Ensures the subscription client is connected and its listener is
    /// running, then sends `SUBSCRIBE`/`PSUBSCRIBE` without waiting for the
    /// acknowledgement (the listener consumes it).
    pub fn subscribe(&self, pattern: &str) -> ClientResult<()> {
        self.ensure_subscription_listener()?;
        let cmd = if pubsub::is_glob_pattern(pattern) { "PSUBSCRIBE" } else { "SUBSCRIBE" };
        self.subscription.send(&[cmd, pattern])
    }

    pub fn unsubscribe(&self, pattern: Option<&str>) -> ClientResult<()> {
        match pattern {
            Some(p) if pubsub::is_glob_pattern(p) => self.subscription.send(&["PUNSUBSCRIBE", p]),
            Some(p) => self.subscription.send(&["UNSUBSCRIBE", p]),
            None => self.subscription.send(&["UNSUBSCRIBE"]),
        }
    }

    pub fn end_subscription(&self) {
        if self.subscription.is_enabled() {
            let _ = self.subscription.send(&["UNSUBSCRIBE"]);
            let _ = self.subscription.send(&["PUNSUBSCRIBE"]);
        }
        self.subscription_enabled.store(false, Ordering::Release);
        self.subscription_generation.fetch_add(1, Ordering::AcqRel);
        self.subscription.disconnect();
        if let Some(handle) = self.subscription_handle.lock().take() {
            let _ = handle.join();
        }
        self.subscribers.clear();
    }

    pub fn add_subscriber(&self, prefix: impl Into<Vec<u8>>, callback: MessageCallback) {
        self.subscribers.add(prefix, callback);
    }

    pub fn remove_subscribers(&self, callback: &MessageCallback) {
        self.subscribers.remove(callback);
    }

    pub fn clear_subscribers(&self) {
        self.subscribers.clear();
    }

    /// Connects the subscription client (if not already up) and spawns its
    /// listener thread under a fresh generation, so an older listener from
    /// a previous `subscribe`/`end_subscription` cycle cannot race it.
    fn ensure_subscription_listener(&self) -> ClientResult<()> {
        if self.subscription.is_enabled() {
            return Ok(());
        }
        let (host, port) = self.endpoint.lock().clone();
        let cfg = self.config.lock().clone();
        let registry = self.subscribers.clone();
        let logger_for_push = self.logger.clone();
        self.subscription.set_push_consumer(Arc::new(move |frame: &Value| {
            pubsub::dispatch(frame, &registry, &logger_for_push);
        }));
        self.subscription.connect(&host, port, &cfg)?;

        self.subscription_enabled.store(true, Ordering::Release);
        let generation = self.subscription_generation.fetch_add(1, Ordering::AcqRel) + 1;
        let handle = pubsub::spawn_listener(
            self.subscription.clone(),
            self.subscribers.clone(),
            self.subscription_enabled.clone(),
            self.subscription_generation.clone(),
            generation,
            self.logger.clone(),
        );
        *self.subscription_handle.lock() = Some(handle);
        Ok(())
    }

    /// Issues `SCRIPT LOAD` and returns the SHA1 digest the server
    /// confirmed, which should match [`script_sha1`] for the same source.
    pub fn load_script(&self, source: &str) -> ClientResult<String> {
        let reply = self.request(&[b"SCRIPT".as_slice(), b"LOAD", source.as_bytes()])?;
        reply
            .as_bytes()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .ok_or_else(|| ClientError::new(ClientErrorKind::UnexpectedResp, "SCRIPT LOAD did not return a digest"))
    }

    /// Runs `EVALSHA`, and on `NOSCRIPT` falls back to `EVAL` with the
    /// original source (§4.D "script cache miss" edge case).
    pub fn run_script_async(&self, source: &str, keys: &[Vec<u8>], args: &[Vec<u8>]) -> ClientResult<Value> {
        let sha = script_sha1(source);
        let numkeys = keys.len().to_string();

        let mut evalsha_args = vec![b"EVALSHA".to_vec(), sha.into_bytes(), numkeys.clone().into_bytes()];
        evalsha_args.extend(keys.iter().cloned());
        evalsha_args.extend(args.iter().cloned());

        match self.request_args(&evalsha_args) {
            Ok(value) => Ok(value),
            Err(e) if e.kind() == ClientErrorKind::RedisError && e.message().starts_with("NOSCRIPT") => {
                let mut eval_args = vec![b"EVAL".to_vec(), source.as_bytes().to_vec(), numkeys.into_bytes()];
                eval_args.extend(keys.iter().cloned());
                eval_args.extend(args.iter().cloned());
                self.request_args(&eval_args)
            }
            Err(e) => Err(e),
        }
    }
}

impl Drop for ServerInstance {
    /// Tears down any live clients and clears the hook lists, so a shard
    /// dropped out of a refreshed cluster table (or any other owner losing
    /// its last `Arc`) doesn't leave connections or threads behind.
    fn drop(&mut self) {
        self.disconnect();
        let mut config = self.config.lock();
        config.connect_hooks.clear();
        config.disconnect_hooks.clear();
    }
}

/// Returned by [`ServerInstance::start_block`]; queue commands, then
/// consume it with `exec` or `abort`.
pub struct TransactionBlock<'a> {
    server: &'a ServerInstance,
    _guard: parking_lot::MutexGuard<'a, ()>,
}

impl<'a> TransactionBlock<'a> {
    /// Sends one command inside the open transaction and drains its
    /// `+QUEUED` acknowledgement.
    pub fn queue<A: AsRef<[u8]>>(&self, args: &[A]) -> ClientResult<()> {
        self.server.interactive.send(args)?;
        let reply = self.server.interactive.read_reply()?;
        if reply.is_error() {
            let message = reply.as_bytes().map(|b| String::from_utf8_lossy(b).into_owned()).unwrap_or_default();
            return Err(ClientError::new(ClientErrorKind::RedisError, message));
        }
        Ok(())
    }

    pub fn exec(self) -> ClientResult<Value> {
        self.server.interactive.send(&["EXEC"])?;
        self.server.interactive.read_reply()
    }

    pub fn abort(self) -> ClientResult<Value> {
        self.server.interactive.send(&["DISCARD"])?;
        self.server.interactive.read_reply()
    }
}

fn expect_simple_string(value: &Value, expected: &str) -> ClientResult<()> {
    match value {
        Value::SimpleString(b) if b == expected.as_bytes() => Ok(()),
        Value::Error(b) => Err(ClientError::new(ClientErrorKind::RedisError, String::from_utf8_lossy(b).into_owned())),
        _ => Err(ClientError::new(ClientErrorKind::UnexpectedResp, format!("expected +{expected}"))),
    }
}

fn parse_bulk_int(value: &Value) -> ClientResult<i64> {
    value
        .as_bytes()
        .and_then(|b| std::str::from_utf8(b).ok())
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ClientError::new(ClientErrorKind::ParseError, "expected a bulk string integer"))
}

/// Computes the SHA1 hex digest of a script body, usable with `EVALSHA`
/// without a server round trip (`SCRIPT LOAD` still happens once to make
/// the server aware of the body).
pub fn script_sha1(source: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(source.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_sha1_matches_known_vector() {
        assert_eq!(script_sha1("return 1"), "e0e1f9fabfc9d4800c877a703b823ac0578ff831");
    }

    #[test]
    fn new_server_starts_disconnected() {
        let server = ServerInstance::new("test", "127.0.0.1", 6379, ClientConfig::new(), Logger::null());
        assert!(!server.is_connected());
        assert!(!server.has_pipeline());
    }
}
