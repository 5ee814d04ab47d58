//! Cluster slot routing (component G): the slot→shard table built from
//! `CLUSTER SLOTS`, CRC16 hashtag-aware key hashing, `-MOVED`/`-ASK`
//! redirection handling, and background reconfiguration.
pub mod crc16;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use logger::logger::Logger;

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientErrorKind, ClientResult};
use crate::resp::Value;
use crate::server::ServerInstance;

pub use crc16::hash_slot;

/// One contiguous, inclusive slot range and the servers that own it —
/// master first, then replicas in order.
pub struct Shard {
    pub start: u16,
    pub end: u16,
    pub servers: Vec<Arc<ServerInstance>>,
}

impl Shard {
    fn owns(&self, slot: u16) -> bool {
        slot >= self.start && slot <= self.end
    }
}

/// The slot→shard table for a cluster deployment, plus the reconfiguration
/// machinery triggered by `MOVED` storms.
pub struct ClusterRouter {
    shards: Mutex<Vec<Shard>>,
    reconfiguring: AtomicBool,
    config: ClientConfig,
    logger: Logger,
}

impl ClusterRouter {
    /// Bootstraps the router from a list of seed endpoints: connects to the
    /// first reachable one and builds the initial shard table from
    /// `CLUSTER SLOTS`.
    pub fn bootstrap(
        seeds: &[(String, u16)],
        config: ClientConfig,
        logger: Logger,
    ) -> ClientResult<Arc<Self>> {
        let router = Arc::new(ClusterRouter {
            shards: Mutex::new(Vec::new()),
            reconfiguring: AtomicBool::new(false),
            config,
            logger,
        });

        let mut last_err = None;
        for (host, port) in seeds {
            let seed = Arc::new(ServerInstance::new(
                format!("{host}:{port}"),
                host.clone(),
                *port,
                router.config.clone(),
                router.logger.clone(),
            ));
            match seed.connect(false) {
                Ok(()) => match seed.request(&["CLUSTER".to_string(), "SLOTS".to_string()]) {
                    Ok(reply) => {
                        let shards = build_shards(&reply, &router)?;
                        *router.shards.lock() = shards;
                        return Ok(router);
                    }
                    Err(e) => last_err = Some(e),
                },
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| ClientError::new(ClientErrorKind::NoService, "no cluster seed reachable")))
    }

    pub fn shard_count(&self) -> usize {
        self.shards.lock().len()
    }

    /// Linear search for the shard owning `slot`, per §4.G's shard
    /// selection ("linear search the shard array").
    fn find_shard_server(&self, slot: u16) -> ClientResult<Arc<ServerInstance>> {
        let shards = self.shards.lock();
        let shard = shards
            .iter()
            .find(|s| s.owns(slot))
            .ok_or_else(|| ClientError::new(ClientErrorKind::NoService, "no shard owns this slot"))?;

        for server in &shard.servers {
            if server.is_connected() {
                return Ok(server.clone());
            }
        }
        for server in &shard.servers {
            if server.connect(false).is_ok() {
                return Ok(server.clone());
            }
        }
        Err(ClientError::new(ClientErrorKind::NoService, "no reachable server in shard"))
    }

    /// Routes `args` by the slot of `key`, following at most one `MOVED` or
    /// `ASK` redirection (testable property 7: "within one redirection step
    /// per key").
    pub fn request(self: &Arc<Self>, key: &[u8], args: &[Vec<u8>]) -> ClientResult<Value> {
        let slot = hash_slot(key);
        let server = self.find_shard_server(slot)?;
        self.dispatch(&server, args, true)
    }

    fn dispatch(self: &Arc<Self>, server: &Arc<ServerInstance>, args: &[Vec<u8>], allow_redirect: bool) -> ClientResult<Value> {
        let reply = server.request_args(args)?;
        if !allow_redirect || !reply.is_error() {
            return Ok(reply);
        }
        let Some((code, rest)) = reply.split_text() else {
            return Ok(reply);
        };
        match code {
            b"MOVED" => {
                self.schedule_reconfigure();
                let (host, port) = parse_redirect_target(rest)?;
                let target = self.find_or_fetch_endpoint(&host, port)?;
                ensure_connected(&target)?;
                self.dispatch(&target, args, false)
            }
            b"ASK" => {
                let (host, port) = parse_redirect_target(rest)?;
                let target = self.find_or_fetch_endpoint(&host, port)?;
                ensure_connected(&target)?;
                let mut asking = Vec::with_capacity(1 + args.len());
                asking.push(b"ASKING".to_vec());
                asking.extend_from_slice(args);
                target.request_args(&asking)?;
                target.request_args(args)
            }
            _ => Ok(reply),
        }
    }

    /// Finds the shard server matching `host:port`; if absent, forces a
    /// synchronous reconfiguration and retries once (§4.G "Redirections").
    fn find_or_fetch_endpoint(self: &Arc<Self>, host: &str, port: u16) -> ClientResult<Arc<ServerInstance>> {
        if let Some(server) = self.lookup_endpoint(host, port) {
            return Ok(server);
        }
        self.reconfigure_now()?;
        self.lookup_endpoint(host, port)
            .ok_or_else(|| ClientError::new(ClientErrorKind::NoService, "redirect target absent from refreshed shard table"))
    }

    fn lookup_endpoint(&self, host: &str, port: u16) -> Option<Arc<ServerInstance>> {
        self.shards
            .lock()
            .iter()
            .flat_map(|s| &s.servers)
            .find(|srv| srv.host() == host && srv.port() == port)
            .cloned()
    }

    /// Schedules a background reconfiguration unless one is already in
    /// flight; `MOVED` storms collapse into a single refresh.
    pub fn schedule_reconfigure(self: &Arc<Self>) {
        if self.reconfiguring.swap(true, Ordering::AcqRel) {
            return;
        }
        let this = Arc::clone(self);
        std::thread::spawn(move || {
            if let Err(e) = this.reconfigure_now() {
                this.logger.warn(&format!("cluster reconfiguration failed: {e}"), "cluster");
            }
            this.reconfiguring.store(false, Ordering::Release);
        });
    }

    fn reconfigure_now(self: &Arc<Self>) -> ClientResult<()> {
        let candidates: Vec<Arc<ServerInstance>> =
            self.shards.lock().iter().flat_map(|s| s.servers.clone()).collect();

        for candidate in &candidates {
            let _ = candidate.connect(false);
            if let Ok(reply) = candidate.request(&["CLUSTER".to_string(), "SLOTS".to_string()]) {
                let new_shards = build_shards(&reply, self)?;
                let old_shards = std::mem::replace(&mut *self.shards.lock(), new_shards);
                drop(old_shards);
                self.logger.info("cluster shard table refreshed", "cluster");
                return Ok(());
            }
        }
        Err(ClientError::new(ClientErrorKind::NoService, "no reachable node to refresh CLUSTER SLOTS from"))
    }
}

/// Redirect targets come out of the shard table possibly never dialed
/// before; connect on demand, same as the initial shard lookup does.
fn ensure_connected(server: &Arc<ServerInstance>) -> ClientResult<()> {
    if server.is_connected() {
        return Ok(());
    }
    server.connect(false)
}

fn parse_redirect_target(rest: &[u8]) -> ClientResult<(String, u16)> {
    let text = std::str::from_utf8(rest)
        .map_err(|_| ClientError::new(ClientErrorKind::ParseError, "redirect payload is not UTF-8"))?;
    let mut parts = text.split_whitespace();
    let _slot = parts.next();
    let endpoint = parts
        .next()
        .ok_or_else(|| ClientError::new(ClientErrorKind::ParseError, "redirect payload missing endpoint"))?;
    let (host, port) = endpoint
        .rsplit_once(':')
        .ok_or_else(|| ClientError::new(ClientErrorKind::ParseError, "redirect endpoint missing port"))?;
    let port: u16 = port
        .parse()
        .map_err(|_| ClientError::new(ClientErrorKind::ParseError, "redirect port is not a valid u16"))?;
    Ok((host.to_string(), port))
}

/// Builds a fresh shard array from a `CLUSTER SLOTS` reply. Per-replica
/// enumeration advances its own loop variable (REDESIGN FLAG: the source's
/// indexing bug is not reproduced here).
fn build_shards(reply: &Value, router: &Arc<ClusterRouter>) -> ClientResult<Vec<Shard>> {
    let rows = reply
        .as_array()
        .ok_or_else(|| ClientError::new(ClientErrorKind::UnexpectedResp, "CLUSTER SLOTS did not return an array"))?;

    let mut shards = Vec::with_capacity(rows.len());
    for row in rows {
        let cols = row
            .as_array()
            .ok_or_else(|| ClientError::new(ClientErrorKind::UnexpectedResp, "CLUSTER SLOTS row is not an array"))?;
        if cols.len() < 3 {
            return Err(ClientError::new(ClientErrorKind::UnexpectedArraySize, "CLUSTER SLOTS row too short"));
        }
        let start = cols[0]
            .as_integer()
            .ok_or_else(|| ClientError::new(ClientErrorKind::UnexpectedResp, "slot start is not an integer"))? as u16;
        let end = cols[1]
            .as_integer()
            .ok_or_else(|| ClientError::new(ClientErrorKind::UnexpectedResp, "slot end is not an integer"))? as u16;

        let mut servers = Vec::with_capacity(cols.len() - 2);
        for node in &cols[2..] {
            let node_cols = node
                .as_array()
                .ok_or_else(|| ClientError::new(ClientErrorKind::UnexpectedResp, "node entry is not an array"))?;
            let host = node_cols
                .first()
                .and_then(|v| v.as_bytes())
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .ok_or_else(|| ClientError::new(ClientErrorKind::UnexpectedResp, "node host missing"))?;
            let port = node_cols
                .get(1)
                .and_then(|v| v.as_integer())
                .ok_or_else(|| ClientError::new(ClientErrorKind::UnexpectedResp, "node port missing"))? as u16;
            let server = Arc::new(ServerInstance::new(
                format!("{host}:{port}"),
                host.clone(),
                port,
                router.config.clone(),
                router.logger.clone(),
            ));
            attach_back_reference(&server, router);
            servers.push(server);
        }
        shards.push(Shard { start, end, servers });
    }
    Ok(shards)
}

/// Attaches a cluster back-reference to `server` as a weak handle, so the
/// connection's parser can schedule a reconfiguration on `MOVED` without the
/// cluster and its shard servers forming a retain cycle (§9).
pub fn attach_back_reference(server: &ServerInstance, cluster: &Arc<ClusterRouter>) {
    server.set_cluster_back_reference(Arc::downgrade(cluster));
}

pub type ClusterWeakRef = Weak<ClusterRouter>;
