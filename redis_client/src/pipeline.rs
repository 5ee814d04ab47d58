//! Pipeline subsystem (component F): the background listener that drains
//! fire-and-forget replies and hands everything but bare `+OK` acks to a
//! user-supplied consumer.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use logger::logger::Logger;

use crate::connection::ClientConnection;
use crate::resp::Value;

/// Receives every pipeline reply that is not a discarded acknowledgement,
/// in the order requests were sent on the pipeline client.
pub type PipelineConsumer = Arc<dyn Fn(Value) + Send + Sync>;

/// An `+OK`-shaped acknowledgement the listener discards silently. Any
/// other simple string is passed through, since some commands legitimately
/// reply with a different simple string (`+PONG`, etc.).
fn is_discarded_ack(value: &Value) -> bool {
    matches!(value, Value::SimpleString(b) if b == b"OK")
}

/// Spawns the pipeline listener thread. Runs while `enabled` stays set;
/// yields between iterations so a busy pipeline never starves the caller
/// thread sending on the same connection's write half.
pub fn spawn_listener(
    conn: Arc<ClientConnection>,
    consumer: PipelineConsumer,
    enabled: Arc<AtomicBool>,
    logger: Logger,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        while enabled.load(Ordering::Acquire) {
            match conn.read_reply() {
                Ok(value) => {
                    if !is_discarded_ack(&value) {
                        consumer(value);
                    }
                }
                Err(e) => {
                    logger.debug("pipeline read failed, listener exiting", "pipeline", e);
                    break;
                }
            }
            std::thread::yield_now();
        }
        logger.info("pipeline listener exiting", "pipeline");
    })
}
