//! Connect/disconnect hook lists (component I): ordered, deduplicated by
//! callback identity, invoked outside any lock.
use std::sync::Arc;

use crate::server::ServerInstance;

pub type ConnectHook = Arc<dyn Fn(&ServerInstance) + Send + Sync>;
pub type DisconnectHook = Arc<dyn Fn(&ServerInstance) + Send + Sync>;

/// Inserts `hook` unless an entry with the same callback identity is
/// already present.
pub(crate) fn insert_unique<T: ?Sized>(list: &mut Vec<Arc<T>>, hook: Arc<T>) {
    if !list.iter().any(|existing| Arc::ptr_eq(existing, &hook)) {
        list.push(hook);
    }
}

/// Removes every entry sharing `hook`'s callback identity.
pub(crate) fn remove_by_identity<T: ?Sized>(list: &mut Vec<Arc<T>>, hook: &Arc<T>) {
    list.retain(|existing| !Arc::ptr_eq(existing, hook));
}
