//! Identifiers and well-known ids of the bootstrap model.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Reference to a document or classifier.
pub type Ref = String;

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// Storage domain name of a class.
pub type Domain = String;

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generates a fresh document id.
///
/// Ids are unique within the process and sort roughly by creation time.
pub fn generate_id() -> Ref {
    let count = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("{:08x}{:010x}", secs, count)
}

/// Returns the current wall-clock time in milliseconds.
pub fn now() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or(0)
}

/// Classifier ids.
pub mod class {
    pub const OBJ: &str = "core:class:Obj";
    pub const DOC: &str = "core:class:Doc";
    pub const ATTACHED_DOC: &str = "core:class:AttachedDoc";
    pub const SPACE: &str = "core:class:Space";
    pub const CLASS: &str = "core:class:Class";
    pub const MIXIN: &str = "core:class:Mixin";
    pub const INTERFACE: &str = "core:class:Interface";
    pub const ATTRIBUTE: &str = "core:class:Attribute";
    pub const TX: &str = "core:class:Tx";
    pub const TX_CUD: &str = "core:class:TxCUD";
    pub const TX_CREATE_DOC: &str = "core:class:TxCreateDoc";
    pub const TX_UPDATE_DOC: &str = "core:class:TxUpdateDoc";
    pub const TX_REMOVE_DOC: &str = "core:class:TxRemoveDoc";
    pub const TX_MIXIN: &str = "core:class:TxMixin";
}

/// Space ids.
pub mod space {
    pub const MODEL: &str = "core:space:Model";
    pub const TX: &str = "core:space:Tx";
}

/// Account ids.
pub mod account {
    pub const SYSTEM: &str = "core:account:System";
}

/// Storage domains.
pub mod domain {
    pub const MODEL: &str = "model";
    pub const TX: &str = "tx";
}
