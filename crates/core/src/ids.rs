//! Identifier helpers.

use uuid::Uuid;

/// A fresh 12-hex-character id, used for trace ids and session ids.
pub fn short_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(12);
    id
}
