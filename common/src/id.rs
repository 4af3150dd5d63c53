use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use crate::types::{Identifier, ID_LEN};

const PREFIX: &[u8; 4] = b"AMQ ";
const NAME_LEN: usize = 12;

#[derive(Clone)]
pub struct SerialId(Arc<AtomicU64>);

impl Default for SerialId {
    fn default() -> Self {
        SerialId(Arc::new(AtomicU64::new(1)))
    }
}

impl SerialId {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }

    /// "AMQ " + manager name (space padded to 12 bytes) + big-endian sequence
    pub fn next_identifier(&self, manager: &str) -> Identifier {
        let mut bytes = [b' '; ID_LEN];
        bytes[..PREFIX.len()].copy_from_slice(PREFIX);
        let name = manager.as_bytes();
        let len = name.len().min(NAME_LEN);
        bytes[PREFIX.len()..PREFIX.len() + len].copy_from_slice(&name[..len]);
        bytes[PREFIX.len() + NAME_LEN..].copy_from_slice(&self.next().to_be_bytes());
        Identifier::new(bytes)
    }
}
