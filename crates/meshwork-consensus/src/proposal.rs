//! Task ids, proposals and their digests.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a unit of work.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// BLAKE3 fingerprint of a proposal.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Digest(pub [u8; 32]);

impl Digest {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Digest {
    /// First eight bytes, hex encoded.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0[..8]))
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({self})")
    }
}

/// A candidate result for a task, put up for agreement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub task_id: TaskId,
    pub value: Vec<u8>,
}

impl Proposal {
    pub fn new(task_id: impl Into<TaskId>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            task_id: task_id.into(),
            value: value.into(),
        }
    }

    /// Digest over the task id and value. Including the task id keeps equal
    /// results for different tasks distinct.
    pub fn digest(&self) -> Digest {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"meshwork/proposal/v1");
        hasher.update(&(self.task_id.0.len() as u64).to_le_bytes());
        hasher.update(self.task_id.0.as_bytes());
        hasher.update(&self.value);
        Digest(*hasher.finalize().as_bytes())
    }
}
