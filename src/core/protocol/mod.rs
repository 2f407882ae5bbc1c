// src/core/protocol/mod.rs

//! Wire codecs spoken by the handlers and the front door.

pub mod ftp;
pub mod jsonl;
pub mod sftp;
pub mod snmp;
pub mod utf8;

pub use jsonl::{
    DocumentFrame, InboundFrame, JsonDocumentCodec, JsonLineCodec, OutboundFrame, RequestFrame,
};
pub use utf8::{Utf8ChunkCodec, Utf8Chunks};

use chrono::{DateTime, Utc};

/// What a directory listing entry looks like, regardless of the protocol that
/// produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEntry {
    pub name: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub kind: EntryKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    Other,
}
