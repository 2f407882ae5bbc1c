// src/core/protocol/sftp.rs

//! SFTP version 3 (draft-ietf-secsh-filexfer-02) over any byte stream, usually
//! an SSH `sftp` subsystem channel.

use super::{EntryKind, RemoteEntry};
use crate::core::errors::UniconError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{TimeZone, Utc};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Decoder, Encoder, Framed};

const SFTP_VERSION: u32 = 3;
const MAX_PACKET_SIZE: usize = 4 * 1024 * 1024;
/// Read and write requests are issued in pieces of this size.
const IO_CHUNK: usize = 32 * 1024;

mod packet {
    pub const INIT: u8 = 1;
    pub const VERSION: u8 = 2;
    pub const OPEN: u8 = 3;
    pub const CLOSE: u8 = 4;
    pub const READ: u8 = 5;
    pub const WRITE: u8 = 6;
    pub const OPENDIR: u8 = 11;
    pub const READDIR: u8 = 12;
    pub const REMOVE: u8 = 13;
    pub const MKDIR: u8 = 14;
    pub const RMDIR: u8 = 15;
    pub const REALPATH: u8 = 16;
    pub const STAT: u8 = 17;
    pub const RENAME: u8 = 18;
    pub const STATUS: u8 = 101;
    pub const HANDLE: u8 = 102;
    pub const DATA: u8 = 103;
    pub const NAME: u8 = 104;
    pub const ATTRS: u8 = 105;
}

mod open_flags {
    pub const READ: u32 = 0x01;
    pub const WRITE: u32 = 0x02;
    pub const CREAT: u32 = 0x08;
    pub const TRUNC: u32 = 0x10;
    pub const EXCL: u32 = 0x20;
}

mod attr_flags {
    pub const SIZE: u32 = 0x01;
    pub const UIDGID: u32 = 0x02;
    pub const PERMISSIONS: u32 = 0x04;
    pub const ACMODTIME: u32 = 0x08;
    pub const EXTENDED: u32 = 0x8000_0000;
}

pub const STATUS_OK: u32 = 0;
pub const STATUS_EOF: u32 = 1;
pub const STATUS_NO_SUCH_FILE: u32 = 2;

fn status_name(code: u32) -> &'static str {
    match code {
        0 => "OK",
        1 => "EOF",
        2 => "NO_SUCH_FILE",
        3 => "PERMISSION_DENIED",
        4 => "FAILURE",
        5 => "BAD_MESSAGE",
        6 => "NO_CONNECTION",
        7 => "CONNECTION_LOST",
        8 => "OP_UNSUPPORTED",
        _ => "UNKNOWN",
    }
}

/// Length-prefixed SFTP packets. Items are `type byte + payload`.
#[derive(Debug, Default)]
pub struct SftpCodec;

impl Encoder<Bytes> for SftpCodec {
    type Error = UniconError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(4 + item.len());
        dst.put_u32(item.len() as u32);
        dst.put_slice(&item);
        Ok(())
    }
}

impl Decoder for SftpCodec {
    type Item = Bytes;
    type Error = UniconError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if len == 0 || len > MAX_PACKET_SIZE {
            return Err(UniconError::Protocol(format!(
                "SFTP: invalid packet length {len}"
            )));
        }
        if src.len() < 4 + len {
            src.reserve(4 + len - src.len());
            return Ok(None);
        }
        src.advance(4);
        Ok(Some(src.split_to(len).freeze()))
    }
}

/// File attributes, as far as listings need them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileAttrs {
    pub size: Option<u64>,
    pub permissions: Option<u32>,
    pub mtime: Option<u32>,
}

impl FileAttrs {
    pub fn is_dir(&self) -> bool {
        self.permissions.is_some_and(|p| p & 0o170000 == 0o040000)
    }

    pub fn kind(&self) -> EntryKind {
        match self.permissions.map(|p| p & 0o170000) {
            Some(0o040000) => EntryKind::Directory,
            Some(0o120000) => EntryKind::Symlink,
            Some(0o100000) | None => EntryKind::File,
            Some(_) => EntryKind::Other,
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        let mut flags = 0;
        if self.size.is_some() {
            flags |= attr_flags::SIZE;
        }
        if self.permissions.is_some() {
            flags |= attr_flags::PERMISSIONS;
        }
        buf.put_u32(flags);
        if let Some(size) = self.size {
            buf.put_u64(size);
        }
        if let Some(perm) = self.permissions {
            buf.put_u32(perm);
        }
    }
}

struct Cursor<'a>(&'a [u8]);

impl<'a> Cursor<'a> {
    fn need(&self, n: usize) -> Result<(), UniconError> {
        if self.0.remaining() < n {
            return Err(UniconError::Protocol("SFTP: truncated packet".into()));
        }
        Ok(())
    }

    fn u8(&mut self) -> Result<u8, UniconError> {
        self.need(1)?;
        Ok(self.0.get_u8())
    }

    fn u32(&mut self) -> Result<u32, UniconError> {
        self.need(4)?;
        Ok(self.0.get_u32())
    }

    fn u64(&mut self) -> Result<u64, UniconError> {
        self.need(8)?;
        Ok(self.0.get_u64())
    }

    fn bytes(&mut self) -> Result<&'a [u8], UniconError> {
        let len = self.u32()? as usize;
        self.need(len)?;
        let (head, tail) = self.0.split_at(len);
        self.0 = tail;
        Ok(head)
    }

    fn string(&mut self) -> Result<String, UniconError> {
        Ok(String::from_utf8_lossy(self.bytes()?).into_owned())
    }

    fn attrs(&mut self) -> Result<FileAttrs, UniconError> {
        let flags = self.u32()?;
        let mut attrs = FileAttrs::default();
        if flags & attr_flags::SIZE != 0 {
            attrs.size = Some(self.u64()?);
        }
        if flags & attr_flags::UIDGID != 0 {
            self.u32()?;
            self.u32()?;
        }
        if flags & attr_flags::PERMISSIONS != 0 {
            attrs.permissions = Some(self.u32()?);
        }
        if flags & attr_flags::ACMODTIME != 0 {
            self.u32()?;
            attrs.mtime = Some(self.u32()?);
        }
        if flags & attr_flags::EXTENDED != 0 {
            let count = self.u32()?;
            for _ in 0..count {
                self.bytes()?;
                self.bytes()?;
            }
        }
        Ok(attrs)
    }
}

fn put_str(buf: &mut BytesMut, value: &[u8]) {
    buf.put_u32(value.len() as u32);
    buf.put_slice(value);
}

enum Response {
    Status { code: u32, message: String },
    Handle(Vec<u8>),
    Data(Bytes),
    Name(Vec<(String, String, FileAttrs)>),
    Attrs(FileAttrs),
}

/// One SFTP session. Requests are issued one at a time.
pub struct SftpSession<S> {
    framed: Framed<S, SftpCodec>,
    next_id: u32,
}

impl<S> std::fmt::Debug for SftpSession<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SftpSession").field("next_id", &self.next_id).finish()
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> SftpSession<S> {
    /// Performs the `INIT`/`VERSION` exchange.
    pub async fn start(stream: S) -> Result<Self, UniconError> {
        let mut framed = Framed::new(stream, SftpCodec);
        let mut init = BytesMut::with_capacity(5);
        init.put_u8(packet::INIT);
        init.put_u32(SFTP_VERSION);
        framed.send(init.freeze()).await?;
        let reply = next_packet(&mut framed).await?;
        let mut cursor = Cursor(&reply);
        if cursor.u8()? != packet::VERSION {
            return Err(UniconError::Protocol(
                "SFTP: server did not answer INIT with VERSION".into(),
            ));
        }
        let version = cursor.u32()?;
        if version < SFTP_VERSION {
            return Err(UniconError::Protocol(format!(
                "SFTP: server speaks version {version}, need {SFTP_VERSION}"
            )));
        }
        Ok(Self { framed, next_id: 1 })
    }

    async fn request(&mut self, kind: u8, body: impl FnOnce(&mut BytesMut)) -> Result<Response, UniconError> {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u8(kind);
        buf.put_u32(id);
        body(&mut buf);
        self.framed.send(buf.freeze()).await?;

        loop {
            let reply = next_packet(&mut self.framed).await?;
            let mut cursor = Cursor(&reply);
            let kind = cursor.u8()?;
            if cursor.u32()? != id {
                continue;
            }
            return Ok(match kind {
                packet::STATUS => {
                    let code = cursor.u32()?;
                    let message = cursor.string().unwrap_or_default();
                    Response::Status { code, message }
                }
                packet::HANDLE => Response::Handle(cursor.bytes()?.to_vec()),
                packet::DATA => Response::Data(Bytes::copy_from_slice(cursor.bytes()?)),
                packet::NAME => {
                    let count = cursor.u32()?;
                    let mut names = Vec::with_capacity(count.min(1024) as usize);
                    for _ in 0..count {
                        let filename = cursor.string()?;
                        let longname = cursor.string()?;
                        let attrs = cursor.attrs()?;
                        names.push((filename, longname, attrs));
                    }
                    Response::Name(names)
                }
                packet::ATTRS => Response::Attrs(cursor.attrs()?),
                other => {
                    return Err(UniconError::Protocol(format!(
                        "SFTP: unexpected packet type {other}"
                    )));
                }
            });
        }
    }

    async fn expect_ok(&mut self, kind: u8, path: &str, body: impl FnOnce(&mut BytesMut)) -> Result<(), UniconError> {
        match self.request(kind, body).await? {
            Response::Status { code: STATUS_OK, .. } => Ok(()),
            Response::Status { code, message } => Err(status_error(code, &message, path)),
            _ => Err(unexpected(path)),
        }
    }

    async fn open_handle(&mut self, kind: u8, path: &str, body: impl FnOnce(&mut BytesMut)) -> Result<Vec<u8>, UniconError> {
        match self.request(kind, body).await? {
            Response::Handle(handle) => Ok(handle),
            Response::Status { code, message } => Err(status_error(code, &message, path)),
            _ => Err(unexpected(path)),
        }
    }

    async fn close_handle(&mut self, handle: &[u8]) -> Result<(), UniconError> {
        self.expect_ok(packet::CLOSE, "handle", |b| put_str(b, handle))
            .await
    }

    pub async fn read_dir(&mut self, path: &str) -> Result<Vec<RemoteEntry>, UniconError> {
        let handle = self
            .open_handle(packet::OPENDIR, path, |b| put_str(b, path.as_bytes()))
            .await?;
        let mut entries = Vec::new();
        let result = loop {
            match self
                .request(packet::READDIR, |b| put_str(b, &handle))
                .await
            {
                Ok(Response::Name(names)) => {
                    for (filename, longname, attrs) in names {
                        if filename == "." || filename == ".." {
                            continue;
                        }
                        let kind = if longname.starts_with('d') {
                            EntryKind::Directory
                        } else {
                            attrs.kind()
                        };
                        entries.push(RemoteEntry {
                            name: filename,
                            size: attrs.size.unwrap_or(0),
                            modified: attrs
                                .mtime
                                .and_then(|t| Utc.timestamp_opt(i64::from(t), 0).single()),
                            kind,
                        });
                    }
                }
                Ok(Response::Status { code: STATUS_EOF, .. }) => break Ok(()),
                Ok(Response::Status { code, message }) => break Err(status_error(code, &message, path)),
                Ok(_) => break Err(unexpected(path)),
                Err(e) => break Err(e),
            }
        };
        let closed = self.close_handle(&handle).await;
        result?;
        closed?;
        Ok(entries)
    }

    pub async fn stat(&mut self, path: &str) -> Result<FileAttrs, UniconError> {
        match self.request(packet::STAT, |b| put_str(b, path.as_bytes())).await? {
            Response::Attrs(attrs) => Ok(attrs),
            Response::Status { code, message } => Err(status_error(code, &message, path)),
            _ => Err(unexpected(path)),
        }
    }

    pub async fn realpath(&mut self, path: &str) -> Result<String, UniconError> {
        match self
            .request(packet::REALPATH, |b| put_str(b, path.as_bytes()))
            .await?
        {
            Response::Name(mut names) if !names.is_empty() => Ok(names.swap_remove(0).0),
            Response::Status { code, message } => Err(status_error(code, &message, path)),
            _ => Err(unexpected(path)),
        }
    }

    pub async fn read_file(&mut self, path: &str) -> Result<Vec<u8>, UniconError> {
        let handle = self
            .open_handle(packet::OPEN, path, |b| {
                put_str(b, path.as_bytes());
                b.put_u32(open_flags::READ);
                FileAttrs::default().encode(b);
            })
            .await?;
        let mut content = Vec::new();
        let result = loop {
            let offset = content.len() as u64;
            match self
                .request(packet::READ, |b| {
                    put_str(b, &handle);
                    b.put_u64(offset);
                    b.put_u32(IO_CHUNK as u32);
                })
                .await
            {
                Ok(Response::Data(data)) if data.is_empty() => break Ok(()),
                Ok(Response::Data(data)) => content.extend_from_slice(&data),
                Ok(Response::Status { code: STATUS_EOF, .. }) => break Ok(()),
                Ok(Response::Status { code, message }) => break Err(status_error(code, &message, path)),
                Ok(_) => break Err(unexpected(path)),
                Err(e) => break Err(e),
            }
        };
        let closed = self.close_handle(&handle).await;
        result?;
        closed?;
        Ok(content)
    }

    pub async fn write_file(&mut self, path: &str, content: &[u8], overwrite: bool) -> Result<(), UniconError> {
        let flags = open_flags::WRITE
            | open_flags::CREAT
            | if overwrite { open_flags::TRUNC } else { open_flags::EXCL };
        let handle = self
            .open_handle(packet::OPEN, path, |b| {
                put_str(b, path.as_bytes());
                b.put_u32(flags);
                FileAttrs::default().encode(b);
            })
            .await?;
        let mut result = Ok(());
        for (i, piece) in content.chunks(IO_CHUNK).enumerate() {
            let offset = (i * IO_CHUNK) as u64;
            result = self
                .expect_ok(packet::WRITE, path, |b| {
                    put_str(b, &handle);
                    b.put_u64(offset);
                    put_str(b, piece);
                })
                .await;
            if result.is_err() {
                break;
            }
        }
        let closed = self.close_handle(&handle).await;
        result?;
        closed
    }

    pub async fn remove(&mut self, path: &str) -> Result<(), UniconError> {
        self.expect_ok(packet::REMOVE, path, |b| put_str(b, path.as_bytes()))
            .await
    }

    pub async fn rmdir(&mut self, path: &str) -> Result<(), UniconError> {
        self.expect_ok(packet::RMDIR, path, |b| put_str(b, path.as_bytes()))
            .await
    }

    pub async fn mkdir(&mut self, path: &str) -> Result<(), UniconError> {
        self.expect_ok(packet::MKDIR, path, |b| {
            put_str(b, path.as_bytes());
            FileAttrs {
                permissions: Some(0o755),
                ..Default::default()
            }
            .encode(b);
        })
        .await
    }

    pub async fn rename(&mut self, from: &str, to: &str) -> Result<(), UniconError> {
        self.expect_ok(packet::RENAME, from, |b| {
            put_str(b, from.as_bytes());
            put_str(b, to.as_bytes());
        })
        .await
    }

    /// Flushes and closes the underlying stream.
    pub async fn close(mut self) -> Result<(), UniconError> {
        self.framed.close().await
    }
}

async fn next_packet<S: AsyncRead + AsyncWrite + Unpin>(
    framed: &mut Framed<S, SftpCodec>,
) -> Result<Bytes, UniconError> {
    match framed.next().await {
        Some(packet) => packet,
        None => Err(UniconError::transport("SFTP channel closed by server")),
    }
}

fn status_error(code: u32, message: &str, path: &str) -> UniconError {
    let name = status_name(code);
    let text = if message.is_empty() { name } else { message };
    UniconError::Remote {
        message: format!("SFTP {name}: {text} ({path})"),
        detail: serde_json::json!({ "sftpStatus": code, "path": path }),
    }
}

fn unexpected(path: &str) -> UniconError {
    UniconError::Protocol(format!("SFTP: unexpected response for {path}"))
}
