// src/core/protocol/ftp.rs

//! An FTP control-channel client (RFC 959) with passive-mode data transfers.
//!
//! Only the commands the file operation set needs are implemented. Every
//! command and every data transfer is bounded by the client timeout.

use super::{EntryKind, RemoteEntry};
use crate::core::errors::UniconError;
use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::debug;

/// One server reply, possibly assembled from a multi-line response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub text: String,
}

impl Reply {
    pub fn is_preliminary(&self) -> bool {
        (100..200).contains(&self.code)
    }

    pub fn is_positive(&self) -> bool {
        (200..400).contains(&self.code)
    }
}

impl std::fmt::Display for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.code, self.text)
    }
}

/// Parses a reply from raw lines. The first line decides whether the reply
/// is multi-line (`123-`), which then ends at the first `123 ` line.
pub fn parse_reply(lines: &[String]) -> Result<Reply, UniconError> {
    let first = lines
        .first()
        .ok_or_else(|| UniconError::Protocol("FTP: empty reply".into()))?;
    let code = reply_code(first)?;
    let text = lines
        .iter()
        .map(|line| line.get(4..).unwrap_or("").trim_end())
        .collect::<Vec<_>>()
        .join("\n");
    Ok(Reply { code, text })
}

fn reply_code(line: &str) -> Result<u16, UniconError> {
    line.get(..3)
        .and_then(|c| c.parse().ok())
        .ok_or_else(|| UniconError::Protocol(format!("FTP: malformed reply line '{line}'")))
}

/// Extracts the data address from a `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)` reply.
pub fn parse_pasv(text: &str) -> Result<([u8; 4], u16), UniconError> {
    let start = text.find('(').map(|i| i + 1);
    let end = text.rfind(')');
    let inner = match (start, end) {
        (Some(s), Some(e)) if s < e => &text[s..e],
        _ => text
            .split_whitespace()
            .find(|part| part.matches(',').count() == 5)
            .unwrap_or(""),
    };
    let parts: Vec<u8> = inner
        .split(',')
        .map(|p| p.trim().parse::<u8>())
        .collect::<Result<_, _>>()
        .map_err(|_| UniconError::Protocol(format!("FTP: cannot parse PASV reply '{text}'")))?;
    if parts.len() != 6 {
        return Err(UniconError::Protocol(format!(
            "FTP: cannot parse PASV reply '{text}'"
        )));
    }
    Ok((
        [parts[0], parts[1], parts[2], parts[3]],
        u16::from(parts[4]) << 8 | u16::from(parts[5]),
    ))
}

/// Extracts the port from `229 Entering Extended Passive Mode (|||port|)`.
pub fn parse_epsv(text: &str) -> Result<u16, UniconError> {
    let start = text.find("(|||").map(|i| i + 4);
    let end = text.rfind("|)");
    match (start, end) {
        (Some(s), Some(e)) if s < e => text[s..e]
            .parse()
            .map_err(|_| UniconError::Protocol(format!("FTP: cannot parse EPSV reply '{text}'"))),
        _ => Err(UniconError::Protocol(format!(
            "FTP: cannot parse EPSV reply '{text}'"
        ))),
    }
}

/// Parses one `MLSD` fact line: `type=file;size=12;modify=20240101120000; name`.
pub fn parse_mlsd_line(line: &str) -> Option<RemoteEntry> {
    let (facts, name) = line.split_once(' ')?;
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    let mut entry = RemoteEntry {
        name: name.to_string(),
        size: 0,
        modified: None,
        kind: EntryKind::File,
    };
    for fact in facts.split(';').filter(|f| !f.is_empty()) {
        let Some((key, value)) = fact.split_once('=') else {
            continue;
        };
        match key.to_ascii_lowercase().as_str() {
            "type" => {
                entry.kind = match value.to_ascii_lowercase().as_str() {
                    "file" => EntryKind::File,
                    "dir" => EntryKind::Directory,
                    "cdir" | "pdir" => return None,
                    v if v.starts_with("os.unix=slink") => EntryKind::Symlink,
                    _ => EntryKind::Other,
                }
            }
            "size" | "sizd" => entry.size = value.parse().unwrap_or(0),
            "modify" => {
                entry.modified = NaiveDateTime::parse_from_str(
                    value.split('.').next().unwrap_or(value),
                    "%Y%m%d%H%M%S",
                )
                .ok()
                .map(|t| Utc.from_utc_datetime(&t));
            }
            _ => {}
        }
    }
    Some(entry)
}

/// Parses one Unix-style `LIST` line:
/// `drwxr-xr-x 2 user group 4096 Jan 02 12:00 name`.
pub fn parse_list_line(line: &str) -> Option<RemoteEntry> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 9 {
        return None;
    }
    let kind = match fields[0].chars().next()? {
        'd' => EntryKind::Directory,
        'l' => EntryKind::Symlink,
        '-' => EntryKind::File,
        _ => EntryKind::Other,
    };
    // The name is everything after the eighth field, spaces included.
    let mut rest = line;
    for field in &fields[..8] {
        rest = rest.trim_start();
        rest = &rest[field.len()..];
    }
    let mut name = rest.trim_start().to_string();
    if kind == EntryKind::Symlink {
        if let Some(i) = name.find(" -> ") {
            name.truncate(i);
        }
    }
    if name == "." || name == ".." {
        return None;
    }
    Some(RemoteEntry {
        name,
        size: fields[4].parse().unwrap_or(0),
        modified: parse_list_date(fields[5], fields[6], fields[7]),
        kind,
    })
}

fn parse_list_date(month: &str, day: &str, year_or_time: &str) -> Option<chrono::DateTime<Utc>> {
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    let month = MONTHS
        .iter()
        .position(|m| month.eq_ignore_ascii_case(m))? as u32
        + 1;
    let day: u32 = day.parse().ok()?;
    let (year, hour, minute) = match year_or_time.split_once(':') {
        Some((h, m)) => (
            chrono::Datelike::year(&Utc::now()),
            h.parse().ok()?,
            m.parse().ok()?,
        ),
        None => (year_or_time.parse().ok()?, 0, 0),
    };
    let date = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, 0)?;
    Some(Utc.from_utc_datetime(&date))
}

/// A logged-in FTP session.
#[derive(Debug)]
pub struct FtpClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    peer: SocketAddr,
    timeout: Duration,
    use_epsv: bool,
    mlsd_supported: Option<bool>,
}

impl FtpClient {
    /// Opens the control connection and reads the greeting.
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self, UniconError> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| {
                UniconError::Timeout(format!("FTP connect to {host}:{port} timed out"))
            })??;
        let peer = stream.peer_addr()?;
        let (read, writer) = stream.into_split();
        let mut client = Self {
            reader: BufReader::new(read),
            writer,
            peer,
            timeout,
            use_epsv: true,
            mlsd_supported: None,
        };
        let greeting = client.read_reply().await?;
        if !greeting.is_positive() {
            return Err(UniconError::Remote {
                message: format!("FTP server refused connection: {greeting}"),
                detail: serde_json::json!({ "ftpCode": greeting.code }),
            });
        }
        Ok(client)
    }

    /// `USER`/`PASS`, then binary mode.
    pub async fn login(&mut self, user: &str, password: &str) -> Result<(), UniconError> {
        let reply = self.command(&format!("USER {user}")).await?;
        if reply.code == 331 {
            let reply = self.command(&format!("PASS {password}")).await?;
            check(&reply, "login")?;
        } else {
            check(&reply, "login")?;
        }
        check(&self.command("TYPE I").await?, "TYPE I")?;
        Ok(())
    }

    async fn read_line(&mut self) -> Result<String, UniconError> {
        let mut line = String::new();
        let n = tokio::time::timeout(self.timeout, self.reader.read_line(&mut line))
            .await
            .map_err(|_| UniconError::Timeout("FTP server did not answer in time".into()))??;
        if n == 0 {
            return Err(UniconError::transport(
                "FTP control connection closed by server",
            ));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    async fn read_reply(&mut self) -> Result<Reply, UniconError> {
        let first = self.read_line().await?;
        let code = reply_code(&first)?;
        let mut lines = vec![first.clone()];
        if first.as_bytes().get(3) == Some(&b'-') {
            let terminator = format!("{code} ");
            loop {
                let line = self.read_line().await?;
                let done = line.starts_with(&terminator) || line == code.to_string();
                lines.push(line);
                if done {
                    break;
                }
            }
        }
        let reply = parse_reply(&lines)?;
        debug!("FTP <- {}", reply);
        Ok(reply)
    }

    /// Sends one command and returns its first non-preliminary reply.
    pub async fn command(&mut self, command: &str) -> Result<Reply, UniconError> {
        let shown = if command.starts_with("PASS ") {
            "PASS ****"
        } else {
            command
        };
        debug!("FTP -> {}", shown);
        self.writer.write_all(command.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        let mut reply = self.read_reply().await?;
        while reply.is_preliminary() {
            reply = self.read_reply().await?;
        }
        Ok(reply)
    }

    /// Opens a passive data connection, preferring EPSV.
    async fn open_data(&mut self) -> Result<TcpStream, UniconError> {
        let addr = if self.use_epsv {
            let reply = self.command("EPSV").await?;
            if reply.code == 229 {
                SocketAddr::new(self.peer.ip(), parse_epsv(&reply.text)?)
            } else {
                self.use_epsv = false;
                self.pasv_address().await?
            }
        } else {
            self.pasv_address().await?
        };
        tokio::time::timeout(self.timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| UniconError::Timeout(format!("FTP data connection to {addr} timed out")))?
            .map_err(UniconError::from)
    }

    async fn pasv_address(&mut self) -> Result<SocketAddr, UniconError> {
        let reply = self.command("PASV").await?;
        check(&reply, "PASV")?;
        let (_, port) = parse_pasv(&reply.text)?;
        // Servers behind NAT often advertise a private address; reuse the control peer.
        Ok(SocketAddr::new(self.peer.ip(), port))
    }

    /// Starts a transfer command on a fresh data connection.
    async fn start_transfer(&mut self, command: &str) -> Result<TcpStream, UniconError> {
        let data = self.open_data().await?;
        debug!("FTP -> {}", command);
        self.writer.write_all(command.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        let reply = self.read_reply().await?;
        if !reply.is_preliminary() && !reply.is_positive() {
            return Err(reply_error(&reply, command));
        }
        Ok(data)
    }

    async fn finish_transfer(&mut self, command: &str) -> Result<(), UniconError> {
        let reply = self.read_reply().await?;
        check(&reply, command)
    }

    async fn read_all(&mut self, command: &str) -> Result<Vec<u8>, UniconError> {
        let mut data = self.start_transfer(command).await?;
        let mut buf = Vec::new();
        tokio::time::timeout(self.timeout, data.read_to_end(&mut buf))
            .await
            .map_err(|_| UniconError::Timeout(format!("FTP {command} transfer timed out")))??;
        drop(data);
        self.finish_transfer(command).await?;
        Ok(buf)
    }

    /// Lists a directory with `MLSD`, falling back to `LIST` on servers
    /// without it.
    pub async fn list(&mut self, path: &str) -> Result<Vec<RemoteEntry>, UniconError> {
        if self.mlsd_supported != Some(false) {
            match self.read_all(&format!("MLSD {path}")).await {
                Ok(raw) => {
                    self.mlsd_supported = Some(true);
                    return Ok(String::from_utf8_lossy(&raw)
                        .lines()
                        .filter_map(parse_mlsd_line)
                        .collect());
                }
                Err(UniconError::Remote { detail, .. })
                    if matches!(detail.get("ftpCode").and_then(|c| c.as_u64()), Some(500..=502)) =>
                {
                    self.mlsd_supported = Some(false);
                }
                Err(e) => return Err(e),
            }
        }
        let raw = self.read_all(&format!("LIST {path}")).await?;
        Ok(String::from_utf8_lossy(&raw)
            .lines()
            .filter_map(parse_list_line)
            .collect())
    }

    pub async fn retrieve(&mut self, path: &str) -> Result<Vec<u8>, UniconError> {
        self.read_all(&format!("RETR {path}")).await
    }

    pub async fn store(&mut self, path: &str, bytes: &[u8]) -> Result<(), UniconError> {
        let command = format!("STOR {path}");
        let mut data = self.start_transfer(&command).await?;
        tokio::time::timeout(self.timeout, async {
            data.write_all(bytes).await?;
            data.shutdown().await
        })
        .await
        .map_err(|_| UniconError::Timeout(format!("FTP {command} transfer timed out")))??;
        drop(data);
        self.finish_transfer(&command).await
    }

    pub async fn delete(&mut self, path: &str) -> Result<(), UniconError> {
        let reply = self.command(&format!("DELE {path}")).await?;
        check(&reply, "DELE")
    }

    pub async fn remove_dir(&mut self, path: &str) -> Result<(), UniconError> {
        let reply = self.command(&format!("RMD {path}")).await?;
        check(&reply, "RMD")
    }

    /// Creates every missing component of `path`, then returns to the
    /// working directory it started in.
    pub async fn ensure_dir(&mut self, path: &str) -> Result<(), UniconError> {
        let start = self.pwd().await?;
        let result = self.ensure_dir_inner(path).await;
        let back = self.command(&format!("CWD {start}")).await;
        result?;
        check(&back?, "CWD")
    }

    async fn ensure_dir_inner(&mut self, path: &str) -> Result<(), UniconError> {
        if path.starts_with('/') {
            check(&self.command("CWD /").await?, "CWD")?;
        }
        for part in path.split('/').filter(|p| !p.is_empty() && *p != ".") {
            let reply = self.command(&format!("CWD {part}")).await?;
            if reply.is_positive() {
                continue;
            }
            check(&self.command(&format!("MKD {part}")).await?, "MKD")?;
            check(&self.command(&format!("CWD {part}")).await?, "CWD")?;
        }
        Ok(())
    }

    pub async fn pwd(&mut self) -> Result<String, UniconError> {
        let reply = self.command("PWD").await?;
        check(&reply, "PWD")?;
        let text = reply.text.as_str();
        match (text.find('"'), text.rfind('"')) {
            (Some(s), Some(e)) if s < e => Ok(text[s + 1..e].replace("\"\"", "\"")),
            _ => Ok("/".to_string()),
        }
    }

    pub async fn rename(&mut self, from: &str, to: &str) -> Result<(), UniconError> {
        let reply = self.command(&format!("RNFR {from}")).await?;
        if reply.code != 350 {
            return Err(reply_error(&reply, "RNFR"));
        }
        check(&self.command(&format!("RNTO {to}")).await?, "RNTO")
    }

    /// Sends `QUIT` and closes the control connection.
    pub async fn quit(mut self) -> Result<(), UniconError> {
        let result = self.command("QUIT").await.map(|_| ());
        let _ = self.writer.shutdown().await;
        result
    }
}

fn check(reply: &Reply, context: &str) -> Result<(), UniconError> {
    if reply.is_positive() {
        Ok(())
    } else {
        Err(reply_error(reply, context))
    }
}

fn reply_error(reply: &Reply, context: &str) -> UniconError {
    let context = context.split_whitespace().next().unwrap_or(context);
    UniconError::Remote {
        message: format!("FTP {context} failed: {reply}"),
        detail: serde_json::json!({ "ftpCode": reply.code }),
    }
}
