use std::io::SeekFrom;
use std::path::PathBuf;

use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::error::{Access, FsError, Result};
use crate::path::Entry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
    Append,
}

impl OpenMode {
    pub fn is_readable(&self) -> bool {
        matches!(self, OpenMode::ReadOnly | OpenMode::ReadWrite)
    }

    pub fn is_writable(&self) -> bool {
        !matches!(self, OpenMode::ReadOnly)
    }
}

/// Open-handle state of an Entry. The Entry exclusively owns the handle;
/// dropping the Entry closes it as a backstop, but callers close
/// explicitly.
#[derive(Debug)]
pub struct Stream {
    pub(crate) file: tokio::fs::File,
    pub(crate) mode: OpenMode,
}

impl Entry {
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    pub fn open_mode(&self) -> Option<OpenMode> {
        self.stream.as_ref().map(|stream| stream.mode)
    }

    pub(crate) fn check_closed(&self) -> Result<()> {
        if self.stream.is_some() {
            return Err(FsError::FileOpen {
                path: self.source.clone(),
                state: "already open".to_string(),
            });
        }
        Ok(())
    }

    fn stream_mut(&mut self) -> Result<&mut Stream> {
        let path = self.source.clone();
        self.stream.as_mut().ok_or(FsError::FileOpen {
            path,
            state: "not open".to_string(),
        })
    }

    fn writable_stream(&mut self) -> Result<&mut Stream> {
        let path = self.source.clone();
        let stream = self.stream_mut()?;
        if !stream.mode.is_writable() {
            return Err(FsError::ReadOnlyMode { path });
        }
        Ok(stream)
    }

    fn readable_stream(&mut self) -> Result<&mut Stream> {
        let path = self.source.clone();
        let stream = self.stream_mut()?;
        if !stream.mode.is_readable() {
            return Err(FsError::FileOpen {
                path,
                state: "open write-only, reads are not available".to_string(),
            });
        }
        Ok(stream)
    }

    /// Open the entry's stream. Fails on an already-open entry; a missing
    /// path triggers at most one auto-mount retry.
    pub async fn open(&mut self, mode: OpenMode) -> Result<()> {
        self.check_closed()?;

        let access = if mode.is_writable() {
            Access::Write
        } else {
            Access::Read
        };
        self.restrictions.check(&self.source, access)?;

        match self.try_open(mode).await {
            Ok(file) => {
                self.stream = Some(Stream { file, mode });
                Ok(())
            }
            Err(io) => {
                if io.kind() == std::io::ErrorKind::NotFound && self.try_auto_mount().await {
                    let file = self
                        .try_open(mode)
                        .await
                        .map_err(|io| self.labeled_io_error(mode, io, "cannot open"))?;
                    self.stream = Some(Stream { file, mode });
                    return Ok(());
                }
                Err(self.labeled_io_error(mode, io, "cannot open"))
            }
        }
    }

    async fn try_open(&self, mode: OpenMode) -> std::io::Result<tokio::fs::File> {
        let mut options = OpenOptions::new();
        match mode {
            OpenMode::ReadOnly => options.read(true),
            OpenMode::WriteOnly => options.write(true).create(true),
            OpenMode::ReadWrite => options.read(true).write(true).create(true),
            OpenMode::Append => options.append(true).create(true),
        };
        options.open(&self.source).await
    }

    /// Re-run the relevant readability/writability check to turn a raw OS
    /// failure into a better-labeled error chained to the original.
    fn labeled_io_error(&self, mode: OpenMode, io: std::io::Error, action: &str) -> FsError {
        let wrapped = FsError::filesystem_io(
            format!("{action} {}", self.source.display()),
            io,
        );
        let diagnosed = if mode.is_writable() {
            self.check_writable(Some(wrapped))
        } else {
            self.check_readable(Some(wrapped))
        };
        match diagnosed {
            Err(labeled) => labeled,
            // check_* with a previous error never returns Ok
            Ok(()) => FsError::filesystem(format!(
                "{action} {} failed for an unknown reason",
                self.source.display()
            )),
        }
    }

    pub async fn close(&mut self) -> Result<()> {
        let path = self.source.clone();
        let stream = self.stream.take().ok_or(FsError::FileOpen {
            path,
            state: "not open".to_string(),
        })?;
        drop(stream);
        Ok(())
    }

    /// Read up to `count` bytes from the open stream.
    pub async fn read_data(&mut self, count: usize) -> Result<Vec<u8>> {
        let path = self.source.clone();
        let stream = self.readable_stream()?;

        let mut buffer = vec![0u8; count];
        let mut filled = 0;
        while filled < count {
            let n = stream
                .file
                .read(&mut buffer[filled..])
                .await
                .map_err(|io| FsError::FileActionFailed {
                    action: "read",
                    path: path.clone(),
                    source: io,
                })?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buffer.truncate(filled);
        Ok(buffer)
    }

    /// Read one line, without its terminator. `None` at end of file.
    pub async fn read_line(&mut self) -> Result<Option<String>> {
        let path = self.source.clone();
        let stream = self.readable_stream()?;

        let mut bytes = Vec::new();
        loop {
            match stream.file.read_u8().await {
                Ok(b'\n') => break,
                Ok(byte) => bytes.push(byte),
                Err(io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
                    if bytes.is_empty() {
                        return Ok(None);
                    }
                    break;
                }
                Err(io) => {
                    return Err(FsError::FileActionFailed {
                        action: "read",
                        path,
                        source: io,
                    })
                }
            }
        }
        if bytes.last() == Some(&b'\r') {
            bytes.pop();
        }

        String::from_utf8(bytes)
            .map(Some)
            .map_err(|_| FsError::FileRead {
                path: self.source.clone(),
                reason: "line is not valid utf-8".to_string(),
            })
    }

    /// Read one line and parse it as a CSV record. Double-quoted fields may
    /// contain separators and doubled quotes.
    pub async fn read_csv(&mut self) -> Result<Option<Vec<String>>> {
        let Some(line) = self.read_line().await? else {
            return Ok(None);
        };
        Ok(Some(parse_csv_record(&line)))
    }

    /// Read a single byte as a character. `None` at end of file.
    pub async fn read_character(&mut self) -> Result<Option<char>> {
        let path = self.source.clone();
        let stream = self.readable_stream()?;
        match stream.file.read_u8().await {
            Ok(byte) => Ok(Some(char::from(byte))),
            Err(io) if io.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(io) => Err(FsError::FileActionFailed {
                action: "read",
                path,
                source: io,
            }),
        }
    }

    /// One-shot exact-range read of a closed entry: open read-only, seek,
    /// read, close. The entry must not be open.
    pub async fn read_bytes(&self, offset: u64, count: usize) -> Result<Vec<u8>> {
        self.check_closed()?;
        self.restrictions.check(&self.source, Access::Read)?;

        let mut file = tokio::fs::File::open(&self.source)
            .await
            .map_err(|io| self.labeled_io_error(OpenMode::ReadOnly, io, "cannot open"))?;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|io| FsError::FileActionFailed {
                action: "seek",
                path: self.source.clone(),
                source: io,
            })?;

        let mut buffer = vec![0u8; count];
        file.read_exact(&mut buffer).await.map_err(|io| {
            if io.kind() == std::io::ErrorKind::UnexpectedEof {
                FsError::FileRead {
                    path: self.source.clone(),
                    reason: format!("file ends before byte range {offset}+{count}"),
                }
            } else {
                FsError::FileActionFailed {
                    action: "read",
                    path: self.source.clone(),
                    source: io,
                }
            }
        })?;
        Ok(buffer)
    }

    pub async fn write_data(&mut self, data: &[u8]) -> Result<()> {
        let path = self.source.clone();
        let stream = self.writable_stream()?;
        stream
            .file
            .write_all(data)
            .await
            .map_err(|io| FsError::FileActionFailed {
                action: "write",
                path,
                source: io,
            })
    }

    /// Append to a stream opened in append mode.
    pub async fn append_data(&mut self, data: &[u8]) -> Result<()> {
        let path = self.source.clone();
        let stream = self.writable_stream()?;
        if stream.mode != OpenMode::Append {
            return Err(FsError::FileOpen {
                path,
                state: "not open in append mode".to_string(),
            });
        }
        stream
            .file
            .write_all(data)
            .await
            .map_err(|io| FsError::FileActionFailed {
                action: "append",
                path,
                source: io,
            })
    }

    /// Stream every source file into this entry's open append-mode stream.
    /// Any source failure closes and removes the partial target.
    pub async fn append_files(&mut self, sources: &[PathBuf]) -> Result<u64> {
        let path = self.source.clone();
        {
            let stream = self.writable_stream()?;
            if stream.mode != OpenMode::Append {
                return Err(FsError::FileOpen {
                    path: path.clone(),
                    state: "not open in append mode".to_string(),
                });
            }
        }

        let mut total = 0u64;
        for source in sources {
            let result = self.append_one(source).await;
            match result {
                Ok(copied) => total += copied,
                Err(error) => {
                    // remove the partial target so a failed append never
                    // leaves a half-written file behind
                    self.stream = None;
                    if let Err(io) = tokio::fs::remove_file(&path).await {
                        tracing::warn!(
                            "could not remove partial append target {}: {io}",
                            path.display()
                        );
                    }
                    return Err(error);
                }
            }
        }
        Ok(total)
    }

    async fn append_one(&mut self, source: &PathBuf) -> Result<u64> {
        self.restrictions.check(source, Access::Read)?;
        let mut from = tokio::fs::File::open(source).await.map_err(|io| {
            FsError::filesystem_io(format!("cannot open append source {}", source.display()), io)
        })?;
        let stream = self.stream_mut()?;
        tokio::io::copy(&mut from, &mut stream.file)
            .await
            .map_err(|io| FsError::FileActionFailed {
                action: "append",
                path: source.clone(),
                source: io,
            })
    }

    pub async fn seek(&mut self, position: SeekFrom) -> Result<u64> {
        let path = self.source.clone();
        let stream = self.stream_mut()?;
        stream
            .file
            .seek(position)
            .await
            .map_err(|io| FsError::FileActionFailed {
                action: "seek",
                path,
                source: io,
            })
    }

    pub async fn rewind(&mut self) -> Result<()> {
        self.seek(SeekFrom::Start(0)).await?;
        Ok(())
    }

    pub async fn tell(&mut self) -> Result<u64> {
        let path = self.source.clone();
        let stream = self.stream_mut()?;
        stream
            .file
            .stream_position()
            .await
            .map_err(|io| FsError::FileActionFailed {
                action: "tell",
                path,
                source: io,
            })
    }

    pub async fn truncate(&mut self, size: u64) -> Result<()> {
        let path = self.source.clone();
        let stream = self.writable_stream()?;
        stream
            .file
            .set_len(size)
            .await
            .map_err(|io| FsError::FileActionFailed {
                action: "truncate",
                path,
                source: io,
            })
    }

    /// Flush file contents and metadata to disk.
    pub async fn sync(&mut self) -> Result<()> {
        let path = self.source.clone();
        let stream = self.writable_stream()?;
        stream
            .file
            .sync_all()
            .await
            .map_err(|io| FsError::FileActionFailed {
                action: "sync",
                path,
                source: io,
            })
    }

    /// Flush file contents only.
    pub async fn sync_data(&mut self) -> Result<()> {
        let path = self.source.clone();
        let stream = self.writable_stream()?;
        stream
            .file
            .sync_data()
            .await
            .map_err(|io| FsError::FileActionFailed {
                action: "sync",
                path,
                source: io,
            })
    }
}

fn parse_csv_record(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' if field.is_empty() => in_quotes = true,
            ',' if !in_quotes => {
                fields.push(std::mem::take(&mut field));
            }
            c => field.push(c),
        }
    }
    fields.push(field);
    fields
}
