use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::Path,
};

use bytes::{BufMut, Bytes, BytesMut};

use courier_core::common::error::{Error, Result};

pub const LENGTH_PREFIX_SIZE: u64 = 8;

/// Append-only payload file. entry = length(8) + payload(length)
///
/// Appends land in a write buffer first; reads flush it so any position
/// handed out by `append` is immediately readable.
#[derive(Debug)]
pub struct MessageFile {
    file: File,
    buf: BytesMut,
    current_size: u64,
    max_size: u64,
}

impl MessageFile {
    pub fn open(path: &Path, max_size: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)
            .map_err(|error| {
                Error::new_file(Some(error.into()), Some(format!("open message file {:?} failed", path)))
            })?;

        let current_size = file
            .metadata()
            .map_err(|error| Error::new_file(Some(error.into()), None))?
            .len();

        Ok(MessageFile {
            file,
            buf: BytesMut::new(),
            current_size,
            max_size,
        })
    }

    /// Buffers one entry and returns the byte position of its length prefix.
    pub fn append(&mut self, payload: &[u8]) -> Result<u64> {
        let entry_size = LENGTH_PREFIX_SIZE + payload.len() as u64;

        if self.current_size + entry_size > self.max_size {
            return Err(Error::new_capacity("message file is out of space"));
        }

        let pos = self.current_size;
        self.buf.put_u64(payload.len() as u64);
        self.buf.put_slice(payload);
        self.current_size += entry_size;

        Ok(pos)
    }

    /// Reads back the payload whose length prefix starts at `pos`.
    pub fn read(&mut self, pos: u64) -> Result<Bytes> {
        if pos >= self.current_size {
            return Err(Error::new_out_of_range(&format!(
                "position {} is past the message file end {}",
                pos, self.current_size
            )));
        }

        self.flush()?;

        let length = {
            let mut buf = [0u8; LENGTH_PREFIX_SIZE as usize];
            self.file
                .seek(SeekFrom::Start(pos))
                .map_err(|error| Error::new_file(Some(error.into()), None))?;
            self.file
                .read_exact(&mut buf)
                .map_err(|error| Error::new_file(Some(error.into()), None))?;

            u64::from_be_bytes(buf)
        };

        let mut payload = vec![0u8; length as usize];
        self.file
            .read_exact(&mut payload)
            .map_err(|error| Error::new_file(Some(error.into()), None))?;

        Ok(payload.into())
    }

    pub fn flush(&mut self) -> Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }

        // the file is opened in append mode, so seeks done by reads
        // cannot redirect this write
        self.file
            .write_all(&self.buf)
            .map_err(|error| Error::new_file(Some(error.into()), Some("flush message file failed".to_owned())))?;
        self.buf.clear();

        Ok(())
    }

    pub fn close(mut self) -> Result<()> {
        self.flush()
    }

    pub fn is_full(&self) -> bool {
        self.current_size >= self.max_size
    }

    pub fn current_size(&self) -> u64 {
        self.current_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0.message");

        let mut message_file = MessageFile::open(&path, 1024).unwrap();

        let pos = message_file.append(b"hello").unwrap();
        assert_eq!(0, pos);

        let pos = message_file.append(b"bye").unwrap();
        assert_eq!(8 + 5, pos);

        assert_eq!(Bytes::from_static(b"hello"), message_file.read(0).unwrap());
        assert_eq!(Bytes::from_static(b"bye"), message_file.read(pos).unwrap());
    }

    #[test]
    fn test_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0.message");

        // room for exactly two 8+5 entries
        let mut message_file = MessageFile::open(&path, 26).unwrap();

        message_file.append(b"12345").unwrap();
        message_file.append(b"67890").unwrap();
        assert!(message_file.is_full());

        let rst = message_file.append(b"x");
        assert!(rst.unwrap_err().is_capacity());
    }

    #[test]
    fn test_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0.message");

        let mut message_file = MessageFile::open(&path, 1024).unwrap();
        let pos = message_file.append(b"persisted").unwrap();
        message_file.close().unwrap();

        let mut message_file = MessageFile::open(&path, 1024).unwrap();
        assert_eq!(8 + 9, message_file.current_size());
        assert_eq!(Bytes::from_static(b"persisted"), message_file.read(pos).unwrap());

        // the file on disk is exactly the closed sequence of entries
        assert_eq!(8 + 9, std::fs::metadata(&path).unwrap().len());
    }
}
