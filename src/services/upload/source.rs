//! Read-only access to the bytes being uploaded.
//!
//! Parts are read lazily, one range per part, so at most `concurrency` part
//! bodies are held in memory at a time.

use std::{
    io::{self, ErrorKind, SeekFrom},
    path::PathBuf,
};

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
};

/// A byte range provider shared by every concurrent part transfer.
pub trait PartSource: Send + Sync {
    /// Returns exactly `len` bytes starting at `offset`.
    fn read_range(&self, offset: u64, len: u64) -> BoxFuture<'_, io::Result<Bytes>>;
}

/// In-memory source; ranges are zero-copy slices.
impl PartSource for Bytes {
    fn read_range(&self, offset: u64, len: u64) -> BoxFuture<'_, io::Result<Bytes>> {
        let end = offset.checked_add(len);
        let result = match end {
            Some(end) if end <= self.len() as u64 => Ok(self.slice(offset as usize..end as usize)),
            _ => Err(io::Error::new(
                ErrorKind::UnexpectedEof,
                format!(
                    "range {}+{} is past the end of a {} byte buffer",
                    offset,
                    len,
                    self.len()
                ),
            )),
        };
        Box::pin(async move { result })
    }
}

/// A file on local disk; each read opens its own handle so concurrent parts
/// never share a cursor.
#[derive(Clone, Debug)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn len(&self) -> io::Result<u64> {
        Ok(tokio::fs::metadata(&self.path).await?.len())
    }
}

impl PartSource for FileSource {
    fn read_range(&self, offset: u64, len: u64) -> BoxFuture<'_, io::Result<Bytes>> {
        Box::pin(async move {
            let len = usize::try_from(len)
                .map_err(|_| io::Error::new(ErrorKind::InvalidInput, "part too large for memory"))?;
            let mut file = File::open(&self.path).await?;
            file.seek(SeekFrom::Start(offset)).await?;
            let mut buf = vec![0u8; len];
            file.read_exact(&mut buf).await?;
            Ok(Bytes::from(buf))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bytes_source_slices_ranges() {
        let source = Bytes::from_static(b"0123456789");
        assert_eq!(&source.read_range(2, 3).await.unwrap()[..], b"234");
        assert_eq!(&source.read_range(7, 3).await.unwrap()[..], b"789");
        let err = source.read_range(8, 3).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn file_source_reads_ranges_and_detects_short_reads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        tokio::fs::write(&path, b"abcdefghij").await.unwrap();

        let source = FileSource::new(&path);
        assert_eq!(source.len().await.unwrap(), 10);
        assert_eq!(&source.read_range(0, 4).await.unwrap()[..], b"abcd");
        assert_eq!(&source.read_range(8, 2).await.unwrap()[..], b"ij");

        let err = source.read_range(8, 4).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }
}
