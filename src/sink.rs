use bzip2::write::BzEncoder;
use bzip2::Compression;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not create {path:?}")]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Compressed byte-stream sink.
///
/// Opened in append mode so a re-opened stream adds a new compressed member
/// instead of truncating what an earlier slot already wrote. A write that
/// cannot complete is fatal: continuing would silently truncate the trace.
pub struct CompressedSink {
    encoder: Option<BzEncoder<BufWriter<File>>>,
    path: PathBuf,
}

impl CompressedSink {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| Error::Create {
                path: path.to_path_buf(),
                source,
            })?;
        let encoder = BzEncoder::new(BufWriter::new(file), Compression::default());
        Ok(Self {
            encoder: Some(encoder),
            path: path.to_path_buf(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Compress and write the full buffer.
    pub fn write_all(&mut self, bytes: &[u8]) {
        let Some(encoder) = self.encoder.as_mut() else {
            panic!("write to finished trace stream {:?}", self.path);
        };
        if let Err(err) = encoder.write_all(bytes) {
            panic!(
                "incomplete compressed write to {:?}: {err} (trace would be truncated)",
                self.path
            );
        }
    }

    /// Finish the compressed stream and flush the underlying file.
    pub fn finish(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            match encoder.finish() {
                Ok(mut file) => {
                    if let Err(err) = file.flush() {
                        panic!("could not flush {:?}: {err}", self.path);
                    }
                }
                Err(err) => panic!("could not finish compressed stream {:?}: {err}", self.path),
            }
        }
    }
}

impl Drop for CompressedSink {
    fn drop(&mut self) {
        // best effort for streams not explicitly finished
        if let Some(encoder) = self.encoder.take() {
            let _ = encoder.finish().map(|mut file| file.flush());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::CompressedSink;
    use std::io::Read;

    #[test]
    fn roundtrips_through_bzip2() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.bz2");
        let payload = b"warp trace payload".repeat(100);

        let mut sink = CompressedSink::create(&path).unwrap();
        sink.write_all(&payload);
        sink.finish();

        let file = std::fs::File::open(&path).unwrap();
        let mut decoder = bzip2::read::BzDecoder::new(file);
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed).unwrap();
        assert_eq!(decompressed, payload);
    }

    #[test]
    fn append_adds_a_second_member() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.bz2");

        let mut sink = CompressedSink::create(&path).unwrap();
        sink.write_all(b"first");
        sink.finish();
        let mut sink = CompressedSink::create(&path).unwrap();
        sink.write_all(b"second");
        sink.finish();

        let file = std::fs::File::open(&path).unwrap();
        let mut decoder = bzip2::read::MultiBzDecoder::new(file);
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed).unwrap();
        assert_eq!(decompressed, b"firstsecond");
    }
}
