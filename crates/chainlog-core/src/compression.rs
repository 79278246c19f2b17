//! Segment Compression
//!
//! Segments and index files are written through a streaming compressor chosen
//! by configuration. ZSTD runs at its fastest level: segment writes sit on the
//! ingest hot path and the payloads compress well even at low effort.
//!
//! `Compression::None` is the default; datasets written without compression
//! stay readable forever since the choice is part of the reader configuration.

use std::io::{self, Read, Write};

/// ZSTD level used everywhere (best speed).
pub const ZSTD_LEVEL: i32 = 1;

/// A writer that must be finished to flush its compression tail.
///
/// `finish` is tolerant of being called more than once; the writer/roll path
/// closes the pipeline and tests may close it again.
pub trait CompressorSink: Write + Send {
    fn finish(&mut self) -> io::Result<()>;
}

/// Compression applied to a byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
    Zstd,
}

impl Compression {
    /// Wrap a sink with the configured streaming compressor.
    pub fn wrap_writer(&self, sink: Box<dyn Write + Send>) -> io::Result<Box<dyn CompressorSink>> {
        match self {
            Compression::None => Ok(Box::new(PassthroughSink { inner: sink })),
            Compression::Zstd => Ok(Box::new(ZstdSink {
                encoder: zstd::stream::write::Encoder::new(sink, ZSTD_LEVEL)?,
                finished: false,
            })),
        }
    }

    /// Wrap a source with the matching streaming decompressor.
    pub fn wrap_reader(&self, source: Box<dyn Read + Send>) -> io::Result<Box<dyn Read + Send>> {
        match self {
            Compression::None => Ok(source),
            Compression::Zstd => Ok(Box::new(zstd::stream::read::Decoder::new(source)?)),
        }
    }
}

struct PassthroughSink {
    inner: Box<dyn Write + Send>,
}

impl Write for PassthroughSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl CompressorSink for PassthroughSink {
    fn finish(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct ZstdSink {
    encoder: zstd::stream::write::Encoder<'static, Box<dyn Write + Send>>,
    finished: bool,
}

impl Write for ZstdSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.encoder.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.encoder.flush()
    }
}

impl CompressorSink for ZstdSink {
    fn finish(&mut self) -> io::Result<()> {
        if self.finished {
            return Ok(());
        }
        self.encoder.do_finish()?;
        self.finished = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    /// Test sink collecting written bytes behind a shared handle.
    #[derive(Clone, Default)]
    struct SharedVec(Arc<Mutex<Vec<u8>>>);

    impl SharedVec {
        fn take(&self) -> Vec<u8> {
            std::mem::take(&mut self.0.lock().unwrap())
        }
    }

    impl Write for SharedVec {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn roundtrip(compression: Compression, payload: &[u8]) -> Vec<u8> {
        let out = SharedVec::default();
        let mut sink = compression.wrap_writer(Box::new(out.clone())).unwrap();
        sink.write_all(payload).unwrap();
        sink.finish().unwrap();

        let compressed = out.take();
        let mut source = compression
            .wrap_reader(Box::new(Cursor::new(compressed)))
            .unwrap();
        let mut decoded = Vec::new();
        source.read_to_end(&mut decoded).unwrap();
        decoded
    }

    #[test]
    fn test_none_roundtrip() {
        let payload = b"hello world".repeat(10);
        assert_eq!(roundtrip(Compression::None, &payload), payload);
    }

    #[test]
    fn test_zstd_roundtrip() {
        let payload = b"the same line over and over\n".repeat(1000);
        assert_eq!(roundtrip(Compression::Zstd, &payload), payload);
    }

    #[test]
    fn test_zstd_compresses() {
        let payload = vec![0x41u8; 64 * 1024];
        let out = SharedVec::default();
        let mut sink = Compression::Zstd.wrap_writer(Box::new(out.clone())).unwrap();
        sink.write_all(&payload).unwrap();
        sink.finish().unwrap();
        let compressed = out.take();
        assert!(compressed.len() < payload.len() / 10);
    }

    #[test]
    fn test_finish_is_idempotent() {
        let out = SharedVec::default();
        let mut sink = Compression::Zstd.wrap_writer(Box::new(out.clone())).unwrap();
        sink.write_all(b"data").unwrap();
        sink.finish().unwrap();
        let first = out.0.lock().unwrap().len();
        sink.finish().unwrap();
        assert_eq!(out.0.lock().unwrap().len(), first);
    }

    #[test]
    fn test_empty_stream_roundtrip() {
        assert!(roundtrip(Compression::Zstd, b"").is_empty());
        assert!(roundtrip(Compression::None, b"").is_empty());
    }
}
