//! Block Codecs
//!
//! A codec turns `Block<T>` values into a framed byte stream and back. Two
//! codecs ship with the store:
//!
//! - **CBOR** (`CborCodec`): self-describing binary, the default. Chosen for
//!   schema evolution - decoders tolerate unknown fields and missing optional
//!   fields, so `T` can grow without rewriting old segments.
//! - **JSON lines** (`JsonCodec`): one JSON document per line. Slower and
//!   larger, but directly greppable; some existing datasets use it.
//!
//! Framing is whatever the codec emits: CBOR items are self-delimiting, JSON
//! uses a trailing newline. Decoders signal a clean end of stream with
//! `Ok(None)`; a truncated record mid-stream is an error, not an EOF.

use std::io::{BufRead, BufReader, Read};
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::block::Block;
use crate::compression::CompressorSink;
use crate::error::{Error, Result};

/// Streaming block encoder. Owns its sink; `finish` flushes codec framing and
/// finishes the sink (closing any compressor tail).
pub trait Encode<T>: Send {
    fn encode(&mut self, block: &Block<T>) -> Result<()>;
    fn finish(&mut self) -> Result<()>;
}

/// Streaming block decoder. `Ok(None)` is the end-of-stream sentinel.
pub trait Decode<T>: Send {
    fn decode(&mut self) -> Result<Option<Block<T>>>;
}

/// Factory wiring encoders and decoders onto a byte stream.
pub trait Codec<T>: Send + Sync {
    fn encoder(&self, sink: Box<dyn CompressorSink>) -> Box<dyn Encode<T>>;
    fn decoder(&self, source: Box<dyn Read + Send>) -> Box<dyn Decode<T>>;
}

// ---------------------------------------------------------------------------
// CBOR
// ---------------------------------------------------------------------------

/// Self-describing binary codec (CBOR). The default.
#[derive(Debug, Clone, Copy, Default)]
pub struct CborCodec;

impl<T> Codec<T> for CborCodec
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    fn encoder(&self, sink: Box<dyn CompressorSink>) -> Box<dyn Encode<T>> {
        Box::new(CborEncoder {
            sink,
            _marker: PhantomData,
        })
    }

    fn decoder(&self, source: Box<dyn Read + Send>) -> Box<dyn Decode<T>> {
        Box::new(CborDecoder {
            source: BufReader::new(source),
            _marker: PhantomData,
        })
    }
}

struct CborEncoder<T> {
    sink: Box<dyn CompressorSink>,
    _marker: PhantomData<fn(T)>,
}

impl<T: Serialize + Send> Encode<T> for CborEncoder<T> {
    fn encode(&mut self, block: &Block<T>) -> Result<()> {
        ciborium::into_writer(block, &mut self.sink).map_err(|e| Error::Encode(e.to_string()))
    }

    fn finish(&mut self) -> Result<()> {
        self.sink.finish()?;
        Ok(())
    }
}

struct CborDecoder<T> {
    source: BufReader<Box<dyn Read + Send>>,
    _marker: PhantomData<fn(T)>,
}

impl<T: DeserializeOwned + Send> Decode<T> for CborDecoder<T> {
    fn decode(&mut self) -> Result<Option<Block<T>>> {
        if self.source.fill_buf()?.is_empty() {
            return Ok(None);
        }
        let block =
            ciborium::from_reader(&mut self.source).map_err(|e| Error::Decode(e.to_string()))?;
        Ok(Some(block))
    }
}

// ---------------------------------------------------------------------------
// JSON lines
// ---------------------------------------------------------------------------

/// Line-delimited JSON codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<T> Codec<T> for JsonCodec
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    fn encoder(&self, sink: Box<dyn CompressorSink>) -> Box<dyn Encode<T>> {
        Box::new(JsonEncoder {
            sink,
            _marker: PhantomData,
        })
    }

    fn decoder(&self, source: Box<dyn Read + Send>) -> Box<dyn Decode<T>> {
        Box::new(JsonDecoder {
            source: BufReader::new(source),
            _marker: PhantomData,
        })
    }
}

struct JsonEncoder<T> {
    sink: Box<dyn CompressorSink>,
    _marker: PhantomData<fn(T)>,
}

impl<T: Serialize + Send> Encode<T> for JsonEncoder<T> {
    fn encode(&mut self, block: &Block<T>) -> Result<()> {
        serde_json::to_writer(&mut self.sink, block).map_err(|e| Error::Encode(e.to_string()))?;
        use std::io::Write;
        self.sink.write_all(b"\n")?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.sink.finish()?;
        Ok(())
    }
}

struct JsonDecoder<T> {
    source: BufReader<Box<dyn Read + Send>>,
    _marker: PhantomData<fn(T)>,
}

impl<T: DeserializeOwned + Send> Decode<T> for JsonDecoder<T> {
    fn decode(&mut self) -> Result<Option<Block<T>>> {
        let mut line = String::new();
        loop {
            line.clear();
            let n = self.source.read_line(&mut line)?;
            if n == 0 {
                return Ok(None);
            }
            if line.trim().is_empty() {
                continue;
            }
            let block =
                serde_json::from_str(&line).map_err(|e| Error::Decode(e.to_string()))?;
            return Ok(Some(block));
        }
    }
}
