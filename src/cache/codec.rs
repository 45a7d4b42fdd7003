//! Byte encoding of cached values: bincode, optionally gzipped, behind a
//! one-byte header naming the codec

use crate::error::{AttributionError, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{Read, Write};

const PLAIN: u8 = 0x00;
const GZIP: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Codec {
    compress: bool,
}

impl Codec {
    pub fn new(compress: bool) -> Self {
        Self { compress }
    }

    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        let body = bincode::serialize(value)?;
        if !self.compress {
            let mut out = Vec::with_capacity(body.len() + 1);
            out.push(PLAIN);
            out.extend_from_slice(&body);
            return Ok(out);
        }
        let mut encoder = GzEncoder::new(vec![GZIP], Compression::fast());
        encoder.write_all(&body)?;
        Ok(encoder.finish()?)
    }

    /// Decode bytes written by any codec setting
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        let (header, body) = bytes
            .split_first()
            .ok_or_else(|| AttributionError::Serialization("empty cache payload".to_string()))?;
        match *header {
            PLAIN => Ok(bincode::deserialize(body)?),
            GZIP => {
                let mut raw = Vec::new();
                GzDecoder::new(body).read_to_end(&mut raw)?;
                Ok(bincode::deserialize(&raw)?)
            }
            other => Err(AttributionError::Serialization(format!(
                "unknown cache codec header {:#04x}",
                other
            ))),
        }
    }
}
