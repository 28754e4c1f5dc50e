//! Compact binary wire format for write requests.
//!
//! The payload carries only the series data: label sets plus raw samples.
//! Request metadata (tenant, replica index, forward hop count) travels in
//! headers so routers can make forwarding decisions without decoding the
//! body. Encoding is bincode (standard config: little-endian + varint)
//! wrapped in zstd, the same codec pairing used for persisted route data.

use bincode::{Decode, Encode};
use bytes::Bytes;
use std::io::{self, Read};

/// Tenant identifier, injected by the external proxy/auth layer.
pub const TENANT_HEADER: &str = "x-conflux-tenant";
/// Replica index assigned at fan-out; turned into a label at the ingestor.
pub const REPLICA_HEADER: &str = "x-conflux-replica";
/// Forward hop count, incremented at every router in the tree.
pub const HOPS_HEADER: &str = "x-conflux-forward-hops";

#[derive(thiserror::Error, Debug)]
pub enum WireError {
    #[error("encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A single label name/value pair.
#[derive(Encode, Decode, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A raw sample point.
#[derive(Encode, Decode, Clone, Copy, Debug, PartialEq)]
pub struct Sample {
    pub timestamp_ms: i64,
    pub value: f64,
}

/// One time-series: a label set and its samples.
#[derive(Encode, Decode, Clone, Debug, PartialEq)]
pub struct Series {
    pub labels: Vec<Label>,
    pub samples: Vec<Sample>,
}

impl Series {
    /// Looks up a label value by name.
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|l| l.name == name)
            .map(|l| l.value.as_str())
    }
}

/// A batch of series submitted in one request.
#[derive(Encode, Decode, Clone, Debug, Default, PartialEq)]
pub struct WriteRequest {
    pub series: Vec<Series>,
}

#[derive(Clone, Copy, Debug)]
pub enum Compression {
    None,
    // zstd with compression level
    Zstd(i32),
}

/// Encoder/decoder for [`WriteRequest`] bodies.
pub struct WireCodec {
    compression: Compression,
    config: bincode::config::Configuration,
}

impl Default for WireCodec {
    fn default() -> Self {
        Self::new(Compression::Zstd(1))
    }
}

impl WireCodec {
    pub fn new(compression: Compression) -> Self {
        WireCodec {
            compression,
            // standard defaults to little-endian + varint
            config: bincode::config::standard(),
        }
    }

    pub fn encode(&self, request: &WriteRequest) -> Result<Bytes, WireError> {
        let mut buffer = Vec::new();
        match self.compression {
            Compression::None => {
                bincode::encode_into_std_write(request, &mut buffer, self.config)?;
            }
            Compression::Zstd(level) => {
                let mut encoder = zstd::stream::write::Encoder::new(&mut buffer, level)?;
                bincode::encode_into_std_write(request, &mut encoder, self.config)?;
                encoder.finish()?;
            }
        }
        Ok(Bytes::from(buffer))
    }

    pub fn decode(&self, body: &[u8]) -> Result<WriteRequest, WireError> {
        match self.compression {
            Compression::None => {
                let mut reader = body;
                Ok(bincode::decode_from_std_read(&mut reader, self.config)?)
            }
            Compression::Zstd(_) => {
                let mut decoder = zstd::stream::read::Decoder::new(body)?;
                let mut decompressed = Vec::new();
                decoder.read_to_end(&mut decompressed)?;
                let mut reader = decompressed.as_slice();
                Ok(bincode::decode_from_std_read(&mut reader, self.config)?)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> WriteRequest {
        WriteRequest {
            series: vec![Series {
                labels: vec![
                    Label::new("__name__", "http_requests_total"),
                    Label::new("job", "api"),
                ],
                samples: vec![
                    Sample {
                        timestamp_ms: 1_700_000_000_000,
                        value: 42.0,
                    },
                    Sample {
                        timestamp_ms: 1_700_000_015_000,
                        value: 43.5,
                    },
                ],
            }],
        }
    }

    #[test]
    fn codec_round_trips_for_all_compressions() {
        for compression in [Compression::None, Compression::Zstd(1), Compression::Zstd(3)] {
            let codec = WireCodec::new(compression);
            let encoded = codec.encode(&request()).unwrap();
            let decoded = codec.decode(&encoded).unwrap();
            assert_eq!(decoded, request());
        }
    }

    #[test]
    fn decode_rejects_garbage() {
        let codec = WireCodec::default();
        assert!(codec.decode(b"definitely not a frame").is_err());
    }

    #[test]
    fn label_lookup() {
        let req = request();
        assert_eq!(req.series[0].label("job"), Some("api"));
        assert_eq!(req.series[0].label("missing"), None);
    }
}
