//! Fixed-capacity receive buffer, sized in sample records.
//!
//! The same allocation stages the upload payload and then receives every
//! streaming burst. A burst is only ever handed out once the buffer has been
//! filled completely.

use crate::error::{StreamError, StreamResult};
use crate::waveform::{SampleRecord, RECORD_BYTES};
use tokio::io::{AsyncRead, AsyncReadExt};

pub struct FrameBuffer {
    data: Vec<u8>,
    records: usize,
}

impl FrameBuffer {
    /// Allocate a zeroed buffer of `records` records.
    pub fn new(records: usize) -> StreamResult<Self> {
        let bytes = records
            .checked_mul(RECORD_BYTES)
            .filter(|&n| n <= isize::MAX as usize)
            .ok_or_else(|| {
                StreamError::Configuration(format!(
                    "frame buffer of {} records does not fit in memory",
                    records
                ))
            })?;
        Ok(Self {
            data: vec![0u8; bytes],
            records,
        })
    }

    /// Capacity in records.
    pub fn records(&self) -> usize {
        self.records
    }

    /// Capacity in bytes.
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Write `waveform` into the front of the buffer and return the payload bytes.
    pub fn stage_payload(&mut self, waveform: &[SampleRecord]) -> StreamResult<&[u8]> {
        if waveform.len() > self.records {
            return Err(StreamError::Configuration(format!(
                "waveform of {} records does not fit a {} record frame buffer",
                waveform.len(),
                self.records
            )));
        }
        let len = waveform.len() * RECORD_BYTES;
        let mut dst = &mut self.data[..len];
        for record in waveform {
            record.put(&mut dst);
        }
        Ok(&self.data[..len])
    }

    /// In-phase component of record `index`.
    #[inline]
    pub fn in_phase(&self, index: usize) -> i32 {
        let off = index * RECORD_BYTES;
        i32::from_le_bytes([
            self.data[off],
            self.data[off + 1],
            self.data[off + 2],
            self.data[off + 3],
        ])
    }

    pub fn record(&self, index: usize) -> SampleRecord {
        let off = index * RECORD_BYTES;
        let mut raw = [0u8; RECORD_BYTES];
        raw.copy_from_slice(&self.data[off..off + RECORD_BYTES]);
        SampleRecord::from_le_bytes(&raw)
    }

    /// Iterate the in-phase components of the whole buffer.
    pub fn in_phase_iter(&self) -> impl Iterator<Item = i32> + '_ {
        self.data
            .chunks_exact(RECORD_BYTES)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
    }

    /// Overwrite the buffer from a slice of records (used to build test bursts).
    pub fn fill_from(&mut self, records: &[SampleRecord]) {
        let mut dst = &mut self.data[..];
        for record in records.iter().take(self.records) {
            record.put(&mut dst);
        }
    }

    /// Block until the whole buffer has been received.
    ///
    /// End of stream before the last byte is a [`StreamError::TransportRead`];
    /// whatever partial data arrived is discarded by the caller.
    pub async fn receive<R>(&mut self, reader: &mut R) -> StreamResult<()>
    where
        R: AsyncRead + Unpin,
    {
        let expected = self.data.len();
        let mut received = 0;
        while received < expected {
            match reader.read(&mut self.data[received..]).await {
                Ok(0) => {
                    return Err(StreamError::TransportRead {
                        received,
                        expected,
                        source: std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "connection closed by device",
                        ),
                    })
                }
                Ok(n) => received += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(StreamError::TransportRead {
                        received,
                        expected,
                        source,
                    })
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("records", &self.records)
            .field("bytes", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::waveform::generate;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn test_stage_payload_reuses_buffer() {
        let mut frame = FrameBuffer::new(16).unwrap();
        let waveform = generate(4);
        let payload = frame.stage_payload(&waveform).unwrap();
        assert_eq!(payload.len(), 64);
        assert_eq!(frame.in_phase(0), 2_100_000_000);
        assert_eq!(frame.record(3), waveform[3]);
        assert_eq!(frame.byte_len(), 256);

        assert!(frame.stage_payload(&generate(17)).is_err());
    }

    #[test]
    fn test_unrepresentable_size_is_an_error() {
        assert!(matches!(
            FrameBuffer::new(1 << 62),
            Err(StreamError::Configuration(_))
        ));
        assert!(matches!(
            FrameBuffer::new(usize::MAX),
            Err(StreamError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_receive_full_buffer_across_chunks() {
        let records: Vec<SampleRecord> = (0..8).map(|i| SampleRecord::new(i, -i)).collect();
        let mut wire = Vec::new();
        for r in &records {
            r.put(&mut wire);
        }

        let (mut device, mut client) = tokio::io::duplex(24);
        let writer = tokio::spawn(async move {
            for chunk in wire.chunks(5) {
                device.write_all(chunk).await.unwrap();
            }
            device
        });

        let mut frame = FrameBuffer::new(8).unwrap();
        frame.receive(&mut client).await.unwrap();
        let _device = writer.await.unwrap();

        let i: Vec<i32> = frame.in_phase_iter().collect();
        assert_eq!(i, (0..8).collect::<Vec<_>>());
        assert_eq!(frame.record(5), SampleRecord::new(5, -5));
    }

    #[tokio::test]
    async fn test_short_burst_is_fatal() {
        let (mut device, mut client) = tokio::io::duplex(1024);
        device.write_all(&[0u8; 100]).await.unwrap();
        drop(device);

        let mut frame = FrameBuffer::new(8).unwrap();
        let err = frame.receive(&mut client).await.unwrap_err();
        match err {
            StreamError::TransportRead {
                received, expected, ..
            } => {
                assert_eq!(received, 100);
                assert_eq!(expected, 128);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
