use crc::Digest;
use std::collections::HashSet;
use std::io::Write;

use crate::codec::{put_length, put_string};
use crate::format::{
    CHECKSUM_BYTES, CRC64, OP_AUX, OP_EOF, OP_RESIZE_DB, OP_SELECT_DB, RDB_HEADER,
    TRAILING_NEWLINE,
};
use crate::RdbError;

/// Streams an RDB snapshot into a sink while keeping a running CRC-64.
///
/// The encoder owns its sink exclusively. Every operation encodes into a
/// reusable scratch buffer, writes it with a single `write_all`, then folds
/// the same bytes into the checksum, so the checksum always covers exactly
/// what reached the sink.
///
/// [`finalize`](RdbEncoder::finalize) writes the EOF marker and checksum
/// trailer and hands the sink back. After that the encoder is terminal: every
/// further call fails with [`RdbError::Finalized`].
pub struct RdbEncoder<W: Write> {
    /// `None` once the snapshot has been finalized.
    sink: Option<W>,
    digest: Digest<'static, u64>,
    /// Reusable scratch buffer to avoid allocation on every write.
    buf: Vec<u8>,
    compress: bool,
    /// Database indices already framed in this file.
    framed_dbs: HashSet<u64>,
    bytes_written: u64,
}

impl<W: Write> RdbEncoder<W> {
    /// Creates an encoder with LZF string compression enabled.
    pub fn new(sink: W) -> Self {
        Self::with_compression(sink, true)
    }

    /// Creates an encoder, choosing whether strings may be LZF-compressed.
    pub fn with_compression(sink: W, compress: bool) -> Self {
        Self {
            sink: Some(sink),
            digest: CRC64.digest(),
            buf: Vec::with_capacity(256),
            compress,
            framed_dbs: HashSet::new(),
            bytes_written: 0,
        }
    }

    /// Writes the `REDIS0003` magic/version header.
    pub fn write_header(&mut self) -> Result<(), RdbError> {
        self.ensure_open()?;
        self.buf.clear();
        self.buf.extend_from_slice(RDB_HEADER);
        self.flush_buf()
    }

    /// Writes one auxiliary metadata field.
    pub fn write_aux(&mut self, key: &[u8], value: &[u8]) -> Result<(), RdbError> {
        self.ensure_open()?;
        self.buf.clear();
        self.buf.push(OP_AUX);
        put_string(&mut self.buf, key, self.compress);
        put_string(&mut self.buf, value, self.compress);
        self.flush_buf()
    }

    /// Writes the select-database and resize-hint opcodes for `index`.
    ///
    /// The hints are advisory sizing information and are not checked against
    /// the keys that follow.
    ///
    /// # Errors
    ///
    /// Returns [`RdbError::DuplicateDatabase`] if `index` was already framed
    /// in this file. Nothing is written in that case.
    pub fn write_database_frame(
        &mut self,
        index: u64,
        key_count_hint: u64,
        ttl_count_hint: u64,
    ) -> Result<(), RdbError> {
        self.ensure_open()?;
        if self.framed_dbs.contains(&index) {
            return Err(RdbError::DuplicateDatabase(index));
        }

        self.buf.clear();
        self.buf.push(OP_SELECT_DB);
        put_length(&mut self.buf, index);
        self.buf.push(OP_RESIZE_DB);
        put_length(&mut self.buf, key_count_hint);
        put_length(&mut self.buf, ttl_count_hint);
        self.flush_buf()?;

        self.framed_dbs.insert(index);
        Ok(())
    }

    /// Writes a key whose value is already serialized in the per-type RDB
    /// value format: `type_tag | encoded key | value bytes verbatim`.
    pub fn write_raw_key_value(
        &mut self,
        type_tag: u8,
        key: &[u8],
        value: &[u8],
    ) -> Result<(), RdbError> {
        self.ensure_open()?;
        self.buf.clear();
        self.buf.push(type_tag);
        put_string(&mut self.buf, key, self.compress);
        self.buf.extend_from_slice(value);
        self.flush_buf()
    }

    /// Writes the EOF marker, the checksum trailer and a newline, flushes the
    /// sink and returns it.
    ///
    /// The EOF marker is part of the checksum; the trailer itself is not.
    ///
    /// # Errors
    ///
    /// Returns [`RdbError::Finalized`] if called more than once. On an I/O
    /// error the encoder is still considered finalized and the sink is dropped.
    pub fn finalize(&mut self) -> Result<W, RdbError> {
        // Taking the sink first makes the encoder terminal even if a write
        // below fails.
        let mut sink = self.sink.take().ok_or(RdbError::Finalized)?;

        sink.write_all(&[OP_EOF])?;
        let mut digest = std::mem::replace(&mut self.digest, CRC64.digest());
        digest.update(&[OP_EOF]);
        let crc = digest.finalize();

        sink.write_all(&crc.to_be_bytes())?;
        sink.write_all(&[TRAILING_NEWLINE])?;
        sink.flush()?;
        self.bytes_written += 1 + CHECKSUM_BYTES as u64 + 1;
        Ok(sink)
    }

    /// Returns `true` once [`finalize`](RdbEncoder::finalize) has been called.
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.sink.is_none()
    }

    /// Total bytes handed to the sink, trailer included.
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Whether string values may be LZF-compressed.
    #[must_use]
    pub fn compression(&self) -> bool {
        self.compress
    }

    fn ensure_open(&self) -> Result<(), RdbError> {
        if self.sink.is_none() {
            return Err(RdbError::Finalized);
        }
        Ok(())
    }

    /// Writes the scratch buffer to the sink, then folds it into the checksum.
    fn flush_buf(&mut self) -> Result<(), RdbError> {
        let sink = self.sink.as_mut().ok_or(RdbError::Finalized)?;
        sink.write_all(&self.buf)?;
        self.digest.update(&self.buf);
        self.bytes_written += self.buf.len() as u64;
        Ok(())
    }
}

impl<W: Write> std::fmt::Debug for RdbEncoder<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RdbEncoder")
            .field("finalized", &self.is_finalized())
            .field("compress", &self.compress)
            .field("framed_dbs", &self.framed_dbs)
            .field("bytes_written", &self.bytes_written)
            .finish()
    }
}
