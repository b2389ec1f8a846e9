//! Rolling-window block matcher
//!
//! Scans the new stream with a window the size of the base signature's
//! chunks. Each window position is checked by weak checksum, then confirmed by
//! length and strong hash. Matches become Copy commands and everything in
//! between is carried as literal Data. The matcher does no I/O: drivers feed
//! it bytes and drain the commands it produces.

use std::sync::Arc;

use bytes::Bytes;

use crate::delta::aggregate::AggregateCopyOperations;
use crate::delta::types::DeltaCommand;
use crate::hash::RollingChecksum;
use crate::signature::{Signature, SignatureLookup};

pub struct DeltaMatcher<'a> {
    lookup: SignatureLookup<'a>,
    rolling: Arc<dyn RollingChecksum>,
    /// Longest chunk length; 0 when the signature is empty
    window: usize,
    /// Shortest chunk length, used once the stream has ended
    tail_window: usize,
    max_literal_run: usize,
    buffer: Vec<u8>,
    pos: usize,
    /// Checksum of `buffer[pos..pos + window]` when known
    checksum: Option<u32>,
    literal: Vec<u8>,
    aggregator: AggregateCopyOperations,
    consumed: u64,
    matches: usize,
}

impl<'a> DeltaMatcher<'a> {
    pub fn new(signature: &'a Signature, max_literal_run: usize) -> Self {
        let window = signature.chunk_size();
        let tail_window = signature
            .chunks
            .iter()
            .map(|c| c.length as usize)
            .min()
            .unwrap_or(0);

        Self {
            lookup: signature.build_lookup(),
            rolling: signature.rolling_checksum.clone(),
            window,
            tail_window,
            max_literal_run: max_literal_run.max(1),
            buffer: Vec::new(),
            pos: 0,
            checksum: None,
            literal: Vec::new(),
            aggregator: AggregateCopyOperations::new(),
            consumed: 0,
            matches: 0,
        }
    }

    /// Bytes of the new stream fed so far
    pub fn position(&self) -> u64 {
        self.consumed
    }

    /// Number of chunk matches found so far
    pub fn matches(&self) -> usize {
        self.matches
    }

    /// Scan `data`, appending any completed commands to `out`
    pub fn feed(&mut self, data: &[u8], out: &mut Vec<DeltaCommand>) {
        self.consumed += data.len() as u64;

        if self.window == 0 {
            self.push_literals(data, out);
            return;
        }

        self.buffer.extend_from_slice(data);
        self.scan(self.window, out);

        if self.pos > 0 {
            self.buffer.drain(..self.pos);
            self.pos = 0;
        }
    }

    /// Flush the tail of the stream
    pub fn finish(mut self, out: &mut Vec<DeltaCommand>) {
        if self.tail_window > 0 && self.tail_window < self.window {
            // A short final base chunk can still match at the end
            self.checksum = None;
            self.scan(self.tail_window, out);
        }

        let rest = self.buffer.split_off(self.pos);
        self.push_literals(&rest, out);
        self.flush_literal(out);
        self.aggregator.flush(out);

        tracing::trace!(
            consumed = self.consumed,
            matches = self.matches,
            "matcher finished"
        );
    }

    fn scan(&mut self, window: usize, out: &mut Vec<DeltaCommand>) {
        while self.buffer.len() - self.pos >= window {
            let end = self.pos + window;
            let checksum = match self.checksum {
                Some(checksum) => checksum,
                None => {
                    let checksum = self.rolling.calculate(&self.buffer[self.pos..end]);
                    self.checksum = Some(checksum);
                    checksum
                }
            };

            if let Some(chunk) = self.lookup.find_match(checksum, &self.buffer[self.pos..end]) {
                tracing::trace!(
                    new_offset = self.consumed - (self.buffer.len() - self.pos) as u64,
                    base_offset = chunk.start_offset,
                    length = chunk.length,
                    "chunk matched"
                );
                self.flush_literal(out);
                self.aggregator
                    .push(DeltaCommand::copy(chunk.start_offset, chunk.length as u64), out);
                self.matches += 1;
                self.pos = end;
                self.checksum = None;
                continue;
            }

            if end == self.buffer.len() {
                // Rolling needs the byte after the window
                break;
            }

            let removed = self.buffer[self.pos];
            let added = self.buffer[end];
            self.checksum = Some(self.rolling.roll(checksum, removed, added, window));
            self.pos += 1;
            self.push_literal_byte(removed, out);
        }
    }

    fn push_literal_byte(&mut self, byte: u8, out: &mut Vec<DeltaCommand>) {
        self.literal.push(byte);
        if self.literal.len() >= self.max_literal_run {
            self.flush_literal(out);
        }
    }

    fn push_literals(&mut self, mut data: &[u8], out: &mut Vec<DeltaCommand>) {
        while !data.is_empty() {
            let room = self.max_literal_run - self.literal.len();
            let (head, rest) = data.split_at(room.min(data.len()));
            self.literal.extend_from_slice(head);
            data = rest;
            if self.literal.len() >= self.max_literal_run {
                self.flush_literal(out);
            }
        }
    }

    fn flush_literal(&mut self, out: &mut Vec<DeltaCommand>) {
        if self.literal.is_empty() {
            return;
        }
        let payload = Bytes::from(std::mem::take(&mut self.literal));
        self.aggregator.push(DeltaCommand::Data { payload }, out);
    }
}
