//! Pending output buffers and the chunk-send policy.

use crate::command::OutputMode;

/// Content of one outbound chunk; a forbidden side is always empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chunk {
    pub stdout: String,
    pub stderr: String,
}

impl Chunk {
    pub fn is_empty(&self) -> bool {
        self.stdout.is_empty() && self.stderr.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// Unsent output of one session.
#[derive(Debug, Default)]
pub struct PendingOutput {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl PendingOutput {
    pub fn append(&mut self, stream: StreamKind, data: &[u8]) {
        match stream {
            StreamKind::Stdout => self.stdout.extend_from_slice(data),
            StreamKind::Stderr => self.stderr.extend_from_slice(data),
        }
    }

    pub fn len(&self, stream: StreamKind) -> usize {
        match stream {
            StreamKind::Stdout => self.stdout.len(),
            StreamKind::Stderr => self.stderr.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stdout.is_empty() && self.stderr.is_empty()
    }

    /// Either side holds at least `limit` bytes.
    pub fn over_threshold(&self, limit: usize) -> bool {
        self.stdout.len() >= limit || self.stderr.len() >= limit
    }

    /// Apply the chunk policy once while the worker may still write.
    ///
    /// A forbidden side is cleared without being sent. A permitted side gives
    /// up at most `limit` bytes and keeps the rest, including a trailing
    /// UTF-8 sequence whose remaining bytes have not been read yet. Returns
    /// `None` when there is nothing to transmit.
    pub fn next_chunk(
        &mut self,
        limit: usize,
        stdout_mode: OutputMode,
        stderr_mode: OutputMode,
    ) -> Option<Chunk> {
        self.take(limit, stdout_mode, stderr_mode, Tail::Hold)
    }

    /// Like [`next_chunk`](Self::next_chunk), after both streams closed.
    ///
    /// Nothing more will arrive, so a truncated trailing sequence is sent too.
    pub fn last_chunk(
        &mut self,
        limit: usize,
        stdout_mode: OutputMode,
        stderr_mode: OutputMode,
    ) -> Option<Chunk> {
        self.take(limit, stdout_mode, stderr_mode, Tail::Flush)
    }

    /// Content for a liveness message: everything permitted, forbidden sides cleared.
    pub fn take_heartbeat(&mut self, stdout_mode: OutputMode, stderr_mode: OutputMode) -> Chunk {
        Chunk {
            stdout: take_side(&mut self.stdout, usize::MAX, stdout_mode, Tail::Hold),
            stderr: take_side(&mut self.stderr, usize::MAX, stderr_mode, Tail::Hold),
        }
    }

    fn take(
        &mut self,
        limit: usize,
        stdout_mode: OutputMode,
        stderr_mode: OutputMode,
        tail: Tail,
    ) -> Option<Chunk> {
        let chunk = Chunk {
            stdout: take_side(&mut self.stdout, limit, stdout_mode, tail),
            stderr: take_side(&mut self.stderr, limit, stderr_mode, tail),
        };
        (!chunk.is_empty()).then_some(chunk)
    }
}

/// What to do with an incomplete UTF-8 sequence at the end of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tail {
    Hold,
    Flush,
}

/// Bytes that are not UTF-8 become U+FFFD; capture files keep the raw bytes.
fn take_side(buf: &mut Vec<u8>, limit: usize, mode: OutputMode, tail: Tail) -> String {
    if !mode.permits_transmission() {
        buf.clear();
        return String::new();
    }

    let split = split_point(buf, limit, tail);
    let rest = buf.split_off(split);
    let head = std::mem::replace(buf, rest);
    String::from_utf8_lossy(&head).into_owned()
}

/// Largest split point `<= limit` that does not cut a UTF-8 sequence.
///
/// A sequence cut by the end of the buffer is only kept back under
/// [`Tail::Hold`]. When not even one sequence fits in `limit`, the cut is
/// made at `limit` so the buffer still shrinks.
fn split_point(buf: &[u8], limit: usize, tail: Tail) -> usize {
    let end = buf.len().min(limit);
    if end == buf.len() && tail == Tail::Flush {
        return end;
    }

    let partial = incomplete_tail(&buf[..end]);
    if partial == end && end < buf.len() {
        end
    } else {
        end - partial
    }
}

/// Length of a trailing multi-byte sequence that is missing bytes.
///
/// Returns 0 when the buffer ends on a complete sequence or on bytes that
/// cannot start one.
fn incomplete_tail(bytes: &[u8]) -> usize {
    // Continuation bytes look like 0b10xxxxxx; a sequence is at most 4 bytes.
    let lead = bytes
        .iter()
        .rev()
        .take(4)
        .position(|b| (b & 0xC0) != 0x80);
    let Some(back) = lead else {
        return 0;
    };

    let have = back + 1;
    let need = match bytes[bytes.len() - have] {
        0xC2..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF4 => 4,
        _ => return 0,
    };
    if have < need { have } else { 0 }
}
