use std::io::{ErrorKind, Read};

use bytes::BytesMut;

/// Continuation invoked when a field completes. Receives the stream and
/// the index of the completed field.
pub type FieldCallback<R> = Box<dyn FnMut(&mut Stream<R>, usize) + Send>;

/// Whether the transport behind a stream is still delivering bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    Ok,
    Eof,
}

/// A fixed-length slot in a stream's expectation list.
///
/// The backing buffer is recycled across messages: deleting a field
/// returns its buffer to a free list that later `await_bytes` calls draw
/// from.
pub struct Field {
    buf: BytesMut,
    expect: usize,
}

impl Field {
    /// The completed bytes of this field.
    pub fn bytes(&self) -> &[u8] {
        &self.buf[..self.expect]
    }

    pub fn len(&self) -> usize {
        self.expect
    }

    pub fn is_empty(&self) -> bool {
        self.expect == 0
    }

    /// Capacity of the backing buffer (relevant for recycling).
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// The first byte of the field.
    pub fn as_u8(&self) -> u8 {
        self.buf[0]
    }

    /// The field interpreted as a little-endian u16.
    pub fn as_u16_le(&self) -> u16 {
        u16::from_le_bytes([self.buf[0], self.buf[1]])
    }

    /// The field interpreted as a little-endian u32.
    pub fn as_u32_le(&self) -> u32 {
        u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]])
    }
}

struct Slot<R> {
    field: Field,
    cb: Option<FieldCallback<R>>,
}

/// Incremental reader turning partial reads into completed typed fields.
///
/// A stream owns an ordered list of expected fields. `read` pumps bytes
/// from the transport into the current field; when a field completes its
/// continuation runs and may reshape the remaining expectation — append
/// further fields, [`reset`](Stream::reset) the pipeline, or record a
/// failure for the owning connection to report.
pub struct Stream<R> {
    source: R,
    slots: Vec<Slot<R>>,
    recycled: Vec<BytesMut>,
    /// Index of the field currently filling. `None` means unset or
    /// past-the-end; the next `read` re-enters at the front.
    cursor: Option<usize>,
    offset: usize,
    status: StreamStatus,
    done: bool,
    failure: Option<String>,
    finally: Option<FieldCallback<R>>,
    // Continuation bookkeeping for the field whose callback is running.
    cb_home: Option<usize>,
    moved: bool,
    current_deleted: bool,
}

impl<R: Read> Stream<R> {
    pub fn new(source: R) -> Self {
        Self {
            source,
            slots: Vec::new(),
            recycled: Vec::new(),
            cursor: None,
            offset: 0,
            status: StreamStatus::Ok,
            done: false,
            failure: None,
            finally: None,
            cb_home: None,
            moved: false,
            current_deleted: false,
        }
    }

    /// Append an expected field of `len` bytes.
    ///
    /// The buffer is drawn from the recycle list when any entry has
    /// sufficient capacity; otherwise a fresh allocation is made.
    pub fn await_bytes(&mut self, len: usize) -> &mut Self {
        let mut buf = match self.recycled.iter().position(|b| b.capacity() >= len) {
            Some(i) => self.recycled.swap_remove(i),
            None => self.recycled.pop().unwrap_or_default(),
        };
        buf.clear();
        buf.resize(len, 0);
        self.slots.push(Slot {
            field: Field { buf, expect: len },
            cb: None,
        });
        self
    }

    /// Attach a continuation to the most recently awaited field.
    pub fn then(&mut self, cb: impl FnMut(&mut Stream<R>, usize) + Send + 'static) -> &mut Self {
        if let Some(slot) = self.slots.last_mut() {
            slot.cb = Some(Box::new(cb));
        }
        self
    }

    /// Attach a terminal continuation, invoked after the last field
    /// completes.
    pub fn finally(&mut self, cb: impl FnMut(&mut Stream<R>, usize) + Send + 'static) {
        self.finally = Some(Box::new(cb));
    }

    /// Move a field out of the expectation list, keeping its buffer on
    /// the recycle list.
    pub fn delete(&mut self, index: usize) {
        let slot = self.slots.remove(index);
        self.recycled.push(slot.field.buf);
        if let Some(c) = self.cursor {
            if index < c {
                self.cursor = Some(c - 1);
            } else if index == c {
                self.current_deleted = true;
            }
        }
        if let Some(home) = self.cb_home {
            if index < home {
                self.cb_home = Some(home - 1);
            } else if index == home {
                self.cb_home = None;
            }
        }
    }

    /// Move the cursor past the last field. The next `read` re-enters
    /// the pipeline from its current front element. Continuations call
    /// this to discard a malformed header and re-arm the reader.
    pub fn reset(&mut self) {
        self.cursor = None;
        self.moved = true;
    }

    /// Move the cursor back `n` positions.
    pub fn rewind(&mut self, n: usize) {
        let base = self.cursor.unwrap_or(self.slots.len());
        self.cursor = Some(base.saturating_sub(n));
        self.moved = true;
    }

    /// Access the `index`-th surviving field. Negative indices are
    /// relative to the field currently in flight (only meaningful inside
    /// a continuation); panics when out of range.
    pub fn field(&self, index: isize) -> &Field {
        let idx = if index >= 0 {
            index as usize
        } else {
            let cur = self
                .cursor
                .unwrap_or_else(|| panic!("negative field index with no field in flight"));
            cur - index.unsigned_abs()
        };
        &self.slots[idx].field
    }

    /// Number of surviving fields in the expectation list.
    pub fn field_count(&self) -> usize {
        self.slots.len()
    }

    /// Record a failure for the connection owner to pick up with
    /// [`take_failure`](Stream::take_failure). Continuations use this to
    /// report malformed headers, since they cannot reach the connection
    /// themselves.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.failure = Some(reason.into());
    }

    pub fn take_failure(&mut self) -> Option<String> {
        self.failure.take()
    }

    pub fn done(&self) -> bool {
        self.done
    }

    pub fn status(&self) -> StreamStatus {
        self.status
    }

    pub fn get_ref(&self) -> &R {
        &self.source
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.source
    }

    /// Pump bytes from the transport through the expectation list.
    ///
    /// Returns true when the pipeline just terminated (or is empty);
    /// returns false when the transport yielded less than requested.
    /// After a false return, [`status`](Stream::status) distinguishes a
    /// plain partial read from end-of-stream.
    pub fn read(&mut self) -> bool {
        self.done = false;
        loop {
            if self.slots.is_empty() {
                self.status = StreamStatus::Ok;
                return true;
            }

            let cur = match self.cursor {
                Some(c) if c < self.slots.len() => c,
                _ => {
                    self.cursor = Some(0);
                    self.offset = 0;
                    0
                }
            };

            let expect = self.slots[cur].field.expect;
            while self.offset < expect {
                let read = self
                    .source
                    .read(&mut self.slots[cur].field.buf[self.offset..expect]);
                match read {
                    Ok(0) => {
                        self.status = StreamStatus::Eof;
                        return false;
                    }
                    Ok(n) => {
                        self.status = StreamStatus::Ok;
                        self.offset += n;
                        if self.offset < expect {
                            return false;
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) if e.kind() == ErrorKind::WouldBlock => {
                        self.status = StreamStatus::Ok;
                        return false;
                    }
                    Err(_) => {
                        // Hard transport errors end the connection like EOF.
                        self.status = StreamStatus::Eof;
                        return false;
                    }
                }
            }

            self.offset = 0;
            self.moved = false;
            self.current_deleted = false;

            if let Some(mut cb) = self.slots[cur].cb.take() {
                self.cb_home = Some(cur);
                cb(self, cur);
                if let Some(home) = self.cb_home.take() {
                    if home < self.slots.len() && self.slots[home].cb.is_none() {
                        self.slots[home].cb = Some(cb);
                    }
                }
            }

            if self.current_deleted {
                // The in-flight field was discarded; the cursor already
                // addresses its successor.
                self.current_deleted = false;
            } else if !self.moved {
                self.cursor = self.cursor.map(|c| c + 1);
            }

            match self.cursor {
                None => continue,
                Some(c) if c >= self.slots.len() => {
                    if let Some(mut fin) = self.finally.take() {
                        let last = self.slots.len() - 1;
                        fin(self, last);
                        if self.finally.is_none() {
                            self.finally = Some(fin);
                        }
                    }
                    self.done = true;
                    self.cursor = None;
                    return true;
                }
                Some(_) => {}
            }
        }
    }

    #[cfg(test)]
    fn recycled_count(&self) -> usize {
        self.recycled.len()
    }
}
