//! Fixed-capacity receive window.
//!
//! The window tracks three indices into one buffer: `begin` (start of the
//! unconsumed bytes), `end` (end of valid bytes) and `wanted` (size of the
//! next raw read). The only mutators are [`commit`](RecvWindow::commit),
//! [`consume`](RecvWindow::consume), [`compact`](RecvWindow::compact) and
//! [`request`](RecvWindow::request), and each of them keeps
//! `begin <= end <= capacity` and `wanted <= capacity - end`.

/// Per-connection receive buffer with a sliding unconsumed window.
pub struct RecvWindow {
    buf: Box<[u8]>,
    begin: usize,
    end: usize,
    wanted: usize,
}

impl RecvWindow {
    /// Create an empty window. The first read will ask for the whole capacity
    /// until [`request`](Self::request) narrows it.
    pub fn new(capacity: usize) -> Self {
        RecvWindow {
            buf: vec![0u8; capacity].into_boxed_slice(),
            begin: 0,
            end: 0,
            wanted: capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn begin(&self) -> usize {
        self.begin
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn wanted(&self) -> usize {
        self.wanted
    }

    /// Number of unconsumed bytes.
    pub fn len(&self) -> usize {
        self.end - self.begin
    }

    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }

    /// Free space after `end`.
    pub fn free(&self) -> usize {
        self.buf.len() - self.end
    }

    /// The unconsumed bytes `[begin, end)`.
    pub fn data(&self) -> &[u8] {
        &self.buf[self.begin..self.end]
    }

    /// Set the size of the next raw read.
    ///
    /// The value is clamped to `1..=free()`; the effective size is returned
    /// and is `0` only when the buffer has no free space left.
    pub fn request(&mut self, wanted: usize) -> usize {
        self.wanted = wanted.max(1).min(self.free());
        self.wanted
    }

    /// The region the next raw read lands in, `[end, end + wanted)`.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        let start = self.end;
        &mut self.buf[start..start + self.wanted]
    }

    /// Record `n` freshly read bytes at the end of the window.
    pub fn commit(&mut self, n: usize) {
        debug_assert!(n <= self.wanted, "commit({n}) exceeds wanted {}", self.wanted);
        let n = n.min(self.wanted);
        self.end += n;
        self.wanted = self.wanted.min(self.free());
    }

    /// Mark `n` bytes at the front of the window as consumed.
    pub fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.len(), "consume({n}) exceeds window length {}", self.len());
        self.begin += n.min(self.len());
    }

    /// Shift the unconsumed bytes down to offset 0.
    ///
    /// An exhausted window resets both indices to 0. Returns `true` when
    /// bytes were moved.
    pub fn compact(&mut self) -> bool {
        if self.begin == self.end {
            self.begin = 0;
            self.end = 0;
            return false;
        }
        if self.begin == 0 {
            return false;
        }

        self.buf.copy_within(self.begin..self.end, 0);
        self.end -= self.begin;
        self.begin = 0;
        true
    }
}

impl std::fmt::Debug for RecvWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecvWindow")
            .field("capacity", &self.capacity())
            .field("begin", &self.begin)
            .field("end", &self.end)
            .field("wanted", &self.wanted)
            .finish()
    }
}
