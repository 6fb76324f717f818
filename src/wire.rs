//! Bounds-checked field cursors for the fixed-layout records exchanged with
//! the worker binaries. Every record codec in the crate goes through these
//! so field offsets never appear as bare index arithmetic.

/// Sequential reader over a little-endian record image.
///
/// Callers guarantee the slice holds at least one whole record; the cursor
/// panics on overrun, which in this crate only ever means a codec and its
/// declared record size disagree.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize) -> &'a [u8] {
        let field = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        field
    }

    pub fn u8(&mut self) -> u8 {
        self.take(1)[0]
    }

    pub fn bool(&mut self) -> bool {
        self.u8() != 0
    }

    pub fn bytes<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N));
        out
    }

    pub fn u16_be(&mut self) -> u16 {
        u16::from_be_bytes(self.bytes())
    }

    pub fn u32_be(&mut self) -> u32 {
        u32::from_be_bytes(self.bytes())
    }

    pub fn i32(&mut self) -> i32 {
        i32::from_le_bytes(self.bytes())
    }

    pub fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.bytes())
    }

    pub fn u64(&mut self) -> u64 {
        u64::from_le_bytes(self.bytes())
    }

    pub fn i64(&mut self) -> i64 {
        i64::from_le_bytes(self.bytes())
    }

    pub fn f64(&mut self) -> f64 {
        f64::from_le_bytes(self.bytes())
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }
}

/// Sequential writer, the exact inverse of [Reader].
pub struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn put(&mut self, field: &[u8]) {
        self.buf[self.pos..self.pos + field.len()].copy_from_slice(field);
        self.pos += field.len();
    }

    pub fn u8(&mut self, v: u8) {
        self.put(&[v]);
    }

    pub fn bool(&mut self, v: bool) {
        self.u8(v as u8);
    }

    pub fn bytes(&mut self, v: &[u8]) {
        self.put(v);
    }

    pub fn u16_be(&mut self, v: u16) {
        self.put(&v.to_be_bytes());
    }

    pub fn u32_be(&mut self, v: u32) {
        self.put(&v.to_be_bytes());
    }

    pub fn i32(&mut self, v: i32) {
        self.put(&v.to_le_bytes());
    }

    pub fn u32(&mut self, v: u32) {
        self.put(&v.to_le_bytes());
    }

    pub fn u64(&mut self, v: u64) {
        self.put(&v.to_le_bytes());
    }

    pub fn i64(&mut self, v: i64) {
        self.put(&v.to_le_bytes());
    }

    pub fn f64(&mut self, v: f64) {
        self.put(&v.to_le_bytes());
    }

    pub fn position(&self) -> usize {
        self.pos
    }
}
