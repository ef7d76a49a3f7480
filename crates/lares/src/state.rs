use heapless::Vec;

/// Maximum length of the operational state of a single element.
pub const MAX_STATE_LEN: usize = 128;

/// The buffer an element serializes its operational state into.
pub type StateBuffer = Vec<u8, MAX_STATE_LEN>;

/// Maximum length of the tag stored in front of a state; longer tags are
/// truncated.
pub const MAX_TAG_LEN: usize = 32;

/// Maximum length of a state section: the tag, its length, the state
/// length and the state.
pub const MAX_SECTION_LEN: usize = 1 + MAX_TAG_LEN + 2 + MAX_STATE_LEN;

/// The buffer a state section is framed into.
pub type SectionBuffer = Vec<u8, MAX_SECTION_LEN>;

fn truncated_tag(tag: &str) -> &[u8] {
    let tag = tag.as_bytes();
    &tag[..tag.len().min(MAX_TAG_LEN)]
}

/// Frames the state of an element into a section tagged with its
/// [`state_tag`](crate::element::Element::state_tag).
///
/// Returns `false` when the state is longer than [`MAX_STATE_LEN`].
pub fn encode_section(tag: &str, state: &[u8], out: &mut SectionBuffer) -> bool {
    out.clear();
    let tag = truncated_tag(tag);
    let Ok(len) = u16::try_from(state.len()) else {
        return false;
    };

    // Both lengths are bounded by the buffer capacity.
    out.push(tag.len() as u8).is_ok()
        && out.extend_from_slice(tag).is_ok()
        && out.extend_from_slice(&len.to_le_bytes()).is_ok()
        && out.extend_from_slice(state).is_ok()
}

/// Returns the state framed in `section`.
///
/// A section written under another tag, or whose length does not match
/// its content, yields `None`.
#[must_use]
pub fn decode_section<'a>(tag: &str, section: &'a [u8]) -> Option<&'a [u8]> {
    let (&tag_len, rest) = section.split_first()?;
    let (saved_tag, rest) = rest.split_at_checked(usize::from(tag_len))?;
    if saved_tag != truncated_tag(tag) {
        return None;
    }

    let (len, state) = rest.split_first_chunk::<2>()?;
    (usize::from(u16::from_le_bytes(*len)) == state.len()).then_some(state)
}

/// Serializes the operational state of an element.
///
/// Values are written little endian, one after the other. Writing past
/// [`MAX_STATE_LEN`] marks the writer as overflowed and the runtime then
/// keeps the previously saved record.
#[derive(Debug)]
pub struct StateWriter<'a> {
    buf: &'a mut StateBuffer,
    overflowed: bool,
}

impl<'a> StateWriter<'a> {
    /// Creates a [`StateWriter`] over an emptied buffer.
    #[must_use]
    pub fn new(buf: &'a mut StateBuffer) -> Self {
        buf.clear();
        Self {
            buf,
            overflowed: false,
        }
    }

    /// Whether some value did not fit into the buffer.
    #[must_use]
    #[inline]
    pub const fn overflowed(&self) -> bool {
        self.overflowed
    }

    /// Returns the bytes written so far.
    #[must_use]
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        self.buf.as_slice()
    }

    /// Writes raw bytes.
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        if self.overflowed || self.buf.extend_from_slice(bytes).is_err() {
            self.overflowed = true;
        }
    }

    /// Writes a [`u8`].
    #[inline]
    pub fn put_u8(&mut self, value: u8) {
        self.put_bytes(&[value]);
    }

    /// Writes a [`bool`].
    #[inline]
    pub fn put_bool(&mut self, value: bool) {
        self.put_u8(u8::from(value));
    }

    /// Writes a [`u16`].
    #[inline]
    pub fn put_u16(&mut self, value: u16) {
        self.put_bytes(&value.to_le_bytes());
    }

    /// Writes an [`i16`].
    #[inline]
    pub fn put_i16(&mut self, value: i16) {
        self.put_bytes(&value.to_le_bytes());
    }

    /// Writes a [`u32`].
    #[inline]
    pub fn put_u32(&mut self, value: u32) {
        self.put_bytes(&value.to_le_bytes());
    }

    /// Writes a [`u64`].
    #[inline]
    pub fn put_u64(&mut self, value: u64) {
        self.put_bytes(&value.to_le_bytes());
    }
}

/// Reads back the operational state written by a [`StateWriter`].
///
/// Every read returns `None` once the data is exhausted, so an absent or
/// shorter record naturally leaves the remaining fields at their defaults.
#[derive(Debug, Clone)]
pub struct StateReader<'a> {
    data: &'a [u8],
}

impl<'a> StateReader<'a> {
    /// Creates a [`StateReader`] over restored data.
    #[must_use]
    #[inline]
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Creates a [`StateReader`] for an element without a saved record.
    #[must_use]
    #[inline]
    pub const fn empty() -> Self {
        Self { data: &[] }
    }

    /// Whether no data is left.
    #[must_use]
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the number of unread bytes.
    #[must_use]
    #[inline]
    pub const fn remaining(&self) -> usize {
        self.data.len()
    }

    fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
        let (head, tail) = self.data.split_first_chunk::<N>()?;
        self.data = tail;
        Some(*head)
    }

    /// Reads a [`u8`].
    #[inline]
    pub fn u8(&mut self) -> Option<u8> {
        self.take::<1>().map(|[value]| value)
    }

    /// Reads a [`bool`].
    ///
    /// Any byte other than `0` and `1` is rejected.
    pub fn bool(&mut self) -> Option<bool> {
        match self.u8()? {
            0 => Some(false),
            1 => Some(true),
            _ => None,
        }
    }

    /// Reads a [`u16`].
    #[inline]
    pub fn u16(&mut self) -> Option<u16> {
        self.take().map(u16::from_le_bytes)
    }

    /// Reads an [`i16`].
    #[inline]
    pub fn i16(&mut self) -> Option<i16> {
        self.take().map(i16::from_le_bytes)
    }

    /// Reads a [`u32`].
    #[inline]
    pub fn u32(&mut self) -> Option<u32> {
        self.take().map(u32::from_le_bytes)
    }

    /// Reads a [`u64`].
    #[inline]
    pub fn u64(&mut self) -> Option<u64> {
        self.take().map(u64::from_le_bytes)
    }
}
