//! Binary frame layout shared by encoder and decoder.
//!
//! `[len: u32 BE] [type: u8] [reserved: u8] [sender: u16 BE] [payload]`
//!
//! `len` counts every byte after the length field itself, so a frame
//! occupies `4 + len` bytes on the wire and the header totals 8 bytes.
//! Several frames may be concatenated inside one transport message; the
//! decoder walks them in order. Integers are big-endian, strings are
//! UTF-8 with a u16 length prefix.

pub const HEADER_LEN: usize = 8;
/// Bytes of the header covered by the length field (type + reserved +
/// sender).
pub const LEN_COVERED_HEADER: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    Join = 1,
    Leave = 2,
    Chat = 3,
    DrawLine = 4,
    DrawPoint = 5,
    Fill = 6,
    PointerUp = 7,
    Snapshot = 8,
    Layers = 9,
    SnapshotRequest = 10,
    EndSession = 11,
}

impl FrameType {
    #[must_use]
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Join),
            2 => Some(Self::Leave),
            3 => Some(Self::Chat),
            4 => Some(Self::DrawLine),
            5 => Some(Self::DrawPoint),
            6 => Some(Self::Fill),
            7 => Some(Self::PointerUp),
            8 => Some(Self::Snapshot),
            9 => Some(Self::Layers),
            10 => Some(Self::SnapshotRequest),
            11 => Some(Self::EndSession),
            _ => None,
        }
    }

    #[must_use]
    pub fn tag(self) -> u8 {
        self as u8
    }
}
