//! Self-describing record payloads.
//!
//! Each field is tagged with a one-byte format descriptor followed by the
//! field value in little-endian order, so host tools can print any record
//! without knowing its layout.

/// Unsigned 8-bit field.
pub const FMT_U8: u8 = 0x1;
/// Unsigned 16-bit field.
pub const FMT_U16: u8 = 0x3;
/// Signed 32-bit field.
pub const FMT_I32: u8 = 0x4;
/// Unsigned 32-bit field.
pub const FMT_U32: u8 = 0x5;
/// Null-terminated string field.
pub const FMT_STR: u8 = 0x8;
/// Unsigned 64-bit field.
pub const FMT_U64: u8 = 0xE;

/// Incremental builder for record payloads.
#[derive(Debug, Default)]
pub struct PayloadBuilder {
    bytes: Vec<u8>,
}

impl PayloadBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    /// Creates a builder with reserved capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
        }
    }

    pub fn push_u8(&mut self, value: u8) -> &mut Self {
        self.bytes.push(FMT_U8);
        self.bytes.push(value);
        self
    }

    pub fn push_u16(&mut self, value: u16) -> &mut Self {
        self.bytes.push(FMT_U16);
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn push_u32(&mut self, value: u32) -> &mut Self {
        self.bytes.push(FMT_U32);
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn push_i32(&mut self, value: i32) -> &mut Self {
        self.bytes.push(FMT_I32);
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn push_u64(&mut self, value: u64) -> &mut Self {
        self.bytes.push(FMT_U64);
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Adds a null-terminated string field. Interior NULs truncate the value.
    pub fn push_str(&mut self, value: &str) -> &mut Self {
        self.bytes.push(FMT_STR);
        let raw = value.as_bytes();
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        self.bytes.extend_from_slice(&raw[..end]);
        self.bytes.push(0);
        self
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Consumes the builder and returns the accumulated payload bytes.
    pub fn into_vec(self) -> Vec<u8> {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_u8_fields() {
        let mut builder = PayloadBuilder::new();
        builder.push_u8(0xAB).push_u8(0xCD);
        assert_eq!(builder.into_vec(), vec![0x01, 0xAB, 0x01, 0xCD]);
    }

    #[test]
    fn builds_u16_field() {
        let mut builder = PayloadBuilder::new();
        builder.push_u16(0x1234);
        assert_eq!(builder.into_vec(), vec![0x03, 0x34, 0x12]);
    }

    #[test]
    fn builds_string_field() {
        let mut builder = PayloadBuilder::new();
        builder.push_str("hi");
        assert_eq!(builder.into_vec(), vec![0x08, b'h', b'i', 0]);
    }
}
