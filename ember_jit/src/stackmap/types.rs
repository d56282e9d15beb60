//! Verification types and the classfile byte cursor.

use std::fmt;

/// Errors from decoding classfile-encoded data.
///
/// These indicate malformed input and are propagated to the class loader;
/// this crate never tries to repair a bad attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassfileError {
    /// The stream ended inside an encoded item.
    Truncated,
    /// An unknown verification-type tag was read.
    BadVerificationTypeTag(u8),
    /// An unknown or reserved stack-map frame type was read.
    BadFrameType(u8),
}

impl fmt::Display for ClassfileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassfileError::Truncated => write!(f, "classfile attribute truncated"),
            ClassfileError::BadVerificationTypeTag(tag) => {
                write!(f, "unknown verification type tag {}", tag)
            }
            ClassfileError::BadFrameType(tag) => {
                write!(f, "unknown stack map frame type {}", tag)
            }
        }
    }
}

impl std::error::Error for ClassfileError {}

/// Forward-only cursor over classfile attribute bytes.
#[derive(Debug, Clone)]
pub struct ClassfileCursor<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> ClassfileCursor<'a> {
    /// Wrap a byte slice.
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    /// Read one byte.
    pub fn read_u8(&mut self) -> Result<u8, ClassfileError> {
        let byte = *self
            .bytes
            .get(self.position)
            .ok_or(ClassfileError::Truncated)?;
        self.position += 1;
        Ok(byte)
    }

    /// Read a big-endian `u16`.
    pub fn read_u16(&mut self) -> Result<u16, ClassfileError> {
        let hi = self.read_u8()? as u16;
        let lo = self.read_u8()? as u16;
        Ok(hi << 8 | lo)
    }

    /// Number of bytes consumed.
    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    /// True if the cursor has consumed all input.
    #[inline]
    pub fn is_at_end(&self) -> bool {
        self.position == self.bytes.len()
    }
}

/// The verifier's abstract classification of one local or stack slot, as
/// encoded in a `StackMapTable` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationType {
    /// Unusable or unknown (tag 0).
    Top,
    /// `int` and smaller (tag 1).
    Integer,
    /// `float` (tag 2).
    Float,
    /// `double`; occupies two slots (tag 3).
    Double,
    /// `long`; occupies two slots (tag 4).
    Long,
    /// The `null` reference (tag 5).
    Null,
    /// `this` before the constructor call (tag 6).
    UninitializedThis,
    /// A class reference; payload is a constant-pool index (tag 7).
    Object(u16),
    /// An allocated-but-unconstructed object; payload is the offset of the
    /// allocation site (tag 8).
    Uninitialized(u16),
}

impl VerificationType {
    /// Decode one verification type from the cursor.
    pub fn decode(cursor: &mut ClassfileCursor<'_>) -> Result<Self, ClassfileError> {
        let tag = cursor.read_u8()?;
        Ok(match tag {
            0 => VerificationType::Top,
            1 => VerificationType::Integer,
            2 => VerificationType::Float,
            3 => VerificationType::Double,
            4 => VerificationType::Long,
            5 => VerificationType::Null,
            6 => VerificationType::UninitializedThis,
            7 => VerificationType::Object(cursor.read_u16()?),
            8 => VerificationType::Uninitialized(cursor.read_u16()?),
            _ => return Err(ClassfileError::BadVerificationTypeTag(tag)),
        })
    }

    /// Append the wire encoding to `out`.
    pub fn write(&self, out: &mut Vec<u8>) {
        match *self {
            VerificationType::Top => out.push(0),
            VerificationType::Integer => out.push(1),
            VerificationType::Float => out.push(2),
            VerificationType::Double => out.push(3),
            VerificationType::Long => out.push(4),
            VerificationType::Null => out.push(5),
            VerificationType::UninitializedThis => out.push(6),
            VerificationType::Object(index) => {
                out.push(7);
                out.extend_from_slice(&index.to_be_bytes());
            }
            VerificationType::Uninitialized(offset) => {
                out.push(8);
                out.extend_from_slice(&offset.to_be_bytes());
            }
        }
    }

    /// Whether a slot of this type holds an object reference.
    #[inline]
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            VerificationType::Null
                | VerificationType::UninitializedThis
                | VerificationType::Object(_)
                | VerificationType::Uninitialized(_)
        )
    }

    /// Number of slots this type occupies (2 for `long`/`double`).
    #[inline]
    pub fn category(&self) -> usize {
        match self {
            VerificationType::Long | VerificationType::Double => 2,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verification_type_round_trip() {
        let all = [
            VerificationType::Top,
            VerificationType::Integer,
            VerificationType::Float,
            VerificationType::Double,
            VerificationType::Long,
            VerificationType::Null,
            VerificationType::UninitializedThis,
            VerificationType::Object(0x1234),
            VerificationType::Uninitialized(7),
        ];
        for ty in all {
            let mut bytes = Vec::new();
            ty.write(&mut bytes);
            let mut cursor = ClassfileCursor::new(&bytes);
            assert_eq!(VerificationType::decode(&mut cursor), Ok(ty));
            assert!(cursor.is_at_end());
        }
    }

    #[test]
    fn test_bad_tag() {
        let mut cursor = ClassfileCursor::new(&[9]);
        assert_eq!(
            VerificationType::decode(&mut cursor),
            Err(ClassfileError::BadVerificationTypeTag(9))
        );
    }

    #[test]
    fn test_truncated_object() {
        let mut cursor = ClassfileCursor::new(&[7, 0]);
        assert_eq!(
            VerificationType::decode(&mut cursor),
            Err(ClassfileError::Truncated)
        );
    }

    #[test]
    fn test_reference_classification() {
        assert!(VerificationType::Object(1).is_reference());
        assert!(VerificationType::Null.is_reference());
        assert!(VerificationType::Uninitialized(0).is_reference());
        assert!(!VerificationType::Integer.is_reference());
        assert!(!VerificationType::Top.is_reference());
        assert_eq!(VerificationType::Long.category(), 2);
        assert_eq!(VerificationType::Object(1).category(), 1);
    }
}
