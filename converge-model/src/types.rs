//! Strong types for hashes and entry identifiers

use std::fmt;

use uuid::Uuid;

/// 32-byte SHA-256 digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub const ZERO: Hash = Hash([0u8; 32]);

    /// Returns the inner bytes as a fixed-size array reference.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Parse from a hex string.
    pub fn from_hex(hex_str: &str) -> Result<Self, String> {
        let bytes = hex::decode(hex_str).map_err(|e| format!("invalid hex: {}", e))?;
        bytes
            .try_into()
            .map_err(|v: Vec<u8>| format!("expected 32 bytes, got {}", v.len()))
    }
}

impl From<[u8; 32]> for Hash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl From<Hash> for [u8; 32] {
    fn from(hash: Hash) -> [u8; 32] {
        hash.0
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::ops::Deref for Hash {
    type Target = [u8; 32];
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<&[u8]> for Hash {
    type Error = std::array::TryFromSliceError;
    fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
        Ok(Self(<[u8; 32]>::try_from(slice)?))
    }
}

impl TryFrom<Vec<u8>> for Hash {
    type Error = Vec<u8>;
    fn try_from(vec: Vec<u8>) -> Result<Self, Self::Error> {
        if vec.len() != 32 {
            return Err(vec);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&vec);
        Ok(Self(arr))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(self, f)
    }
}

impl fmt::LowerHex for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash(")?;
        fmt::Display::fmt(self, f)?;
        write!(f, ")")
    }
}

/// Random 128-bit entry identifier, hex-encoded on the wire.
///
/// Ids are unique across all entries and all contexts; they are not part
/// of the content hash, which is what allows regenerating them when a
/// snapshot is loaded into a different context.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct EntryId(Uuid);

impl EntryId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Parse from the 32-character hex form produced by `Display`.
    pub fn parse(s: &str) -> Result<Self, InvalidEntryId> {
        Uuid::try_parse(s)
            .map(Self)
            .map_err(|_| InvalidEntryId(s.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid entry id: {0:?}")]
pub struct InvalidEntryId(pub String);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl fmt::Debug for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryId({})", self.0.simple())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_display() {
        let hash = Hash([0xab; 32]);
        let expected = "abababababababababababababababababababababababababababababababab";
        assert_eq!(format!("{}", hash), expected);
        assert_eq!(format!("{:?}", hash), format!("Hash({})", expected));
    }

    #[test]
    fn test_hash_hex_roundtrip() {
        let hash = Hash([0x5c; 32]);
        let parsed = Hash::from_hex(&hash.to_string()).unwrap();
        assert_eq!(parsed, hash);
        assert!(Hash::from_hex("5c5c").is_err());
        assert!(Hash::from_hex("not hex").is_err());
    }

    #[test]
    fn test_hash_conversions() {
        let bytes = [7u8; 32];
        let hash: Hash = bytes.into();
        assert_eq!(*hash, bytes);
        let back: [u8; 32] = hash.into();
        assert_eq!(back, bytes);

        let short: Result<Hash, _> = vec![1u8; 16].try_into();
        assert!(short.is_err());
    }

    #[test]
    fn test_entry_id_unique_and_parseable() {
        let a = EntryId::generate();
        let b = EntryId::generate();
        assert_ne!(a, b);

        let text = a.to_string();
        assert_eq!(text.len(), 32);
        assert_eq!(EntryId::parse(&text).unwrap(), a);
        assert!(EntryId::parse("zz").is_err());
    }
}
