//! Node hardware identifiers.

use core::fmt;
use core::str::FromStr;

/// Length of a node identifier.
pub const NODE_IDENTIFIER_LEN: usize = 8;

/// Text length of a formatted identifier, `xx:` times 8 minus the last colon.
const TEXT_LEN: usize = NODE_IDENTIFIER_LEN * 3 - 1;

/// Globally unique 8 byte node identifier.
///
/// Printed as lower-case colon separated hex octets.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct NodeIdentifier([u8; NODE_IDENTIFIER_LEN]);

impl NodeIdentifier {
    pub const fn new(bytes: [u8; NODE_IDENTIFIER_LEN]) -> Self {
        NodeIdentifier(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; NODE_IDENTIFIER_LEN] {
        &self.0
    }
}

impl From<[u8; NODE_IDENTIFIER_LEN]> for NodeIdentifier {
    fn from(value: [u8; NODE_IDENTIFIER_LEN]) -> Self {
        NodeIdentifier(value)
    }
}

impl TryFrom<&[u8]> for NodeIdentifier {
    type Error = ParseIdentifierError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        value
            .try_into()
            .map(NodeIdentifier)
            .map_err(|_| ParseIdentifierError::Length(value.len()))
    }
}

impl fmt::Display for NodeIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (n, byte) in self.0.iter().enumerate() {
            if n > 0 {
                f.write_str(":")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for NodeIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeIdentifier({})", self)
    }
}

/// Error parsing the text form of a [`NodeIdentifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum ParseIdentifierError {
    /// Wrong number of bytes or characters.
    Length(usize),
    /// Expected a `:` at the given position.
    Separator(usize),
    /// Octet at the given index is not two hex digits.
    Digit(usize),
}

impl fmt::Display for ParseIdentifierError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseIdentifierError::Length(len) => {
                write!(f, "invalid node identifier length {}", len)
            }
            ParseIdentifierError::Separator(pos) => {
                write!(f, "expected ':' in node identifier at position {}", pos)
            }
            ParseIdentifierError::Digit(octet) => {
                write!(f, "invalid hex digits in node identifier octet {}", octet)
            }
        }
    }
}

impl FromStr for NodeIdentifier {
    type Err = ParseIdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let src = s.as_bytes();

        if src.len() != TEXT_LEN {
            return Err(ParseIdentifierError::Length(src.len()));
        }

        let mut bytes = [0u8; NODE_IDENTIFIER_LEN];

        for (n, byte) in bytes.iter_mut().enumerate() {
            let pos = n * 3;
            if n > 0 && src[pos - 1] != b':' {
                return Err(ParseIdentifierError::Separator(pos - 1));
            }
            hex::decode_to_slice(&src[pos..pos + 2], core::slice::from_mut(byte))
                .map_err(|_| ParseIdentifierError::Digit(n))?;
        }

        Ok(NodeIdentifier(bytes))
    }
}
