//! Classic STUN message codec
//!
//! Encodes Binding Requests and decodes Binding Responses in the classic
//! (pre-RFC 5389) STUN layout used by NAT behavior discovery servers:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |         Message Type          |        Message Length         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                                                               |
//! |                 Transaction ID (128 bits)                     |
//! |                                                               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  Attribute Type               |  Attribute Length             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  Value (Attribute Length bytes, no padding) ...               |
//! ```
//!
//! There is no magic cookie and no attribute padding. Message Length counts
//! the attribute bytes only.

use crate::registry::TransactionId;
use std::net::{Ipv4Addr, SocketAddrV4};

/// STUN message header size (20 bytes)
pub const HEADER_SIZE: usize = 20;

/// Attribute type + length prefix
const ATTR_HEADER_SIZE: usize = 4;

/// Address attribute value size (reserved, family, port, IPv4)
pub const ADDRESS_VALUE_SIZE: usize = 8;

/// Address family byte for IPv4
pub const FAMILY_IPV4: u8 = 0x01;

/// CHANGE-REQUEST flag asking the server to reply from its alternate IP
pub const CHANGE_IP_FLAG: u32 = 0x0000_0004;

/// CHANGE-REQUEST flag asking the server to reply from its alternate port
pub const CHANGE_PORT_FLAG: u32 = 0x0000_0002;

/// STUN message type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StunMessageType {
    /// Binding Request (0x0001)
    BindingRequest,
    /// Binding Response (0x0101)
    BindingResponse,
    /// Binding Error Response (0x0111)
    BindingErrorResponse,
    /// Shared Secret Request (0x0002)
    SharedSecretRequest,
    /// Shared Secret Response (0x0102)
    SharedSecretResponse,
    /// Shared Secret Error Response (0x0112)
    SharedSecretErrorResponse,
}

impl StunMessageType {
    /// Wire code
    #[must_use]
    pub fn code(self) -> u16 {
        match self {
            Self::BindingRequest => 0x0001,
            Self::BindingResponse => 0x0101,
            Self::BindingErrorResponse => 0x0111,
            Self::SharedSecretRequest => 0x0002,
            Self::SharedSecretResponse => 0x0102,
            Self::SharedSecretErrorResponse => 0x0112,
        }
    }

    /// Parse a wire code
    #[must_use]
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0x0001 => Some(Self::BindingRequest),
            0x0101 => Some(Self::BindingResponse),
            0x0111 => Some(Self::BindingErrorResponse),
            0x0002 => Some(Self::SharedSecretRequest),
            0x0102 => Some(Self::SharedSecretResponse),
            0x0112 => Some(Self::SharedSecretErrorResponse),
            _ => None,
        }
    }
}

/// STUN attribute type
///
/// Only the five address-discovery attributes are interpreted. The rest of the
/// classic registry is named for logging and otherwise skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeType {
    /// MAPPED-ADDRESS (0x0001)
    MappedAddress,
    /// RESPONSE-ADDRESS (0x0002)
    ResponseAddress,
    /// CHANGE-REQUEST (0x0003)
    ChangeRequest,
    /// SOURCE-ADDRESS (0x0004)
    SourceAddress,
    /// CHANGED-ADDRESS (0x0005)
    ChangedAddress,
    /// USERNAME (0x0006)
    Username,
    /// PASSWORD (0x0007)
    Password,
    /// MESSAGE-INTEGRITY (0x0008)
    MessageIntegrity,
    /// ERROR-CODE (0x0009)
    ErrorCode,
    /// UNKNOWN-ATTRIBUTES (0x000A)
    UnknownAttributes,
    /// REFLECTED-FROM (0x000B)
    ReflectedFrom,
    /// XOR-ONLY (0x0021)
    XorOnly,
    /// XOR-MAPPED-ADDRESS, pre-standard code (0x8020)
    XorMappedAddress,
    /// SERVER-NAME (0x8022)
    ServerName,
    /// SECONDARY-ADDRESS (0x8050)
    SecondaryAddress,
    /// Any other type code
    Unknown(u16),
}

impl AttributeType {
    /// Wire code
    #[must_use]
    pub fn code(self) -> u16 {
        match self {
            Self::MappedAddress => 0x0001,
            Self::ResponseAddress => 0x0002,
            Self::ChangeRequest => 0x0003,
            Self::SourceAddress => 0x0004,
            Self::ChangedAddress => 0x0005,
            Self::Username => 0x0006,
            Self::Password => 0x0007,
            Self::MessageIntegrity => 0x0008,
            Self::ErrorCode => 0x0009,
            Self::UnknownAttributes => 0x000A,
            Self::ReflectedFrom => 0x000B,
            Self::XorOnly => 0x0021,
            Self::XorMappedAddress => 0x8020,
            Self::ServerName => 0x8022,
            Self::SecondaryAddress => 0x8050,
            Self::Unknown(code) => code,
        }
    }

    /// Parse a wire code. Never fails; unrecognized codes become `Unknown`.
    #[must_use]
    pub fn from_code(code: u16) -> Self {
        match code {
            0x0001 => Self::MappedAddress,
            0x0002 => Self::ResponseAddress,
            0x0003 => Self::ChangeRequest,
            0x0004 => Self::SourceAddress,
            0x0005 => Self::ChangedAddress,
            0x0006 => Self::Username,
            0x0007 => Self::Password,
            0x0008 => Self::MessageIntegrity,
            0x0009 => Self::ErrorCode,
            0x000A => Self::UnknownAttributes,
            0x000B => Self::ReflectedFrom,
            0x0021 => Self::XorOnly,
            0x8020 => Self::XorMappedAddress,
            0x8022 => Self::ServerName,
            0x8050 => Self::SecondaryAddress,
            other => Self::Unknown(other),
        }
    }
}

/// One type-length-value attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StunAttribute {
    /// Attribute type
    pub attr_type: AttributeType,
    /// Raw value bytes; the encoded length is `value.len()`
    pub value: Vec<u8>,
}

impl StunAttribute {
    /// Create an attribute from raw parts
    ///
    /// The length field is 16 bits, so `value` must not exceed 65535 bytes.
    /// Longer values trip a debug assertion when encoded.
    #[must_use]
    pub fn new(attr_type: AttributeType, value: Vec<u8>) -> Self {
        Self { attr_type, value }
    }

    /// CHANGE-REQUEST attribute with the given flags
    #[must_use]
    pub fn change_request(change_ip: bool, change_port: bool) -> Self {
        Self::new(
            AttributeType::ChangeRequest,
            change_flags(change_ip, change_port).to_be_bytes().to_vec(),
        )
    }

    /// Address-shaped attribute (MAPPED/SOURCE/CHANGED/RESPONSE-ADDRESS)
    #[must_use]
    pub fn address(attr_type: AttributeType, addr: SocketAddrV4) -> Self {
        Self::new(attr_type, encode_address(addr).to_vec())
    }

    /// Encoded size including the 4-byte type/length prefix
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        ATTR_HEADER_SIZE + self.value.len()
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.attr_type.code().to_be_bytes());
        debug_assert!(
            self.value.len() <= usize::from(u16::MAX),
            "attribute value of {} bytes overflows the length field",
            self.value.len()
        );
        buf.extend_from_slice(&(self.value.len() as u16).to_be_bytes());
        buf.extend_from_slice(&self.value);
    }
}

/// STUN message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StunMessage {
    /// Message type
    pub message_type: StunMessageType,
    /// Transaction ID (128 bits)
    pub transaction_id: TransactionId,
    /// Attributes in wire order
    pub attributes: Vec<StunAttribute>,
}

impl StunMessage {
    /// Create a message with no attributes
    #[must_use]
    pub fn new(message_type: StunMessageType, transaction_id: TransactionId) -> Self {
        Self {
            message_type,
            transaction_id,
            attributes: Vec::new(),
        }
    }

    /// Add an attribute to the message
    pub fn add_attribute(&mut self, attr: StunAttribute) {
        self.attributes.push(attr);
    }

    /// Encode message to bytes
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        encode_parts(self.message_type, &self.transaction_id, &self.attributes)
    }

    /// Decode message from bytes
    ///
    /// # Errors
    ///
    /// See [`decode_message`].
    pub fn decode(bytes: &[u8]) -> Result<Self, StunError> {
        decode_message(bytes)
    }
}

/// Encode a Binding Request carrying `attributes`.
///
/// The encoded attributes, headers included, must fit the 16-bit message
/// length (65535 bytes). Debug builds assert this.
///
/// # Examples
///
/// ```
/// use natprobe_discovery::registry::TransactionId;
/// use natprobe_discovery::stun::{encode_binding_request, StunAttribute};
///
/// let id = TransactionId::from_bytes([7u8; 16]);
/// let bytes = encode_binding_request(&id, &[StunAttribute::change_request(true, true)]);
/// assert_eq!(&bytes[..4], &[0x00, 0x01, 0x00, 0x08]);
/// assert_eq!(bytes.len(), 28);
/// ```
#[must_use]
pub fn encode_binding_request(transaction_id: &TransactionId, attributes: &[StunAttribute]) -> Vec<u8> {
    encode_parts(StunMessageType::BindingRequest, transaction_id, attributes)
}

/// Encode a CHANGE-REQUEST attribute TLV (always 8 bytes).
#[must_use]
pub fn encode_change_request(change_ip: bool, change_port: bool) -> [u8; 8] {
    let mut bytes = [0u8; 8];
    bytes[0..2].copy_from_slice(&AttributeType::ChangeRequest.code().to_be_bytes());
    bytes[2..4].copy_from_slice(&4u16.to_be_bytes());
    bytes[4..8].copy_from_slice(&change_flags(change_ip, change_port).to_be_bytes());
    bytes
}

/// Decode a complete datagram.
///
/// # Errors
///
/// - `MessageTooShort` if fewer than 20 bytes are present
/// - `UnknownMessageType` if the type code is not in the classic registry
/// - `LengthMismatch` if the header length disagrees with the trailing bytes
/// - `AttributeTruncated` if an attribute's declared length runs past the end
pub fn decode_message(bytes: &[u8]) -> Result<StunMessage, StunError> {
    if bytes.len() < HEADER_SIZE {
        return Err(StunError::MessageTooShort { len: bytes.len() });
    }

    let code = u16::from_be_bytes([bytes[0], bytes[1]]);
    let declared = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
    let message_type = StunMessageType::from_code(code).ok_or(StunError::UnknownMessageType(code))?;

    let mut id = [0u8; TransactionId::LEN];
    id.copy_from_slice(&bytes[4..HEADER_SIZE]);
    let transaction_id = TransactionId::from_bytes(id);

    let body = &bytes[HEADER_SIZE..];
    if body.len() != declared {
        return Err(StunError::LengthMismatch {
            declared,
            actual: body.len(),
        });
    }

    let mut attributes = Vec::new();
    let mut offset = 0;
    while offset < body.len() {
        if body.len() - offset < ATTR_HEADER_SIZE {
            return Err(StunError::AttributeTruncated { offset });
        }

        let attr_type = u16::from_be_bytes([body[offset], body[offset + 1]]);
        let attr_len = u16::from_be_bytes([body[offset + 2], body[offset + 3]]) as usize;
        let start = offset + ATTR_HEADER_SIZE;
        let end = start + attr_len;
        if end > body.len() {
            return Err(StunError::AttributeTruncated { offset });
        }

        attributes.push(StunAttribute::new(
            AttributeType::from_code(attr_type),
            body[start..end].to_vec(),
        ));
        offset = end;
    }

    Ok(StunMessage {
        message_type,
        transaction_id,
        attributes,
    })
}

/// Decode an address attribute value into an IPv4 socket address.
///
/// # Errors
///
/// - `InvalidAddressLength` unless the value is exactly 8 bytes
/// - `UnsupportedFamily` unless the family byte is IPv4 (0x01)
pub fn decode_address_attribute(value: &[u8]) -> Result<SocketAddrV4, StunError> {
    if value.len() != ADDRESS_VALUE_SIZE {
        return Err(StunError::InvalidAddressLength(value.len()));
    }
    if value[1] != FAMILY_IPV4 {
        return Err(StunError::UnsupportedFamily(value[1]));
    }

    let port = u16::from_be_bytes([value[2], value[3]]);
    let ip = Ipv4Addr::new(value[4], value[5], value[6], value[7]);
    Ok(SocketAddrV4::new(ip, port))
}

/// Encode an IPv4 address attribute value.
#[must_use]
pub fn encode_address(addr: SocketAddrV4) -> [u8; ADDRESS_VALUE_SIZE] {
    let mut value = [0u8; ADDRESS_VALUE_SIZE];
    value[1] = FAMILY_IPV4;
    value[2..4].copy_from_slice(&addr.port().to_be_bytes());
    value[4..8].copy_from_slice(&addr.ip().octets());
    value
}

fn change_flags(change_ip: bool, change_port: bool) -> u32 {
    let mut flags = 0;
    if change_ip {
        flags |= CHANGE_IP_FLAG;
    }
    if change_port {
        flags |= CHANGE_PORT_FLAG;
    }
    flags
}

fn encode_parts(
    message_type: StunMessageType,
    transaction_id: &TransactionId,
    attributes: &[StunAttribute],
) -> Vec<u8> {
    let body_len: usize = attributes.iter().map(StunAttribute::encoded_len).sum();
    let mut bytes = Vec::with_capacity(HEADER_SIZE + body_len);

    bytes.extend_from_slice(&message_type.code().to_be_bytes());
    debug_assert!(
        body_len <= usize::from(u16::MAX),
        "message body of {body_len} bytes overflows the length field"
    );
    bytes.extend_from_slice(&(body_len as u16).to_be_bytes());
    bytes.extend_from_slice(transaction_id.as_bytes());

    for attr in attributes {
        attr.encode_into(&mut bytes);
    }

    bytes
}

/// STUN codec errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StunError {
    /// Datagram shorter than the fixed header
    #[error("STUN message too short: {len} bytes")]
    MessageTooShort {
        /// Bytes received
        len: usize,
    },

    /// Type code outside the classic registry
    #[error("unknown STUN message type: 0x{0:04X}")]
    UnknownMessageType(u16),

    /// Header length disagrees with the attribute bytes present
    #[error("STUN length mismatch: header declares {declared}, found {actual}")]
    LengthMismatch {
        /// Length from the header
        declared: usize,
        /// Bytes following the header
        actual: usize,
    },

    /// Attribute header or value runs past the end of the message
    #[error("STUN attribute truncated at body offset {offset}")]
    AttributeTruncated {
        /// Offset of the attribute within the body
        offset: usize,
    },

    /// Address family other than IPv4
    #[error("unsupported address family: 0x{0:02X}")]
    UnsupportedFamily(u8),

    /// Address value of the wrong size
    #[error("invalid address attribute length: {0}")]
    InvalidAddressLength(usize),
}
