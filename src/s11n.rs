//! s11n == serialization. Constants and fixed-layout structs that make up FastCGI records.

use byteorder::{ByteOrder, NetworkEndian};

pub const FASTCGI_VERSION: u8 = 1;

/// Every record starts with a header of this many bytes.
pub const HEADER_LEN: usize = 8;

/// Largest content a single record can carry (the length field is 16 bits).
pub const MAX_CONTENT_LENGTH: usize = 0xFFFF;

/// Request id reserved for management records.
pub const NULL_REQUEST_ID: u16 = 0;

// Variables for the RecordType::GetValues and GetValuesResult records.
pub const FCGI_MAX_CONNS: &str = "FCGI_MAX_CONNS";
pub const FCGI_MAX_REQS: &str = "FCGI_MAX_REQS";
pub const FCGI_MPXS_CONNS: &str = "FCGI_MPXS_CONNS";

// Application status values reported in END_REQUEST records.
pub const APP_STATUS_OK: u32 = 0;
/// The request's own input was unusable: malformed PARAMS or an input over its size limit.
pub const APP_STATUS_REQUEST_FAILED: u32 = 1;
/// The application returned an error or panicked.
pub const APP_STATUS_APPLICATION_ERROR: u32 = 2;
/// The web server aborted the request before it was dispatched.
pub const APP_STATUS_ABORTED: u32 = 3;

enum_from_primitive! {
    #[repr(u8)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum RecordType {
        BeginRequest = 1,
        AbortRequest = 2,
        EndRequest = 3,
        Params = 4,
        Stdin = 5,
        Stdout = 6,
        Stderr = 7,
        Data = 8,
        GetValues = 9,
        GetValuesResult = 10,
        UnknownType = 11,
    }
}

enum_from_primitive! {
    #[repr(u16)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Role {
        Responder = 1,
        Authorizer = 2,
        Filter = 3,
    }
}

enum_from_primitive! {
    #[repr(u8)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ProtocolStatus {
        RequestComplete = 0,
        CantMultiplexConnections = 1,
        Overloaded = 2,
        UnknownRole = 3,
    }
}

/// The fixed 8-byte record header. The trailing reserved byte is ignored on read and
/// written as zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordHeader {
    pub version: u8,
    pub record_type: u8,
    pub request_id: u16,
    pub content_length: u16,
    pub padding_length: u8,
}

impl RecordHeader {
    /// Unpack a header. The caller guarantees at least `HEADER_LEN` bytes.
    pub fn from_bytes(bytes: &[u8]) -> RecordHeader {
        debug_assert!(bytes.len() >= HEADER_LEN);
        RecordHeader {
            version: bytes[0],
            record_type: bytes[1],
            request_id: NetworkEndian::read_u16(&bytes[2..4]),
            content_length: NetworkEndian::read_u16(&bytes[4..6]),
            padding_length: bytes[6],
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0] = self.version;
        out[1] = self.record_type;
        NetworkEndian::write_u16(&mut out[2..4], self.request_id);
        NetworkEndian::write_u16(&mut out[4..6], self.content_length);
        out[6] = self.padding_length;
        out
    }
}

/// Length of the FCGI_BeginRequestBody, FCGI_EndRequestBody and FCGI_UnknownTypeBody structs.
pub const BODY_LEN: usize = 8;

pub const FLAG_KEEP_CONN: u8 = 1;
