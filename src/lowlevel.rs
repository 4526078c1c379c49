use super::error::{Error, Result};
use super::s11n::*;
use super::socket::StreamSocket;

use byteorder::{ByteOrder, NetworkEndian};
use bytes::{BufMut, Bytes, BytesMut};
use enum_primitive::FromPrimitive;

/// One decoded record. `content_length` is always `content.len()`; padding bytes are
/// consumed on read and regenerated as zeros on write, so only their count survives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastcgiRecord {
    pub version: u8,
    pub record_type: u8,
    pub request_id: u16,
    pub padding_length: u8,
    pub content: Bytes,
}

impl FastcgiRecord {
    /// Build an outgoing record, padded so the whole record is a multiple of 8 bytes.
    pub fn new(record_type: RecordType, request_id: u16, content: Bytes) -> FastcgiRecord {
        let padding = (8 - content.len() % 8) % 8;
        FastcgiRecord {
            version: FASTCGI_VERSION,
            record_type: record_type as u8,
            request_id,
            padding_length: padding as u8,
            content,
        }
    }

    pub fn kind(&self) -> Option<RecordType> {
        RecordType::from_u8(self.record_type)
    }

    pub fn content_length(&self) -> usize {
        self.content.len()
    }

    /// Number of bytes this record occupies on the wire.
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.content.len() + self.padding_length as usize
    }
}

#[derive(Debug, Default)]
pub struct FastcgiLowlevelCodec {
    short_padding_reads: u64,
}

impl FastcgiLowlevelCodec {
    pub fn new() -> FastcgiLowlevelCodec {
        FastcgiLowlevelCodec::default()
    }

    /// How many records ended before their padding did. Such records are still
    /// delivered; the count is kept so the leniency stays visible.
    pub fn short_padding_reads(&self) -> u64 {
        self.short_padding_reads
    }

    /// Read one record. `init_header` carries header bytes the caller already pulled
    /// off the stream; otherwise the header is read here.
    pub fn decode<S: StreamSocket + ?Sized>(
        &mut self,
        sock: &mut S,
        init_header: Option<Bytes>,
    ) -> Result<FastcgiRecord> {
        let header_bytes = match init_header {
            Some(bytes) => bytes,
            None => sock.recv(HEADER_LEN)?,
        };
        if header_bytes.is_empty() {
            return Err(Error::Eof);
        }
        if header_bytes.len() < HEADER_LEN {
            return Err(Error::Truncated {
                what: "record header",
                expected: HEADER_LEN,
                got: header_bytes.len(),
            });
        }

        let header = RecordHeader::from_bytes(&header_bytes);
        if header.version != FASTCGI_VERSION {
            warn!("unexpected FCGI version {}", header.version);
        }
        debug!("read: type = {}, request id = {}, content length = {}, padding = {}",
               header.record_type, header.request_id, header.content_length, header.padding_length);

        let content_len = header.content_length as usize;
        let content = if content_len > 0 {
            let content = sock.recv(content_len)?;
            if content.len() < content_len {
                return Err(Error::Truncated {
                    what: "record content",
                    expected: content_len,
                    got: content.len(),
                });
            }
            content
        } else {
            Bytes::new()
        };

        let padding_len = header.padding_length as usize;
        if padding_len > 0 {
            let padding = sock.recv(padding_len)?;
            if padding.len() < padding_len {
                // Padding carries nothing, so the record stands. The stream is at its end
                // now, which the next header read will report.
                self.short_padding_reads += 1;
                warn!("short padding on request {}: expected {} bytes, got {} ({} so far)",
                      header.request_id, padding_len, padding.len(), self.short_padding_reads);
            }
        }

        Ok(FastcgiRecord {
            version: header.version,
            record_type: header.record_type,
            request_id: header.request_id,
            padding_length: header.padding_length,
            content,
        })
    }

    pub fn encode(&mut self, record: &FastcgiRecord, buf: &mut BytesMut) -> Result<()> {
        if record.content.len() > MAX_CONTENT_LENGTH {
            let len = record.content.len();
            error!("type {} record is too long: {}", record.record_type, len);
            return Err(Error::ContentTooLong(len));
        }

        let header = RecordHeader {
            version: record.version,
            record_type: record.record_type,
            request_id: record.request_id,
            content_length: record.content.len() as u16,
            padding_length: record.padding_length,
        };
        buf.reserve(record.wire_len());
        buf.extend_from_slice(&header.to_bytes());
        buf.extend_from_slice(&record.content);
        buf.put_bytes(0, record.padding_length as usize);
        Ok(())
    }
}

/// Split a stream's data into records of at most `MAX_CONTENT_LENGTH` bytes each.
/// Empty data yields no records; the terminating empty record is the caller's business.
pub fn stream_records(record_type: RecordType, request_id: u16, data: &Bytes) -> Vec<FastcgiRecord> {
    let mut records = Vec::with_capacity(data.len() / MAX_CONTENT_LENGTH + 1);
    let mut start = 0;
    while start < data.len() {
        let end = (start + MAX_CONTENT_LENGTH).min(data.len());
        records.push(FastcgiRecord::new(record_type, request_id, data.slice(start..end)));
        start = end;
    }
    records
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeginRequest {
    pub role: u16,
    pub keep_connection: bool,
}

impl BeginRequest {
    pub fn parse(content: &[u8]) -> Result<BeginRequest> {
        // role (2) + flags (1); the reserved tail is not required.
        if content.len() < 3 {
            return Err(Error::Malformed {
                what: "BEGIN_REQUEST body",
                reason: format!("{} bytes is too short", content.len()),
            });
        }
        Ok(BeginRequest {
            role: NetworkEndian::read_u16(&content[0..2]),
            keep_connection: content[2] & FLAG_KEEP_CONN == FLAG_KEEP_CONN,
        })
    }

    pub fn known_role(&self) -> Option<Role> {
        Role::from_u16(self.role)
    }

    pub fn to_bytes(&self) -> [u8; BODY_LEN] {
        let mut out = [0u8; BODY_LEN];
        NetworkEndian::write_u16(&mut out[0..2], self.role);
        if self.keep_connection {
            out[2] = FLAG_KEEP_CONN;
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndRequest {
    pub app_status: u32,
    pub protocol_status: ProtocolStatus,
}

impl EndRequest {
    pub fn parse(content: &[u8]) -> Result<EndRequest> {
        if content.len() < 5 {
            return Err(Error::Malformed {
                what: "END_REQUEST body",
                reason: format!("{} bytes is too short", content.len()),
            });
        }
        let protocol_status = ProtocolStatus::from_u8(content[4]).ok_or_else(|| Error::Malformed {
            what: "END_REQUEST body",
            reason: format!("unknown protocol status {}", content[4]),
        })?;
        Ok(EndRequest {
            app_status: NetworkEndian::read_u32(&content[0..4]),
            protocol_status,
        })
    }

    pub fn to_bytes(&self) -> [u8; BODY_LEN] {
        let mut out = [0u8; BODY_LEN];
        NetworkEndian::write_u32(&mut out[0..4], self.app_status);
        out[4] = self.protocol_status as u8;
        out
    }
}

pub fn unknown_type_body(record_type: u8) -> [u8; BODY_LEN] {
    let mut out = [0u8; BODY_LEN];
    out[0] = record_type;
    out
}

fn read_len(buf: &Bytes, pos: &mut usize) -> Result<usize> {
    let rest = &buf[*pos..];
    match rest.first() {
        None => Err(Error::NameValue("unexpected end of length prefix".to_owned())),
        Some(&byte) if byte < 0x80 => {
            *pos += 1;
            Ok(byte as usize)
        }
        Some(_) => {
            if rest.len() < 4 {
                return Err(Error::NameValue("truncated 4-byte length".to_owned()));
            }
            *pos += 4;
            Ok((NetworkEndian::read_u32(rest) & 0x7FFF_FFFF) as usize)
        }
    }
}

fn write_len(buf: &mut BytesMut, len: usize) -> Result<()> {
    if len < 0x80 {
        buf.put_u8(len as u8);
    } else if len < 0x8000_0000 {
        buf.put_u32(len as u32 | 0x8000_0000);
    } else {
        return Err(Error::NameValue(format!("un-encodable name-value pair length: {:#x}", len)));
    }
    Ok(())
}

/// Decode a complete name-value stream (PARAMS or GET_VALUES content).
pub fn read_params(buf: &Bytes) -> Result<Vec<(Bytes, Bytes)>> {
    let mut params = vec![];
    let mut pos = 0;
    while pos < buf.len() {
        let name_len = read_len(buf, &mut pos)?;
        let value_len = read_len(buf, &mut pos)?;
        let available = buf.len() - pos;
        if name_len.checked_add(value_len).map_or(true, |total| total > available) {
            return Err(Error::NameValue(format!(
                "pair of {} + {} bytes with only {} bytes left",
                name_len, value_len, available)));
        }
        let name = buf.slice(pos..pos + name_len);
        pos += name_len;
        let value = buf.slice(pos..pos + value_len);
        pos += value_len;
        debug!("param ({}, {})",
               String::from_utf8_lossy(&name),
               String::from_utf8_lossy(&value));
        params.push((name, value));
    }
    Ok(params)
}

pub fn write_params<'a, I>(params: I, out: &mut BytesMut) -> Result<()>
    where I: IntoIterator<Item = (&'a [u8], &'a [u8])>
{
    for (name, value) in params {
        write_len(out, name.len())?;
        write_len(out, value.len())?;
        out.extend_from_slice(name);
        out.extend_from_slice(value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::FileSocket;
    use std::io::Cursor;

    fn socket(input: Vec<u8>) -> FileSocket<Cursor<Vec<u8>>, Vec<u8>> {
        FileSocket::new(Cursor::new(input), Vec::new())
    }

    fn encoded(record: &FastcgiRecord) -> Vec<u8> {
        let mut buf = BytesMut::new();
        FastcgiLowlevelCodec::new().encode(record, &mut buf).unwrap();
        buf.to_vec()
    }

    #[test]
    fn new_record_pads_to_eight() {
        let record = FastcgiRecord::new(RecordType::Stdout, 1, Bytes::from_static(b"hello"));
        assert_eq!(record.padding_length, 3);
        assert_eq!(encoded(&record).len(), 16);

        let aligned = FastcgiRecord::new(RecordType::Stdout, 1, Bytes::from_static(b"12345678"));
        assert_eq!(aligned.padding_length, 0);
    }

    #[test]
    fn decode_uses_pre_read_header() {
        let record = FastcgiRecord::new(RecordType::Stdin, 7, Bytes::from_static(b"body"));
        let mut bytes = encoded(&record);
        let rest = bytes.split_off(HEADER_LEN);
        let mut sock = socket(rest);
        let mut codec = FastcgiLowlevelCodec::new();
        let decoded = codec.decode(&mut sock, Some(Bytes::from(bytes))).unwrap();
        assert_eq!(decoded, record);
        assert!(matches!(codec.decode(&mut sock, None), Err(Error::Eof)));
    }

    #[test]
    fn truncated_header_is_eof() {
        let mut sock = socket(vec![1, 1, 0, 1, 0]);
        let err = FastcgiLowlevelCodec::new().decode(&mut sock, None).unwrap_err();
        assert!(err.is_eof());
        assert!(matches!(err, Error::Truncated { expected: 8, got: 5, .. }));
    }

    #[test]
    fn truncated_content_is_eof() {
        let mut bytes = encoded(&FastcgiRecord::new(RecordType::Params, 1, Bytes::from_static(b"0123456789")));
        bytes.truncate(HEADER_LEN + 4);
        let err = FastcgiLowlevelCodec::new().decode(&mut socket(bytes), None).unwrap_err();
        assert!(matches!(err, Error::Truncated { what: "record content", expected: 10, got: 4 }));
    }

    #[test]
    fn short_padding_is_tolerated_and_counted() {
        let record = FastcgiRecord::new(RecordType::Stdin, 2, Bytes::from_static(b"abc"));
        let mut bytes = encoded(&record);
        bytes.truncate(bytes.len() - 2);
        let mut codec = FastcgiLowlevelCodec::new();
        let decoded = codec.decode(&mut socket(bytes), None).unwrap();
        assert_eq!(decoded.content, record.content);
        assert_eq!(codec.short_padding_reads(), 1);
    }

    #[test]
    fn encode_rejects_oversized_content() {
        let record = FastcgiRecord::new(RecordType::Stdout, 1, Bytes::from(vec![0u8; MAX_CONTENT_LENGTH + 1]));
        let mut buf = BytesMut::new();
        let err = FastcgiLowlevelCodec::new().encode(&record, &mut buf).unwrap_err();
        assert!(matches!(err, Error::ContentTooLong(65536)));
        assert!(buf.is_empty());
    }

    #[test]
    fn stream_records_split_at_limit() {
        let data = Bytes::from(vec![7u8; MAX_CONTENT_LENGTH * 2 + 10]);
        let records = stream_records(RecordType::Stdout, 3, &data);
        let lengths: Vec<usize> = records.iter().map(|r| r.content_length()).collect();
        assert_eq!(lengths, vec![MAX_CONTENT_LENGTH, MAX_CONTENT_LENGTH, 10]);
        assert!(stream_records(RecordType::Stdout, 3, &Bytes::new()).is_empty());
    }

    #[test]
    fn params_with_long_values() {
        let long_value = vec![b'x'; 300];
        let mut buf = BytesMut::new();
        write_params(vec![(&b"SHORT"[..], &b"v"[..]), (&b"LONG"[..], &long_value[..])], &mut buf).unwrap();
        // 1-byte lengths for the first pair, 1 + 4 for the second.
        assert_eq!(buf[8], 4);
        assert_eq!(&buf[9..13], &[0x80, 0, 0x01, 0x2C]);

        let params = read_params(&buf.freeze()).unwrap();
        assert_eq!(params.len(), 2);
        assert_eq!(&params[0].0[..], b"SHORT");
        assert_eq!(&params[1].1[..], &long_value[..]);
    }

    #[test]
    fn params_with_bad_lengths() {
        // Claims a 5-byte name but only 3 bytes follow.
        let err = read_params(&Bytes::from_static(&[5, 0, b'a', b'b', b'c'])).unwrap_err();
        assert!(matches!(err, Error::NameValue(_)));

        // A 4-byte length cut short.
        let err = read_params(&Bytes::from_static(&[0x80, 0])).unwrap_err();
        assert!(matches!(err, Error::NameValue(_)));
    }

    #[test]
    fn begin_request_body() {
        let begin = BeginRequest::parse(&[0, 1, 1, 0, 0, 0, 0, 0]).unwrap();
        assert_eq!(begin.known_role(), Some(Role::Responder));
        assert!(begin.keep_connection);
        assert_eq!(begin.to_bytes(), [0, 1, 1, 0, 0, 0, 0, 0]);

        let filter = BeginRequest::parse(&[0, 3, 0]).unwrap();
        assert_eq!(filter.known_role(), Some(Role::Filter));
        assert!(!filter.keep_connection);

        assert!(BeginRequest::parse(&[0, 1]).is_err());
    }

    #[test]
    fn end_request_body() {
        let end = EndRequest { app_status: 0x01020304, protocol_status: ProtocolStatus::UnknownRole };
        let bytes = end.to_bytes();
        assert_eq!(bytes, [1, 2, 3, 4, 3, 0, 0, 0]);
        assert_eq!(EndRequest::parse(&bytes).unwrap(), end);
    }
}
