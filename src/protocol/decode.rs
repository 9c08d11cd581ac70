//! Protocol message decoding

use super::constants::{auth, tags};
use super::framer::Frame;
use super::message::{AuthenticationMessage, BackendMessage, DbError, FieldDescription};
use crate::{Error, Result};
use bytes::Bytes;

/// Size of the fixed per-field block that follows each column name in a
/// RowDescription: table OID (4), attribute (2), type OID (4), type size (2),
/// type modifier (4), format code (2).
const FIELD_DESCRIPTOR_LEN: usize = 18;

fn truncated(what: &str) -> Error {
    Error::Protocol(format!("truncated message: {}", what))
}

/// Cursor over a message payload
struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn remaining(&self) -> &'a [u8] {
        &self.data[self.offset..]
    }

    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        if self.offset + n > self.data.len() {
            return Err(truncated(what));
        }
        let out = &self.data[self.offset..self.offset + n];
        self.offset += n;
        Ok(out)
    }

    fn i16(&mut self, what: &str) -> Result<i16> {
        let b = self.take(2, what)?;
        Ok(i16::from_be_bytes([b[0], b[1]]))
    }

    fn i32(&mut self, what: &str) -> Result<i32> {
        let b = self.take(4, what)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a null-terminated string
    fn cstr(&mut self, what: &str) -> Result<String> {
        let rest = self.remaining();
        let end = rest.iter().position(|&b| b == 0).ok_or_else(|| {
            Error::Protocol(format!("missing null terminator in {}", what))
        })?;
        let value = String::from_utf8_lossy(&rest[..end]).to_string();
        self.offset += end + 1;
        Ok(value)
    }
}

/// Decode a framed backend message
pub fn decode_message(frame: &Frame) -> Result<BackendMessage> {
    let data = &frame.payload[..];

    match frame.tag {
        tags::AUTHENTICATION => decode_authentication(data),
        tags::BACKEND_KEY_DATA => decode_backend_key_data(data),
        tags::COMMAND_COMPLETE => decode_command_complete(data),
        tags::DATA_ROW => decode_data_row(data),
        tags::EMPTY_QUERY_RESPONSE => Ok(BackendMessage::EmptyQueryResponse),
        tags::ERROR_RESPONSE => Ok(BackendMessage::ErrorResponse(decode_error_fields(data)?)),
        tags::NOTICE_RESPONSE => Ok(BackendMessage::NoticeResponse(decode_error_fields(data)?)),
        tags::NOTIFICATION_RESPONSE => decode_notification(data),
        tags::PARAMETER_STATUS => decode_parameter_status(data),
        tags::READY_FOR_QUERY => decode_ready_for_query(data),
        tags::ROW_DESCRIPTION => decode_row_description(data),
        other => Err(Error::Protocol(format!(
            "unknown message tag: '{}' (0x{:02X})",
            other as char, other
        ))),
    }
}

fn decode_authentication(data: &[u8]) -> Result<BackendMessage> {
    let mut reader = Reader::new(data);
    let auth_type = reader.i32("auth type")?;

    let auth_msg = match auth_type {
        auth::OK => AuthenticationMessage::Ok,
        auth::CLEARTEXT_PASSWORD => AuthenticationMessage::CleartextPassword,
        auth::MD5_PASSWORD => {
            let mut salt = [0u8; 4];
            salt.copy_from_slice(reader.take(4, "salt data")?);
            AuthenticationMessage::Md5Password { salt }
        }
        auth::SASL => {
            // Mechanism list: null-terminated strings ending with an empty one
            let mechanisms = reader
                .remaining()
                .split(|&b| b == 0)
                .take_while(|m| !m.is_empty())
                .map(|m| String::from_utf8_lossy(m).to_string())
                .collect();
            AuthenticationMessage::Sasl { mechanisms }
        }
        auth::SASL_CONTINUE => AuthenticationMessage::SaslContinue {
            data: reader.remaining().to_vec(),
        },
        auth::SASL_FINAL => AuthenticationMessage::SaslFinal {
            data: reader.remaining().to_vec(),
        },
        other => AuthenticationMessage::Unsupported(other),
    };

    Ok(BackendMessage::Authentication(auth_msg))
}

fn decode_backend_key_data(data: &[u8]) -> Result<BackendMessage> {
    let mut reader = Reader::new(data);
    let process_id = reader.i32("backend key data")?;
    let secret_key = reader.i32("backend key data")?;
    Ok(BackendMessage::BackendKeyData {
        process_id,
        secret_key,
    })
}

fn decode_command_complete(data: &[u8]) -> Result<BackendMessage> {
    let tag = Reader::new(data).cstr("command tag")?;
    Ok(BackendMessage::CommandComplete(tag))
}

fn decode_data_row(data: &[u8]) -> Result<BackendMessage> {
    let mut reader = Reader::new(data);
    let field_count = reader.i16("field count")?;
    if field_count < 0 {
        return Err(Error::Protocol(format!(
            "negative field count {} in data row",
            field_count
        )));
    }

    let mut fields = Vec::with_capacity(field_count as usize);
    for _ in 0..field_count {
        let field_len = reader.i32("field length")?;
        let field = match field_len {
            -1 => None,
            n if n < 0 => {
                return Err(Error::Protocol(format!("invalid field length {}", n)));
            }
            n => Some(Bytes::copy_from_slice(reader.take(n as usize, "field data")?)),
        };
        fields.push(field);
    }

    Ok(BackendMessage::DataRow(fields))
}

/// Parse the tag-prefixed field list shared by ErrorResponse and NoticeResponse
fn decode_error_fields(data: &[u8]) -> Result<DbError> {
    let mut fields = DbError::default();
    let mut reader = Reader::new(data);

    while let Some(&field_type) = reader.remaining().first() {
        reader.offset += 1;
        if field_type == 0 {
            break;
        }

        let value = reader.cstr("error field")?;
        match field_type {
            // 'V' is the non-localized severity; prefer it when present
            b'S' if fields.severity.is_none() => fields.severity = Some(value),
            b'V' => fields.severity = Some(value),
            b'C' => fields.code = Some(value),
            b'M' => fields.message = Some(value),
            b'D' => fields.detail = Some(value),
            b'H' => fields.hint = Some(value),
            b'P' => fields.position = Some(value),
            b's' => fields.schema = Some(value),
            b't' => fields.table = Some(value),
            b'c' => fields.column = Some(value),
            b'n' => fields.constraint = Some(value),
            _ => {}
        }
    }

    Ok(fields)
}

fn decode_notification(data: &[u8]) -> Result<BackendMessage> {
    let mut reader = Reader::new(data);
    let process_id = reader.i32("notification pid")?;
    let channel = reader.cstr("notification channel")?;
    let payload = reader.cstr("notification payload")?;
    Ok(BackendMessage::NotificationResponse {
        process_id,
        channel,
        payload,
    })
}

fn decode_parameter_status(data: &[u8]) -> Result<BackendMessage> {
    let mut reader = Reader::new(data);
    let name = reader.cstr("parameter name")?;
    let value = reader.cstr("parameter value")?;
    Ok(BackendMessage::ParameterStatus { name, value })
}

fn decode_ready_for_query(data: &[u8]) -> Result<BackendMessage> {
    let status = Reader::new(data).take(1, "status byte")?[0];
    Ok(BackendMessage::ReadyForQuery { status })
}

fn decode_row_description(data: &[u8]) -> Result<BackendMessage> {
    let mut reader = Reader::new(data);
    let field_count = reader.i16("field count")?;
    if field_count < 0 {
        return Err(Error::Protocol(format!(
            "negative field count {} in row description",
            field_count
        )));
    }

    let mut fields = Vec::with_capacity(field_count as usize);
    for _ in 0..field_count {
        let name = reader.cstr("field name")?;
        if reader.remaining().len() < FIELD_DESCRIPTOR_LEN {
            return Err(truncated("field descriptor"));
        }
        let table_oid = reader.i32("table oid")?;
        let column_attr = reader.i16("column attribute")?;
        let type_oid = reader.i32("type oid")? as u32;
        let type_size = reader.i16("type size")?;
        let type_modifier = reader.i32("type modifier")?;
        let format_code = reader.i16("format code")?;

        fields.push(FieldDescription {
            name,
            table_oid,
            column_attr,
            type_oid,
            type_size,
            type_modifier,
            format_code,
        });
    }

    Ok(BackendMessage::RowDescription(fields))
}
