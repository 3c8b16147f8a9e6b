//! Serialize [Message]s into their binary form.
use bytes::{BufMut, Bytes, BytesMut};
use std::net::{IpAddr, SocketAddr};

use super::{
    ContactInfo, EncodeError, Message, MessageContact, MessageType, RequestSpecific,
    ResponseSpecific, StoreStatus, StoredValue, MAX_DATA_LEN, MAX_LIST_LEN, MAX_TOKEN_LEN,
    MESSAGE_ID_SIZE,
};
use crate::common::{DhtValue, Id};

/// Offset of the size field: message id, opcode and version precede it.
const SIZE_OFFSET: usize = MESSAGE_ID_SIZE + 1 + 2;

pub(crate) fn encode(message: &Message) -> Result<Bytes, EncodeError> {
    let mut buf = BytesMut::with_capacity(128);

    buf.put_slice(message.message_id.as_bytes());
    buf.put_u8(message.opcode() as u8);
    buf.put_u16(message.version);
    // Patched below once the body is written.
    buf.put_u32(0);

    put_sender(&mut buf, &message.contact);

    match &message.message_type {
        MessageType::Request(request) => match request {
            RequestSpecific::Ping => {}
            RequestSpecific::FindNode(arguments) => put_id(&mut buf, &arguments.target),
            RequestSpecific::FindValue(arguments) => {
                put_id(&mut buf, &arguments.target);
                put_ids(&mut buf, &arguments.secondary_keys)?;
                buf.put_u32(arguments.value_type.0);
            }
            RequestSpecific::Store(arguments) => {
                put_token(&mut buf, arguments.token.as_deref())?;
                put_values(&mut buf, &arguments.values)?;
            }
            RequestSpecific::Stats(kind) => buf.put_u8(*kind as u8),
        },
        MessageType::Response(response) => match response {
            ResponseSpecific::Ping(arguments) => {
                put_address(&mut buf, arguments.external_address.as_ref());
                put_big_integer(&mut buf, arguments.estimated_size);
            }
            ResponseSpecific::FindNode(arguments) => {
                put_token(&mut buf, arguments.token.as_deref())?;

                put_count(&mut buf, arguments.contacts.len())?;
                for contact in &arguments.contacts {
                    put_contact(&mut buf, contact);
                }
            }
            ResponseSpecific::FindValue(arguments) => {
                buf.put_f32(arguments.request_load);
                put_values(&mut buf, &arguments.values)?;
                put_ids(&mut buf, &arguments.secondary_keys)?;
            }
            ResponseSpecific::Store(arguments) => {
                put_count(&mut buf, arguments.statuses.len())?;
                for status in &arguments.statuses {
                    put_status(&mut buf, status)?;
                }
            }
            ResponseSpecific::Stats(arguments) => put_text(&mut buf, &arguments.text)?,
        },
    }

    let size = (buf.len() - SIZE_OFFSET - 4) as u32;
    buf[SIZE_OFFSET..SIZE_OFFSET + 4].copy_from_slice(&size.to_be_bytes());

    Ok(buf.freeze())
}

fn put_count(buf: &mut BytesMut, len: usize) -> Result<(), EncodeError> {
    if len > MAX_LIST_LEN {
        return Err(EncodeError::TooManyEntries(len));
    }

    buf.put_u8(len as u8);
    Ok(())
}

fn put_id(buf: &mut BytesMut, id: &Id) {
    buf.put_slice(id.as_bytes());
}

fn put_ids(buf: &mut BytesMut, ids: &[Id]) -> Result<(), EncodeError> {
    put_count(buf, ids.len())?;
    for id in ids {
        put_id(buf, id);
    }

    Ok(())
}

fn put_address(buf: &mut BytesMut, address: Option<&SocketAddr>) {
    let address = match address {
        Some(address) => address,
        None => {
            buf.put_u8(0);
            return;
        }
    };

    match address.ip() {
        IpAddr::V4(ip) => {
            buf.put_u8(4);
            buf.put_slice(&ip.octets());
        }
        IpAddr::V6(ip) => {
            buf.put_u8(16);
            buf.put_slice(&ip.octets());
        }
    }
    buf.put_u16(address.port());
}

fn put_sender(buf: &mut BytesMut, contact: &MessageContact) {
    buf.put_u32(contact.vendor.0);
    buf.put_u16(contact.version.0);
    put_id(buf, &contact.node_id);
    put_address(buf, contact.address.as_ref());
    buf.put_u8(contact.instance_id);
    buf.put_u8(contact.flags);
    // No extended header.
    buf.put_u16(0);
}

fn put_contact(buf: &mut BytesMut, contact: &ContactInfo) {
    buf.put_u32(contact.vendor.0);
    buf.put_u16(contact.version.0);
    put_id(buf, &contact.node_id);
    put_address(buf, Some(&contact.address));
}

fn put_token(buf: &mut BytesMut, token: Option<&[u8]>) -> Result<(), EncodeError> {
    let token = token.unwrap_or_default();
    if token.len() > MAX_TOKEN_LEN {
        return Err(EncodeError::TokenTooLong(token.len()));
    }

    buf.put_u8(token.len() as u8);
    buf.put_slice(token);
    Ok(())
}

/// Unsigned, minimal big-endian bytes behind a 1-byte length.
fn put_big_integer(buf: &mut BytesMut, value: u128) {
    let bytes = value.to_be_bytes();
    let skip = (value.leading_zeros() / 8) as usize;

    buf.put_u8((bytes.len() - skip) as u8);
    buf.put_slice(&bytes[skip..]);
}

fn put_value(buf: &mut BytesMut, value: &DhtValue) -> Result<(), EncodeError> {
    if value.data.len() > MAX_DATA_LEN {
        return Err(EncodeError::ValueTooLarge(value.data.len()));
    }

    buf.put_u32(value.value_type.0);
    buf.put_u16(value.version);
    buf.put_u16(value.data.len() as u16);
    buf.put_slice(&value.data);
    Ok(())
}

fn put_values(buf: &mut BytesMut, values: &[StoredValue]) -> Result<(), EncodeError> {
    put_count(buf, values.len())?;
    for value in values {
        put_contact(buf, &value.creator);
        put_id(buf, &value.primary_key);
        put_value(buf, &value.value)?;
    }

    Ok(())
}

fn put_status(buf: &mut BytesMut, status: &StoreStatus) -> Result<(), EncodeError> {
    put_id(buf, &status.primary_key);
    put_id(buf, &status.secondary_key);
    buf.put_u16(status.code.0);
    put_text(buf, &status.description)
}

/// UTF-8 behind a 2-byte length.
fn put_text(buf: &mut BytesMut, text: &str) -> Result<(), EncodeError> {
    if text.len() > MAX_DATA_LEN {
        return Err(EncodeError::TextTooLong(text.len()));
    }

    buf.put_u16(text.len() as u16);
    buf.put_slice(text.as_bytes());
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn big_integers() {
        let mut buf = BytesMut::new();

        put_big_integer(&mut buf, 0);
        assert_eq!(&buf[..], &[0]);

        buf.clear();
        put_big_integer(&mut buf, 0x01_00);
        assert_eq!(&buf[..], &[2, 0x01, 0x00]);

        buf.clear();
        put_big_integer(&mut buf, u128::MAX);
        assert_eq!(buf.len(), 17);
        assert_eq!(buf[0], 16);
    }

    #[test]
    fn addresses() {
        let mut buf = BytesMut::new();

        put_address(&mut buf, None);
        assert_eq!(&buf[..], &[0]);

        buf.clear();
        put_address(&mut buf, Some(&"1.2.3.4:258".parse().unwrap()));
        assert_eq!(&buf[..], &[4, 1, 2, 3, 4, 1, 2]);

        buf.clear();
        put_address(&mut buf, Some(&"[::1]:1".parse().unwrap()));
        assert_eq!(buf.len(), 1 + 16 + 2);
        assert_eq!(buf[0], 16);
    }

    #[test]
    fn oversized_fields_are_rejected() {
        let mut buf = BytesMut::new();

        assert_eq!(
            put_text(&mut buf, &"é".repeat(40_000)),
            Err(EncodeError::TextTooLong(80_000))
        );
        assert_eq!(
            put_token(&mut buf, Some(&[0; 256])),
            Err(EncodeError::TokenTooLong(256))
        );
        assert_eq!(
            put_value(&mut buf, &DhtValue::new(crate::ValueType::TEXT, 0, vec![0; 65_536])),
            Err(EncodeError::ValueTooLarge(65_536))
        );
        assert!(buf.is_empty());

        assert!(put_text(&mut buf, &"a".repeat(MAX_DATA_LEN)).is_ok());
        assert_eq!(buf.len(), 2 + MAX_DATA_LEN);
    }

    #[test]
    fn lists_longer_than_count_ceiling() {
        let mut buf = BytesMut::new();

        let ids: Vec<Id> = (0..256).map(|_| Id::random()).collect();
        assert_eq!(put_ids(&mut buf, &ids), Err(EncodeError::TooManyEntries(256)));

        assert!(put_ids(&mut buf, &ids[..MAX_LIST_LEN]).is_ok());
        assert_eq!(buf[0], 255);
    }
}
