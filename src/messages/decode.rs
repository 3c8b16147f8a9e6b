//! Parse [Message]s from their binary form.
use bytes::{Buf, Bytes};
use std::convert::TryFrom;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use super::{
    ContactInfo, DecodeError, FindNodeRequestArguments, FindNodeResponseArguments,
    FindValueRequestArguments, FindValueResponseArguments, Message, MessageContact, MessageId,
    MessageType, OpCode, PingResponseArguments, RequestSpecific, ResponseSpecific, StatsKind,
    StatsResponseArguments, StatusCode, StoreRequestArguments, StoreResponseArguments,
    StoreStatus, StoredValue, MESSAGE_ID_SIZE,
};
use crate::common::{DhtValue, Id, ValueType, Vendor, Version, ID_SIZE};

type Result<T> = std::result::Result<T, DecodeError>;

pub(crate) fn decode(mut buf: &[u8]) -> Result<Message> {
    ensure(buf, MESSAGE_ID_SIZE + 1 + 2 + 4)?;

    let mut message_id = [0; MESSAGE_ID_SIZE];
    buf.copy_to_slice(&mut message_id);

    let opcode = OpCode::try_from(buf.get_u8())?;
    let version = buf.get_u16();

    let size = buf.get_u32() as usize;
    if size != buf.remaining() {
        return Err(DecodeError::LengthMismatch);
    }

    let contact = get_sender(&mut buf)?;

    let message_type = match opcode {
        OpCode::PingRequest => MessageType::Request(RequestSpecific::Ping),
        OpCode::FindNodeRequest => {
            MessageType::Request(RequestSpecific::FindNode(FindNodeRequestArguments {
                target: get_id(&mut buf)?,
            }))
        }
        OpCode::FindValueRequest => {
            let target = get_id(&mut buf)?;
            let secondary_keys = get_ids(&mut buf)?;
            ensure(buf, 4)?;
            let value_type = ValueType(buf.get_u32());

            MessageType::Request(RequestSpecific::FindValue(FindValueRequestArguments {
                target,
                secondary_keys,
                value_type,
            }))
        }
        OpCode::StoreRequest => {
            let token = get_token(&mut buf)?;
            let values = get_values(&mut buf)?;

            MessageType::Request(RequestSpecific::Store(StoreRequestArguments { token, values }))
        }
        OpCode::StatsRequest => {
            ensure(buf, 1)?;
            MessageType::Request(RequestSpecific::Stats(StatsKind::try_from(buf.get_u8())?))
        }
        OpCode::PingResponse => {
            let external_address = get_address(&mut buf)?;
            let estimated_size = get_big_integer(&mut buf)?;

            MessageType::Response(ResponseSpecific::Ping(PingResponseArguments {
                external_address,
                estimated_size,
            }))
        }
        OpCode::FindNodeResponse => {
            let token = get_token(&mut buf)?;

            let count = get_count(&mut buf)?;
            let mut contacts = Vec::with_capacity(count);
            for _ in 0..count {
                contacts.push(get_contact(&mut buf)?);
            }

            MessageType::Response(ResponseSpecific::FindNode(FindNodeResponseArguments {
                token,
                contacts,
            }))
        }
        OpCode::FindValueResponse => {
            ensure(buf, 4)?;
            let request_load = buf.get_f32();
            let values = get_values(&mut buf)?;
            let secondary_keys = get_ids(&mut buf)?;

            MessageType::Response(ResponseSpecific::FindValue(FindValueResponseArguments {
                request_load,
                values,
                secondary_keys,
            }))
        }
        OpCode::StoreResponse => {
            let count = get_count(&mut buf)?;
            let mut statuses = Vec::with_capacity(count);
            for _ in 0..count {
                statuses.push(get_status(&mut buf)?);
            }

            MessageType::Response(ResponseSpecific::Store(StoreResponseArguments { statuses }))
        }
        OpCode::StatsResponse => MessageType::Response(ResponseSpecific::Stats(
            StatsResponseArguments {
                text: get_text(&mut buf)?,
            },
        )),
    };

    if buf.has_remaining() {
        return Err(DecodeError::LengthMismatch);
    }

    Ok(Message {
        message_id: MessageId(message_id),
        version,
        contact,
        message_type,
    })
}

fn ensure(buf: &[u8], len: usize) -> Result<()> {
    if buf.remaining() < len {
        return Err(DecodeError::Truncated);
    }

    Ok(())
}

fn get_count(buf: &mut &[u8]) -> Result<usize> {
    ensure(buf, 1)?;

    Ok(buf.get_u8() as usize)
}

fn get_id(buf: &mut &[u8]) -> Result<Id> {
    ensure(buf, ID_SIZE)?;

    let mut bytes = [0; ID_SIZE];
    buf.copy_to_slice(&mut bytes);

    Ok(Id(bytes))
}

fn get_ids(buf: &mut &[u8]) -> Result<Vec<Id>> {
    let count = get_count(buf)?;

    let mut ids = Vec::with_capacity(count);
    for _ in 0..count {
        ids.push(get_id(buf)?);
    }

    Ok(ids)
}

fn get_address(buf: &mut &[u8]) -> Result<Option<SocketAddr>> {
    ensure(buf, 1)?;

    let ip = match buf.get_u8() {
        0 => return Ok(None),
        4 => {
            ensure(buf, 4 + 2)?;
            let mut octets = [0; 4];
            buf.copy_to_slice(&mut octets);
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        16 => {
            ensure(buf, 16 + 2)?;
            let mut octets = [0; 16];
            buf.copy_to_slice(&mut octets);
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        len => return Err(DecodeError::InvalidAddressLength(len)),
    };

    Ok(Some(SocketAddr::new(ip, buf.get_u16())))
}

fn get_sender(buf: &mut &[u8]) -> Result<MessageContact> {
    ensure(buf, 4 + 2)?;
    let vendor = Vendor(buf.get_u32());
    let version = Version(buf.get_u16());
    let node_id = get_id(buf)?;
    let address = get_address(buf)?;

    ensure(buf, 1 + 1 + 2)?;
    let instance_id = buf.get_u8();
    let flags = buf.get_u8();

    let extended = buf.get_u16() as usize;
    ensure(buf, extended)?;
    buf.advance(extended);

    Ok(MessageContact {
        vendor,
        version,
        node_id,
        address,
        instance_id,
        flags,
    })
}

fn get_contact(buf: &mut &[u8]) -> Result<ContactInfo> {
    ensure(buf, 4 + 2)?;
    let vendor = Vendor(buf.get_u32());
    let version = Version(buf.get_u16());
    let node_id = get_id(buf)?;
    let address = get_address(buf)?.ok_or(DecodeError::MissingAddress)?;

    Ok(ContactInfo {
        vendor,
        version,
        node_id,
        address,
    })
}

fn get_token(buf: &mut &[u8]) -> Result<Option<Bytes>> {
    let len = get_count(buf)?;
    if len == 0 {
        return Ok(None);
    }

    ensure(buf, len)?;

    Ok(Some(buf.copy_to_bytes(len)))
}

fn get_big_integer(buf: &mut &[u8]) -> Result<u128> {
    ensure(buf, 1)?;

    let len = buf.get_u8();
    if len as usize > 16 {
        return Err(DecodeError::BigIntegerTooLarge(len));
    }

    ensure(buf, len as usize)?;

    let mut bytes = [0; 16];
    buf.copy_to_slice(&mut bytes[16 - len as usize..]);

    Ok(u128::from_be_bytes(bytes))
}

fn get_value(buf: &mut &[u8]) -> Result<DhtValue> {
    ensure(buf, 4 + 2 + 2)?;
    let value_type = ValueType(buf.get_u32());
    let version = buf.get_u16();

    let len = buf.get_u16() as usize;
    ensure(buf, len)?;

    Ok(DhtValue::new(value_type, version, buf.copy_to_bytes(len)))
}

fn get_values(buf: &mut &[u8]) -> Result<Vec<StoredValue>> {
    let count = get_count(buf)?;

    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        let creator = get_contact(buf)?;
        let primary_key = get_id(buf)?;
        let value = get_value(buf)?;

        values.push(StoredValue {
            creator,
            primary_key,
            value,
        });
    }

    Ok(values)
}

fn get_status(buf: &mut &[u8]) -> Result<StoreStatus> {
    let primary_key = get_id(buf)?;
    let secondary_key = get_id(buf)?;

    ensure(buf, 2)?;
    let code = StatusCode(buf.get_u16());
    let description = get_text(buf)?;

    Ok(StoreStatus {
        primary_key,
        secondary_key,
        code,
        description,
    })
}

fn get_text(buf: &mut &[u8]) -> Result<String> {
    ensure(buf, 2)?;

    let len = buf.get_u16() as usize;
    ensure(buf, len)?;

    let text = std::str::from_utf8(&buf[..len]).map_err(|_| DecodeError::InvalidUtf8)?;
    let text = text.to_string();
    buf.advance(len);

    Ok(text)
}
