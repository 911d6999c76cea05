//! Wire encoding of layer payloads.
//!
//! A payload is the concatenation of an eight-byte random delivery tag and
//! the MessagePack encoding of the message body. The tag lets a receiver
//! suppress duplicates delivered across a reconnect; the body carries the
//! message map unchanged.

use rand::RngCore;
use wirebus_core::{Error, Message, Result};

/// Length of the random delivery tag prefixed to every payload.
pub const DELIVERY_TAG_LEN: usize = 8;

/// Encode `message` into a tagged MessagePack payload.
pub fn encode_payload(message: &Message) -> Result<Vec<u8>> {
    let body = rmp_serde::to_vec_named(message).map_err(Error::encoding)?;

    let mut payload = Vec::with_capacity(DELIVERY_TAG_LEN + body.len());
    let mut tag = [0u8; DELIVERY_TAG_LEN];
    rand::thread_rng().fill_bytes(&mut tag);
    payload.extend_from_slice(&tag);
    payload.extend_from_slice(&body);
    Ok(payload)
}

/// Decode a tagged payload back into its delivery tag and message.
pub fn decode_payload(payload: &[u8]) -> Result<([u8; DELIVERY_TAG_LEN], Message)> {
    if payload.len() < DELIVERY_TAG_LEN {
        return Err(Error::Encoding(format!(
            "payload too short: {} bytes",
            payload.len()
        )));
    }

    let mut tag = [0u8; DELIVERY_TAG_LEN];
    tag.copy_from_slice(&payload[..DELIVERY_TAG_LEN]);

    let message: Message =
        rmp_serde::from_slice(&payload[DELIVERY_TAG_LEN..]).map_err(Error::encoding)?;
    Ok((tag, message))
}
