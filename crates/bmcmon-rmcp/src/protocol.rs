//! RMCP and IPMI session framing: byte layout only, no I/O and no crypto.

use bmcmon_session::SessionError;

/// RMCP version 1.0, no sequencing, IPMI message class.
pub const RMCP_HEADER: [u8; 4] = [0x06, 0x00, 0xff, 0x07];

/// Format of the IPMI session wrapper: RMCP+ (IPMI v2.0).
pub const AUTH_TYPE_RMCP_PLUS: u8 = 0x06;

pub const PAYLOAD_IPMI: u8 = 0x00;
pub const PAYLOAD_OPEN_SESSION_REQUEST: u8 = 0x10;
pub const PAYLOAD_OPEN_SESSION_RESPONSE: u8 = 0x11;
pub const PAYLOAD_RAKP1: u8 = 0x12;
pub const PAYLOAD_RAKP2: u8 = 0x13;
pub const PAYLOAD_RAKP3: u8 = 0x14;
pub const PAYLOAD_RAKP4: u8 = 0x15;

/// Payload type flag: the payload is encrypted.
pub const PAYLOAD_ENCRYPTED: u8 = 0x80;
/// Payload type flag: the message carries an integrity trailer.
pub const PAYLOAD_AUTHENTICATED: u8 = 0x40;

pub const NETFN_CHASSIS: u8 = 0x00;
pub const NETFN_SENSOR_EVENT: u8 = 0x04;
pub const NETFN_APP: u8 = 0x06;
pub const NETFN_STORAGE: u8 = 0x0a;
pub const NETFN_GROUP_EXTENSION: u8 = 0x2c;

/// Responder address of the BMC and requester address of the remote console
/// on IPMB.
pub const BMC_ADDR: u8 = 0x20;
pub const CONSOLE_ADDR: u8 = 0x81;

/// Two's-complement checksum over a byte range, per the IPMB framing rules.
pub fn checksum(bytes: &[u8]) -> u8 {
    0u8.wrapping_sub(bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b)))
}

/// Encodes an IPMB request frame addressed to the BMC.
pub fn encode_ipmb(netfn: u8, cmd: u8, rq_seq: u8, data: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(7 + data.len());
    frame.push(BMC_ADDR);
    frame.push(netfn << 2);
    frame.push(checksum(&frame[..2]));
    frame.push(CONSOLE_ADDR);
    frame.push(rq_seq << 2);
    frame.push(cmd);
    frame.extend_from_slice(data);
    let tail = checksum(&frame[3..]);
    frame.push(tail);
    frame
}

/// A decoded IPMB response: the echoed request sequence number, the
/// completion code, and the response data.
pub struct IpmbResponse<'a> {
    pub rq_seq: u8,
    pub completion_code: u8,
    pub data: &'a [u8],
}

/// Decodes an IPMB response frame, verifying both checksums.
pub fn decode_ipmb<'a>(
    command: &'static str,
    frame: &'a [u8],
) -> Result<IpmbResponse<'a>, SessionError> {
    if frame.len() < 8 {
        return Err(SessionError::Malformed {
            command,
            reason: "response frame too short",
        });
    }
    if checksum(&frame[..2]) != frame[2] {
        return Err(SessionError::Malformed {
            command,
            reason: "header checksum mismatch",
        });
    }
    let (body, tail) = frame.split_at(frame.len() - 1);
    if checksum(&body[3..]) != tail[0] {
        return Err(SessionError::Malformed {
            command,
            reason: "body checksum mismatch",
        });
    }
    Ok(IpmbResponse {
        rq_seq: frame[4] >> 2,
        completion_code: frame[6],
        data: &body[7..],
    })
}

/// Wraps a payload in the RMCP and IPMI v2.0 session headers. `payload_type`
/// carries the encrypted/authenticated flag bits; `trailer` is the
/// already-computed integrity trailer, empty for unauthenticated messages.
pub fn encode_session(
    payload_type: u8,
    session_id: u32,
    seq: u32,
    payload: &[u8],
    trailer: &[u8],
) -> Vec<u8> {
    let mut packet = Vec::with_capacity(16 + payload.len() + trailer.len());
    packet.extend_from_slice(&RMCP_HEADER);
    packet.push(AUTH_TYPE_RMCP_PLUS);
    packet.push(payload_type);
    packet.extend_from_slice(&session_id.to_le_bytes());
    packet.extend_from_slice(&seq.to_le_bytes());
    packet.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    packet.extend_from_slice(payload);
    packet.extend_from_slice(trailer);
    packet
}

/// A parsed inbound session wrapper. Any integrity trailer is left attached
/// after the payload and ignored here.
pub struct SessionFrame<'a> {
    pub payload_type: u8,
    pub session_id: u32,
    pub payload: &'a [u8],
}

pub fn decode_session<'a>(
    command: &'static str,
    packet: &'a [u8],
) -> Result<SessionFrame<'a>, SessionError> {
    if packet.len() < 16 || packet[..4] != RMCP_HEADER {
        return Err(SessionError::Malformed {
            command,
            reason: "not an RMCP/IPMI packet",
        });
    }
    if packet[4] != AUTH_TYPE_RMCP_PLUS {
        return Err(SessionError::Malformed {
            command,
            reason: "unexpected session authentication type",
        });
    }
    let payload_type = packet[5];
    let session_id = u32::from_le_bytes([packet[6], packet[7], packet[8], packet[9]]);
    let len = usize::from(u16::from_le_bytes([packet[14], packet[15]]));
    let rest = &packet[16..];
    if rest.len() < len {
        return Err(SessionError::Malformed {
            command,
            reason: "session payload truncated",
        });
    }
    Ok(SessionFrame {
        payload_type,
        session_id,
        payload: &rest[..len],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_balances_to_zero() {
        let bytes = [0x20, 0x18, 0x34, 0x81, 0x04];
        let sum = checksum(&bytes);
        let total: u8 = bytes
            .iter()
            .fold(0u8, |acc, b| acc.wrapping_add(*b))
            .wrapping_add(sum);
        assert_eq!(total, 0);
    }

    #[test]
    fn ipmb_request_frame_layout() {
        let frame = encode_ipmb(NETFN_APP, 0x37, 3, &[]);
        assert_eq!(frame[0], BMC_ADDR);
        assert_eq!(frame[1], NETFN_APP << 2);
        assert_eq!(frame[2], checksum(&frame[..2]));
        assert_eq!(frame[3], CONSOLE_ADDR);
        assert_eq!(frame[4], 3 << 2);
        assert_eq!(frame[5], 0x37);
        assert_eq!(*frame.last().unwrap(), checksum(&frame[3..frame.len() - 1]));
    }

    #[test]
    fn ipmb_response_round_trip() {
        // build a response the way a BMC would: addresses swapped, response
        // netfn, completion code before data
        let mut frame = vec![CONSOLE_ADDR, (NETFN_APP | 1) << 2];
        frame.push(checksum(&frame[..2]));
        frame.extend_from_slice(&[BMC_ADDR, 5 << 2, 0x01, 0x00, 0xaa, 0xbb]);
        let tail = checksum(&frame[3..]);
        frame.push(tail);

        let response = decode_ipmb("Get Device ID", &frame).unwrap();
        assert_eq!(response.rq_seq, 5);
        assert_eq!(response.completion_code, 0x00);
        assert_eq!(response.data, &[0xaa, 0xbb]);
    }

    #[test]
    fn corrupted_response_is_rejected() {
        let mut frame = vec![CONSOLE_ADDR, (NETFN_APP | 1) << 2];
        frame.push(checksum(&frame[..2]));
        frame.extend_from_slice(&[BMC_ADDR, 5 << 2, 0x01, 0x00]);
        let tail = checksum(&frame[3..]);
        frame.push(tail ^ 0xff);
        assert!(decode_ipmb("Get Device ID", &frame).is_err());
    }

    #[test]
    fn session_wrapper_round_trip() {
        let packet = encode_session(PAYLOAD_IPMI, 0xdead_beef, 7, &[1, 2, 3], &[]);
        let frame = decode_session("Get Device ID", &packet).unwrap();
        assert_eq!(frame.payload_type, PAYLOAD_IPMI);
        assert_eq!(frame.session_id, 0xdead_beef);
        assert_eq!(frame.payload, &[1, 2, 3]);
    }
}
