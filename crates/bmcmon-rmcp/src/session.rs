use crate::crypto;
use crate::protocol;
use crate::sdr;
use crate::transport::UdpTransport;
use async_trait::async_trait;
use bmcmon_session::{
    ChassisState, DeviceInfo, PowerReading, SdrRepository, SensorReading, Session, SessionError,
};
use rand::RngCore;
use std::sync::Arc;
use std::time::Duration;

/// How long to wait for a response before retransmitting the request. The
/// caller's deadline bounds the overall exchange; this only drives resends
/// of lost datagrams.
const RETRANSMIT_INTERVAL: Duration = Duration::from_millis(500);

/// DCMI group extension identifier, the first data byte of every DCMI
/// command and response.
const DCMI_GROUP: u8 = 0xdc;

/// Upper bound on SDR records walked per retrieval, against a BMC that
/// never terminates the chain.
const MAX_SDR_RECORDS: usize = 1024;

/// Bytes of record requested per Get SDR command. Kept small enough for the
/// BMC's per-message limit.
const SDR_CHUNK: u8 = 16;

/// An established RMCP+ session. All traffic from here on is encrypted with
/// AES-CBC-128 under K2 and authenticated with HMAC-SHA1-96 under K1.
pub struct RmcpSession {
    transport: Arc<UdpTransport>,
    /// The managed system's session ID, written into every outbound wrapper.
    session_id: u32,
    /// Our session ID, which the BMC writes into every inbound wrapper.
    console_session_id: u32,
    seq: u32,
    rq_seq: u8,
    k1: [u8; 20],
    aes_key: [u8; 16],
    /// Reusable receive buffer; sized for the largest response plus growth
    /// room so steady-state scrapes do not allocate.
    buf: Vec<u8>,
}

impl RmcpSession {
    pub fn new(
        transport: Arc<UdpTransport>,
        session_id: u32,
        console_session_id: u32,
        k1: [u8; 20],
        k2: [u8; 20],
    ) -> Self {
        let mut aes_key = [0u8; 16];
        aes_key.copy_from_slice(&k2[..16]);
        Self {
            transport,
            session_id,
            console_session_id,
            seq: 0,
            rq_seq: 0,
            k1,
            aes_key,
            buf: vec![0u8; 1024],
        }
    }

    /// Sends one IPMI command inside the session and returns the response
    /// data. Retransmits on silence; stale responses (wrong IPMB sequence
    /// number) are discarded. Cancellation comes from the caller's deadline.
    async fn send_command(
        &mut self,
        command: &'static str,
        netfn: u8,
        cmd: u8,
        data: &[u8],
    ) -> Result<Vec<u8>, SessionError> {
        self.seq = self.seq.wrapping_add(1);
        self.rq_seq = (self.rq_seq + 1) & 0x3f;

        let frame = protocol::encode_ipmb(netfn, cmd, self.rq_seq, data);
        let mut iv = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut iv);
        let sealed = crypto::encrypt(&self.aes_key, &iv, &frame);

        let payload_type =
            protocol::PAYLOAD_IPMI | protocol::PAYLOAD_ENCRYPTED | protocol::PAYLOAD_AUTHENTICATED;
        let mut packet =
            protocol::encode_session(payload_type, self.session_id, self.seq, &sealed, &[]);
        append_integrity_trailer(&mut packet, &self.k1);

        loop {
            self.transport.send(&packet).await?;
            let received =
                match tokio::time::timeout(RETRANSMIT_INTERVAL, self.transport.recv(&mut self.buf))
                    .await
                {
                    Ok(received) => received?,
                    // lost datagram; send again
                    Err(_) => continue,
                };

            let session_frame = match protocol::decode_session(command, &self.buf[..received]) {
                Ok(frame) => frame,
                Err(_) => continue,
            };
            if session_frame.session_id != self.console_session_id {
                // traffic for a session this socket no longer speaks
                continue;
            }
            let plain;
            let payload = if session_frame.payload_type & protocol::PAYLOAD_ENCRYPTED != 0 {
                plain = crypto::decrypt(command, &self.aes_key, session_frame.payload)?;
                plain.as_slice()
            } else {
                session_frame.payload
            };
            let response = match protocol::decode_ipmb(command, payload) {
                Ok(response) => response,
                Err(_) => continue,
            };
            if response.rq_seq != self.rq_seq {
                // response to an earlier, given-up-on request
                continue;
            }
            if response.completion_code != 0 {
                return Err(SessionError::CompletionCode {
                    command,
                    code: response.completion_code,
                });
            }
            return Ok(response.data.to_vec());
        }
    }

    async fn get_sdr_chunk(
        &mut self,
        reservation: u16,
        record_id: u16,
        offset: u8,
        count: u8,
    ) -> Result<(u16, Vec<u8>), SessionError> {
        let mut request = [0u8; 6];
        request[..2].copy_from_slice(&reservation.to_le_bytes());
        request[2..4].copy_from_slice(&record_id.to_le_bytes());
        request[4] = offset;
        request[5] = count;
        let data = self
            .send_command("Get SDR", protocol::NETFN_STORAGE, 0x23, &request)
            .await?;
        if data.len() < 2 {
            return Err(SessionError::Malformed {
                command: "Get SDR",
                reason: "response shorter than the next-record pointer",
            });
        }
        let next = u16::from_le_bytes([data[0], data[1]]);
        Ok((next, data[2..].to_vec()))
    }
}

#[async_trait]
impl Session for RmcpSession {
    fn ipmi_version(&self) -> &'static str {
        "2.0"
    }

    async fn system_guid(&mut self) -> Result<[u8; 16], SessionError> {
        const COMMAND: &str = "Get System GUID";
        let data = self
            .send_command(COMMAND, protocol::NETFN_APP, 0x37, &[])
            .await?;
        data.get(..16)
            .and_then(|bytes| <[u8; 16]>::try_from(bytes).ok())
            .ok_or(SessionError::Malformed {
                command: COMMAND,
                reason: "GUID shorter than 16 bytes",
            })
    }

    async fn device_id(&mut self) -> Result<DeviceInfo, SessionError> {
        const COMMAND: &str = "Get Device ID";
        let data = self
            .send_command(COMMAND, protocol::NETFN_APP, 0x01, &[])
            .await?;
        if data.len() < 4 {
            return Err(SessionError::Malformed {
                command: COMMAND,
                reason: "response truncated",
            });
        }
        Ok(DeviceInfo {
            firmware_major: data[2] & 0x7f,
            firmware_minor: data[3],
        })
    }

    async fn chassis_status(&mut self) -> Result<ChassisState, SessionError> {
        const COMMAND: &str = "Get Chassis Status";
        let data = self
            .send_command(COMMAND, protocol::NETFN_CHASSIS, 0x01, &[])
            .await?;
        if data.len() < 3 {
            return Err(SessionError::Malformed {
                command: COMMAND,
                reason: "response truncated",
            });
        }
        Ok(ChassisState {
            powered_on: data[0] & 0x01 != 0,
            power_fault: data[0] & 0x08 != 0,
            intrusion: data[2] & 0x01 != 0,
            drive_fault: data[2] & 0x04 != 0,
            cooling_fault: data[2] & 0x08 != 0,
        })
    }

    async fn power_reading(&mut self) -> Result<PowerReading, SessionError> {
        const COMMAND: &str = "Get Power Reading";
        // normal system power statistics mode
        let data = self
            .send_command(
                COMMAND,
                protocol::NETFN_GROUP_EXTENSION,
                0x02,
                &[DCMI_GROUP, 0x01, 0x00, 0x00],
            )
            .await?;
        if data.len() < 18 || data[0] != DCMI_GROUP {
            return Err(SessionError::Malformed {
                command: COMMAND,
                reason: "response truncated or not DCMI",
            });
        }
        Ok(PowerReading {
            watts: u16::from_le_bytes([data[1], data[2]]),
            active: data[17] & 0x40 != 0,
        })
    }

    async fn sensor_reading(&mut self, sensor: u8) -> Result<SensorReading, SessionError> {
        const COMMAND: &str = "Get Sensor Reading";
        let data = self
            .send_command(COMMAND, protocol::NETFN_SENSOR_EVENT, 0x2d, &[sensor])
            .await?;
        if data.len() < 2 {
            return Err(SessionError::Malformed {
                command: COMMAND,
                reason: "response truncated",
            });
        }
        Ok(SensorReading {
            raw: data[0],
            available: data[1] & 0x20 == 0,
        })
    }

    async fn sdr_repository(&mut self) -> Result<SdrRepository, SessionError> {
        let data = self
            .send_command("Reserve SDR Repository", protocol::NETFN_STORAGE, 0x22, &[])
            .await?;
        if data.len() < 2 {
            return Err(SessionError::Malformed {
                command: "Reserve SDR Repository",
                reason: "reservation ID missing",
            });
        }
        let reservation = u16::from_le_bytes([data[0], data[1]]);

        let mut records = Vec::new();
        let mut record_id = 0x0000u16;
        for _ in 0..MAX_SDR_RECORDS {
            // the header names the record's length; the rest is fetched in
            // chunks small enough for the BMC's message limit
            let (next, header) = self.get_sdr_chunk(reservation, record_id, 0, 5).await?;
            if header.len() < 5 {
                return Err(SessionError::Malformed {
                    command: "Get SDR",
                    reason: "record header truncated",
                });
            }
            // the Get SDR offset field is a single byte, so anything past
            // 255 bytes cannot be addressed; full sensor records are far
            // smaller, and the parser only needs the fixed prefix anyway
            let total = (5 + usize::from(header[4])).min(255);
            let mut record = header;
            while record.len() < total {
                let remaining = total - record.len();
                let count = remaining.min(usize::from(SDR_CHUNK)) as u8;
                let (_, chunk) = self
                    .get_sdr_chunk(reservation, record_id, record.len() as u8, count)
                    .await?;
                if chunk.is_empty() {
                    return Err(SessionError::Malformed {
                        command: "Get SDR",
                        reason: "empty record chunk",
                    });
                }
                record.extend_from_slice(&chunk);
            }

            if let Some(full) = sdr::parse_full_record(&record) {
                records.push(full);
            }
            if next == 0xffff {
                break;
            }
            record_id = next;
        }

        tracing::debug!(records = records.len(), "retrieved SDR repository");
        Ok(SdrRepository::new(records))
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        let session_id = self.session_id.to_le_bytes();
        self.send_command("Close Session", protocol::NETFN_APP, 0x3c, &session_id)
            .await?;
        Ok(())
    }
}

/// Pads the wrapper to a 4-byte boundary, appends the pad length and the
/// next-header byte, then the HMAC-SHA1-96 auth code under K1 over
/// everything from the auth type onwards.
pub fn append_integrity_trailer(packet: &mut Vec<u8>, k1: &[u8; 20]) {
    // the RMCP header is not covered by the integrity code
    let start = protocol::RMCP_HEADER.len();
    let mut pad = 0u8;
    while (packet.len() - start + 2) % 4 != 0 {
        packet.push(0xff);
        pad += 1;
    }
    packet.push(pad);
    packet.push(0x07); // next header, fixed value
    let code = crypto::hmac_sha1(k1, &[&packet[start..]]);
    packet.extend_from_slice(&code[..12]);
}
