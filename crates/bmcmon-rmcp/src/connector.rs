use crate::crypto;
use crate::protocol;
use crate::session::RmcpSession;
use crate::transport::{TransportCloser, UdpTransport};
use async_trait::async_trait;
use bmcmon_session::{Connector, Credentials, SessionError, SessionHandle};
use rand::RngCore;
use std::sync::Arc;

/// Requested maximum privilege level: User is all the exporter's read-only
/// command catalogue needs.
const PRIVILEGE_USER: u8 = 0x02;

/// Cipher suite 3 algorithm identifiers.
const AUTH_HMAC_SHA1: u8 = 0x01;
const INTEGRITY_HMAC_SHA1_96: u8 = 0x01;
const CONFIDENTIALITY_AES_CBC_128: u8 = 0x01;

/// Opens RMCP+ sessions over UDP: open-session exchange, RAKP 1-4 key
/// exchange, then a protected session speaking the exporter's command
/// catalogue.
#[derive(Default)]
pub struct RmcpConnector;

impl RmcpConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for RmcpConnector {
    async fn connect(
        &self,
        addr: &str,
        credentials: &Credentials,
    ) -> Result<SessionHandle, SessionError> {
        let transport = Arc::new(UdpTransport::connect(addr).await?);
        let handshake = Handshake::begin(&transport, credentials);
        let session = handshake.run().await?;
        tracing::debug!(addr = %addr, "established RMCP+ session");
        Ok(SessionHandle {
            closer: Box::new(TransportCloser::new(Arc::clone(&transport))),
            session: Box::new(session),
        })
    }
}

struct Handshake<'a> {
    transport: &'a Arc<UdpTransport>,
    credentials: &'a Credentials,
    console_session_id: u32,
    console_random: [u8; 16],
    buf: [u8; 512],
}

impl<'a> Handshake<'a> {
    fn begin(transport: &'a Arc<UdpTransport>, credentials: &'a Credentials) -> Self {
        let mut rng = rand::thread_rng();
        let mut console_random = [0u8; 16];
        rng.fill_bytes(&mut console_random);
        Self {
            transport,
            credentials,
            console_session_id: rng.next_u32().max(1),
            console_random,
            buf: [0u8; 512],
        }
    }

    async fn run(mut self) -> Result<RmcpSession, SessionError> {
        let managed_session_id = self.open_session().await?;
        let (managed_random, _managed_guid) = self.rakp12(managed_session_id).await?;

        let sik = crypto::session_integrity_key(
            &self.credentials.password,
            &self.console_random,
            &managed_random,
            PRIVILEGE_USER,
            &self.credentials.username,
        );
        self.rakp34(managed_session_id, &managed_random).await?;

        Ok(RmcpSession::new(
            Arc::clone(self.transport),
            managed_session_id,
            self.console_session_id,
            crypto::k1(&sik),
            crypto::k2(&sik),
        ))
    }

    /// Sends a pre-session payload (session ID and sequence number zero) and
    /// returns the next payload of the expected type.
    async fn exchange(
        &mut self,
        command: &'static str,
        payload_type: u8,
        expect: u8,
        payload: &[u8],
    ) -> Result<Vec<u8>, SessionError> {
        let packet = protocol::encode_session(payload_type, 0, 0, payload, &[]);
        self.transport.send(&packet).await?;
        loop {
            let received = self.transport.recv(&mut self.buf).await?;
            let frame = match protocol::decode_session(command, &self.buf[..received]) {
                Ok(frame) => frame,
                Err(_) => continue,
            };
            if frame.payload_type != expect {
                continue;
            }
            return Ok(frame.payload.to_vec());
        }
    }

    async fn open_session(&mut self) -> Result<u32, SessionError> {
        const COMMAND: &str = "RMCP+ Open Session";
        let mut request = Vec::with_capacity(32);
        request.push(0x00); // message tag
        request.push(PRIVILEGE_USER);
        request.extend_from_slice(&[0x00, 0x00]);
        request.extend_from_slice(&self.console_session_id.to_le_bytes());
        // authentication, integrity and confidentiality algorithm payloads
        for (payload_type, algorithm) in [
            (0x00, AUTH_HMAC_SHA1),
            (0x01, INTEGRITY_HMAC_SHA1_96),
            (0x02, CONFIDENTIALITY_AES_CBC_128),
        ] {
            request.extend_from_slice(&[payload_type, 0x00, 0x00, 0x08, algorithm, 0x00, 0x00, 0x00]);
        }

        let response = self
            .exchange(
                COMMAND,
                protocol::PAYLOAD_OPEN_SESSION_REQUEST,
                protocol::PAYLOAD_OPEN_SESSION_RESPONSE,
                &request,
            )
            .await?;
        if response.len() < 16 {
            return Err(SessionError::Malformed {
                command: COMMAND,
                reason: "response truncated",
            });
        }
        if response[1] != 0x00 {
            return Err(SessionError::CompletionCode {
                command: COMMAND,
                code: response[1],
            });
        }
        Ok(u32::from_le_bytes([
            response[12],
            response[13],
            response[14],
            response[15],
        ]))
    }

    /// RAKP message 1 out, RAKP message 2 back: exchanges random numbers and
    /// authenticates the managed system against the shared key.
    async fn rakp12(
        &mut self,
        managed_session_id: u32,
    ) -> Result<([u8; 16], [u8; 16]), SessionError> {
        const COMMAND: &str = "RAKP 1/2";
        let username = self.credentials.username.clone();
        let mut rakp1 = Vec::with_capacity(44);
        rakp1.push(0x00); // message tag
        rakp1.extend_from_slice(&[0x00, 0x00, 0x00]);
        rakp1.extend_from_slice(&managed_session_id.to_le_bytes());
        rakp1.extend_from_slice(&self.console_random);
        rakp1.push(PRIVILEGE_USER);
        rakp1.extend_from_slice(&[0x00, 0x00]);
        rakp1.push(username.len() as u8);
        rakp1.extend_from_slice(username.as_bytes());

        let response = self
            .exchange(
                COMMAND,
                protocol::PAYLOAD_RAKP1,
                protocol::PAYLOAD_RAKP2,
                &rakp1,
            )
            .await?;
        if response.len() < 60 {
            return Err(SessionError::Malformed {
                command: COMMAND,
                reason: "RAKP 2 truncated",
            });
        }
        if response[1] != 0x00 {
            return Err(SessionError::CompletionCode {
                command: COMMAND,
                code: response[1],
            });
        }
        let mut managed_random = [0u8; 16];
        managed_random.copy_from_slice(&response[8..24]);
        let mut managed_guid = [0u8; 16];
        managed_guid.copy_from_slice(&response[24..40]);

        // authenticate the BMC: its auth code covers both session IDs, both
        // randoms, its GUID, and our requested role and username
        let expected = crypto::hmac_sha1(
            &self.credentials.password,
            &[
                &self.console_session_id.to_le_bytes(),
                &managed_session_id.to_le_bytes(),
                &self.console_random,
                &managed_random,
                &managed_guid,
                &[PRIVILEGE_USER],
                &[username.len() as u8],
                username.as_bytes(),
            ],
        );
        if response[40..60] != expected[..] {
            return Err(SessionError::Malformed {
                command: COMMAND,
                reason: "RAKP 2 authentication code mismatch",
            });
        }
        Ok((managed_random, managed_guid))
    }

    /// RAKP message 3 out, RAKP message 4 back: proves we hold the key and
    /// completes activation.
    async fn rakp34(
        &mut self,
        managed_session_id: u32,
        managed_random: &[u8; 16],
    ) -> Result<(), SessionError> {
        const COMMAND: &str = "RAKP 3/4";
        let username = self.credentials.username.clone();
        let auth = crypto::hmac_sha1(
            &self.credentials.password,
            &[
                managed_random,
                &self.console_session_id.to_le_bytes(),
                &[PRIVILEGE_USER],
                &[username.len() as u8],
                username.as_bytes(),
            ],
        );

        let mut rakp3 = Vec::with_capacity(28);
        rakp3.push(0x00); // message tag
        rakp3.push(0x00); // status: proceed
        rakp3.extend_from_slice(&[0x00, 0x00]);
        rakp3.extend_from_slice(&managed_session_id.to_le_bytes());
        rakp3.extend_from_slice(&auth);

        let response = self
            .exchange(
                COMMAND,
                protocol::PAYLOAD_RAKP3,
                protocol::PAYLOAD_RAKP4,
                &rakp3,
            )
            .await?;
        if response.len() < 2 {
            return Err(SessionError::Malformed {
                command: COMMAND,
                reason: "RAKP 4 truncated",
            });
        }
        if response[1] != 0x00 {
            return Err(SessionError::CompletionCode {
                command: COMMAND,
                code: response[1],
            });
        }
        Ok(())
    }
}
