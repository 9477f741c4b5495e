//! Session establishment and the query/config exchange.
//!
//! A session covers exactly one connect-authenticate-act-discard cycle.
//! The handshake runs intro -> challenge -> response -> confirmation; any
//! failure aborts the whole sequence and the next attempt starts over.

use tracing::{debug, info};

use super::error::{AlsavoError, Result};
use super::protocol::{
    AUTH_OK, AuthChallenge, AuthIntro, AuthResponse, CMD_QUERY, HEADER_SIZE, PacketHeader,
    QUERY_ALL_PAYLOAD, QueryResponse, SET_CONFIG_TEMPLATE, auth_digest,
};
use super::transport::UdpClient;

/// An authenticated connection to the pump.
///
/// Owns the socket and the session ids the device assigned during the
/// handshake; both are discarded when the session drops. Session ids are
/// never reused across connections.
#[derive(Debug)]
pub struct Session {
    transport: UdpClient,
    csid: u32,
    dsid: u32,
}

impl Session {
    /// Run the handshake and return an authenticated session.
    pub async fn connect(transport: UdpClient, serial: u64, password: &str) -> Result<Self> {
        // Fresh token per connection so challenges cannot be confused
        // across attempts.
        let client_token: u32 = rand::random();
        let intro = AuthIntro::new(client_token, serial);
        debug!("sending auth intro, client token {client_token:#010x}");
        let reply = transport.send_and_receive(&intro.pack()).await?;

        let challenge = AuthChallenge::unpack(&reply)?;
        if !challenge.is_authorized() {
            debug!("challenge action {:?} is not an authorization", challenge.action);
            return Err(AlsavoError::AuthDenied);
        }
        let csid = challenge.header.csid;
        let dsid = challenge.header.dsid;
        debug!(
            "challenge received, csid={csid:#010x} dsid={dsid:#010x} server token {:#010x}",
            challenge.server_token
        );

        let digest = auth_digest(client_token, challenge.server_token, password);
        let response = AuthResponse::new(csid, dsid, digest);
        let confirm = transport.send_and_receive(&response.pack()).await?;

        // The verdict sits right after the header, little-endian unlike
        // the rest of the wire.
        if confirm.len() < HEADER_SIZE + 4 {
            return Err(AlsavoError::AuthDenied);
        }
        let verdict = u32::from_le_bytes([confirm[16], confirm[17], confirm[18], confirm[19]]);
        if verdict != AUTH_OK {
            debug!("auth confirmation carried verdict {verdict}, expected {AUTH_OK}");
            return Err(AlsavoError::AuthDenied);
        }

        info!("authenticated, csid={csid:#010x} dsid={dsid:#010x}");
        Ok(Self { transport, csid, dsid })
    }

    /// Request the full status+config snapshot.
    pub async fn query_all(&self) -> Result<QueryResponse> {
        let reply = self.request(CMD_QUERY, &QUERY_ALL_PAYLOAD).await?;
        let header = PacketHeader::unpack(&reply)?;
        let end = HEADER_SIZE + header.payload_len as usize;
        if reply.len() < end {
            return Err(AlsavoError::Malformed(format!(
                "reply shorter than declared payload: {} < {end}",
                reply.len()
            )));
        }
        QueryResponse::unpack(&reply[HEADER_SIZE..end])
    }

    /// Write one config register.
    ///
    /// Fire-and-forget: the device sends no application-level ack, so the
    /// write is only observable through a later [`query_all`](Self::query_all).
    pub async fn set_config(&self, index: u16, value: u16) -> Result<()> {
        debug!("set_config({index}, {value})");
        let mut payload = Vec::with_capacity(SET_CONFIG_TEMPLATE.len() + 4);
        payload.extend_from_slice(&SET_CONFIG_TEMPLATE);
        payload.extend_from_slice(&index.to_be_bytes());
        payload.extend_from_slice(&value.to_be_bytes());
        self.send(CMD_QUERY, &payload).await
    }

    fn framed(&self, cmd: u16, payload: &[u8]) -> Vec<u8> {
        let header = PacketHeader::request(self.csid, self.dsid, cmd, payload.len() as u16);
        let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
        buf.extend_from_slice(&header.pack());
        buf.extend_from_slice(payload);
        buf
    }

    async fn request(&self, cmd: u16, payload: &[u8]) -> Result<Vec<u8>> {
        self.transport.send_and_receive(&self.framed(cmd, payload)).await
    }

    async fn send(&self, cmd: u16, payload: &[u8]) -> Result<()> {
        self.transport.send(&self.framed(cmd, payload)).await
    }
}
