//! One authenticated connection to a fingerbot.
//!
//! # Handshake
//!
//! 1. connect the transport, send DEVICE_INFO under the login key (flag 4)
//! 2. the device answers with its protocol version and a 6-byte nonce;
//!    derive the session key (flag 5) and send PAIR under it
//! 3. the device answers PAIR; from here on data-point commands are accepted
//!
//! Commands are fire-and-forget: the device does not acknowledge them, so a
//! successful [`ActuatorSession::press`] only means every packet was written.

use bytes::{BufMut, Bytes, BytesMut};
use strum_macros::Display;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, info, trace, warn};

use crate::config::{Credentials, SessionConfig};
use crate::constants::{PAIR_DEVICE_ID_REGION, SECURITY_FLAG_LOGIN, SECURITY_FLAG_SESSION};
use crate::dp::{self, DataPoint, engage_command, release_command};
use crate::error::{FrameError, SessionError, TransportError};
use crate::fragment::{Reassembler, Reassembly, split};
use crate::frame::{LogicalFrame, ResponseCode, WireFrame, build_wire_frame, open_wire_frame};
use crate::keys::SessionKeys;
use crate::message::{DeviceInfo, Response};
use crate::transport::{NotificationReceiver, Transport, notification_channel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum HandshakeState {
    NotConnected,
    AwaitingDeviceInfo,
    AwaitingPairAck,
    Paired,
    Failed,
}

/// Everything scoped to one physical connection. Built fresh on connect and
/// dropped on disconnect or failure.
struct Connection {
    keys: SessionKeys,
    sn_ack: u32,
    reassembler: Reassembler,
    notifications: NotificationReceiver,
    device_info: Option<DeviceInfo>,
}

impl Connection {
    fn new(login_secret: &[u8], notifications: NotificationReceiver) -> Self {
        Self {
            keys: SessionKeys::new(login_secret),
            sn_ack: 0,
            reassembler: Reassembler::new(),
            notifications,
            device_info: None,
        }
    }

    fn next_sn_ack(&mut self) -> u32 {
        self.sn_ack = self.sn_ack.wrapping_add(1);
        self.sn_ack
    }

    /// Decrypt a reassembled wire frame under the key its flag names.
    fn open(&self, bytes: Bytes) -> Result<LogicalFrame, SessionError> {
        let wire = WireFrame::try_from(bytes)?;
        // Inbound flag is device-supplied; no key for it means a corrupt frame
        let key = self.keys.get(wire.security_flag).ok_or_else(|| {
            FrameError::Malformed(format!("no key for inbound security flag {}", wire.security_flag))
        })?;
        let frame = open_wire_frame(&wire, key)?;
        if frame.crc_matches() == Some(false) {
            debug!(code = frame.code, sn = frame.sn_ack, "inbound CRC mismatch, accepting frame");
        }
        Ok(frame)
    }

    /// Feed one notification. `Ok(None)` while a frame is incomplete or was
    /// dropped as corrupt.
    fn accept(&mut self, packet: &[u8]) -> Result<Option<LogicalFrame>, SessionError> {
        trace!(bytes = %hex::encode(packet), "notification");
        match self.reassembler.feed(packet) {
            Ok(Reassembly::Complete(bytes)) => match self.open(bytes) {
                Ok(frame) => Ok(Some(frame)),
                Err(SessionError::Frame(err)) => {
                    warn!(%err, "dropping undecodable frame");
                    Ok(None)
                }
                Err(err) => Err(err),
            },
            Ok(Reassembly::NeedMore | Reassembly::Discarded) => Ok(None),
            Err(err) => {
                warn!(%err, "dropping corrupt packet");
                self.reassembler.reset();
                Ok(None)
            }
        }
    }
}

pub struct ActuatorSession<T: Transport> {
    credentials: Credentials,
    config: SessionConfig,
    transport: T,
    state: HandshakeState,
    connection: Option<Connection>,
}

impl<T: Transport> ActuatorSession<T> {
    pub fn new(credentials: Credentials, transport: T) -> Self {
        Self::with_config(credentials, SessionConfig::default(), transport)
    }

    pub fn with_config(credentials: Credentials, config: SessionConfig, transport: T) -> Self {
        Self {
            credentials,
            config,
            transport,
            state: HandshakeState::NotConnected,
            connection: None,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn is_paired(&self) -> bool {
        self.state == HandshakeState::Paired
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Device info reported during the handshake of the current connection.
    pub fn device_info(&self) -> Option<&DeviceInfo> {
        self.connection.as_ref().and_then(|c| c.device_info.as_ref())
    }

    /// Connect and pair. Resolves once the device acknowledged pairing, or
    /// with the error that moved the session to `Failed`. Dropping the
    /// returned future abandons the attempt.
    pub async fn connect(&mut self) -> Result<(), SessionError> {
        if self.state != HandshakeState::NotConnected {
            return Err(SessionError::InvalidState(self.state));
        }
        self.config.validate()?;

        let timeout = self.config.handshake_timeout;
        let result = match tokio::time::timeout(timeout, self.handshake()).await {
            Ok(result) => result,
            Err(_) => Err(SessionError::HandshakeTimeout(timeout)),
        };

        if let Err(err) = &result {
            warn!(mac = %self.credentials.mac(), state = %self.state, %err, "handshake failed");
            self.fail().await;
        }
        result
    }

    async fn handshake(&mut self) -> Result<(), SessionError> {
        let (tx, rx) = notification_channel();
        info!(mac = %self.credentials.mac(), "connecting");
        self.transport.connect(self.credentials.mac(), tx).await?;
        self.connection = Some(Connection::new(self.credentials.login_secret(), rx));

        debug!("sending device info request");
        self.send(SECURITY_FLAG_LOGIN, ResponseCode::DeviceInfo, Bytes::new())
            .await?;
        self.state = HandshakeState::AwaitingDeviceInfo;

        while self.state != HandshakeState::Paired {
            let frame = self.next_frame().await?;
            self.on_frame(frame).await?;
        }
        info!(mac = %self.credentials.mac(), "paired");
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<LogicalFrame, SessionError> {
        let conn = self
            .connection
            .as_mut()
            .ok_or(SessionError::InvalidState(self.state))?;
        loop {
            let packet = conn.notifications.recv().await.ok_or(TransportError::Closed)?;
            if let Some(frame) = conn.accept(&packet)? {
                return Ok(frame);
            }
        }
    }

    async fn on_frame(&mut self, frame: LogicalFrame) -> Result<(), SessionError> {
        let response = match Response::parse(&frame) {
            Ok(response) => response,
            Err(SessionError::Frame(err)) => {
                warn!(%err, code = frame.code, "dropping unparseable response");
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        match (self.state, response) {
            (HandshakeState::AwaitingDeviceInfo, Response::DeviceInfo(info)) => {
                info!(
                    device_version = %info.device_version,
                    protocol_version = %info.protocol_version,
                    hardware_version = %info.hardware_version,
                    is_bind = info.is_bind,
                    "device info received"
                );
                let conn = self
                    .connection
                    .as_mut()
                    .ok_or(SessionError::InvalidState(self.state))?;
                conn.keys.derive_session(&info.nonce);
                conn.device_info = Some(info);

                debug!("sending pair request");
                let payload = self.pair_payload();
                self.send(SECURITY_FLAG_SESSION, ResponseCode::Pair, payload).await?;
                self.state = HandshakeState::AwaitingPairAck;
            }
            (HandshakeState::AwaitingPairAck, Response::PairAck) => {
                self.state = HandshakeState::Paired;
            }
            (state, Response::Unrecognized { code, payload }) => {
                debug!(%state, code, len = payload.len(), "ignoring notification");
            }
            (state, other) => {
                debug!(%state, ?other, "ignoring out-of-sequence response");
            }
        }
        Ok(())
    }

    /// `pairing_id || login_secret || device_id`, the device id zero-padded
    /// to its fixed region.
    fn pair_payload(&self) -> Bytes {
        let device_id = self.credentials.device_id();
        let mut payload = BytesMut::new();
        payload.put_slice(self.credentials.pairing_id());
        payload.put_slice(self.credentials.login_secret());
        payload.put_slice(device_id);
        payload.put_bytes(0, PAIR_DEVICE_ID_REGION.saturating_sub(device_id.len()));
        payload.freeze()
    }

    async fn send(&mut self, security_flag: u8, code: ResponseCode, payload: Bytes) -> Result<(), SessionError> {
        let conn = self
            .connection
            .as_mut()
            .ok_or(SessionError::InvalidState(self.state))?;
        let key = *conn.keys.require(security_flag)?;
        let sn_ack = conn.next_sn_ack();

        let frame = LogicalFrame::new(sn_ack, code, payload);
        let wire = build_wire_frame(security_flag, &key, &frame)?;
        let packets = split(&wire.to_bytes(), self.config.mtu, self.config.protocol_version)?;
        debug!(sn_ack, ?code, security_flag, packets = packets.len(), "sending frame");

        for packet in packets {
            trace!(bytes = %hex::encode(&packet), "write");
            self.transport.write(packet).await?;
        }
        Ok(())
    }

    /// Log whatever the device reported since the last command.
    fn drain_notifications(&mut self) {
        let Some(conn) = self.connection.as_mut() else {
            return;
        };
        loop {
            match conn.notifications.try_recv() {
                Ok(packet) => match conn.accept(&packet) {
                    Ok(Some(frame)) => {
                        debug!(code = frame.code, len = frame.payload.len(), "device report");
                    }
                    Ok(None) => {}
                    Err(err) => warn!(%err, "unreadable device report"),
                },
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    debug!("notification channel closed");
                    break;
                }
            }
        }
    }

    fn ensure_paired(&self) -> Result<(), SessionError> {
        if self.state != HandshakeState::Paired {
            return Err(SessionError::NotPaired);
        }
        Ok(())
    }

    /// Send an arbitrary data-point command. Points are applied by the
    /// device in the given order.
    pub async fn send_command(&mut self, points: &[DataPoint]) -> Result<(), SessionError> {
        self.ensure_paired()?;
        self.drain_notifications();

        let payload = dp::encode(points)?;
        let result = self
            .send(SECURITY_FLAG_SESSION, ResponseCode::SendDps, payload)
            .await;
        if let Err(SessionError::Transport(err)) = &result {
            warn!(%err, "command write failed");
            self.fail().await;
        }
        result
    }

    /// Engage, hold for the configured dwell, release.
    pub async fn press(&mut self) -> Result<(), SessionError> {
        self.ensure_paired()?;
        info!(mac = %self.credentials.mac(), "starting press cycle");

        self.send_command(&engage_command()).await?;
        tokio::time::sleep(self.config.dwell).await;
        self.send_command(&release_command()).await?;

        info!(mac = %self.credentials.mac(), "completed press cycle");
        Ok(())
    }

    async fn fail(&mut self) {
        self.state = HandshakeState::Failed;
        self.connection = None;
        if let Err(err) = self.transport.disconnect().await {
            warn!(%err, "disconnect after failure");
        }
    }

    /// Release the transport. The session is consumed; connect again with
    /// a new one.
    pub async fn disconnect(mut self) -> Result<(), SessionError> {
        self.connection = None;
        self.transport.disconnect().await?;
        info!(mac = %self.credentials.mac(), "session closed");
        Ok(())
    }
}
