//! Integration tests against an in-process mock pump on loopback UDP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::net::UdpSocket;

use super::client::{AlsavoPro, OperatingMode};
use super::error::AlsavoError;
use super::protocol::{
    AUTH_INTRO_LEN, AUTH_RESPONSE_LEN, AuthChallenge, CMD_AUTH, CMD_QUERY, HDR_RESPONSE,
    HEADER_SIZE, PacketHeader, Payload, SUBTYPE_CONFIG, SUBTYPE_STATUS, auth_digest,
};
use super::session::Session;
use super::transport::UdpClient;

const SERIAL: u64 = 31415926;
const PASSWORD: &str = "1234";
const CSID: u32 = 0x11223344;
const DSID: u32 = 0x55667788;
const SERVER_TOKEN: u32 = 0x9abcdef0;

#[derive(Default, Clone, Copy)]
struct PumpBehavior {
    /// Reply to intros with a non-authorization action.
    deny_challenge: bool,
    /// Reply to a correct digest with a failure verdict.
    bad_confirm: bool,
    /// Swallow this many intros before answering.
    ignore_intros: u32,
    /// Answer queries with a no-data snapshot.
    empty_snapshot: bool,
}

struct PumpState {
    intros_seen: AtomicU32,
    status: Mutex<Vec<u16>>,
    config: Mutex<Vec<u16>>,
}

impl PumpState {
    fn new() -> Self {
        Self {
            intros_seen: AtomicU32::new(0),
            status: Mutex::new(vec![0; 70]),
            config: Mutex::new(vec![0; 32]),
        }
    }

    fn snapshot_bytes(&self, empty: bool) -> Vec<u8> {
        if empty {
            return vec![0, 0, 0, 0];
        }
        let status = Payload {
            data_type: 1,
            sub_type: SUBTYPE_STATUS,
            start_idx: 0,
            data: self.status.lock().unwrap().clone(),
        };
        let config = Payload {
            data_type: 2,
            sub_type: SUBTYPE_CONFIG,
            start_idx: 0,
            data: self.config.lock().unwrap().clone(),
        };
        let mut bytes = vec![1, 2, 0, 0];
        bytes.extend_from_slice(&status.pack());
        bytes.extend_from_slice(&config.pack());
        bytes
    }
}

fn reply_header(cmd: u16, payload_len: u16) -> PacketHeader {
    PacketHeader {
        hdr: HDR_RESPONSE,
        pad: 0,
        seq: 0,
        csid: CSID,
        dsid: DSID,
        cmd,
        payload_len,
    }
}

async fn pump_loop(socket: UdpSocket, behavior: PumpBehavior, state: Arc<PumpState>) {
    let mut buf = [0u8; 1024];
    let mut client_token = 0u32;
    loop {
        let Ok((n, peer)) = socket.recv_from(&mut buf).await else {
            return;
        };
        let datagram = &buf[..n];
        let Ok(header) = PacketHeader::unpack(datagram) else {
            continue;
        };
        match (header.cmd, header.payload_len) {
            (CMD_AUTH, AUTH_INTRO_LEN) => {
                let seen = state.intros_seen.fetch_add(1, Ordering::SeqCst) + 1;
                if seen <= behavior.ignore_intros {
                    continue;
                }
                client_token =
                    u32::from_be_bytes([datagram[20], datagram[21], datagram[22], datagram[23]]);
                let action = if behavior.deny_challenge {
                    [1, 0, 0, 0]
                } else {
                    [3, 0, 0, 0]
                };
                let challenge = AuthChallenge {
                    header: reply_header(CMD_AUTH, 8),
                    action,
                    server_token: SERVER_TOKEN,
                };
                let _ = socket.send_to(&challenge.pack(), peer).await;
            }
            (CMD_AUTH, AUTH_RESPONSE_LEN) => {
                let expected = auth_digest(client_token, SERVER_TOKEN, PASSWORD);
                let ok = n >= 36 && datagram[20..36] == expected && !behavior.bad_confirm;
                let verdict: u32 = if ok { 5 } else { 1 };
                let mut reply = Vec::new();
                reply.extend_from_slice(&reply_header(CMD_AUTH, 4).pack());
                reply.extend_from_slice(&verdict.to_le_bytes());
                let _ = socket.send_to(&reply, peer).await;
            }
            (CMD_QUERY, _) => match datagram.get(HEADER_SIZE) {
                Some(0x08) => {
                    let snapshot = state.snapshot_bytes(behavior.empty_snapshot);
                    let mut reply = Vec::new();
                    reply.extend_from_slice(&reply_header(CMD_QUERY, snapshot.len() as u16).pack());
                    reply.extend_from_slice(&snapshot);
                    let _ = socket.send_to(&reply, peer).await;
                }
                Some(0x09) if n >= HEADER_SIZE + 16 => {
                    let index = u16::from_be_bytes([datagram[28], datagram[29]]) as usize;
                    let value = u16::from_be_bytes([datagram[30], datagram[31]]);
                    let mut config = state.config.lock().unwrap();
                    if index < config.len() {
                        config[index] = value;
                    }
                    // writes are not acknowledged
                }
                _ => {}
            },
            _ => {}
        }
    }
}

async fn spawn_pump(behavior: PumpBehavior) -> (SocketAddr, Arc<PumpState>) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    let state = Arc::new(PumpState::new());
    let task_state = Arc::clone(&state);
    tokio::spawn(async move { pump_loop(socket, behavior, task_state).await });
    (addr, state)
}

fn seed_defaults(state: &PumpState) {
    let mut status = state.status.lock().unwrap();
    status[16] = 265;
    status[17] = 271;
    status[18] = 180;
    status[22] = 1200;
    drop(status);
    let mut config = state.config.lock().unwrap();
    config[1] = 280;
    config[2] = 250;
    config[3] = 270;
    config[4] = 0x21; // heat, power on
    config[16] = 1; // smart
}

fn pump_handle(addr: SocketAddr, max_attempts: u32) -> AlsavoPro {
    AlsavoPro::new("127.0.0.1", addr.port(), SERIAL, PASSWORD)
        .with_timeout(Duration::from_millis(200))
        .with_transport_tries(1)
        .with_max_attempts(max_attempts)
}

#[tokio::test]
async fn test_update_end_to_end() {
    let (addr, state) = spawn_pump(PumpBehavior::default()).await;
    seed_defaults(&state);

    let mut pump = pump_handle(addr, 1);
    pump.update().await.unwrap();

    assert!(pump.is_online());
    assert_eq!(pump.water_in_temperature(), 26.5);
    assert_eq!(pump.water_out_temperature(), 27.1);
    assert_eq!(pump.ambient_temperature(), 18.0);
    assert_eq!(pump.fan_speed(), 1200);
    assert_eq!(pump.operating_mode(), Some(OperatingMode::Heat));
    assert!(pump.is_power_on());
    assert_eq!(pump.target_temperature(), 28.0);
    assert!(pump.errors().is_empty());
}

#[tokio::test]
async fn test_set_target_temperature_round_trip() {
    let (addr, state) = spawn_pump(PumpBehavior::default()).await;
    seed_defaults(&state);

    let mut pump = pump_handle(addr, 2);
    pump.update().await.unwrap();
    assert_eq!(pump.target_temperature(), 28.0);

    // heat mode targets register 1
    pump.set_target_temperature(28.5).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(state.config.lock().unwrap()[1], 285);

    pump.update().await.unwrap();
    assert_eq!(pump.target_temperature(), 28.5);
}

#[tokio::test]
async fn test_set_mode_rewrites_flag_word() {
    let (addr, state) = spawn_pump(PumpBehavior::default()).await;
    seed_defaults(&state);

    let mut pump = pump_handle(addr, 2);
    pump.update().await.unwrap();

    pump.set_mode(OperatingMode::Auto).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(state.config.lock().unwrap()[4], 0x22);

    pump.update().await.unwrap();
    assert_eq!(pump.operating_mode(), Some(OperatingMode::Auto));
}

#[tokio::test]
async fn test_challenge_denied() {
    let behavior = PumpBehavior {
        deny_challenge: true,
        ..Default::default()
    };
    let (addr, _state) = spawn_pump(behavior).await;

    let transport = UdpClient::connect("127.0.0.1", addr.port(), Duration::from_millis(200), 1)
        .await
        .unwrap();
    let err = Session::connect(transport, SERIAL, PASSWORD).await.unwrap_err();
    assert!(matches!(err, AlsavoError::AuthDenied));
}

#[tokio::test]
async fn test_confirmation_verdict_denied() {
    let behavior = PumpBehavior {
        bad_confirm: true,
        ..Default::default()
    };
    let (addr, _state) = spawn_pump(behavior).await;

    let transport = UdpClient::connect("127.0.0.1", addr.port(), Duration::from_millis(200), 1)
        .await
        .unwrap();
    let err = Session::connect(transport, SERIAL, PASSWORD).await.unwrap_err();
    assert!(matches!(err, AlsavoError::AuthDenied));
}

#[tokio::test]
async fn test_wrong_password_denied() {
    let (addr, _state) = spawn_pump(PumpBehavior::default()).await;

    let transport = UdpClient::connect("127.0.0.1", addr.port(), Duration::from_millis(200), 1)
        .await
        .unwrap();
    let err = Session::connect(transport, SERIAL, "wrong").await.unwrap_err();
    assert!(matches!(err, AlsavoError::AuthDenied));
}

#[tokio::test]
async fn test_update_retries_are_bounded() {
    let behavior = PumpBehavior {
        ignore_intros: u32::MAX,
        ..Default::default()
    };
    let (addr, state) = spawn_pump(behavior).await;

    let mut pump = pump_handle(addr, 3);
    let err = pump.update().await.unwrap_err();
    assert!(matches!(err, AlsavoError::Offline { attempts: 3 }));
    assert!(!pump.is_online());
    assert_eq!(state.intros_seen.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_update_succeeds_on_last_attempt() {
    let behavior = PumpBehavior {
        ignore_intros: 2,
        ..Default::default()
    };
    let (addr, state) = spawn_pump(behavior).await;
    seed_defaults(&state);

    let mut pump = pump_handle(addr, 3);
    pump.update().await.unwrap();
    assert!(pump.is_online());
    assert_eq!(state.intros_seen.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_empty_snapshot_reads_offline() {
    let behavior = PumpBehavior {
        empty_snapshot: true,
        ..Default::default()
    };
    let (addr, _state) = spawn_pump(behavior).await;

    let mut pump = pump_handle(addr, 1);
    pump.update().await.unwrap();
    assert!(!pump.is_online());
    assert_eq!(pump.status_value(16), 0);
    assert_eq!(pump.config_value(4), 0);
}
