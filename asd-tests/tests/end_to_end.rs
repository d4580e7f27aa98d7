use std::{
    io::{ErrorKind, Read, Write},
    net::{Shutdown, SocketAddr, TcpStream},
    os::unix::net::UnixStream,
    path::Path,
    thread,
    time::{Duration, Instant},
};

use asd_client::{AsdClient, ClientError};
use asd_protocol::{
    Message, PaddingKind, Status, TargetEvent, passthrough::split_message, tap::TapState,
};
use asd_server::{auth::AuthMode, events, jtag::MessageFlow, server::Builder, sim::Exchange};
use asd_tests::{socket_path, spawn_server, wait_for};

const TIMEOUT: Duration = Duration::from_secs(5);

fn connect(addr: SocketAddr) -> AsdClient {
    let client = AsdClient::connect(addr).unwrap();
    client.set_timeout(Some(TIMEOUT)).unwrap();
    client
}

/// Sends `message` to the relay socket the way the bridge does, one connection per
/// packet. Returns once the relay has handled every packet.
fn push_relay_message(path: &Path, message: &Message) {
    for packet in split_message(&message.to_bytes().unwrap(), 4) {
        let mut bridge = UnixStream::connect(path).unwrap();
        bridge.set_read_timeout(Some(TIMEOUT)).unwrap();
        bridge.write_all(&packet).unwrap();
        bridge.shutdown(Shutdown::Write).unwrap();
        // the relay closes its end after forwarding
        let mut rest = Vec::new();
        bridge.read_to_end(&mut rest).unwrap();
    }
}

#[test]
fn padded_multi_frame_shift() {
    let (addr, sim) = spawn_server(Builder::new()).unwrap();
    let mut client = connect(addr);
    client.init(false).unwrap();
    client.set_padding(PaddingKind::DRPre, 8).unwrap();
    client.set_tap_state(TapState::ShfDR).unwrap();
    sim.clear_exchanges();

    let tdi: Vec<u8> = (0..256).map(|i| i as u8).collect();
    let tdo = client.shift(2048, &tdi, TapState::Ex1DR, true).unwrap();
    assert_eq!(&tdo[..], &tdi[..]);
    assert_eq!(client.get_tap_state().unwrap(), TapState::Ex1DR);

    let shifts: Vec<(u16, u16, bool)> = sim
        .exchanges()
        .into_iter()
        .filter_map(|exchange| match exchange {
            Exchange::Shift(frame) => {
                Some((frame.write_bits, frame.read_bits, frame.last_transaction))
            }
            _ => None,
        })
        .collect();
    assert_eq!(
        shifts,
        vec![(8, 0, false), (1024, 1024, false), (1024, 1024, true)]
    );
    client.close().unwrap();
}

#[test]
fn only_one_client_is_authenticated() {
    let (addr, _) = spawn_server(Builder::new()).unwrap();
    let mut first = connect(addr);
    first.tap_reset().unwrap();

    let mut second = connect(addr);
    assert!(second.tap_reset().is_err());

    first.set_tap_state(TapState::RTI).unwrap();
    first.close().unwrap();

    let mut third = connect(addr);
    third.init(true).unwrap();
    assert_eq!(third.get_tap_state().unwrap(), TapState::TLR);
}

#[test]
fn unauthenticated_connection_times_out() {
    let timeout = Duration::from_millis(200);
    let builder = Builder::new()
        .auth(AuthMode::Token("secret".to_string()))
        .auth_timeout(timeout);
    let (addr, _) = spawn_server(builder).unwrap();
    let start = Instant::now();
    let mut idle = TcpStream::connect(addr).unwrap();
    idle.set_read_timeout(Some(TIMEOUT)).unwrap();
    let mut buf = [0u8; 1];
    assert_eq!(idle.read(&mut buf).unwrap(), 0);
    assert!(start.elapsed() >= timeout);

    let mut client = connect(addr);
    client.authenticate("secret").unwrap();
    client.tap_reset().unwrap();
}

#[test]
fn wrong_token_is_rejected() {
    let builder = Builder::new().auth(AuthMode::Token("secret".to_string()));
    let (addr, sim) = spawn_server(builder).unwrap();
    let mut client = connect(addr);
    assert!(matches!(
        client.authenticate("guess"),
        Err(ClientError::Rejected)
    ));
    assert!(sim.exchanges().is_empty());

    let mut client = connect(addr);
    client.authenticate("secret").unwrap();
    client.init(false).unwrap();
    assert_eq!(sim.flow(), Some(1));
}

#[test]
fn request_errors_keep_session_open() {
    let (addr, _) = spawn_server(Builder::new()).unwrap();
    let mut client = connect(addr);
    client.init(false).unwrap();
    assert!(matches!(
        client.shift(8, &[0xA5], TapState::RTI, true),
        Err(ClientError::Status(Status::StateError))
    ));
    assert!(matches!(
        client.set_active_chain(4),
        Err(ClientError::Status(Status::ConfigError))
    ));
    client.set_active_chain(1).unwrap();
    client.wait_cycles(300).unwrap();
    client.set_tck(100).unwrap();
}

#[test]
fn gpio_events_reach_the_client() {
    let path = socket_path("asd_gpio_evt_e2e");
    let (addr, _) = spawn_server(Builder::new().event_socket(&path)).unwrap();
    let mut client = connect(addr);
    client.tap_reset().unwrap();
    assert!(wait_for(TIMEOUT, || path.exists()));

    events::notify(&path, TargetEvent::Prdy, 1).unwrap();
    assert_eq!(client.read_event().unwrap(), (TargetEvent::Prdy, 1));

    client.close().unwrap();
    assert!(wait_for(TIMEOUT, || !path.exists()));
}

#[test]
fn disconnect_leaves_asd_mode() {
    let (addr, sim) = spawn_server(Builder::new()).unwrap();
    let mut client = connect(addr);
    client.init(false).unwrap();
    assert_eq!(sim.flow(), Some(1));
    drop(client);
    assert!(wait_for(TIMEOUT, || sim.flow() == Some(0xFF)));
}

#[test]
fn bic_flow_relays_bridge_messages() {
    let path = socket_path("jtag_msg_socket_e2e");
    let builder = Builder::new().msg_flow(MessageFlow::Bic).relay_socket(&path);
    let (addr, _) = spawn_server(builder).unwrap();

    let mut first = connect(addr);
    first.tap_reset().unwrap();
    assert!(path.exists());
    push_relay_message(&path, &Message::event(TargetEvent::Prdy, 1));
    assert_eq!(first.read_event().unwrap(), (TargetEvent::Prdy, 1));
    first.close().unwrap();

    // dropped while no client is connected
    push_relay_message(&path, &Message::event(TargetEvent::Prdy, 2));

    let mut second = connect(addr);
    second.tap_reset().unwrap();
    push_relay_message(&path, &Message::event(TargetEvent::Prdy, 3));
    assert_eq!(second.read_event().unwrap(), (TargetEvent::Prdy, 3));
    second.close().unwrap();
}

#[test]
fn second_client_is_rejected_while_session_active() {
    let builder = Builder::new().auth(AuthMode::Token("secret".to_string()));
    let (addr, _) = spawn_server(builder).unwrap();
    let mut first = connect(addr);
    first.authenticate("secret").unwrap();
    first.tap_reset().unwrap();

    let mut second = connect(addr);
    assert!(matches!(
        second.authenticate("secret"),
        Err(ClientError::Rejected)
    ));
    first.set_tap_state(TapState::RTI).unwrap();
    assert_eq!(first.get_tap_state().unwrap(), TapState::RTI);
}

#[test]
fn failing_client_does_not_disturb_active_session() {
    let (addr, _) = spawn_server(Builder::new()).unwrap();
    let mut first = connect(addr);
    first.tap_reset().unwrap();

    // a second client's request is refused while the first still gets answers
    let mut intruder = TcpStream::connect(addr).unwrap();
    intruder.set_read_timeout(Some(TIMEOUT)).unwrap();
    intruder.write_all(&[0xFF; 16]).unwrap();
    first.set_tap_state(TapState::ShfIR).unwrap();
    let mut buf = [0u8; 1];
    match intruder.read(&mut buf) {
        Ok(n) => assert_eq!(n, 0),
        Err(e) => assert_eq!(e.kind(), ErrorKind::ConnectionReset),
    }
    assert_eq!(first.get_tap_state().unwrap(), TapState::ShfIR);
}

#[test]
fn silent_handshake_is_bounded_by_auth_timeout() {
    let auth_timeout = Duration::from_millis(300);
    let rw_timeout = Duration::from_secs(4);
    let builder = Builder::new()
        .auth(AuthMode::Token("secret".to_string()))
        .auth_timeout(auth_timeout)
        .rw_timeout(rw_timeout);
    let (addr, _) = spawn_server(builder).unwrap();

    // announces a 6 byte token and never sends it
    let mut silent = TcpStream::connect(addr).unwrap();
    silent.set_read_timeout(Some(TIMEOUT)).unwrap();
    silent.write_all(&[6]).unwrap();
    thread::sleep(auth_timeout / 3);

    let start = Instant::now();
    let mut client = connect(addr);
    client.authenticate("secret").unwrap();
    client.tap_reset().unwrap();
    assert!(start.elapsed() < rw_timeout / 2);

    let mut buf = [0u8; 1];
    assert_eq!(silent.read(&mut buf).unwrap(), 0);
}
