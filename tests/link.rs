//! Two endpoints wired back to back through their serial byte streams.

use std::collections::VecDeque;
use std::net::Ipv4Addr;

use ppplink::{
    Auth, AuthProtocol, Config, PPPoS, PPPoSAction, Phase, Role, SendError, Tunables, Verifier,
};

type Endpoint<'a> = PPPoS<'a, 512, 8>;

struct Directory;

impl Verifier for Directory {
    fn verify_pap(&self, username: &[u8], password: &[u8]) -> bool {
        username == b"user" && password == b"secret"
    }

    fn chap_secret<'s>(&'s self, name: &[u8]) -> Option<&'s [u8]> {
        match name {
            b"client" => Some(b"pw"),
            _ => None,
        }
    }

    fn chap_challenge(&self, out: &mut [u8]) -> usize {
        // Deterministic, with embedded zeros to exercise explicit lengths.
        let bytes: [u8; 16] = [7, 0, 0, 4, 200, 13, 0, 99, 1, 2, 3, 4, 5, 6, 7, 8];
        out[..16].copy_from_slice(&bytes);
        16
    }
}

fn fast() -> Tunables {
    Tunables {
        protocol_timeout: 2,
        inter_byte_timeout: 2,
        lcp_max_retries: 3,
        pap_max_retries: 2,
        chap_max_retries: 2,
        ipcp_max_retries: 3,
        dns_retry_cap: 2,
    }
}

fn client_config(auth: Auth<'_>) -> Config<'_> {
    let mut cfg = Config::new(Role::Client);
    cfg.auth = auth;
    cfg.tunables = fast();
    cfg
}

fn server_config(dir: &Directory, require: AuthProtocol) -> Config<'_> {
    let mut cfg = Config::new(Role::Server);
    cfg.require_auth = require;
    cfg.verifier = Some(dir);
    cfg.hostname = b"srv";
    cfg.local_address = Ipv4Addr::new(10, 0, 0, 1);
    cfg.peer_address = Ipv4Addr::new(10, 0, 0, 2);
    cfg.dns_servers = [Ipv4Addr::new(8, 8, 8, 8), Ipv4Addr::new(8, 8, 4, 4)];
    cfg.tunables = fast();
    cfg
}

/// Everything that came out of one pump run.
#[derive(Default)]
struct Traffic {
    /// Datagrams received by the client / server respectively.
    rx_a: Vec<Vec<u8>>,
    rx_b: Vec<Vec<u8>>,
}

/// Shuttle bytes between the two endpoints until both go quiet.
fn pump(a: &mut Endpoint<'_>, b: &mut Endpoint<'_>) -> Traffic {
    let mut traffic = Traffic::default();
    let mut to_b: VecDeque<u8> = VecDeque::new();
    let mut to_a: VecDeque<u8> = VecDeque::new();
    let mut idle_rounds = 0;

    for _ in 0..400 {
        let mut progress = false;
        let mut tx = [0u8; 4096];

        match a.poll(&mut tx) {
            PPPoSAction::None => {}
            PPPoSAction::Transmit(n) => {
                to_b.extend(&tx[..n]);
                progress = true;
            }
            PPPoSAction::Received(frame) => {
                let mut buf = vec![0u8; 2048];
                let n = a.read_received(frame, &mut buf);
                buf.truncate(n);
                traffic.rx_a.push(buf);
                progress = true;
            }
            PPPoSAction::Noise(_) => progress = true,
        }

        match b.poll(&mut tx) {
            PPPoSAction::None => {}
            PPPoSAction::Transmit(n) => {
                to_a.extend(&tx[..n]);
                progress = true;
            }
            PPPoSAction::Received(frame) => {
                let mut buf = vec![0u8; 2048];
                let n = b.read_received(frame, &mut buf);
                buf.truncate(n);
                traffic.rx_b.push(buf);
                progress = true;
            }
            PPPoSAction::Noise(_) => progress = true,
        }

        if !to_b.is_empty() {
            let bytes: Vec<u8> = to_b.iter().copied().collect();
            let n = b.consume(&bytes);
            to_b.drain(..n);
            progress |= n > 0;
        }
        if !to_a.is_empty() {
            let bytes: Vec<u8> = to_a.iter().copied().collect();
            let n = a.consume(&bytes);
            to_a.drain(..n);
            progress |= n > 0;
        }

        if progress {
            idle_rounds = 0;
        } else {
            idle_rounds += 1;
            if idle_rounds > 2 {
                break;
            }
        }
    }
    traffic
}

fn open_both(a: &mut Endpoint<'_>, b: &mut Endpoint<'_>) {
    a.open().unwrap();
    b.open().unwrap();
    pump(a, b);
}

#[test]
fn opens_with_static_addresses_and_dns() {
    let dir = Directory;
    let mut client = Endpoint::new(client_config(Auth::None));
    let mut server = Endpoint::new(server_config(&dir, AuthProtocol::None));

    open_both(&mut client, &mut server);

    assert_eq!(client.status().phase, Phase::Open);
    assert_eq!(server.status().phase, Phase::Open);
    assert!(client.status().authenticated);

    let ipv4 = client.status().ipv4.unwrap();
    assert_eq!(ipv4.address, Some(Ipv4Addr::new(10, 0, 0, 2)));
    assert_eq!(ipv4.peer_address, Some(Ipv4Addr::new(10, 0, 0, 1)));
    assert_eq!(ipv4.dns_servers[0], Some(Ipv4Addr::new(8, 8, 8, 8)));
    assert_eq!(ipv4.dns_servers[1], Some(Ipv4Addr::new(8, 8, 4, 4)));

    let ipv4 = server.status().ipv4.unwrap();
    assert_eq!(ipv4.address, Some(Ipv4Addr::new(10, 0, 0, 1)));
    assert_eq!(ipv4.peer_address, Some(Ipv4Addr::new(10, 0, 0, 2)));
}

#[test]
fn pap_authentication_succeeds() {
    let dir = Directory;
    let mut client = Endpoint::new(client_config(Auth::Pap {
        username: b"user",
        password: b"secret",
    }));
    let mut server = Endpoint::new(server_config(&dir, AuthProtocol::Pap));

    open_both(&mut client, &mut server);

    assert_eq!(client.status().phase, Phase::Open);
    assert_eq!(server.status().phase, Phase::Open);
    assert!(server.status().authenticated);
}

#[test]
fn pap_wrong_password_never_opens() {
    let dir = Directory;
    let mut client = Endpoint::new(client_config(Auth::Pap {
        username: b"user",
        password: b"wrong",
    }));
    let mut server = Endpoint::new(server_config(&dir, AuthProtocol::Pap));

    client.open().unwrap();
    server.open().unwrap();
    pump(&mut client, &mut server);

    assert_ne!(client.status().phase, Phase::Open);
    assert_ne!(server.status().phase, Phase::Open);
    assert!(!server.status().authenticated);
}

#[test]
fn chap_authentication_succeeds() {
    let dir = Directory;
    let mut client = Endpoint::new(client_config(Auth::Chap {
        name: b"client",
        secret: b"pw",
    }));
    let mut server = Endpoint::new(server_config(&dir, AuthProtocol::Chap));

    open_both(&mut client, &mut server);

    assert_eq!(client.status().phase, Phase::Open);
    assert_eq!(server.status().phase, Phase::Open);
    assert!(server.status().authenticated);
    assert!(client.status().authenticated);
}

#[test]
fn chap_wrong_secret_fails_link() {
    let dir = Directory;
    let mut client = Endpoint::new(client_config(Auth::Chap {
        name: b"client",
        secret: b"not-pw",
    }));
    let mut server = Endpoint::new(server_config(&dir, AuthProtocol::Chap));

    client.open().unwrap();
    server.open().unwrap();
    pump(&mut client, &mut server);

    assert_eq!(server.status().phase, Phase::Failed);
    assert!(!server.status().authenticated);
}

#[test]
fn chap_rechallenge_keeps_link_up() {
    let dir = Directory;
    let mut client = Endpoint::new(client_config(Auth::Chap {
        name: b"client",
        secret: b"pw",
    }));
    let mut server = Endpoint::new(server_config(&dir, AuthProtocol::Chap));

    open_both(&mut client, &mut server);
    assert_eq!(server.status().phase, Phase::Open);

    let mut tx = [0u8; 256];
    match server.rechallenge(&mut tx) {
        PPPoSAction::Transmit(n) => {
            let bytes = tx[..n].to_vec();
            let consumed = client.consume(&bytes);
            assert_eq!(consumed, bytes.len());
        }
        _ => panic!("rechallenge should transmit"),
    }
    pump(&mut client, &mut server);

    assert_eq!(server.status().phase, Phase::Open);
    assert!(server.status().authenticated);
}

#[test]
fn datagrams_flow_both_ways() {
    let dir = Directory;
    let mut client = Endpoint::new(client_config(Auth::None));
    let mut server = Endpoint::new(server_config(&dir, AuthProtocol::None));
    open_both(&mut client, &mut server);

    // A small datagram, and one large enough to chain pool segments after
    // un-escaping (> 512-byte segment size).
    let small: Vec<u8> = (0u8..64).collect();
    let large: Vec<u8> = (0..900u32).map(|i| (i % 251) as u8).collect();

    let mut tx = [0u8; 4096];
    let n = client.send(&small, &mut tx).unwrap();
    let bytes = tx[..n].to_vec();
    let mut rest = &bytes[..];
    while !rest.is_empty() {
        let n = server.consume(rest);
        rest = &rest[n..];
    }
    let t = pump(&mut client, &mut server);
    assert_eq!(t.rx_b, vec![small.clone()]);

    let n = server.send(&large, &mut tx).unwrap();
    let bytes = tx[..n].to_vec();
    let mut rest = &bytes[..];
    while !rest.is_empty() {
        let n = client.consume(rest);
        rest = &rest[n..];
        if n == 0 {
            break;
        }
    }
    let t = pump(&mut client, &mut server);
    assert_eq!(t.rx_a, vec![large.clone()]);
}

#[test]
fn send_fails_before_link_up() {
    let mut client = Endpoint::new(client_config(Auth::None));
    let mut tx = [0u8; 256];
    assert_eq!(client.send(&[1, 2, 3], &mut tx), Err(SendError::NotConnected));
}

#[test]
fn echo_ping_round_trip() {
    let dir = Directory;
    let mut client = Endpoint::new(client_config(Auth::None));
    let mut server = Endpoint::new(server_config(&dir, AuthProtocol::None));
    open_both(&mut client, &mut server);

    let mut tx = [0u8; 256];
    let n = client.send_ping(b"probe", &mut tx).unwrap();
    assert!(client.ping_outstanding().is_some());

    let bytes = tx[..n].to_vec();
    let consumed = server.consume(&bytes);
    assert_eq!(consumed, bytes.len());
    pump(&mut client, &mut server);

    assert_eq!(client.ping_outstanding(), None);
}

#[test]
fn retransmits_then_fails_without_peer() {
    let mut client = Endpoint::new(client_config(Auth::None));
    client.open().unwrap();

    let mut tx = [0u8; 256];
    let first = match client.poll(&mut tx) {
        PPPoSAction::Transmit(n) => tx[..n].to_vec(),
        _ => panic!("expected initial configure-request"),
    };

    // Nobody answers: every timeout resends the identical frame, then the
    // machine gives up.
    let mut resends = 0;
    for _ in 0..60 {
        let mut tx = [0u8; 256];
        if let PPPoSAction::Transmit(n) = client.tick(&mut tx) {
            assert_eq!(&tx[..n], &first[..], "retransmit must be byte-identical");
            resends += 1;
        }
    }
    assert_eq!(resends, fast().lcp_max_retries as usize);
    assert_eq!(client.status().phase, Phase::Failed);

    // Recovery is explicit: restart and the first request goes out again.
    client.restart().unwrap();
    let mut tx = [0u8; 256];
    assert!(matches!(client.poll(&mut tx), PPPoSAction::Transmit(_)));
    assert_eq!(client.status().phase, Phase::Establish);
}

#[test]
fn peer_terminate_brings_link_down() {
    let dir = Directory;
    let mut client = Endpoint::new(client_config(Auth::None));
    let mut server = Endpoint::new(server_config(&dir, AuthProtocol::None));
    open_both(&mut client, &mut server);

    let mut tx = [0u8; 256];
    match server.close(&mut tx).unwrap() {
        PPPoSAction::Transmit(n) => {
            let bytes = tx[..n].to_vec();
            let consumed = client.consume(&bytes);
            assert_eq!(consumed, bytes.len());
        }
        _ => panic!("close should transmit a terminate-request"),
    }
    pump(&mut client, &mut server);

    assert_eq!(client.status().phase, Phase::Dead);
    assert_eq!(server.status().phase, Phase::Dead);
    assert!(client.status().ipv4.is_none());

    // Both sides can come back up afterwards.
    open_both(&mut client, &mut server);
    assert_eq!(client.status().phase, Phase::Open);
    assert_eq!(server.status().phase, Phase::Open);
}

#[test]
fn corrupted_frame_is_counted_and_ignored() {
    let dir = Directory;
    let mut client = Endpoint::new(client_config(Auth::None));
    let mut server = Endpoint::new(server_config(&dir, AuthProtocol::None));
    client.open().unwrap();

    let mut tx = [0u8; 256];
    let mut bytes = match client.poll(&mut tx) {
        PPPoSAction::Transmit(n) => tx[..n].to_vec(),
        _ => panic!("expected transmit"),
    };
    // Flip a payload bit; the FCS no longer matches.
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0x01;

    let consumed = server.consume(&bytes);
    assert_eq!(consumed, bytes.len());
    let mut tx = [0u8; 256];
    server.poll(&mut tx);

    assert_eq!(server.counters().crc_errors, 1);
    assert_eq!(server.counters().frames_in, 0);
}
