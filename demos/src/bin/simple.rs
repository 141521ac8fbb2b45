#[path = "../serial_port.rs"]
mod serial_port;

use clap::Parser;
use std::io::{Read, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use nix::sys::termios::BaudRate;
use ppplink::{Auth, Config, PPPoS, PPPoSAction, Role};
use serial_port::SerialPort;

#[derive(Parser)]
struct Opts {
    #[clap(short, long)]
    device: String,
    #[clap(short, long)]
    username: Option<String>,
    #[clap(short, long)]
    password: Option<String>,
    /// Modem dial string sent before PPP starts, e.g. "ATD*99#\r"
    #[clap(long)]
    dial: Option<String>,
}

const TICK: Duration = Duration::from_millis(100);

fn main() {
    env_logger::init();

    let opts: Opts = Opts::parse();
    let mut port = SerialPort::new(Path::new(&opts.device), BaudRate::B115200).unwrap();
    port.set_nonblocking(true).unwrap();

    let username = opts.username.unwrap_or_default().into_bytes();
    let password = opts.password.unwrap_or_default().into_bytes();

    let mut config = Config::new(Role::Client);
    if !username.is_empty() {
        config.auth = Auth::Pap {
            username: &username,
            password: &password,
        };
    }

    let mut ppp: PPPoS<'_> = PPPoS::new(config);
    if let Some(dial) = &opts.dial {
        ppp.send_raw(dial.as_bytes()).unwrap();
    }
    ppp.open().unwrap();

    let mut tx_buf = [0; 2048];
    let mut pkt_buf = [0; 2048];
    let mut read_buf = [0; 2048];
    let mut data: &[u8] = &[];
    let mut last_tick = Instant::now();
    let mut was_up = false;

    loop {
        // Poll the ppp
        match ppp.poll(&mut tx_buf) {
            PPPoSAction::None => {}
            PPPoSAction::Transmit(n) => port.write_all(&tx_buf[..n]).unwrap(),
            PPPoSAction::Noise(noise) => {
                log::info!("modem says: {}", String::from_utf8_lossy(&noise).trim())
            }
            PPPoSAction::Received(frame) => {
                let n = ppp.read_received(frame, &mut pkt_buf);
                let pkt = &mut pkt_buf[..n];
                log::debug!("received packet: {:x?}", pkt);

                // Toy code to reply to pings with no error handling whatsoever.
                let header_len = (pkt[0] & 0x0f) as usize * 4;
                let proto = pkt[9];
                if proto == 1 {
                    // ICMP packet
                    let icmp_type = pkt[header_len];
                    let icmp_code = pkt[header_len + 1];

                    if icmp_type == 8 && icmp_code == 0 {
                        // ICMP Echo Request

                        // Transform to echo response
                        pkt[header_len] = 0;

                        // Fix checksum
                        pkt[header_len + 2] = 0;
                        pkt[header_len + 3] = 0;
                        let c = !checksum(&pkt[header_len..]);
                        pkt[header_len + 2..][..2].copy_from_slice(&c.to_be_bytes());

                        // Swap source and dest addresses
                        let mut src_addr = [0; 4];
                        let mut dst_addr = [0; 4];
                        src_addr.copy_from_slice(&pkt[12..16]);
                        dst_addr.copy_from_slice(&pkt[16..20]);
                        pkt[12..16].copy_from_slice(&dst_addr);
                        pkt[16..20].copy_from_slice(&src_addr);

                        // Send it!
                        let n = ppp.send(pkt, &mut tx_buf).unwrap();
                        port.write_all(&tx_buf[..n]).unwrap();

                        log::info!("replied to ping!");
                    }
                }
            }
        }

        // Base tick for the retransmit timers.
        if last_tick.elapsed() >= TICK {
            last_tick += TICK;
            if let PPPoSAction::Transmit(n) = ppp.tick(&mut tx_buf) {
                port.write_all(&tx_buf[..n]).unwrap();
            }
        }

        let status = ppp.status();
        if status.phase == ppplink::Phase::Open && !was_up {
            was_up = true;
            log::info!("link up: {:?}", status.ipv4);
        }

        // If we have no data, read some.
        if data.is_empty() {
            match port.read(&mut read_buf) {
                Ok(n) => data = &read_buf[..n],
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    data = &[];
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(e) => panic!("serial read: {}", e),
            }
        }

        // Consume some data, saving the rest for later
        let n = ppp.consume(data);
        data = &data[n..];
    }
}

fn propagate_carries(word: u32) -> u16 {
    let sum = (word >> 16) + (word & 0xffff);
    ((sum >> 16) as u16) + (sum as u16)
}

/// Compute an RFC 1071 compliant checksum (without the final complement).
fn checksum(data: &[u8]) -> u16 {
    let mut accum = 0;

    for c in data.chunks(2) {
        let x = if c.len() == 2 {
            (c[0] as u32) << 8 | (c[1] as u32)
        } else {
            (c[0] as u32) << 8
        };

        accum += x;
    }

    propagate_carries(accum)
}
