use heapless::Vec;
use num_enum::{FromPrimitive, IntoPrimitive};

pub(crate) const MAX_OPTIONS: usize = 8;
pub(crate) const MAX_OPTION_LEN: usize = 16;

#[derive(FromPrimitive, IntoPrimitive, Copy, Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub(crate) enum ProtocolType {
    #[num_enum(default)]
    Unknown = 0,
    /// Link Control Protocol, rfc1661
    LCP = 0xc021,
    /// Password Authentication Protocol, rfc1334
    PAP = 0xc023,
    /// Challenge Handshake Authentication Protocol, rfc1994
    CHAP = 0xc223,
    /// Internet Protocol v4
    IPv4 = 0x0021,
    /// Internet Protocol v4 Control Protocol, rfc1332
    IPv4CP = 0x8021,
}

#[derive(FromPrimitive, IntoPrimitive, Copy, Clone, Eq, PartialEq, Debug, Ord, PartialOrd)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub(crate) enum Code {
    #[num_enum(default)]
    Unknown = 0,
    ConfigureReq = 1,
    ConfigureAck = 2,
    ConfigureNack = 3,
    ConfigureRej = 4,
    TerminateReq = 5,
    TerminateAck = 6,
    CodeRej = 7,
    ProtocolRej = 8,
    EchoReq = 9,
    EchoReply = 10,
    DiscardReq = 11,
}

pub(crate) struct Packet<'a> {
    pub proto: ProtocolType,
    pub payload: Payload<'a>,
}

impl<'a> Packet<'a> {
    pub fn buffer_len(&self) -> usize {
        2 + self.payload.buffer_len()
    }

    pub fn emit(&self, buffer: &mut [u8]) {
        let proto: u16 = self.proto.into();
        buffer[0..2].copy_from_slice(&proto.to_be_bytes());
        self.payload.emit(&mut buffer[2..])
    }
}

pub(crate) enum Payload<'a> {
    Raw(&'a [u8]),
    PPP(u8, u8, PPPPayload<'a>),
}

impl<'a> Payload<'a> {
    pub fn buffer_len(&self) -> usize {
        match self {
            Self::Raw(data) => data.len(),
            Self::PPP(_code, _id, payload) => 1 + 1 + 2 + payload.buffer_len(),
        }
    }

    pub fn emit(&self, buffer: &mut [u8]) {
        match self {
            Self::Raw(data) => buffer[..data.len()].copy_from_slice(data),
            Self::PPP(code, id, payload) => {
                buffer[0] = *code;
                buffer[1] = *id;
                let len = payload.buffer_len() as u16 + 4;
                buffer[2..4].copy_from_slice(&len.to_be_bytes());
                payload.emit(&mut buffer[4..])
            }
        }
    }
}

pub(crate) enum PPPPayload<'a> {
    Raw(&'a [u8]),
    /// PAP credentials: length-prefixed username, length-prefixed password.
    Pap(&'a [u8], &'a [u8]),
    /// CHAP challenge/response: length-prefixed value, then the bare name.
    Chap(&'a [u8], &'a [u8]),
    Options(Options),
}

impl<'a> PPPPayload<'a> {
    pub fn buffer_len(&self) -> usize {
        match self {
            Self::Raw(data) => data.len(),
            Self::Pap(user, pass) => 1 + user.len() + 1 + pass.len(),
            Self::Chap(value, name) => 1 + value.len() + name.len(),
            Self::Options(options) => options.buffer_len(),
        }
    }

    pub fn emit(&self, buffer: &mut [u8]) {
        match self {
            Self::Raw(data) => buffer[..data.len()].copy_from_slice(data),
            Self::Pap(user, pass) => {
                buffer[0] = user.len() as u8;
                buffer[1..][..user.len()].copy_from_slice(user);
                buffer[1 + user.len()] = pass.len() as u8;
                buffer[1 + user.len() + 1..][..pass.len()].copy_from_slice(pass);
            }
            Self::Chap(value, name) => {
                buffer[0] = value.len() as u8;
                buffer[1..][..value.len()].copy_from_slice(value);
                buffer[1 + value.len()..][..name.len()].copy_from_slice(name);
            }
            Self::Options(options) => options.emit(buffer),
        }
    }
}

pub(crate) struct Options(pub Vec<OptionVal, MAX_OPTIONS>);

impl Options {
    pub fn buffer_len(&self) -> usize {
        self.0.iter().map(|opt| opt.buffer_len()).sum()
    }

    pub fn emit(&self, mut buffer: &mut [u8]) {
        for o in &self.0 {
            let len = o.buffer_len();
            o.emit(&mut buffer[..len]);
            buffer = &mut buffer[len..];
        }
    }
}

pub(crate) struct OptionVal {
    code: u8,
    data: Vec<u8, MAX_OPTION_LEN>,
}

impl OptionVal {
    pub fn new(code: u8, data: &[u8]) -> Self {
        Self {
            code,
            data: unwrap!(Vec::from_slice(data)),
        }
    }

    pub fn buffer_len(&self) -> usize {
        2 + self.data.len()
    }

    pub fn emit(&self, buffer: &mut [u8]) {
        buffer[0] = self.code;
        buffer[1] = self.data.len() as u8 + 2;
        buffer[2..][..self.data.len()].copy_from_slice(&self.data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_configure_request() {
        let mut opts = Vec::new();
        opts.push(OptionVal::new(1, &[0x05, 0xdc])).ok().unwrap();
        opts.push(OptionVal::new(2, &[0, 0, 0, 0])).ok().unwrap();
        let pkt = Packet {
            proto: ProtocolType::LCP,
            payload: Payload::PPP(Code::ConfigureReq.into(), 7, PPPPayload::Options(Options(opts))),
        };

        let mut buf = [0; 64];
        let len = pkt.buffer_len();
        pkt.emit(&mut buf[..len]);

        assert_eq!(
            &buf[..len],
            &[
                0xc0, 0x21, // LCP
                0x01, 0x07, // configure-request, id 7
                0x00, 0x0e, // length 14
                0x01, 0x04, 0x05, 0xdc, // MRU 1500
                0x02, 0x06, 0x00, 0x00, 0x00, 0x00, // asyncmap 0
            ]
        );
    }

    #[test]
    fn emit_pap_request() {
        let pkt = Packet {
            proto: ProtocolType::PAP,
            payload: Payload::PPP(1, 3, PPPPayload::Pap(b"user", b"pw")),
        };
        let mut buf = [0; 32];
        let len = pkt.buffer_len();
        pkt.emit(&mut buf[..len]);
        assert_eq!(
            &buf[..len],
            &[0xc0, 0x23, 0x01, 0x03, 0x00, 0x0c, 0x04, b'u', b's', b'e', b'r', 0x02, b'p', b'w']
        );
    }

    #[test]
    fn emit_chap_response() {
        let value = [0xaa; 16];
        let pkt = Packet {
            proto: ProtocolType::CHAP,
            payload: Payload::PPP(2, 7, PPPPayload::Chap(&value, b"cli")),
        };
        let mut buf = [0; 64];
        let len = pkt.buffer_len();
        pkt.emit(&mut buf[..len]);
        assert_eq!(len, 2 + 4 + 1 + 16 + 3);
        assert_eq!(buf[..2], [0xc2, 0x23]);
        assert_eq!(buf[2..4], [0x02, 0x07]);
        assert_eq!(buf[4..6], [0x00, 0x18]); // 4 + 1 + 16 + 3
        assert_eq!(buf[6], 16);
        assert_eq!(buf[7..23], [0xaa; 16]);
        assert_eq!(&buf[23..26], b"cli");
    }
}
