use num_enum::{FromPrimitive, IntoPrimitive};

use super::option_fsm::{Protocol, Verdict};
use crate::config::AuthProtocol;
use crate::wire::ProtocolType;

#[derive(FromPrimitive, IntoPrimitive, Copy, Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
enum Option {
    #[num_enum(default)]
    Unknown = 0,
    Mru = 1,
    Asyncmap = 2,
    Auth = 3,
    Magic = 5,
    Pfc = 7,
    Acfc = 8,
}

pub(crate) const MRU_DEFAULT: u16 = 1500;
/// Smallest MRU we'll let a peer talk us down to.
pub(crate) const MRU_FLOOR: u16 = 128;

const MRU_DEFAULT_BYTES: [u8; 2] = MRU_DEFAULT.to_be_bytes();
const AUTH_PAP: [u8; 2] = [0xc0, 0x23];
const AUTH_CHAP_MD5: [u8; 3] = [0xc2, 0x23, 0x05];

pub(crate) struct Lcp {
    /// MRU we advertise; adjusted by peer naks, floored at [`MRU_FLOOR`].
    pub mru: u16,
    mru_rej: bool,
    /// Largest frame the peer is willing to receive.
    pub peer_mru: u16,

    pub asyncmap_remote: u32,
    pub asyncmap: u32,
    asyncmap_rej: bool,

    /// What we are able to present, per our configured credentials.
    can_generate: AuthProtocol,
    /// What we demand the peer presents.
    demand: AuthProtocol,
    demand_rej: bool,
    /// Peer refused to authenticate itself (naked or rejected our demand).
    pub auth_refused: bool,

    /// Authentication the peer demands from us, from its configure-request.
    pub auth_required: AuthProtocol,
}

impl Lcp {
    pub fn new(can_generate: AuthProtocol, demand: AuthProtocol, mru: u16) -> Self {
        Self {
            mru,
            mru_rej: false,
            peer_mru: MRU_DEFAULT,
            asyncmap_remote: 0xFFFFFFFF,
            asyncmap: 0x00000000,
            asyncmap_rej: false,
            can_generate,
            demand,
            demand_rej: false,
            auth_refused: false,
            auth_required: AuthProtocol::None,
        }
    }
}

impl Protocol for Lcp {
    fn protocol(&self) -> ProtocolType {
        ProtocolType::LCP
    }

    fn peer_options_start(&mut self) {
        self.auth_required = AuthProtocol::None;
        self.peer_mru = MRU_DEFAULT;
    }

    fn peer_option_received(&mut self, code: u8, data: &[u8]) -> Verdict {
        let opt = Option::from(code);
        trace!("LCP: rx option {:?} {:?} {:?}", code, opt, data);
        match opt {
            Option::Unknown => Verdict::Rej,
            Option::Mru => match <[u8; 2]>::try_from(data) {
                Ok(raw) => {
                    let mru = u16::from_be_bytes(raw);
                    if mru < MRU_FLOOR {
                        Verdict::Nack(&MRU_DEFAULT_BYTES)
                    } else {
                        self.peer_mru = mru;
                        Verdict::Ack
                    }
                }
                Err(_) => Verdict::Rej,
            },
            Option::Asyncmap => match <[u8; 4]>::try_from(data) {
                Ok(raw) => {
                    self.asyncmap_remote = u32::from_be_bytes(raw);
                    Verdict::Ack
                }
                Err(_) => Verdict::Rej,
            },
            Option::Auth => {
                // The peer asks us to authenticate ourselves. Accept only a
                // protocol we hold credentials for, otherwise hint at the
                // one we do support.
                let is_pap = data == AUTH_PAP;
                let is_chap_md5 = data.len() >= 3 && data[..2] == AUTH_CHAP_MD5[..2] && data[2] == 0x05;
                match self.can_generate {
                    AuthProtocol::Pap if is_pap => {
                        self.auth_required = AuthProtocol::Pap;
                        Verdict::Ack
                    }
                    AuthProtocol::Chap if is_chap_md5 => {
                        self.auth_required = AuthProtocol::Chap;
                        Verdict::Ack
                    }
                    AuthProtocol::Pap => Verdict::Nack(&AUTH_PAP),
                    AuthProtocol::Chap => Verdict::Nack(&AUTH_CHAP_MD5),
                    AuthProtocol::None => Verdict::Rej,
                }
            }
            // Accepted and otherwise ignored: we detect loops by never
            // emitting a magic number, and we never compress headers.
            Option::Magic => Verdict::Ack,
            Option::Pfc => Verdict::Ack,
            Option::Acfc => Verdict::Ack,
        }
    }

    fn own_options(&mut self, mut f: impl FnMut(u8, &[u8])) {
        if !self.mru_rej {
            f(Option::Mru.into(), &self.mru.to_be_bytes());
        }
        if !self.asyncmap_rej {
            f(Option::Asyncmap.into(), &self.asyncmap.to_be_bytes());
        }
        if self.demand != AuthProtocol::None && !self.demand_rej {
            match self.demand {
                AuthProtocol::Pap => f(Option::Auth.into(), &AUTH_PAP),
                AuthProtocol::Chap => f(Option::Auth.into(), &AUTH_CHAP_MD5),
                AuthProtocol::None => {}
            }
        }
    }

    fn own_option_nacked(&mut self, code: u8, data: &[u8], is_rej: bool) {
        let opt = Option::from(code);
        trace!("LCP nak {:?} {:?} {:?} {:?}", code, opt, data, is_rej);
        match opt {
            Option::Mru => {
                if is_rej {
                    self.mru_rej = true;
                } else {
                    match <[u8; 2]>::try_from(data) {
                        Ok(raw) => {
                            let hint = u16::from_be_bytes(raw);
                            self.mru = if hint >= MRU_FLOOR { hint } else { MRU_DEFAULT };
                        }
                        Err(_) => self.mru_rej = true,
                    }
                }
            }
            Option::Asyncmap => {
                if !is_rej && data.len() == 4 {
                    self.asyncmap = u32::from_be_bytes(unwrap!(data.try_into()));
                } else {
                    self.asyncmap_rej = true;
                }
            }
            Option::Auth => {
                // The peer won't authenticate itself the way we asked.
                // Surfaced through the status so the owner can decide to
                // drop the link.
                warn!("LCP: peer refused our authentication demand");
                self.auth_refused = true;
                self.demand_rej = true;
            }
            _ => {}
        }
    }
}
