//! Wildcard DNS responder for the captive portal.
//!
//! Every A query is answered with the access point address, so whatever a
//! client tries to resolve ends up at the configuration page.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};

use tokio::net::UdpSocket;

const HEADER_LEN: usize = 12;
const MAX_PACKET: usize = 512;
const ANSWER_LEN: usize = 16;
const TTL_SECS: u32 = 60;

const TYPE_A: u16 = 1;
const TYPE_ANY: u16 = 255;
const CLASS_IN: u16 = 1;
const CLASS_ANY: u16 = 255;

/// Builds the reply to `query` in `out` and returns its length.
///
/// Returns `None` for packets that should be dropped: responses, opcodes
/// other than a standard query, anything but exactly one question, or a
/// malformed question name.
pub fn answer(query: &[u8], ip: Ipv4Addr, out: &mut [u8; MAX_PACKET]) -> Option<usize> {
    if query.len() < HEADER_LEN {
        return None;
    }
    let flags = query[2];
    if flags & 0x80 != 0 || (flags >> 3) & 0x0F != 0 {
        return None;
    }
    if u16::from_be_bytes([query[4], query[5]]) != 1 {
        return None;
    }

    let mut pos = HEADER_LEN;
    loop {
        let label = *query.get(pos)? as usize;
        if label & 0xC0 != 0 {
            return None;
        }
        pos += 1;
        if label == 0 {
            break;
        }
        pos += label;
    }
    let question_end = pos + 4;
    if question_end > query.len() || question_end + ANSWER_LEN > MAX_PACKET {
        return None;
    }
    let qtype = u16::from_be_bytes([query[pos], query[pos + 1]]);
    let qclass = u16::from_be_bytes([query[pos + 2], query[pos + 3]]);
    let answered = matches!(qtype, TYPE_A | TYPE_ANY) && matches!(qclass, CLASS_IN | CLASS_ANY);

    out[..question_end].copy_from_slice(&query[..question_end]);
    // QR + AA, keep RD; RA clear, RCODE 0
    out[2] = 0x84 | (flags & 0x01);
    out[3] = 0x00;
    out[6..8].copy_from_slice(&u16::from(answered).to_be_bytes());
    out[8..12].fill(0);

    if !answered {
        return Some(question_end);
    }

    let mut rr = [0u8; ANSWER_LEN];
    // name: pointer to the question at offset 12
    rr[0] = 0xC0;
    rr[1] = 0x0C;
    rr[2..4].copy_from_slice(&TYPE_A.to_be_bytes());
    rr[4..6].copy_from_slice(&CLASS_IN.to_be_bytes());
    rr[6..10].copy_from_slice(&TTL_SECS.to_be_bytes());
    rr[10..12].copy_from_slice(&4u16.to_be_bytes());
    rr[12..16].copy_from_slice(&ip.octets());
    out[question_end..question_end + ANSWER_LEN].copy_from_slice(&rr);

    Some(question_end + ANSWER_LEN)
}

pub struct DnsResponder {
    socket: UdpSocket,
    answer_ip: Ipv4Addr,
    rx: [u8; MAX_PACKET],
    tx: [u8; MAX_PACKET],
}

impl DnsResponder {
    pub async fn bind(addr: SocketAddr, answer_ip: Ipv4Addr) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        log::info!(
            "DNS server started on {} - responding with {}",
            socket.local_addr()?,
            answer_ip
        );
        Ok(Self {
            socket,
            answer_ip,
            rx: [0; MAX_PACKET],
            tx: [0; MAX_PACKET],
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Waits for one query and answers it.
    pub async fn serve_next(&mut self) -> io::Result<()> {
        let (len, remote) = self.socket.recv_from(&mut self.rx).await?;
        match answer(&self.rx[..len], self.answer_ip, &mut self.tx) {
            Some(n) => {
                self.socket.send_to(&self.tx[..n], remote).await?;
                log::debug!("DNS query from {} answered with {}", remote, self.answer_ip);
            }
            None => log::debug!("Dropping {} byte DNS packet from {}", len, remote),
        }
        Ok(())
    }
}
