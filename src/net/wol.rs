//! Wake-on-LAN: a UDP broadcast of six `0xff` bytes followed by sixteen
//! copies of the target MAC address.

use std::io;
use std::net::UdpSocket;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WolError {
    #[error("bad mac address '{0}'")]
    BadMac(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

fn parse_mac(mac: &str) -> Result<[u8; 6], WolError> {
    let parts: Vec<&str> = mac.split([':', '-']).collect();
    if parts.len() != 6 {
        return Err(WolError::BadMac(mac.to_owned()));
    }

    let mut bytes = [0u8; 6];
    for (slot, part) in bytes.iter_mut().zip(parts) {
        *slot = u8::from_str_radix(part, 16).map_err(|_| WolError::BadMac(mac.to_owned()))?;
    }

    Ok(bytes)
}

fn magic_packet(mac: [u8; 6]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(6 + 16 * 6);
    packet.extend_from_slice(&[0xff; 6]);
    for _ in 0..16 {
        packet.extend_from_slice(&mac);
    }
    packet
}

/// Broadcasts the magic packet for `mac` on UDP port 9.
pub fn wake_on_lan(mac: &str) -> Result<(), WolError> {
    let packet = magic_packet(parse_mac(mac)?);

    let socket = UdpSocket::bind(("0.0.0.0", 0))?;
    socket.set_broadcast(true)?;
    socket.send_to(&packet, ("255.255.255.255", 9))?;

    log::info!("sent wake-on-lan packet to {}", mac);
    Ok(())
}
