//! Helpers shared by the tests of several modules: client-side encodings of
//! the wire protocol and SGR stripping for message assertions.

use crate::codec;

/// The client-side name handshake: a length prefix and the raw name bytes.
pub fn name_handshake(name: &str) -> Vec<u8> {
    let mut bytes = Vec::new();
    codec::put_int(&mut bytes, name.len() as u32);
    bytes.extend_from_slice(name.as_bytes());
    bytes
}

/// A complete client-side chat packet: outer length, packet id 0, string.
pub fn chat_packet(text: &str) -> Vec<u8> {
    client_packet(0, text)
}

/// A complete client-side command packet: outer length, packet id 1, string.
pub fn command_packet(text: &str) -> Vec<u8> {
    client_packet(1, text)
}

fn client_packet(packet_id: u32, text: &str) -> Vec<u8> {
    let mut payload = Vec::new();
    codec::put_int(&mut payload, packet_id);
    codec::put_string(&mut payload, text);

    let mut packet = Vec::new();
    codec::put_int(&mut packet, payload.len() as u32);
    packet.extend_from_slice(&payload);
    packet
}

/// Remove all SGR escape sequences, leaving the plain message text.
pub fn strip_sgr(s: &str) -> String {
    let mut plain = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            for escaped in chars.by_ref() {
                if escaped == 'm' {
                    break;
                }
            }
        } else {
            plain.push(c);
        }
    }
    plain
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_sgr() {
        assert_eq!(strip_sgr("\x1b[0m\x1b[33;1mhi\x1b[0m there"), "hi there");
        assert_eq!(strip_sgr("plain"), "plain");
    }

    #[test]
    fn test_chat_packet_layout() {
        assert_eq!(
            chat_packet("hi"),
            b"\x0A\x00\x00\x00\x00\x00\x00\x00\x02\x00\x00\x00hi"
        );
    }
}
