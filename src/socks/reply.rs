//! SOCKS5 reply encoder
//!
//! Constructs SOCKS5 reply frames.

use super::consts::*;
use crate::error::ReplyCode;
use bytes::{BufMut, BytesMut};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Bound address sent with failures and intercepted requests
pub const UNSPECIFIED_BIND_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);

/// Encode a reply frame
///
/// # SOCKS5 Reply Format
///
/// ```text
/// +----+-----+-------+------+----------+----------+
/// |VER | REP |  RSV  | ATYP | BND.ADDR | BND.PORT |
/// +----+-----+-------+------+----------+----------+
/// | 1  |  1  | X'00' |  1   | Variable |    2     |
/// +----+-----+-------+------+----------+----------+
/// ```
///
/// The frame is 10 bytes for an IPv4 address and 22 for IPv6.
pub fn encode_reply(code: ReplyCode, bind_addr: SocketAddr) -> BytesMut {
    let mut reply = BytesMut::with_capacity(22);
    reply.put_u8(SOCKS5_VERSION);
    reply.put_u8(code.into());
    reply.put_u8(SOCKS5_RESERVED);

    // IPv4-mapped IPv6 addresses are announced in their 4-byte form
    match bind_addr.ip().to_canonical() {
        IpAddr::V4(ip) => {
            reply.put_u8(SOCKS5_ADDR_TYPE_IPV4);
            reply.put_slice(&ip.octets());
        }
        IpAddr::V6(ip) => {
            reply.put_u8(SOCKS5_ADDR_TYPE_IPV6);
            reply.put_slice(&ip.octets());
        }
    }
    reply.put_u16(bind_addr.port());

    reply
}

/// Encode and send a reply frame
pub async fn write_reply<S>(stream: &mut S, code: ReplyCode, bind_addr: SocketAddr) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin + ?Sized,
{
    let reply = encode_reply(code, bind_addr);
    stream.write_all(&reply).await?;
    stream.flush().await
}

/// Encode the method selection reply (`VER METHOD`)
pub fn encode_method_selection(method: u8) -> [u8; 2] {
    [SOCKS5_VERSION, method]
}
