//! UDP ASSOCIATE support for SOCKS5
//!
//! Packet codec for the SOCKS5 UDP header and the datagram relay.

mod packet;
mod relay;

pub use packet::{encode_udp_packet, parse_udp_packet, UdpPacket};
pub use relay::UdpRelay;
