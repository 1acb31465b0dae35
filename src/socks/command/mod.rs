//! SOCKS5 command handling
//!
//! Request parsing and reply building.

mod parser;
mod reply;

pub use parser::{read_address, read_command, CommandError, CommandMessage};
pub use reply::{
    read_command_response, reply_bytes, send_failure, send_success, write_command_response,
    CommandResponse,
};
