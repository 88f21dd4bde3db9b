#![no_main]

use libfuzzer_sys::fuzz_target;
use phira_lobby_server::protocol::InboundPacket;

fuzz_target!(|data: &[u8]| {
    // Any byte string that survives frame extraction is handed straight to
    // the packet decoder by a real connection, so this should never panic
    // even on a malformed or truncated payload.
    let _ = InboundPacket::decode(data);
});
