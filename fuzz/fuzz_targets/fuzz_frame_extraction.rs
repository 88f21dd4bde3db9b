#![no_main]

use libfuzzer_sys::fuzz_target;
use phira_lobby_server::codec::try_extract_frame;

fuzz_target!(|data: &[u8]| {
    // try_extract_frame must never panic on arbitrary bytes, regardless of
    // how the VarInt length prefix or the claimed payload length relates to
    // what's actually in the buffer.
    let _ = try_extract_frame(data);
});
