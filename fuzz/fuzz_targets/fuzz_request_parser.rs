#![no_main]
use cryo_core::ChannelCommand;
use cryo_core::mocks::ScriptedCommands;
use cryo_core::protocol::MAX_REQUEST_BYTES;
use cryo_core::server::handle_request;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(line) = std::str::from_utf8(data) else {
        return;
    };
    // Anything that parses must encode to a line that parses to the same command.
    if let Ok(cmd) = ChannelCommand::parse(line) {
        let encoded = cmd.to_line();
        if encoded.len() <= MAX_REQUEST_BYTES {
            assert_eq!(ChannelCommand::parse(&encoded).as_ref(), Ok(&cmd));
        }
    }
    let reply = handle_request(line, &ScriptedCommands::new());
    assert!(reply == "0" || reply == "1" || reply.starts_with('{'));
});
