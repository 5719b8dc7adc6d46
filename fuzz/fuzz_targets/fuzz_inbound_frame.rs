#![no_main]

use libfuzzer_sys::fuzz_target;
use speaking_presence::protocol::{Frame, InboundEvent};
use speaking_presence::{PresenceStore, Session, SessionOptions};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(frame) = Frame::decode(text) else {
        return;
    };

    // Decoding never panics, and neither does feeding the result to a session.
    let event = InboundEvent::from(frame);
    let mut session = Session::new(PresenceStore::new(), SessionOptions::default());
    let _ = session.handle_inbound(&InboundEvent::Connect);
    let _ = session.handle_inbound(&event);
});
