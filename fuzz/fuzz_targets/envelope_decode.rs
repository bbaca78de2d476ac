#![no_main]

use libfuzzer_sys::fuzz_target;

use cosim_wire::Envelope;

fuzz_target!(|data: &[u8]| {
    // Anything that decodes must re-encode into something decodable
    if let Ok(envelope) = Envelope::decode(data) {
        let bytes = envelope.encode().expect("decoded envelope re-encodes");
        let again = Envelope::decode(&bytes).expect("re-encoded envelope decodes");
        assert_eq!(again.kind(), envelope.kind());
        assert_eq!(again.sender(), envelope.sender());
    }
});
