#![no_main]

//! Fuzz target for binary signed-record decoding
//!
//! Decoding is bounds-checked; any record that decodes must re-encode to the
//! same bytes.
//!
//! Run with: cargo +nightly fuzz run fuzz_signed_record

use libfuzzer_sys::fuzz_target;
use meve_core::SignedRecord;

fuzz_target!(|data: &[u8]| {
    if let Ok(record) = SignedRecord::from_bytes(data) {
        let encoded = record.to_bytes().expect("decoded record re-encodes");
        assert_eq!(encoded.as_slice(), data);
        let _ = meve_core::verify::verify_record(&record, None, &[0u8; 32]);
    }
});
