#![no_main]

//! Fuzz target for marker extraction
//!
//! Feeds arbitrary bytes to every codec and to the verifier. Extraction must
//! never panic; a damaged container is simply "no marker".
//!
//! Run with: cargo +nightly fuzz run fuzz_extract

use libfuzzer_sys::fuzz_target;
use meve_core::formats::{ContainerCodec, DocxCodec, JpegCodec, PdfCodec, PngCodec};

fuzz_target!(|data: &[u8]| {
    let _ = PdfCodec.extract(data);
    let _ = PngCodec.extract(data);
    let _ = JpegCodec.extract(data);
    let _ = DocxCodec.extract(data);
    let _ = meve_core::marker::decode_bytes(data);

    let report = meve_core::verify::verify(data, Some(data));
    let _ = report.summary();
});
