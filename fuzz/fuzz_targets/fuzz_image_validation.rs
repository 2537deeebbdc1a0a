//! Fuzz testing for image payload validation.
//!
//! Feeds arbitrary bytes to the validator both as a raw payload string and
//! as base64 of the bytes, so the decoders see hostile image data. The
//! validator must never panic and must never return an image wider than
//! its configured maximum.
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! cargo +nightly install cargo-fuzz
//! cargo +nightly fuzz run fuzz_image_validation -- -max_total_time=60
//! ```

#![no_main]

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use frbox::validation::{ImageValidator, strip_data_url};
use libfuzzer_sys::fuzz_target;

const MAX_WIDTH: u32 = 64;

fuzz_target!(|data: &[u8]| {
    let validator = ImageValidator::new(256 * 1024, MAX_WIDTH);

    if let Ok(s) = std::str::from_utf8(data) {
        let _ = strip_data_url(s);
        let _ = validator.validate(s);
    }

    if let Ok(image) = validator.validate(&STANDARD.encode(data)) {
        assert!(image.width() <= MAX_WIDTH);
        assert!(image.width() >= 1 && image.height() >= 1);
    }
});
