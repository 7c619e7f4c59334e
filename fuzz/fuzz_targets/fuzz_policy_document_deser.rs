// SPDX-License-Identifier: MIT OR Apache-2.0
#![no_main]
use libfuzzer_sys::fuzz_target;
use peac_policy::PolicyDocument;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(doc) = serde_json::from_str::<PolicyDocument>(s) {
            let _ = doc.validate();
        }
    }
});
