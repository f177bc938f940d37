// tinysip - minimal SIP B2BUA signaling server
// SPDX-License-Identifier: Apache-2.0 OR MIT

#![no_main]
use libfuzzer_sys::fuzz_target;
use sip_scan::scan;

fuzz_target!(|data: &[u8]| {
    // Scanning arbitrary datagrams must never panic; anything unusable is
    // reported as None and dropped by the caller.
    let _ = scan(data);
});
