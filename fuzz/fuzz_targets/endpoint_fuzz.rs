#![no_main]

use etcdv3::resolver::Scheme;
use etcdv3::{Address, AddressSet};
use libfuzzer_sys::fuzz_target;
use std::str;

// Fuzzer for endpoint and resolver target parsing.
//
// Arbitrary input must either parse or fail with an error, never panic. A
// parsed address must survive formatting and parsing again unchanged.

fuzz_target!(|data: &[u8]| {
    let Ok(input) = str::from_utf8(data) else {
        return;
    };

    let _ = input.parse::<Scheme>();

    if let Ok(address) = Address::parse(input) {
        let reparsed = Address::parse(&address.to_string()).expect("formatted address must parse");
        assert_eq!(reparsed, address);
    }

    if let Ok(set) = AddressSet::parse([input]) {
        assert!(set.len() <= input.split(',').count());
    }
});
