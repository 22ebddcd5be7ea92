//! Fuzz harness for the distinguished-name and filter parsers.
//!
//! Arbitrary input must parse or be rejected without panicking. A DN that
//! parses must render to text that parses back to an equal DN, and its
//! normalized form must be stable.

#![no_main]
use dirconform_core::dn::Dn;
use dirconform_core::filter::Filter;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(dn) = Dn::parse(s) {
        let rendered = dn.to_string();
        let reparsed = Dn::parse(&rendered).expect("rendered DN must parse");
        assert_eq!(reparsed, dn);
        assert_eq!(reparsed.normalized(), dn.normalized());
    }

    let _ = Filter::parse(s);
});
