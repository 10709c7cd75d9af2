//! Shared proptest strategies for unit tests.

use std::collections::BTreeMap;

use proptest::prelude::*;

/// Header values made of visible ASCII and spaces.
pub(crate) fn arb_header_value(max_len: usize) -> impl Strategy<Value = String> {
    prop::string::string_regex(&format!("[ -~]{{0,{max_len}}}")).expect("valid regex")
}

/// Non-empty RFC 7230 tokens.
pub(crate) fn arb_token(max_len: usize) -> impl Strategy<Value = String> {
    prop::string::string_regex(&format!(r"[A-Za-z0-9!#$%&'*+.^_`|~-]{{1,{max_len}}}"))
        .expect("valid regex")
}

/// Arbitrary state maps, including empty keys, unicode and separators that
/// the form encoding must escape.
pub(crate) fn arb_state_map() -> impl Strategy<Value = BTreeMap<String, String>> {
    prop::collection::btree_map(".{0,16}", ".{0,32}", 0..8)
}
