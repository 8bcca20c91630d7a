use proptest::prelude::*;

/// One of the systems packages are commonly built for
pub fn system_strat() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("aarch64-darwin".to_string()),
        Just("aarch64-linux".to_string()),
        Just("x86_64-darwin".to_string()),
        Just("x86_64-linux".to_string()),
    ]
}

/// Versions in the shapes found in package sets:
/// semantic versions, partial versions, pre-releases and dates.
pub fn version_strat() -> impl Strategy<Value = String> {
    prop_oneof![
        (0..20u64, 0..20u64, 0..20u64).prop_map(|(a, b, c)| format!("{a}.{b}.{c}")),
        (0..20u64, 0..20u64).prop_map(|(a, b)| format!("{a}.{b}")),
        (0..5u64, 0..5u64, 0..3u64).prop_map(|(a, b, rc)| format!("{a}.{b}.0-rc.{rc}")),
        (2000..2030u64, 1..13u64, 1..29u64).prop_map(|(y, m, d)| format!("{y}-{m:02}-{d:02}")),
    ]
}
