//! Shared knobs for the property-test suites.

/// Local runs keep case counts tiny: every case here replays a whole
/// operation sequence against a model, so the sequences inside each case do
/// the heavy lifting, not the case count.
const LOCAL_CASE_CAP: u32 = 4;

/// Resolves the proptest case count for a suite.
///
/// Each `stdx` suite declares its own default sized to how expensive its
/// model check is (bitset and FIFO replay up to 256-op sequences, the
/// hashed set cross-checks a `HashMap` per step). CI runs that default in
/// full; local runs are capped at [`LOCAL_CASE_CAP`]. `PROPTEST_CASES` in
/// the environment overrides both.
pub fn proptest_cases(suite_default: u32) -> u32 {
    if let Some(n) = std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
    {
        return n.max(1);
    }
    if std::env::var_os("CI").is_some() {
        suite_default.max(1)
    } else {
        suite_default.clamp(1, LOCAL_CASE_CAP)
    }
}
