//! Byte-budget rendering for the startup summary.

/// Render a configured byte budget the way it reads in a config file: as an
/// exact KiB/MiB/GiB multiple when it is one, raw bytes otherwise.
///
/// Budgets are operator-chosen round numbers, so no fractional rendering.
pub fn format_budget(bytes: u64) -> String {
    const SCALES: [(u64, &str); 3] = [(1 << 30, "GiB"), (1 << 20, "MiB"), (1 << 10, "KiB")];

    for (scale, unit) in SCALES {
        if bytes >= scale && bytes % scale == 0 {
            return format!("{} {unit}", bytes / scale);
        }
    }
    format!("{bytes} B")
}
