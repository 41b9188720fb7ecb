use std::fmt::Write;

/// Panics in debug builds, compiles to nothing in release builds.
///
/// Used for states that are bugs in the caller but must never take a release build down.
#[macro_export]
macro_rules! debug_panic {
    ($($arg:tt)*) => {
        if cfg!(debug_assertions) {
            panic!($($arg)*);
        }
    };
}

/// Prefixes every line of `source` with its 1-based line number.
pub fn annotate_source(source: &str) -> String {
    let line_count = source.lines().count().max(1);
    let width = line_count.to_string().len();

    let mut annotated = String::with_capacity(source.len() + line_count * (width + 3));
    for (i, line) in source.lines().enumerate() {
        let _ = writeln!(annotated, "{:>width$} | {line}", i + 1);
    }

    annotated
}
