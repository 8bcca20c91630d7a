use std::fmt::Display;

/// Write a line for the user to stderr
fn print_message(v: impl Display) {
    let line = v.to_string();
    #[cfg(test)]
    recorded::record(&line);
    eprintln!("{line}");
}

pub(crate) fn plain(v: impl Display) {
    print_message(v);
}
pub(crate) fn error(v: impl Display) {
    print_message(format_args!("ERROR: {v}"));
}
pub(crate) fn updated(v: impl Display) {
    print_message(format_args!("✅ {v}"));
}
