use indoc::formatdoc;
use pkgdb_sdk::PkgdbError;
use pkgdb_sdk::providers::lock_manifest::ResolveError;
use pkgdb_sdk::providers::transaction::TransactionError;
use tracing::trace;

/// Render an error and all its sources on one line
pub fn display_chain(mut err: &dyn std::error::Error) -> String {
    let mut fmt = err.to_string();
    while let Some(source) = err.source() {
        fmt = format!("{fmt}: {source}");
        err = source;
    }

    fmt
}

pub fn format_pkgdb_error(err: &PkgdbError) -> String {
    trace!("formatting pkgdb error: {err:?}");
    match err {
        PkgdbError::Resolve(err) => format_resolve_error(err),
        PkgdbError::Transaction(TransactionError::ReadExisting { path, source }) => formatdoc! {"
            The existing lockfile at {path:?} cannot be read: {}

            Remove it to lock the manifest from scratch.
        ", display_chain(source)},
        _ => display_chain(err),
    }
}

pub fn format_resolve_error(err: &ResolveError) -> String {
    trace!("formatting resolve error: {err:?}");
    match err {
        ResolveError::NoSystems => formatdoc! {"
            {err}

            Add 'systems' to the '[options]' of the manifest,
            pass '--system', or set 'systems' in the pkgdb config.
        "},
        ResolveError::NoInputs => formatdoc! {"
            {err}

            Add an input to the '[registry.inputs]' of the manifest,
            or set 'default_registry' in the pkgdb config.
        "},
        // already one failure per line
        ResolveError::Unresolved(failures) => failures.to_string(),
        _ => display_chain(err),
    }
}
