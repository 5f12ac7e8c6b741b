/// A generic error.
///
/// Used for startup and plumbing failures where the only thing to do with the error is report it. Failures that callers
/// act upon get their own `snafu`-derived types next to the code that produces them.
pub type GenericError = anyhow::Error;
