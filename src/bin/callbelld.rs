//! callbell daemon binary.
//!
//! See `callbelld::cli` for usage.

fn main() -> anyhow::Result<()> {
    callbelld::cli::run()
}
