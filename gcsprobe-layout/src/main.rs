//! Prints the storage layout of a Cloud Storage bucket.
//!
//! The layout is fetched from the storage control plane with default application credentials.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

mod cli;
mod layout;

fn main() -> anyhow::Result<()> {
    cli::execute()
}
