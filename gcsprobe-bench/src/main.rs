//! Benchmarks upload and ranged download latency against a Cloud Storage bucket.
//!
//! See the `gcsprobe_bench` library for the phases of a run and their configuration.

fn main() -> anyhow::Result<()> {
    gcsprobe_bench::cli::execute()
}
