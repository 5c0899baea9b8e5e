// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! CLI entry point for the AVB oracle.

use anyhow::Result;
use avb_oracle_cli::cli::entrypoint;

fn main() -> Result<()> {
    entrypoint()
}
