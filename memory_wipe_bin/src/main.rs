// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use anyhow::{bail, Context, Result};
use clap::Parser;
use colored::Colorize;
use log::info;
use memory_wipe::{window, BufferWiper, MemoryWipe, WipePlan};
use std::path::{Path, PathBuf};

/// Number of bytes shown when a region that should be clear is not
const DUMP_LEN: usize = 32;

#[derive(Debug, Parser)]
struct PlanArgs {
    /// Wipe plan (TOML)
    plan: PathBuf,

    /// Override the plan's upper bound
    #[arg(long, value_parser = parse_int::parse::<u64>)]
    upper_bound: Option<u64>,
}

impl PlanArgs {
    fn build(&self) -> Result<MemoryWipe> {
        let plan = WipePlan::load(&self.plan)
            .with_context(|| format!("could not load plan {:?}", self.plan))?;
        let mut tracker = plan.build()?;
        if let Some(bound) = self.upper_bound {
            tracker.set_upper_bound(Some(bound));
        }
        Ok(tracker)
    }
}

#[derive(Debug, Parser)]
enum Command {
    /// Print the regions a plan resolves to
    Show {
        #[clap(flatten)]
        plan: PlanArgs,
    },
    /// Zero the plan's regions in a memory dump
    Apply {
        #[clap(flatten)]
        plan: PlanArgs,

        /// memory dump to read
        #[clap(short = 'i', long = "image")]
        src_image: PathBuf,

        /// where to write the wiped dump
        #[clap(short = 'o', long = "out")]
        dest_image: PathBuf,

        /// Address of the first byte of the dump
        #[arg(long, value_parser = parse_int::parse::<u64>, default_value = "0")]
        base: u64,
    },
    /// Check that every region of the plan is zero in a memory dump
    Check {
        #[clap(flatten)]
        plan: PlanArgs,

        image: PathBuf,

        /// Address of the first byte of the dump
        #[arg(long, value_parser = parse_int::parse::<u64>, default_value = "0")]
        base: u64,
    },
}

#[derive(Debug, Parser)]
#[clap(name = "memory-wipe", max_term_width = 80)]
struct Opts {
    #[clap(subcommand)]
    cmd: Command,
}

fn main() -> Result<()> {
    let cmd = Opts::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match cmd.cmd {
        Command::Show { plan } => {
            let tracker = plan.build()?;
            let mut total = 0;
            for region in tracker.regions()? {
                println!("{} {region} ({:#x} bytes)", "WIPE".red(), region.len());
                total += region.len();
            }
            if total == 0 {
                println!("{}", "nothing to wipe".green());
            } else {
                println!("total: {total:#x} bytes");
            }
        }
        Command::Apply {
            plan,
            src_image,
            dest_image,
            base,
        } => {
            let tracker = plan.build()?;
            let mut image = read_image(&src_image)?;
            let total = tracker.execute(&mut BufferWiper::new(base, &mut image))?;
            std::fs::write(&dest_image, &image)
                .with_context(|| format!("could not write {dest_image:?}"))?;
            info!("wiped {total:#x} bytes, written to {}", dest_image.display());
        }
        Command::Check { plan, image, base } => {
            let tracker = plan.build()?;
            let bytes = read_image(&image)?;
            let mut dirty = 0;
            for region in tracker.regions()? {
                let Some(dump) = window(&bytes, base, region) else {
                    bail!("{region} is not covered by {}", image.display());
                };
                match dump.iter().position(|&b| b != 0) {
                    None => println!("{} {region}", "CLEAR".green()),
                    Some(off) => {
                        let end = (off + DUMP_LEN).min(dump.len());
                        println!(
                            "{} {region} at {:#x}: {}",
                            "DIRTY".red(),
                            region.start + off as u64,
                            hex::encode(&dump[off..end])
                        );
                        dirty += 1;
                    }
                }
            }
            if dirty != 0 {
                bail!("{dirty} region(s) still hold data");
            }
        }
    }

    Ok(())
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("could not read {path:?}"))
}
