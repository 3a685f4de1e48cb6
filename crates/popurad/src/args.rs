//! Command-line flags.

use anyhow::{Context, Result};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Args {
    /// Turn autopeering on when no static peers are configured.
    pub autopeer: bool,
    /// Print a fresh config as TOML and exit.
    pub genconf: bool,
    /// With `genconf`: fill `node.peers` with this many live catalog peers.
    pub withpeers: usize,
    /// Advertise on this interface.
    pub interface: Option<String>,
    pub help: bool,
}

impl Args {
    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|a| a.as_ref().to_string()).collect();
        let mut out = Args::default();
        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "--autopeer" => out.autopeer = true,
                "--genconf" => out.genconf = true,
                "--withpeers" => {
                    i += 1;
                    out.withpeers = args
                        .get(i)
                        .context("--withpeers requires a value")?
                        .parse()
                        .context("--withpeers must be a number")?;
                }
                "--interface" => {
                    i += 1;
                    let name = args.get(i).context("--interface requires a value")?;
                    out.interface = Some(name.clone());
                }
                "-h" | "--help" => out.help = true,
                other => anyhow::bail!("unknown argument: {}", other),
            }
            i += 1;
        }
        if out.withpeers > 0 && !out.genconf {
            anyhow::bail!("--withpeers only makes sense with --genconf");
        }
        Ok(out)
    }
}

pub fn print_usage() {
    println!("Usage: popurad [options]");
    println!();
    println!("Options:");
    println!("  --autopeer          Automatic Internet peering when no peers are configured");
    println!("  --genconf           Print a new configuration and exit");
    println!("  --withpeers <N>     With --genconf: add N live public peers");
    println!("  --interface <IF>    Send router advertisements on IF");
}
