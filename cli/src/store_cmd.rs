//! `pcf-anchor show` / `pcf-anchor forget`

use std::path::PathBuf;

use clap::Parser;
use pcf_core::BindingLibrary;
use pcf_core::PcfConfig;
use pcf_store::BindingRecord;

#[derive(Debug, Parser)]
pub struct ShowArgs {
    /// Binding store directory (defaults to `[store] dir`)
    #[arg(long, value_name = "DIR")]
    pub store: Option<PathBuf>,

    /// Anchor identifier to print; lists every stored binding when omitted
    #[arg(value_name = "KEY")]
    pub key: Option<String>,

    /// Output as JSON
    #[arg(long = "json", short = 'j')]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct ForgetArgs {
    /// Binding store directory (defaults to `[store] dir`)
    #[arg(long, value_name = "DIR")]
    pub store: Option<PathBuf>,

    /// Anchor identifier to remove
    #[arg(value_name = "KEY")]
    pub key: String,
}

pub fn run_show(args: &ShowArgs, config: &PcfConfig) -> anyhow::Result<i32> {
    let library = crate::open_library(args.store.as_deref(), config)?;

    let records = match &args.key {
        Some(key) => match library.read_record(key)? {
            Some(record) => vec![record],
            None => {
                eprintln!("No binding stored for {key}");
                return Ok(1);
            }
        },
        None => {
            let mut records = Vec::new();
            for key in library.keys()? {
                match library.read_record(&key) {
                    Ok(Some(record)) => records.push(record),
                    Ok(None) => {}
                    Err(err) => {
                        tracing::warn!(key = %key, error = %err, "skipping unreadable binding");
                    }
                }
            }
            records
        }
    };

    if args.json {
        let json = match (&args.key, records.as_slice()) {
            (Some(_), [record]) => serde_json::to_string_pretty(record)?,
            _ => serde_json::to_string_pretty(&records)?,
        };
        println!("{json}");
    } else if args.key.is_some() {
        for record in &records {
            print_record(record);
        }
    } else {
        print_listing(&records, &library.base_dir().display().to_string());
    }
    Ok(0)
}

pub fn run_forget(args: &ForgetArgs, config: &PcfConfig) -> anyhow::Result<i32> {
    let library = crate::open_library(args.store.as_deref(), config)?;
    let key = &args.key;

    if library.get(key)?.is_none() {
        eprintln!("No binding stored for {key}");
        return Ok(1);
    }
    library.remove(key)?;
    tracing::info!(key = %key, "binding forgotten");
    println!("Forgot {key}");
    Ok(0)
}

fn print_listing(records: &[BindingRecord], dir: &str) {
    if records.is_empty() {
        println!("No bindings stored in {dir}");
        return;
    }

    println!("\n Stored bindings ({dir})\n");
    for record in records {
        println!(
            "  {:<24} {} frame(s)  saved {}",
            record.key,
            record.binding.len(),
            record.saved_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    println!();
}

fn print_record(record: &BindingRecord) {
    println!("\n {}\n", record.key);
    println!("  saved:  {}", record.saved_at.to_rfc3339());
    println!("  radius: {:.2}", record.binding.radius());
    println!("  frames (nearest first):");
    for (rank, binding) in record.binding.bindings().iter().enumerate() {
        let offset = binding.offset_position();
        println!(
            "    {}. {}  offset ({:.3}, {:.3}, {:.3})",
            rank + 1,
            binding.uid(),
            offset.x,
            offset.y,
            offset.z
        );
    }
    println!();
}
