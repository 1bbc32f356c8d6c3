//! Habitat Richness CLI - Batch Species Richness Aggregation
//!
//! Runs richness aggregations and inspects habitat rasters.

use anyhow::{bail, Context, Result};
use habitat_richness::prelude::*;
use habitat_richness::provenance::read_species_table;
use std::path::{Path, PathBuf};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage(&args[0]);
        return;
    }

    let result = match args[1].as_str() {
        "run" => run(&args[2..]),
        "histogram" => histogram(&args[2..]),
        "anchor" => anchor(&args[2..]),
        "help" | "--help" | "-h" => {
            print_usage(&args[0]);
            Ok(())
        }
        "version" | "--version" => {
            println!("{} {}", habitat_richness::NAME, habitat_richness::VERSION);
            Ok(())
        }
        _ => {
            eprintln!("Unknown command: {}", args[1]);
            print_usage(&args[0]);
            std::process::exit(2);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn print_usage(program: &str) {
    println!("Habitat Richness v{}", habitat_richness::VERSION);
    println!();
    println!("Usage: {} <command> [options]", program);
    println!();
    println!("Commands:");
    println!("  run <config.toml> [options]          Aggregate species richness");
    println!("  histogram <raster> [--season <s>]    Show a raster's value histogram");
    println!("  anchor <width> <height> <out.tif>    Write an anchor raster");
    println!("  help                                 Show this help message");
    println!();
    println!("Run options:");
    println!("  --parallel            Reclassify species in a batch concurrently");
    println!("  --threads <n>         Worker threads for --parallel (default: all)");
    println!("  --resume              Reuse matching checkpoints from an earlier run");
    println!("  --expand              Register every mask on the anchor surface");
    println!("  --season <s>          Summer, Winter or Any");
    println!("  --batch-size <n>      Species per checkpoint");
    println!("  --species <file>      Read the species list from a table");
    println!("  --keep-scratch        Leave the scratch directory in place");
    println!();
    println!("Anchor options:");
    println!("  --marker <n>          Side of the marker square (default: 3)");
    println!();
    println!("Set RUST_LOG=info for progress details.");
}

fn option_value<'a>(args: &'a [String], i: usize) -> Result<&'a str> {
    match args.get(i + 1) {
        Some(value) => Ok(value.as_str()),
        None => bail!("{} needs a value", args[i]),
    }
}

fn run(args: &[String]) -> Result<()> {
    let Some(config_path) = args.first() else {
        bail!("please specify a configuration file");
    };

    let mut config = RichnessConfig::from_toml_file(config_path)
        .with_context(|| format!("loading {}", config_path))?;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--parallel" => {
                config = config.with_parallel(true);
                i += 1;
            }
            "--resume" => {
                config = config.with_resume(true);
                i += 1;
            }
            "--expand" => {
                config = config.with_expand(true);
                i += 1;
            }
            "--keep-scratch" => {
                config = config.with_keep_scratch(true);
                i += 1;
            }
            "--threads" => {
                let threads = option_value(args, i)?
                    .parse()
                    .context("--threads expects a number")?;
                config = config.with_max_threads(threads);
                i += 2;
            }
            "--season" => {
                let season: Season = option_value(args, i)?
                    .parse()
                    .map_err(anyhow::Error::msg)?;
                config = config.with_season(season);
                i += 2;
            }
            "--batch-size" => {
                let size = option_value(args, i)?
                    .parse()
                    .context("--batch-size expects a number")?;
                config = config.with_batch_size(size);
                i += 2;
            }
            "--species" => {
                let table = option_value(args, i)?;
                let species = read_species_table(Path::new(table))
                    .with_context(|| format!("reading species table {}", table))?;
                config = config.with_species(species);
                i += 2;
            }
            other => bail!("unknown option: {}", other),
        }
    }

    println!(
        "Processing group '{}' ({} season, batches of {})",
        config.group_name, config.season, config.batch_size
    );

    let store = FileRasterStore::new();
    let mut driver = AggregationDriver::new(&store, config).with_progress(|update| match update {
        ProgressUpdate::BatchStarted {
            index, total, size, ..
        } => {
            println!("   • Batch {}/{} ({} species)", index + 1, total, size);
        }
        ProgressUpdate::BatchResumed { offset } => {
            println!("   • Reusing checkpoint at offset {}", offset);
        }
        ProgressUpdate::Phase(RunPhase::Reducing) => {
            println!("   • Summing checkpoints");
        }
        _ => {}
    });

    let outcome = driver.run().context("richness run failed")?;

    println!();
    println!("{}", outcome.summary);
    println!();
    println!("Richness saved to: {}", outcome.richness_path.display());
    println!("Species table: {}", outcome.species_table_path.display());
    Ok(())
}

fn histogram(args: &[String]) -> Result<()> {
    let Some(path) = args.first() else {
        bail!("please specify a raster");
    };

    let mut season = Season::Any;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--season" => {
                season = option_value(args, i)?.parse().map_err(anyhow::Error::msg)?;
                i += 2;
            }
            other => bail!("unknown option: {}", other),
        }
    }

    let store = FileRasterStore::new();
    let extent = store
        .extent(Path::new(path))
        .with_context(|| format!("reading {}", path))?;
    let histogram = store
        .histogram(Path::new(path))
        .with_context(|| format!("reading {}", path))?;

    println!("{} ({})", path, extent);
    println!("value,count");
    for (value, count) in histogram.iter() {
        println!("{},{}", value, count);
    }

    let unexpected = histogram.unexpected_codes();
    if !unexpected.is_empty() {
        println!("Unexpected habitat codes: {:?}", unexpected);
    }

    let expectation = SeasonalExpectation::from_histogram(&histogram);
    println!();
    println!(
        "Expected presence: any {}, summer {}, winter {}",
        expectation.any_count, expectation.summer_count, expectation.winter_count
    );
    if histogram.excludes_season(season) {
        println!("{} richness would skip this raster.", season);
    } else {
        println!(
            "{} mask would hold {} presence cells.",
            season,
            expectation.for_season(season)
        );
    }
    Ok(())
}

fn anchor(args: &[String]) -> Result<()> {
    if args.len() < 3 {
        bail!("usage: anchor <width> <height> <out.tif> [--marker <n>]");
    }
    let width: u32 = args[0].parse().context("width expects a number")?;
    let height: u32 = args[1].parse().context("height expects a number")?;
    let out = PathBuf::from(&args[2]);

    let mut marker = habitat_richness::core::raster::DEFAULT_ANCHOR_MARKER;
    let mut i = 3;
    while i < args.len() {
        match args[i].as_str() {
            "--marker" => {
                marker = option_value(args, i)?
                    .parse()
                    .context("--marker expects a number")?;
                i += 2;
            }
            other => bail!("unknown option: {}", other),
        }
    }

    if width == 0 || height == 0 {
        bail!("anchor dimensions must be positive");
    }

    let raster = Raster::anchor(RasterExtent::new(width, height), marker);
    FileRasterStore::new()
        .write(&raster, &out)
        .with_context(|| format!("writing {}", out.display()))?;
    println!(
        "Anchor {} with a {}x{} marker written to {}",
        raster.extent(),
        marker,
        marker,
        out.display()
    );
    Ok(())
}
