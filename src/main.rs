//! matepile: samtools-style pileup from aligned reads
//!
//! Usage: matepile <COMMAND> [OPTIONS]

#![allow(clippy::too_many_arguments)]

use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{info, warn};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use matepile::bed::{read_regions, AlignmentRecord, BedReader};
use matepile::config::{AlignmentFilter, PileupOptions};
use matepile::error::{PileupError, Result};
use matepile::mate::{resolve_named_pairs, MateResolver};
use matepile::mate_cache::MateCache;
use matepile::reference::ReferenceList;
use matepile::regions::SkipList;
use matepile::source::{pile_alignments_filtered, NoRegionFilter, RegionFilter};
use matepile::streaming::buffers::DEFAULT_OUTPUT_BUFFER;
use matepile::walker::PileupWalker;

#[derive(Parser)]
#[command(name = "matepile")]
#[command(version)]
#[command(about = "matepile: samtools-style pileup with single-pass mate resolution", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a pileup of ungapped BED alignments
    Pileup {
        /// Alignments as BED6 with an optional 7th spot-group column (use - for stdin)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Genome file (name and length per line) fixing reference order and lengths
        #[arg(short = 'g', long)]
        genome: Option<PathBuf>,

        /// BED file of regions to leave out of the pileup
        #[arg(short = 'x', long)]
        exclude: Option<PathBuf>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Report positions without coverage too
        #[arg(long)]
        no_skip: bool,

        /// Append (id:start-end/offset) after every event
        #[arg(long)]
        show_id: bool,

        /// One block per spot group
        #[arg(long)]
        spot_groups: bool,

        /// Print the depth inside each spot-group block
        #[arg(long = "depth-per-group")]
        depth_per_group: bool,

        /// Leave out the quality column
        #[arg(long)]
        omit_qualities: bool,

        /// Minimum mapping quality; alignments below it are ignored
        #[arg(short = 'q', long = "min-mapq", default_value_t = 0)]
        min_mapq: u8,

        /// Only pile up alignments of this spot group
        #[arg(long)]
        spot_group: Option<String>,

        /// Log walk and mate-cache statistics
        #[arg(long)]
        stats: bool,
    },
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = Arc::clone(&stop);
    if let Err(e) = ctrlc::set_handler(move || handler_stop.store(true, Ordering::Release)) {
        warn!("cannot install interrupt handler: {}", e);
    }

    let result = match cli.command {
        Commands::Pileup {
            input,
            genome,
            exclude,
            output,
            no_skip,
            show_id,
            spot_groups,
            depth_per_group,
            omit_qualities,
            min_mapq,
            spot_group,
            stats,
        } => {
            let options = PileupOptions::new()
                .with_no_skip(no_skip)
                .with_show_id(show_id)
                .with_spot_groups(spot_groups)
                .with_depth_per_spot_group(depth_per_group)
                .with_omit_qualities(omit_qualities);
            let mut filter = AlignmentFilter::new().with_min_mapq(min_mapq);
            if let Some(group) = spot_group {
                filter = filter.with_spot_group(group);
            }
            run_pileup(input, genome, exclude, output, options, &filter, stats, &stop)
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn read_input(input: Option<PathBuf>) -> Result<Vec<AlignmentRecord>> {
    match input {
        Some(path) if path.to_string_lossy() != "-" => {
            BedReader::from_path(&path)?.alignments().collect()
        }
        _ => {
            let stdin = io::stdin();
            BedReader::new(stdin.lock()).alignments().collect()
        }
    }
}

fn run_pileup(
    input: Option<PathBuf>,
    genome: Option<PathBuf>,
    exclude: Option<PathBuf>,
    output: Option<PathBuf>,
    options: PileupOptions,
    alignment_filter: &AlignmentFilter,
    stats: bool,
    stop: &AtomicBool,
) -> Result<()> {
    let references = match genome {
        Some(ref path) => Some(ReferenceList::from_file(path).map_err(|e| {
            PileupError::InvalidFormat(format!("Failed to load genome file: {}", e))
        })?),
        None => None,
    };

    let records = read_input(input)?;
    let mut source = pile_alignments_filtered(
        &records,
        references.as_ref(),
        options.no_skip,
        alignment_filter,
    )?;

    let mut filter: Box<dyn RegionFilter> = match exclude {
        Some(path) => Box::new(SkipList::from_regions(read_regions(path)?)),
        None => Box::new(NoRegionFilter),
    };

    let mut out: Box<dyn Write> = match output {
        Some(path) => Box::new(BufWriter::with_capacity(
            DEFAULT_OUTPUT_BUFFER,
            File::create(path)?,
        )),
        None => Box::new(BufWriter::with_capacity(DEFAULT_OUTPUT_BUFFER, io::stdout().lock())),
    };

    let walk_stats =
        PileupWalker::new(options).run(&mut source, filter.as_mut(), stop, &mut out)?;
    out.flush()?;
    if walk_stats.cancelled {
        info!("interrupted; output ends after the last complete position");
        return Ok(());
    }

    let mut cache = MateCache::new(1)?;
    let resolver = MateResolver::new(0).with_half_aligned(true);
    let mate_stats = resolve_named_pairs(&records, &mut cache, &resolver)?;

    if stats {
        info!("{} alignments: {}", records.len(), walk_stats);
        info!("mates: {}", mate_stats);
        let stderr = io::stderr();
        let mut err = stderr.lock();
        cache.report(&mut err)?;
        err.flush()?;
    }
    Ok(())
}
