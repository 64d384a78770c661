use clap::{Parser, Subcommand};
use khist_lib::builder::{CountConfiguration, HistogramBuilder};
use khist_lib::histogram::{blacklist, Histogram};
use khist_lib::{decode_kmer, CountTable};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use tracing::info;

#[derive(Parser)]
#[command(name = "khist")]
#[command(version = "0.1.0")]
#[command(about = "khist: concurrent k-mer counting", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Count k-mers and write a frequency histogram
    Count {
        /// Input FASTA/FASTQ file (plain text fallback: one sequence per line)
        #[arg(short, long)]
        input: String,

        /// K-mer length (1..=32)
        #[arg(short, long, default_value = "31")]
        k: usize,

        /// Number of threads (0 = all available cores)
        #[arg(short = 't', long, default_value = "0")]
        threads: usize,

        /// Expected number of distinct k-mers (the table grows by
        /// rebuilding if this is too low)
        #[arg(short = 'e', long, default_value = "4194304")]
        expected_kmers: u64,

        /// Largest count stored exactly; counters saturate here
        #[arg(short = 'm', long, default_value = "65535")]
        max_count: u64,

        /// Histogram output file (TSV; stdout if omitted)
        #[arg(short = 'o', long)]
        hist: Option<String>,

        /// Also write overrepresented k-mers to this file
        #[arg(long)]
        blacklist: Option<String>,

        /// Minimum count for a k-mer to enter the blacklist
        #[arg(long, default_value = "100")]
        blacklist_threshold: u64,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Count k-mers and print every (k-mer, count) pair
    Dump {
        /// Input FASTA/FASTQ file (plain text fallback: one sequence per line)
        #[arg(short, long)]
        input: String,

        /// K-mer length (1..=32)
        #[arg(short, long, default_value = "31")]
        k: usize,

        /// Number of threads (0 = all available cores)
        #[arg(short = 't', long, default_value = "0")]
        threads: usize,
    },
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing: use RUST_LOG if set, otherwise default to info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Count {
            input,
            k,
            threads,
            expected_kmers,
            max_count,
            hist,
            blacklist,
            blacklist_threshold,
            verbose,
        } => count_command(
            input,
            k,
            threads,
            expected_kmers,
            max_count,
            hist,
            blacklist,
            blacklist_threshold,
            verbose,
        ),
        Commands::Dump { input, k, threads } => dump_command(input, k, threads),
    }
}

/// Count k-mers and report the histogram (and optional blacklist)
#[allow(clippy::too_many_arguments)]
fn count_command(
    input: String,
    k: usize,
    threads: usize,
    expected_kmers: u64,
    max_count: u64,
    hist: Option<String>,
    blacklist_path: Option<String>,
    blacklist_threshold: u64,
    verbose: bool,
) -> anyhow::Result<()> {
    info!("Counting k-mers...");
    info!("  Input: {}", input);
    info!("  k: {}", k);

    let sequences = parse_sequences_file(&input)?;
    info!("  Loaded {} sequences", sequences.len());

    let mut config = CountConfiguration::new(k, expected_kmers)
        .map_err(|e| anyhow::anyhow!("{}", e))?;
    config.max_count = max_count;
    config.num_threads = threads;
    config.verbose = verbose;

    let builder = HistogramBuilder::new(config).map_err(|e| anyhow::anyhow!("{}", e))?;
    let (histogram, table) = builder
        .build_histogram(&sequences)
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    write_histogram(&histogram, hist.as_deref())?;

    if let Some(path) = blacklist_path {
        write_blacklist(&table, k, blacklist_threshold, &path)?;
    }

    Ok(())
}

/// Count k-mers and print every pair, most frequent first
fn dump_command(input: String, k: usize, threads: usize) -> anyhow::Result<()> {
    let sequences = parse_sequences_file(&input)?;
    info!("Loaded {} sequences", sequences.len());

    let config = CountConfiguration {
        k,
        num_threads: threads,
        verbose: false,
        ..CountConfiguration::default()
    };
    let builder = HistogramBuilder::new(config).map_err(|e| anyhow::anyhow!("{}", e))?;
    let table = builder
        .count_sequences(&sequences)
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    let mut entries: Vec<_> = table.entries().collect();
    entries.sort_unstable_by(|a, b| b.count.cmp(&a.count).then(a.key.cmp(&b.key)));

    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    for entry in entries {
        writeln!(out, "{}\t{}", decode_kmer(entry.key, k), entry.count)?;
    }
    out.flush()?;
    Ok(())
}

/// Write the histogram to the given path, or stdout if none
fn write_histogram(histogram: &Histogram, path: Option<&str>) -> anyhow::Result<()> {
    match path {
        Some(path) => {
            info!("Writing histogram to {}...", path);
            let mut writer = BufWriter::new(File::create(path)?);
            histogram.write_tsv(&mut writer)?;
            writer.flush()?;
        }
        None => {
            let stdout = std::io::stdout();
            let mut out = BufWriter::new(stdout.lock());
            histogram.write_tsv(&mut out)?;
            out.flush()?;
        }
    }
    Ok(())
}

/// Write overrepresented k-mers (count >= threshold) as k-mer/count TSV
fn write_blacklist(
    table: &CountTable,
    k: usize,
    threshold: u64,
    path: &str,
) -> anyhow::Result<()> {
    let flagged = blacklist(table, threshold);
    info!(
        "Writing {} blacklisted k-mers (count >= {}) to {}...",
        flagged.len(),
        threshold,
        path
    );
    let mut writer = BufWriter::new(File::create(path)?);
    for (key, count) in flagged {
        writeln!(writer, "{}\t{}", decode_kmer(key, k), count)?;
    }
    writer.flush()?;
    Ok(())
}

/// Parse FASTA/FASTQ file and return sequences as raw bytes
fn parse_fasta_file(path: &str) -> anyhow::Result<Vec<Vec<u8>>> {
    use needletail::parse_fastx_file;

    let mut sequences = Vec::new();
    let mut reader = parse_fastx_file(path)?;

    while let Some(record) = reader.next() {
        let record = record?;
        sequences.push(record.seq().into_owned());
    }

    Ok(sequences)
}

/// Parse plain text file with one sequence per line
fn parse_plain_text_sequences(path: &str) -> anyhow::Result<Vec<Vec<u8>>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut sequences = Vec::new();

    for line in reader.lines() {
        let line = line?;
        let seq = line.trim();
        if !seq.is_empty() {
            sequences.push(seq.as_bytes().to_vec());
        }
    }

    Ok(sequences)
}

/// Parse sequences file - auto-detects FASTA/FASTQ vs plain text format
fn parse_sequences_file(path: &str) -> anyhow::Result<Vec<Vec<u8>>> {
    match parse_fasta_file(path) {
        Ok(seqs) => Ok(seqs),
        Err(_) => {
            info!("  File is not FASTA/FASTQ, trying plain text format...");
            parse_plain_text_sequences(path)
        }
    }
}
