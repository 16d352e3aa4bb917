use std::{
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::Result;
use bgenix::{
    bgen::{View, DEFAULT_COMPRESSION_LEVEL},
    edit::{concatenate, remove_sample_identifiers, set_free_data, ConcatOptions},
    index::{
        collect_unique_ids, default_index_path, GenomicRange, IndexBuilder, IndexQuery, Query,
        VARIANT_TABLE,
    },
    transcode::{copy_selected_variants, transcode_to_v11, write_variant_list, write_vcf},
    ProgramInfo,
};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "bgenix",
    about = "Index, query and transcode BGEN genotype files",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the variant index of a BGEN file
    Index {
        /// BGEN file to index
        #[arg(short = 'g', long)]
        bgen: PathBuf,

        /// Index path, defaults to the BGEN path with .bgi appended
        #[arg(short, long)]
        index: Option<PathBuf>,

        /// Overwrite an existing index
        #[arg(long)]
        clobber: bool,

        /// Create the variant table as a rowid table
        #[arg(long)]
        with_rowid: bool,
    },

    /// Select variants through the index and write them out
    Query(QueryArgs),

    /// Concatenate BGEN files with identical samples and flags
    Cat {
        /// Input files, in output order
        #[arg(short = 'g', long = "bgen", num_args = 1.., required = true)]
        inputs: Vec<PathBuf>,

        /// Output file
        #[arg(long)]
        og: PathBuf,

        /// Overwrite the output file if it exists
        #[arg(long)]
        clobber: bool,

        /// Do not copy the sample identifier block of the first file
        #[arg(long)]
        omit_sample_identifier_block: bool,

        /// Replace the free data of the output header
        #[arg(long)]
        set_free_data: Option<String>,
    },

    /// Edit BGEN headers in place
    Edit {
        /// Files to edit
        #[arg(short = 'g', long = "bgen", num_args = 1.., required = true)]
        inputs: Vec<PathBuf>,

        /// New free data, of exactly the existing length
        #[arg(long)]
        set_free_data: Option<String>,

        /// Clear the sample identifier flag and zero the identifier block
        #[arg(long)]
        remove_sample_identifiers: bool,

        /// Write the changes; without this only a dry run is performed
        #[arg(long)]
        really: bool,
    },
}

#[derive(Args)]
struct QueryArgs {
    /// BGEN file to read
    #[arg(short = 'g', long)]
    bgen: PathBuf,

    /// Index path, defaults to the BGEN path with .bgi appended
    #[arg(short, long)]
    index: Option<PathBuf>,

    /// Table or view of the index to select from
    #[arg(long, default_value = VARIANT_TABLE)]
    table: String,

    /// Include variants in chr:start-end (or a file of such ranges)
    #[arg(long, num_args = 1..)]
    incl_range: Vec<String>,

    /// Exclude variants in chr:start-end (or a file of such ranges)
    #[arg(long, num_args = 1..)]
    excl_range: Vec<String>,

    /// Include variants with these rsids (or a file of rsids)
    #[arg(long, num_args = 1..)]
    incl_rsids: Vec<String>,

    /// Exclude variants with these rsids (or a file of rsids)
    #[arg(long, num_args = 1..)]
    excl_rsids: Vec<String>,

    #[command(flatten)]
    output: OutputArgs,

    /// Compression level of layout 1 output blocks
    #[arg(long, default_value_t = DEFAULT_COMPRESSION_LEVEL)]
    compression_level: u32,
}

#[derive(Args)]
#[group(multiple = false)]
struct OutputArgs {
    /// List the identifying data of the selected variants
    #[arg(long)]
    list: bool,

    /// Write the selected variants as VCF
    #[arg(long)]
    vcf: bool,

    /// Write the selected variants as a layout 1 BGEN file
    #[arg(long)]
    v11: bool,
}

fn parse_ranges(arguments: &[String]) -> Result<Vec<GenomicRange>> {
    Ok(collect_unique_ids(arguments)?
        .iter()
        .map(|spec| spec.parse::<GenomicRange>())
        .collect::<bgenix::Result<_>>()?)
}

fn build_index(bgen: &Path, index: Option<PathBuf>, clobber: bool, with_rowid: bool) -> Result<()> {
    let index = index.unwrap_or_else(|| default_index_path(bgen));
    IndexBuilder::default()
        .clobber(clobber)
        .with_rowid(with_rowid)
        .build(bgen, &index)?;
    Ok(())
}

fn run_query(args: QueryArgs) -> Result<()> {
    let program = ProgramInfo::default();
    let index = args.index.unwrap_or_else(|| default_index_path(&args.bgen));
    let query = Query {
        included_ranges: parse_ranges(&args.incl_range)?,
        excluded_ranges: parse_ranges(&args.excl_range)?,
        included_rsids: collect_unique_ids(&args.incl_rsids)?,
        excluded_rsids: collect_unique_ids(&args.excl_rsids)?,
    };
    let mut handle = IndexQuery::open(&index, &args.table)?;
    handle.initialise(&query)?;
    let mut view = View::open(&args.bgen)?;
    view.set_query(handle)?;
    info!(variants = view.number_of_variants(), "selected variants");

    let mut out = BufWriter::new(io::stdout().lock());
    let result = if args.output.list {
        write_variant_list(&mut view, &mut out, &program)
    } else if args.output.vcf {
        write_vcf(&mut view, &mut out, &program)
    } else if args.output.v11 {
        transcode_to_v11(&mut view, &mut out, args.compression_level)
    } else {
        copy_selected_variants(&view, &mut out)
    };
    if result.is_err() {
        if let Some(variant) = view.last_variant() {
            error!(%variant, position = view.position(), "failed after reading variant");
        }
    }
    result?;
    out.flush()?;
    Ok(())
}

fn run_cat(
    inputs: &[PathBuf],
    output: &Path,
    clobber: bool,
    omit_sample_identifier_block: bool,
    free_data: Option<String>,
) -> Result<()> {
    let mut options = ConcatOptions::default()
        .clobber(clobber)
        .omit_sample_identifiers(omit_sample_identifier_block);
    if let Some(free_data) = free_data {
        options = options.free_data(free_data.into_bytes());
    }
    concatenate(inputs, output, &options)?;
    Ok(())
}

fn run_edit(
    inputs: &[PathBuf],
    free_data: Option<String>,
    remove_identifiers: bool,
    really: bool,
) -> Result<()> {
    if free_data.is_none() && !remove_identifiers {
        warn!("nothing to do");
        return Ok(());
    }
    if let Some(free_data) = free_data {
        for path in inputs {
            set_free_data(path, free_data.as_bytes(), really)?;
        }
    }
    if remove_identifiers {
        for path in inputs {
            remove_sample_identifiers(path, really)?;
        }
    }
    if !really {
        info!("dry run complete, pass --really to write changes");
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Index {
            bgen,
            index,
            clobber,
            with_rowid,
        } => build_index(&bgen, index, clobber, with_rowid),
        Commands::Query(args) => run_query(args),
        Commands::Cat {
            inputs,
            og,
            clobber,
            omit_sample_identifier_block,
            set_free_data,
        } => run_cat(&inputs, &og, clobber, omit_sample_identifier_block, set_free_data),
        Commands::Edit {
            inputs,
            set_free_data,
            remove_sample_identifiers,
            really,
        } => run_edit(&inputs, set_free_data, remove_sample_identifiers, really),
    }
}
