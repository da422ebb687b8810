//! mimicbase : command line access to a merged mimic identification dataset
//!
//! mimicbase --datadir [-d] dir \[--sample id\] \[--threads n\] \[--background-prefix prefix\]* \[--index-cache\] \[--cache-dir dir\] subcommand
//!
//! - datadir is the directory containing `{sample}_merged_better_binders.csv`, the PFAM and KOFAM hit tables
//!   and the protein fasta archives.
//! - sample is the sample id prefix of input files, deduced from the binding table name if absent.
//! - background-prefix (repeatable) : domains whose name starts with it are only counted in background.
//! - index-cache : dump the sequence archive index in datadir and reload it at next start.
//! - cache-dir : dump the sequence archive index in this directory instead of datadir, implies index-cache.
//!
//! Subcommands, all print json on stdout :
//! - metadata : column descriptors
//! - summary \[--filter json\]
//! - page \[--page p\] \[--size s\] \[--sort column\] \[--desc\] \[--filter json\]
//! - sequence --id seqid
//! - cancer --acc accession \[--source PFAM|KOFAM\] \[--filter json\]
//! - overview \[--source PFAM|KOFAM\]
//! - intersect \[--source PFAM|KOFAM\] \[--max-affinity nM\] \[--level SB\] \[--max-seq n\] \[--batch n\] \[--timeout s\]
//! - export --out dir
//!
//! A filter is a json object mapping column names to predicates, for example
//! `{"mimic_BindLevel": "SB", "mimic_Aff(nM)": {"max": 50}, "has_domains": true}`

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::{Arg, ArgAction, ArgMatches, Command};
use env_logger::Builder;
use serde::Serialize;

use mimicbase::domains::HitSource;
use mimicbase::query::{FilterSpec, SortDirection, SortSpec};
use mimicbase::utils::{DataParams, IntersectionParams, MimicParams, QueryParams};
use mimicbase::Dataset;

// install a logger facility
pub fn init_log() -> u64 {
    Builder::from_default_env().init();
    println!("\n ************** initializing logger *****************\n");
    1
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_filter(matches: &ArgMatches) -> anyhow::Result<Option<FilterSpec>> {
    match matches.get_one::<String>("filter") {
        Some(json) => {
            let spec: FilterSpec = serde_json::from_str(json).with_context(|| format!("bad filter : {}", json))?;
            Ok(Some(spec))
        }
        None => Ok(None),
    }
}

fn parse_source(matches: &ArgMatches) -> anyhow::Result<HitSource> {
    let name = matches
        .get_one::<String>("source")
        .map(|s| s.as_str())
        .unwrap_or("PFAM");
    HitSource::from_str(&name.to_uppercase()).map_err(|_| anyhow!("unknown source {}, PFAM or KOFAM expected", name))
}

#[doc(hidden)]
fn parse_data_params(matches: &ArgMatches) -> anyhow::Result<DataParams> {
    let datadir = matches
        .get_one::<String>("datadir")
        .ok_or_else(|| anyhow!("-d datadir is mandatory"))?;
    let dirpath = Path::new(datadir);
    if !dirpath.is_dir() {
        return Err(anyhow!("not a directory : {:?}", datadir));
    }
    let mut params = DataParams::new(dirpath);
    if let Some(sample) = matches.get_one::<String>("sample") {
        params = params.with_sample_id(sample);
    }
    if let Some(prefixes) = matches.get_many::<String>("background_prefix") {
        params = params.with_background_prefixes(prefixes.cloned().collect());
    }
    if let Some(nb_threads) = matches.get_one::<usize>("threads") {
        params = params.with_nb_threads(*nb_threads);
    }
    params = params.with_index_cache(matches.get_flag("index_cache"));
    if let Some(cachedir) = matches.get_one::<String>("cache_dir") {
        params = params.with_cache_dir(Path::new(cachedir));
    }
    Ok(params)
} // end of parse_data_params

fn parse_intersection_params(matches: &ArgMatches) -> anyhow::Result<IntersectionParams> {
    let mut params = IntersectionParams {
        source: parse_source(matches)?,
        ..Default::default()
    };
    if let Some(max) = matches.get_one::<f64>("max_affinity") {
        params.max_affinity = Some(*max);
    }
    if let Some(level) = matches.get_one::<String>("level") {
        params.binding_level = Some(level.clone());
    }
    if let Some(max) = matches.get_one::<usize>("max_seq") {
        params.max_sequences = if *max == 0 { None } else { Some(*max) };
    }
    if let Some(batch) = matches.get_one::<usize>("batch") {
        params.batch_size = *batch;
    }
    Ok(params)
}

fn run_subcommand(dataset: &Dataset, name: &str, matches: &ArgMatches) -> anyhow::Result<()> {
    match name {
        "metadata" => print_json(dataset.get_metadata()),
        "summary" => {
            let filter = parse_filter(matches)?;
            print_json(&dataset.get_summary(filter.as_ref())?)
        }
        "page" => {
            let filter = parse_filter(matches)?.unwrap_or_default();
            let sort = matches.get_one::<String>("sort").map(|column| {
                let direction = if matches.get_flag("desc") {
                    SortDirection::Desc
                } else {
                    SortDirection::Asc
                };
                SortSpec::new(column, direction)
            });
            let page_nb = matches.get_one::<usize>("page").copied().unwrap_or(0);
            let page_size = matches.get_one::<usize>("size").copied();
            let page = dataset.get_page(&filter, sort.as_ref(), page_nb, page_size)?;
            print_json(&page.to_json(dataset.get_table().get_schema()))
        }
        "sequence" => {
            let id = matches.get_one::<String>("id").ok_or_else(|| anyhow!("--id is mandatory"))?;
            print_json(&dataset.get_sequence_detail(id)?)
        }
        "cancer" => {
            let accession = matches.get_one::<String>("acc").ok_or_else(|| anyhow!("--acc is mandatory"))?;
            let source = parse_source(matches)?;
            let filter = parse_filter(matches)?;
            let detail = dataset.get_cancer_detail(accession)?;
            let enrichment = dataset.get_cancer_domain_enrichment(accession, source, filter.as_ref())?;
            print_json(&serde_json::json!({ "detail": detail, "enrichment": enrichment }))
        }
        "overview" => print_json(&dataset.get_domain_overview(parse_source(matches)?)?),
        "intersect" => {
            let params = parse_intersection_params(matches)?;
            let timeout = matches.get_one::<u64>("timeout").copied().unwrap_or(3600);
            let id = dataset.start_intersection_job(params)?;
            log::info!("intersection job {} started", id);
            let status = dataset.wait_job(id, Duration::from_millis(500), Duration::from_secs(timeout))?;
            if !status.state.is_terminal() {
                log::warn!("job {} still running after {} s, cancelling", id, timeout);
                dataset.cancel_job(id)?;
            }
            print_json(&status)
        }
        "export" => {
            let out = matches.get_one::<String>("out").ok_or_else(|| anyhow!("--out is mandatory"))?;
            dataset
                .export(Path::new(out))
                .with_context(|| format!("export in {} failed", out))
        }
        _ => Err(anyhow!("unknown subcommand {}", name)),
    }
} // end of run_subcommand

//============================================================================================

fn filter_arg() -> Arg {
    Arg::new("filter")
        .long("filter")
        .value_name("JSON")
        .help("json object mapping column names to predicates")
        .action(ArgAction::Set)
        .value_parser(clap::value_parser!(String))
}

fn source_arg() -> Arg {
    Arg::new("source")
        .long("source")
        .value_name("SOURCE")
        .help("annotation source : PFAM or KOFAM")
        .default_value("PFAM")
        .action(ArgAction::Set)
        .value_parser(clap::value_parser!(String))
}

fn main() -> anyhow::Result<()> {
    let _ = init_log();
    //
    let page_cmd = Command::new("page")
        .about("print a page of filtered and sorted rows")
        .arg(filter_arg())
        .arg(
            Arg::new("page")
                .short('p')
                .long("page")
                .help("page number, starting at 0")
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("size")
                .short('s')
                .long("size")
                .help("page size")
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("sort")
                .long("sort")
                .value_name("COLUMN")
                .help("column to sort on")
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(String)),
        )
        .arg(Arg::new("desc").long("desc").help("descending sort").action(ArgAction::SetTrue));

    let sequence_cmd = Command::new("sequence").about("print details of a sequence").arg(
        Arg::new("id")
            .long("id")
            .help("sequence id")
            .required(true)
            .action(ArgAction::Set)
            .value_parser(clap::value_parser!(String)),
    );

    let cancer_cmd = Command::new("cancer")
        .about("print details and domain enrichment of a cancer accession")
        .arg(
            Arg::new("acc")
                .long("acc")
                .help("cancer accession")
                .required(true)
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(String)),
        )
        .arg(source_arg())
        .arg(filter_arg());

    let intersect_cmd = Command::new("intersect")
        .about("count binding peptides contained in domains")
        .arg(source_arg())
        .arg(
            Arg::new("max_affinity")
                .long("max-affinity")
                .help("affinity threshold in nM, default 500")
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(f64)),
        )
        .arg(
            Arg::new("level")
                .long("level")
                .help("binding level to keep, e.g SB")
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(String)),
        )
        .arg(
            Arg::new("max_seq")
                .long("max-seq")
                .help("maximum number of sequences analyzed, 0 for all. default 1000")
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("batch")
                .long("batch")
                .help("number of sequences between progress reports")
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .help("seconds to wait for the job")
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(u64)),
        );

    let export_cmd = Command::new("export").about("write merged table, metadata and parameters").arg(
        Arg::new("out")
            .short('o')
            .long("out")
            .help("output directory")
            .required(true)
            .action(ArgAction::Set)
            .value_parser(clap::value_parser!(String)),
    );
    //
    // the global command
    //
    let matches = Command::new("mimicbase")
        .version("0.1.0")
        .about("Merge, query and enrichment of mimic identification results")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("datadir")
                .short('d')
                .long("datadir")
                .value_name("DATADIR")
                .help("directory containing binding table, hit tables and fasta archives")
                .required(true)
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(String)),
        )
        .arg(
            Arg::new("sample")
                .long("sample")
                .help("sample id, prefix of input file names")
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(String)),
        )
        .arg(
            Arg::new("threads")
                .short('t')
                .long("threads")
                .help("number of threads, default all cpus")
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("background_prefix")
                .long("background-prefix")
                .help("domain name prefix counted in background only, can be repeated")
                .action(ArgAction::Append)
                .value_parser(clap::value_parser!(String)),
        )
        .arg(
            Arg::new("index_cache")
                .long("index-cache")
                .help("dump and reload the sequence archive index")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("cache_dir")
                .long("cache-dir")
                .help("directory for the sequence index dump, default datadir")
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(String)),
        )
        .subcommand(Command::new("metadata").about("print column descriptors"))
        .subcommand(Command::new("summary").about("print summary of filtered rows").arg(filter_arg()))
        .subcommand(page_cmd)
        .subcommand(sequence_cmd)
        .subcommand(cancer_cmd)
        .subcommand(Command::new("overview").about("binder domains against metagenome").arg(source_arg()))
        .subcommand(intersect_cmd)
        .subcommand(export_cmd)
        .get_matches();
    //
    let data_params = parse_data_params(&matches)?;
    let params = MimicParams::new(data_params, QueryParams::default(), IntersectionParams::default());
    let dataset = Dataset::load(params).context("dataset loading failed")?;
    //
    match matches.subcommand() {
        Some((name, sub_matches)) => run_subcommand(&dataset, name, sub_matches),
        None => Err(anyhow!("a subcommand is needed")),
    }
} // end of main
