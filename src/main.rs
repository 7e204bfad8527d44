use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};

use census::IndicatorSummary;
use ejgetter::config::Config;
use ejgetter::ejscreen::{AreaQuery, AreaType, EjscreenClient};
use ejgetter::getter::Getter;
use ejgetter::tiger::TigerLayer;
use ejgetter::{filter, merge, plot, study, table, tiger};

/// Block group used by `fetch` when none is given.
const SAMPLE_BLOCK_GROUP: &str = "110010088022";

#[derive(Parser, Debug)]
#[command(
    name = "ejgetter",
    version,
    about = "Filter, fetch and map EJScreen indicators for a single jurisdiction"
)]
struct Cli {
    /// Config file (defaults to ./ejgetter.toml when present).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the columns of the national tract file.
    Columns {
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Keep the tract rows of one state.
    Filter {
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long)]
        output: Option<PathBuf>,
        /// State abbreviation to keep.
        #[arg(long)]
        state: Option<String>,
        #[arg(long)]
        state_column: Option<String>,
    },
    /// Fetch and print the report for a single area.
    Fetch {
        #[arg(default_value = SAMPLE_BLOCK_GROUP)]
        area_id: String,
        #[arg(long, value_enum, default_value_t = AreaArg::Blockgroup)]
        area_type: AreaArg,
        /// Name sent to the broker, e.g. the city name.
        #[arg(long)]
        name: Option<String>,
        /// Write the flattened report to this CSV.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Fetch the configured block groups and the city-wide report.
    Study {
        /// Seconds to wait between requests.
        #[arg(long)]
        delay: Option<f64>,
    },
    /// Join the filtered data onto boundary polygons.
    Merge {
        /// Boundary shapefile (.shp or zipped TIGER/Line download).
        #[arg(long)]
        shapefile: Option<PathBuf>,
        /// Join the study's block group table onto block group boundaries.
        #[arg(long, conflicts_with = "shapefile")]
        block_groups: bool,
        #[arg(long)]
        data: Option<PathBuf>,
        #[arg(long)]
        output: Option<PathBuf>,
        /// Also write the merged layer as GeoJSON.
        #[arg(long)]
        geojson: Option<PathBuf>,
        #[arg(long)]
        geoid_column: Option<String>,
        #[arg(long)]
        data_id_column: Option<String>,
        /// Also render a choropleth of the merged layer.
        #[arg(long)]
        plot: bool,
        #[command(flatten)]
        plot_args: PlotArgs,
    },
    /// Render a choropleth of one column of a (merged) shapefile.
    Plot {
        /// Defaults to the merge output.
        #[arg(long)]
        shapefile: Option<PathBuf>,
        #[command(flatten)]
        plot_args: PlotArgs,
    },
    /// Download TIGER/Line boundaries for the configured state.
    Boundaries {
        #[arg(long, value_enum, default_value_t = LayerArg::All)]
        layer: LayerArg,
    },
    /// Filter, study and merge in sequence.
    Run,
}

#[derive(Args, Debug)]
struct PlotArgs {
    /// Column to map.
    #[arg(long)]
    column: Option<String>,
    #[arg(long)]
    colormap: Option<String>,
    /// PNG to write.
    #[arg(long)]
    plot_output: Option<PathBuf>,
}

impl PlotArgs {
    fn apply(self, config: &mut Config) -> Result<()> {
        let p = &mut config.plot;
        p.column = self.column.unwrap_or(p.column.clone());
        p.colormap = self.colormap.unwrap_or(p.colormap.clone());
        p.output = self.plot_output.unwrap_or(p.output.clone());
        config.validate()?;
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum AreaArg {
    Blockgroup,
    Tract,
    County,
    City,
    State,
}

impl From<AreaArg> for AreaType {
    fn from(arg: AreaArg) -> Self {
        match arg {
            AreaArg::Blockgroup => AreaType::BlockGroup,
            AreaArg::Tract => AreaType::Tract,
            AreaArg::County => AreaType::County,
            AreaArg::City => AreaType::City,
            AreaArg::State => AreaType::State,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LayerArg {
    Tract,
    Bg,
    All,
}

fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);
    let mut config = Config::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Columns { input } => {
            let input = input.unwrap_or(config.filter.input);
            println!("Available columns:");
            for column in filter::list_columns(&input, config.filter.index_column)? {
                println!("  - {column}");
            }
        }
        Commands::Filter {
            input,
            output,
            state,
            state_column,
        } => {
            let f = &mut config.filter;
            f.input = input.unwrap_or(f.input.clone());
            f.output = output.unwrap_or(f.output.clone());
            f.state_value = state.unwrap_or(f.state_value.clone());
            f.state_column = state_column.unwrap_or(f.state_column.clone());
            run_filter(&config)?;
        }
        Commands::Fetch {
            area_id,
            area_type,
            name,
            output,
        } => {
            let query = AreaQuery {
                area_id,
                area_type: area_type.into(),
                name,
            };
            run_fetch(&config, &query, output).await?;
        }
        Commands::Study { delay } => {
            if let Some(delay) = delay {
                config.api.request_delay_secs = delay;
                config.validate()?;
            }
            run_study(&config).await?;
        }
        Commands::Merge {
            shapefile,
            block_groups,
            data,
            output,
            geojson,
            geoid_column,
            data_id_column,
            plot,
            plot_args,
        } => {
            plot_args.apply(&mut config)?;
            let m = &mut config.merge;
            if block_groups {
                m.shapefile = m.block_group_shapefile.clone();
                m.data = config.study.output.clone();
                m.data_id_column = IndicatorSummary::COLUMNS[0].to_string();
                m.output = m.output.with_file_name("merged_block_group_shapefile.shp");
            }
            m.shapefile = shapefile.unwrap_or(m.shapefile.clone());
            m.data = data.unwrap_or(m.data.clone());
            m.output = output.unwrap_or(m.output.clone());
            m.geojson = geojson.or(m.geojson.take());
            m.geoid_column = geoid_column.unwrap_or(m.geoid_column.clone());
            m.data_id_column = data_id_column.unwrap_or(m.data_id_column.clone());
            let report = run_merge(&config)?;
            if plot {
                run_plot(&report.layer, &config)?;
            }
        }
        Commands::Plot {
            shapefile,
            plot_args,
        } => {
            plot_args.apply(&mut config)?;
            let shapefile = shapefile.unwrap_or(config.merge.output.clone());
            let (layer, _) = merge::read_boundaries(&shapefile)?;
            run_plot(&layer, &config)?;
        }
        Commands::Boundaries { layer } => {
            let layers = match layer {
                LayerArg::Tract => vec![TigerLayer::Tract],
                LayerArg::Bg => vec![TigerLayer::BlockGroup],
                LayerArg::All => vec![TigerLayer::Tract, TigerLayer::BlockGroup],
            };
            let client = reqwest::Client::new();
            for layer in layers {
                let shp = tiger::download_layer(&client, &config.tiger, layer).await?;
                println!("{layer}: {}", shp.display());
            }
        }
        Commands::Run => {
            run_filter(&config)?;
            run_study(&config).await?;
            run_merge(&config)?;
        }
    }

    Ok(())
}

fn run_filter(config: &Config) -> Result<()> {
    let report = filter::filter_by_state(&config.filter)?;
    println!("Filtered data saved to: {}", config.filter.output.display());
    println!(
        "Filtered {} rows out of {} total rows",
        report.kept_rows, report.total_rows
    );
    Ok(())
}

async fn run_fetch(config: &Config, query: &AreaQuery, output: Option<PathBuf>) -> Result<()> {
    let client = EjscreenClient::new(&config.api)?;
    let report = client
        .report(query)
        .await
        .context("failed to fetch data from API")?;

    println!("{report}");
    let mut df = table::records_frame(&[report.flatten()])?;
    println!();
    println!("DataFrame:");
    println!("{df}");
    println!();
    println!("DataFrame Statistics:");
    match table::describe_numeric(&df)? {
        Some(stats) => println!("{stats}"),
        None => println!("no numeric columns"),
    }

    if let Some(path) = output {
        table::write_csv(&mut df, &path)?;
        println!("Data saved to: {}", path.display());
    }
    Ok(())
}

async fn run_study(config: &Config) -> Result<()> {
    if config.study.block_groups.is_empty() {
        bail!("no block groups configured");
    }
    let client = EjscreenClient::new(&config.api)?;
    let report = study::run_study(&client, config).await?;

    if let Some(path) = &report.batch_output {
        let df = table::summaries_frame(&report.batch.rows)?;
        println!("Block group data summary:");
        println!("{}", df.head(Some(5)));
        println!("Shape: {:?}", df.shape());
        println!("Data saved to: {}", path.display());
    }
    if !report.batch.failures.is_empty() {
        println!(
            "Skipped {} of {} block groups",
            report.batch.failures.len(),
            report.batch.attempted()
        );
    }
    if let (Some(city), Some(path)) = (&report.city, &report.city_output) {
        println!("{} data summary:", config.study.city_name);
        println!("{}", table::summaries_frame(std::slice::from_ref(city))?);
        println!("Data saved to: {}", path.display());
    }
    Ok(())
}

fn run_merge(config: &Config) -> Result<merge::MergeReport> {
    let report = merge::merge_data_with_shapefile(&config.merge)?;
    println!(
        "Matched {} out of {} features",
        report.matched, report.features
    );
    println!(
        "Merged layer shape: ({}, {})",
        report.features,
        report.columns().len() + 1
    );
    println!("Columns: {:?}", report.columns());
    println!("Merged shapefile saved to: {}", report.output.display());
    if let Some(geojson) = &report.geojson {
        println!("GeoJSON saved to: {}", geojson.display());
    }
    Ok(report)
}

fn run_plot(layer: &merge::Layer, config: &Config) -> Result<()> {
    if let Some(path) = plot::plot_column(layer, &config.plot)? {
        println!("Plot saved to: {}", path.display());
    }
    Ok(())
}
