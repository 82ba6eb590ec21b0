use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use fit_hrv_lib::{
    config::{read_config, WindowConfig},
    io::records::{parse_records, read_records, Record},
    plot::{figure_from_series, Figure, Series},
    report::{write_csv, write_html, HrvSeries, DEFAULT_TEMPLATE},
    sequencer::run_sequencer,
};
use log::info;
use plotters::prelude::*;
use std::{
    fs,
    io::{self, Read},
    path::{Path, PathBuf},
};

#[derive(Parser)]
#[command(
    name = "fit-hrv",
    version,
    about = "Sliding-window HRV from decoded activity recordings"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct WindowArgs {
    /// Newline-delimited JSON records; stdin when omitted
    #[arg(long)]
    input: Option<PathBuf>,
    /// TOML file with `window_minutes`
    #[arg(long)]
    config: Option<PathBuf>,
    /// Overrides the configured window length
    #[arg(long)]
    window_minutes: Option<f64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute the HRV series and print it as a JSON table
    HrvWindow {
        #[command(flatten)]
        window: WindowArgs,
        /// Write an HTML report
        #[arg(long)]
        html: Option<PathBuf>,
        /// Template with a %HRVDATA% placeholder, built-in page when omitted
        #[arg(long)]
        template: Option<PathBuf>,
        /// Write the series as CSV
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Render the HRV series to a PNG via plotters
    HrvPlot {
        #[command(flatten)]
        window: WindowArgs,
        #[arg(long)]
        out: PathBuf,
    },
    /// List events, sessions and laps found in the recording
    Inspect {
        #[arg(long)]
        input: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::HrvWindow {
            window,
            html,
            template,
            csv,
        } => cmd_hrv_window(&window, html.as_deref(), template.as_deref(), csv.as_deref())?,
        Commands::HrvPlot { window, out } => cmd_hrv_plot(&window, &out)?,
        Commands::Inspect { input } => cmd_inspect(input.as_deref())?,
    }
    Ok(())
}

fn load_records(input: Option<&Path>) -> Result<Vec<Record>> {
    match input {
        Some(path) => read_records(path),
        None => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            parse_records(&buf)
        }
    }
}

fn window_config(args: &WindowArgs) -> Result<WindowConfig> {
    let cfg = match &args.config {
        Some(path) => read_config(path)?,
        None => WindowConfig::default(),
    };
    match args.window_minutes {
        Some(minutes) => WindowConfig::new(minutes),
        None => Ok(cfg),
    }
}

fn series_from_args(args: &WindowArgs) -> Result<HrvSeries> {
    let cfg = window_config(args)?;
    let records = load_records(args.input.as_deref())?;
    info!(
        "{} records, {} minute window",
        records.len(),
        cfg.window_minutes
    );
    let series = run_sequencer(&records, &cfg);
    info!("{} HRV estimates", series.len());
    Ok(series)
}

fn cmd_hrv_window(
    args: &WindowArgs,
    html: Option<&Path>,
    template: Option<&Path>,
    csv: Option<&Path>,
) -> Result<()> {
    let series = series_from_args(args)?;
    if let Some(out) = html {
        let template = match template {
            Some(path) => fs::read_to_string(path)
                .with_context(|| format!("failed to read template {}", path.display()))?,
            None => DEFAULT_TEMPLATE.to_string(),
        };
        write_html(out, &template, &series)?;
    }
    if let Some(out) = csv {
        write_csv(out, &series)?;
    }
    println!("{}", series.to_json()?);
    Ok(())
}

fn cmd_hrv_plot(args: &WindowArgs, out: &Path) -> Result<()> {
    let series = series_from_args(args)?;
    if series.is_empty() {
        anyhow::bail!("no HRV estimates to plot");
    }
    let fig = figure_from_series(&series);
    draw_plotters_figure(out, &fig)?;
    Ok(())
}

fn cmd_inspect(input: Option<&Path>) -> Result<()> {
    let records = load_records(input)?;
    for summary in records.iter().filter_map(Record::summary) {
        println!("{}", summary);
    }
    Ok(())
}

fn draw_plotters_figure(path: &Path, fig: &Figure) -> Result<()> {
    let (x_min, x_max, y_min, y_max) = fig
        .bounds()
        .ok_or_else(|| anyhow!("figure has no points"))?;
    // Pad degenerate ranges so plotters gets a non-empty axis.
    let (x_min, x_max) = if x_max > x_min {
        (x_min, x_max)
    } else {
        (x_min - 1.0, x_max + 1.0)
    };
    let (y_min, y_max) = if y_max > y_min {
        (y_min, y_max)
    } else {
        (y_min - 1.0, y_max + 1.0)
    };
    let backend = BitMapBackend::new(path, (800, 480));
    let root = backend.into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .caption(
            fig.title.clone().unwrap_or_else(|| "Plot".into()),
            ("sans-serif", 24),
        )
        .x_label_area_size(30)
        .y_label_area_size(40)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)?;
    let mut mesh = chart.configure_mesh();
    if let Some(label) = &fig.x.label {
        mesh.x_desc(label.as_str());
    }
    if let Some(label) = &fig.y.label {
        mesh.y_desc(label.as_str());
    }
    mesh.draw()?;
    for series in &fig.series {
        match series {
            Series::Line(line) => {
                let (r, g, b) = line.style.color.rgb();
                let color = RGBColor(r, g, b);
                chart
                    .draw_series(LineSeries::new(
                        line.points.iter().map(|p| (p[0], p[1])),
                        color.stroke_width(line.style.width.round().max(1.0) as u32),
                    ))?
                    .label(line.name.clone())
                    .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
            }
        }
    }
    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;
    root.present()?;
    Ok(())
}
