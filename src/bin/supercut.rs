use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};

use supercut::{
    BatchOptions, BatchPlan, CancelToken, FfmpegRenderer, FfprobeProbe, JobRunner, JobSpec,
    ScratchDir, Template, TitleRasterizer,
};

#[derive(Parser, Debug)]
#[command(name = "supercut", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render videos from a media folder, or a single job (requires `ffmpeg` on PATH).
    Render(RenderArgs),
    /// Print the composition graph of one job without rendering it.
    Graph(GraphArgs),
    /// Rasterize a single title card as a PNG.
    Title(TitleArgs),
}

#[derive(Parser, Debug)]
struct RenderArgs {
    /// Template JSON; built-in defaults when omitted.
    #[arg(long)]
    template: Option<PathBuf>,

    /// Folder with audio tracks and background images.
    #[arg(long, required_unless_present = "job", conflicts_with = "job")]
    media_dir: Option<PathBuf>,

    /// Single job JSON instead of a media folder.
    #[arg(long)]
    job: Option<PathBuf>,

    /// Where finished videos go.
    #[arg(long, default_value = "out")]
    out_dir: PathBuf,

    #[arg(long, default_value_t = 3)]
    tracks_per_video: usize,

    /// Output name prefix, numbered from `--start-number`.
    #[arg(long, default_value = "video")]
    export_name: String,

    #[arg(long, default_value_t = 1)]
    start_number: u32,

    /// Text file with one output name per line.
    #[arg(long)]
    names_file: Option<PathBuf>,

    /// Concurrent jobs (defaults to the number of CPUs).
    #[arg(long)]
    workers: Option<usize>,

    /// Abort in-flight and pending jobs after the first failure.
    #[arg(long)]
    fail_fast: bool,

    /// Parent directory for per-job scratch directories.
    #[arg(long)]
    scratch_dir: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct GraphArgs {
    /// Template JSON; built-in defaults when omitted.
    #[arg(long)]
    template: Option<PathBuf>,

    /// Job JSON.
    #[arg(long)]
    job: PathBuf,

    /// Also print the full ffmpeg argument list.
    #[arg(long)]
    args: bool,
}

#[derive(Parser, Debug)]
struct TitleArgs {
    /// Template JSON supplying the title style.
    #[arg(long)]
    template: Option<PathBuf>,

    #[arg(long)]
    text: String,

    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Render(args) => cmd_render(args),
        Command::Graph(args) => cmd_graph(args),
        Command::Title(args) => cmd_title(args),
    }
}

fn load_template(path: Option<&Path>) -> anyhow::Result<Template> {
    match path {
        Some(p) => Ok(Template::from_json_file(p)?),
        None => Ok(Template::default()),
    }
}

fn read_names(path: &Path) -> anyhow::Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read names file '{}'", path.display()))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_owned)
        .collect())
}

fn make_runner(template: Template) -> anyhow::Result<JobRunner> {
    Ok(JobRunner::new(
        Arc::new(template),
        Arc::new(FfprobeProbe::from_env()),
        Arc::new(FfmpegRenderer::from_env()),
    )?)
}

fn cmd_render(args: RenderArgs) -> anyhow::Result<()> {
    let template = load_template(args.template.as_deref())?;

    let jobs = match (&args.job, &args.media_dir) {
        (Some(job), _) => vec![JobSpec::from_json_file(job)?],
        (None, Some(media_dir)) => {
            let mut plan = BatchPlan::new(media_dir, &args.out_dir);
            plan.tracks_per_video = args.tracks_per_video;
            plan.export_name = args.export_name.clone();
            plan.start_number = args.start_number;
            if let Some(names) = &args.names_file {
                plan.names = Some(read_names(names)?);
            }
            supercut::plan_batch(&plan)?
        }
        (None, None) => anyhow::bail!("either --media-dir or --job is required"),
    };

    let renderer = FfmpegRenderer::from_env();
    if !renderer.is_available() {
        anyhow::bail!(
            "'{}' is not runnable; install ffmpeg or set {}",
            renderer.program().display(),
            supercut::render::ffmpeg::FFMPEG_ENV
        );
    }

    let mut runner = make_runner(template)?;
    if let Some(dir) = &args.scratch_dir {
        runner = runner.with_scratch_root(dir);
    }

    let opts = BatchOptions {
        workers: args.workers,
        fail_fast: args.fail_fast,
    };
    let report = supercut::run_batch(&runner, &jobs, &opts, &CancelToken::new())?;

    for path in &report.succeeded {
        eprintln!("wrote {}", path.display());
    }
    for err in &report.failed {
        eprintln!("error: {err}");
    }
    for id in &report.cancelled {
        eprintln!("cancelled: {id}");
    }
    if !report.is_success() {
        anyhow::bail!(
            "{} of {} jobs did not complete",
            report.failed.len() + report.cancelled.len(),
            jobs.len()
        );
    }
    Ok(())
}

fn cmd_graph(args: GraphArgs) -> anyhow::Result<()> {
    let template = load_template(args.template.as_deref())?;
    let job = JobSpec::from_json_file(&args.job)?;
    let encode = template.encode.clone();
    let fps = template.fps;
    let runner = make_runner(template)?;

    let scratch = ScratchDir::create(&std::env::temp_dir(), &job.id)?;
    let cancel = CancelToken::new();
    let prepared = runner.prepare(&job, &scratch, &cancel)?;

    for (i, input) in prepared.graph.inputs.iter().enumerate() {
        println!("# input {i}: {}", input.path.display());
    }
    println!("# duration: {:.3}s", prepared.duration);
    println!("{}", prepared.graph.to_filter_complex());

    if args.args {
        let output = supercut::partial_path(&job.output);
        let req = supercut::RenderRequest {
            graph: &prepared.graph,
            output: &output,
            encode: &encode,
            fps,
            duration: prepared.duration,
            cancel: &cancel,
        };
        println!("{}", supercut::render::ffmpeg::build_ffmpeg_args(&req).join(" "));
    }
    Ok(())
}

fn cmd_title(args: TitleArgs) -> anyhow::Result<()> {
    let template = load_template(args.template.as_deref())?;
    let rasterizer = TitleRasterizer::new(template.title)?;
    supercut::render::ffmpeg::ensure_parent_dir(&args.out)?;
    let image = rasterizer.render_to_file(&args.text, &args.out)?;
    if image.fitted.truncated {
        eprintln!(
            "title truncated to '{}' at {}px",
            image.fitted.text, image.fitted.font_size
        );
    }
    eprintln!("wrote {}", args.out.display());
    Ok(())
}
