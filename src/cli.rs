use anyhow::{Context, Result, anyhow, bail};
use clap::{ArgAction, Args, Parser, ValueEnum};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use lr1view::report;
#[cfg(feature = "server")]
use lr1view::serve::{ServeArgs, run_serve};
use lr1view::{
    BuildResponse, FileStore, Point, ServiceClient, ServiceConfig, Session, StateGraph,
    StoreConfig, ViewportState, ZOOM_DEFAULT,
};

const DEFAULT_LOG_FILTER: &str = "lr1view=info";
const QUIET_LOG_FILTER: &str = "lr1view=warn";

#[derive(Debug, Clone, PartialEq, Eq)]
enum InputSource {
    Stdin,
    File(PathBuf),
}

#[derive(Debug, Clone)]
enum OutputDestination {
    Stdout,
    File(PathBuf),
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
enum OutputFormat {
    Svg,
    Png,
}

impl OutputFormat {
    fn from_path(path: &Path) -> Option<Self> {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
        {
            Some(ext) if ext == "svg" => Some(OutputFormat::Svg),
            Some(ext) if ext == "png" => Some(OutputFormat::Png),
            _ => None,
        }
    }

    fn extension(self) -> &'static str {
        match self {
            OutputFormat::Svg => "svg",
            OutputFormat::Png => "png",
        }
    }
}

/// Where the service lives and where the session is kept.
#[derive(Debug, Clone, Args)]
struct ConnectionArgs {
    /// Base URL of the grammar-analysis service.
    #[arg(long = "service-url")]
    service_url: Option<String>,

    /// Request timeout in seconds.
    #[arg(long = "timeout")]
    timeout: Option<u64>,

    /// Directory holding the persisted session.
    #[arg(long = "state-dir")]
    state_dir: Option<PathBuf>,
}

impl ConnectionArgs {
    fn client(&self) -> Result<ServiceClient> {
        let mut config = ServiceConfig::from_env();
        if let Some(url) = &self.service_url {
            config = config.with_base_url(url.clone());
        }
        if let Some(secs) = self.timeout {
            config = config.with_timeout(Duration::from_secs(secs));
        }
        ServiceClient::new(config).context("failed to create service client")
    }

    fn store(&self) -> FileStore {
        let config = match &self.state_dir {
            Some(dir) => StoreConfig { dir: dir.clone() },
            None => StoreConfig::from_env(),
        };
        debug!(dir = %config.dir.display(), "using session directory");
        FileStore::new(config)
    }
}

/// Options shared by every command that writes a rendered graph.
#[derive(Debug, Clone, Args)]
struct RenderOutputArgs {
    /// Path to the output file. Use '-' to write to stdout.
    #[arg(short = 'o', long = "output")]
    output: Option<String>,

    /// Output format (defaults to the output file extension or svg).
    #[arg(short = 'e', long = "output-format")]
    output_format: Option<OutputFormat>,

    /// Convenience flag to force PNG output without specifying --output-format.
    #[arg(long = "png", action = ArgAction::SetTrue, conflicts_with = "output_format")]
    png: bool,

    /// Scale factor when rasterizing PNG output.
    #[arg(long = "scale", default_value_t = 2.0)]
    scale: f32,

    /// Background color for the rendered graph.
    #[arg(short = 'b', long = "background-color", default_value = "white")]
    background_color: String,
}

impl RenderOutputArgs {
    fn format_preference(&self) -> Option<OutputFormat> {
        if self.png {
            Some(OutputFormat::Png)
        } else {
            self.output_format
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "lr1view build",
    about = "Build the LR(1) automaton for a grammar and render its state graph."
)]
struct BuildArgs {
    /// Path to the grammar file. Use '-' to read from stdin.
    #[arg(short = 'g', long = "grammar")]
    grammar: String,

    #[command(flatten)]
    output: RenderOutputArgs,

    /// Also print the states, closure, ACTION and GOTO tables.
    #[arg(long = "tables", action = ArgAction::SetTrue)]
    tables: bool,

    /// Suppress informational output.
    #[arg(short = 'q', long = "quiet", action = ArgAction::SetTrue)]
    quiet: bool,

    #[command(flatten)]
    connection: ConnectionArgs,
}

#[derive(Debug, Parser)]
#[command(name = "lr1view parse", about = "Parse a token string with the built automaton.")]
struct ParseArgs {
    /// Space separated input tokens.
    #[arg(short = 't', long = "tokens")]
    tokens: String,

    /// Grammar file to parse against (defaults to the saved grammar).
    #[arg(short = 'g', long = "grammar")]
    grammar: Option<String>,

    /// Suppress informational output.
    #[arg(short = 'q', long = "quiet", action = ArgAction::SetTrue)]
    quiet: bool,

    #[command(flatten)]
    connection: ConnectionArgs,
}

#[derive(Debug, Parser)]
#[command(
    name = "lr1view",
    about = "Render LR(1) state graphs from a saved build response."
)]
struct RenderArgs {
    /// Path to a build response JSON file. Use '-' to read from stdin.
    /// Defaults to the saved session.
    #[arg(short = 'i', long = "input")]
    input: Option<String>,

    #[command(flatten)]
    output: RenderOutputArgs,

    /// Zoom factor applied to the rendered scene.
    #[arg(long = "zoom", default_value_t = ZOOM_DEFAULT)]
    zoom: f32,

    /// Horizontal pan offset.
    #[arg(long = "pan-x", default_value_t = 0.0, allow_negative_numbers = true)]
    pan_x: f32,

    /// Vertical pan offset.
    #[arg(long = "pan-y", default_value_t = 0.0, allow_negative_numbers = true)]
    pan_y: f32,

    /// Suppress informational output.
    #[arg(short = 'q', long = "quiet", action = ArgAction::SetTrue)]
    quiet: bool,

    /// Directory holding the persisted session.
    #[arg(long = "state-dir")]
    state_dir: Option<PathBuf>,
}

impl RenderArgs {
    fn viewport(&self) -> Option<ViewportState> {
        let view = ViewportState::at(self.zoom, Point::new(self.pan_x, self.pan_y));
        if view.is_identity() { None } else { Some(view) }
    }
}

#[derive(Debug, Parser)]
#[command(name = "lr1view show", about = "Print the saved grammar, tables and parse result.")]
struct ShowArgs {
    /// Directory holding the persisted session.
    #[arg(long = "state-dir")]
    state_dir: Option<PathBuf>,
}

pub async fn dispatch() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(|s| s.as_str()) {
        Some("serve") => {
            #[cfg(feature = "server")]
            {
                let serve_args = ServeArgs::parse_from(subcommand_args(&args));
                init_logging(false);
                let client = ServiceClient::new(serve_args.service_config())
                    .context("failed to create service client")?;
                let store = std::sync::Arc::new(FileStore::new(serve_args.store_config()));
                run_serve(serve_args, client, store).await
            }
            #[cfg(not(feature = "server"))]
            {
                Err(anyhow!(
                    "'serve' command requires the 'server' feature to be enabled"
                ))
            }
        }
        Some("build") => {
            let build_args = BuildArgs::parse_from(subcommand_args(&args));
            init_logging(build_args.quiet);
            run_build(build_args).await
        }
        Some("parse") => {
            let parse_args = ParseArgs::parse_from(subcommand_args(&args));
            init_logging(parse_args.quiet);
            run_parse(parse_args).await
        }
        Some("show") => {
            let show_args = ShowArgs::parse_from(subcommand_args(&args));
            init_logging(false);
            run_show(show_args)
        }
        Some("render") => {
            let render_args = RenderArgs::parse_from(subcommand_args(&args));
            init_logging(render_args.quiet);
            run_render(render_args)
        }
        _ => {
            let render_args = RenderArgs::parse_from(args);
            init_logging(render_args.quiet);
            run_render(render_args)
        }
    }
}

fn subcommand_args(args: &[String]) -> Vec<String> {
    args.iter()
        .take(1)
        .chain(args.iter().skip(2))
        .cloned()
        .collect()
}

/// Logs go to stderr so rendered output on stdout stays clean.
fn init_logging(quiet: bool) {
    let default = if quiet {
        QUIET_LOG_FILTER
    } else {
        DEFAULT_LOG_FILTER
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

async fn run_build(cli: BuildArgs) -> Result<()> {
    let input_source = parse_input(Some(&cli.grammar))?;
    let format_preference = cli.output.format_preference();
    let output_dest = parse_output(cli.output.output.as_deref(), &input_source, format_preference)?;
    let format = determine_format(format_preference, &output_dest)?;
    if format == OutputFormat::Png && cli.output.scale <= 0.0 {
        bail!("--scale must be greater than zero for PNG output");
    }

    let grammar = load_text(&input_source, "grammar")?;
    let client = cli.connection.client()?;
    let store = cli.connection.store();

    let build = client.build(&grammar).await?;

    let mut session = Session::load(&store)?;
    session.record_build(grammar, build.clone());
    session.save(&store)?;

    let to_stdout = matches!(output_dest, OutputDestination::Stdout);
    if !cli.quiet && !to_stdout {
        print!("{}", report::build_report(&build, cli.tables));
    }

    let graph = StateGraph::from_states(&build.states);
    let bytes = render_graph(&graph, &cli.output, format, None)?;
    write_output(output_dest, &bytes, cli.quiet)
}

async fn run_parse(cli: ParseArgs) -> Result<()> {
    let store = cli.connection.store();
    let mut session = Session::load(&store)?;

    let grammar = match cli.grammar.as_deref() {
        Some(path) => load_text(&parse_input(Some(path))?, "grammar")?,
        None if session.has_grammar() => session.grammar.clone(),
        None => bail!("no grammar given and none saved; pass --grammar or run 'lr1view build' first"),
    };

    let client = cli.connection.client()?;
    let parse = client.parse(&grammar, &cli.tokens).await?;

    session.record_parse(parse.clone());
    session.save(&store)?;

    if cli.quiet {
        println!("{}", report::verdict(parse.accepted));
    } else {
        print!("{}", report::parse_report(&parse));
    }
    Ok(())
}

fn run_render(cli: RenderArgs) -> Result<()> {
    let input_source = match cli.input.as_deref() {
        Some(input) => Some(parse_input(Some(input))?),
        None => None,
    };

    let build = match &input_source {
        Some(source) => load_build(source)?,
        None => {
            let store = FileStore::new(match &cli.state_dir {
                Some(dir) => StoreConfig { dir: dir.clone() },
                None => StoreConfig::from_env(),
            });
            Session::load(&store)?.build.ok_or_else(|| {
                anyhow!(
                    "no saved build in '{}'; pass --input or run 'lr1view build' first",
                    store.dir().display()
                )
            })?
        }
    };

    let format_preference = cli.output.format_preference();
    let fallback_source = input_source.unwrap_or(InputSource::Stdin);
    let output_dest = parse_output(cli.output.output.as_deref(), &fallback_source, format_preference)?;
    let format = determine_format(format_preference, &output_dest)?;
    if format == OutputFormat::Png && cli.output.scale <= 0.0 {
        bail!("--scale must be greater than zero for PNG output");
    }

    let graph = StateGraph::from_states(&build.states);
    let viewport = cli.viewport();
    let bytes = render_graph(&graph, &cli.output, format, viewport.as_ref())?;
    write_output(output_dest, &bytes, cli.quiet)
}

fn run_show(cli: ShowArgs) -> Result<()> {
    let store = FileStore::new(match cli.state_dir {
        Some(dir) => StoreConfig { dir },
        None => StoreConfig::from_env(),
    });
    let session = Session::load(&store)?;

    if session.build.is_none() && session.parse.is_none() && !session.has_grammar() {
        println!("No saved session in {}", store.dir().display());
        return Ok(());
    }

    if session.has_grammar() {
        println!("Grammar\n\n{}\n", session.grammar.trim_end());
    }
    if let Some(build) = &session.build {
        print!("{}", report::build_report(build, true));
    }
    if let Some(parse) = &session.parse {
        println!();
        print!("{}", report::parse_report(parse));
    }
    Ok(())
}

fn render_graph(
    graph: &StateGraph,
    output: &RenderOutputArgs,
    format: OutputFormat,
    viewport: Option<&ViewportState>,
) -> Result<Vec<u8>> {
    match format {
        OutputFormat::Svg => Ok(graph
            .render_svg(&output.background_color, viewport)?
            .into_bytes()),
        OutputFormat::Png => {
            #[cfg(feature = "png")]
            {
                graph.render_png(&output.background_color, viewport, output.scale)
            }
            #[cfg(not(feature = "png"))]
            {
                let _ = (graph, output, viewport);
                Err(anyhow!("PNG output requires the 'png' feature to be enabled"))
            }
        }
    }
}

fn parse_input(input: Option<&str>) -> Result<InputSource> {
    match input {
        Some("-") => Ok(InputSource::Stdin),
        Some(path_str) => {
            let path = PathBuf::from(path_str);
            if !path.exists() {
                return Err(anyhow!("input file '{path_str}' does not exist"));
            }
            Ok(InputSource::File(path))
        }
        None => Err(anyhow!("an input path is required")),
    }
}

fn parse_output(
    output: Option<&str>,
    input: &InputSource,
    format_hint: Option<OutputFormat>,
) -> Result<OutputDestination> {
    match output {
        Some("-") => Ok(OutputDestination::Stdout),
        Some(path_str) => {
            let path = PathBuf::from(path_str);
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    return Err(anyhow!(
                        "output directory '{}' does not exist",
                        parent.display()
                    ));
                }
            }
            Ok(OutputDestination::File(path))
        }
        None => {
            let ext = format_hint.unwrap_or(OutputFormat::Svg).extension();
            match input {
                InputSource::File(path) => {
                    let default_name = path
                        .file_stem()
                        .and_then(|name| name.to_str())
                        .map(|name| format!("{name}.{ext}"))
                        .unwrap_or_else(|| format!("states.{ext}"));
                    let mut default_path = path.to_path_buf();
                    default_path.set_file_name(default_name);
                    Ok(OutputDestination::File(default_path))
                }
                InputSource::Stdin => Ok(OutputDestination::File(PathBuf::from(format!(
                    "states.{ext}"
                )))),
            }
        }
    }
}

fn determine_format(
    preference: Option<OutputFormat>,
    output: &OutputDestination,
) -> Result<OutputFormat> {
    if let Some(fmt) = preference {
        return Ok(fmt);
    }

    match output {
        OutputDestination::Stdout => Ok(OutputFormat::Svg),
        OutputDestination::File(path) => OutputFormat::from_path(path).ok_or_else(|| {
            anyhow!(
                "unable to determine output format from '{}'; please specify --output-format",
                path.display()
            )
        }),
    }
}

fn load_text(source: &InputSource, what: &str) -> Result<String> {
    match source {
        InputSource::Stdin => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            if buffer.trim().is_empty() {
                Err(anyhow!("no {what} supplied on stdin"))
            } else {
                Ok(buffer)
            }
        }
        InputSource::File(path) => {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("failed to read '{}'", path.display()))?;
            if contents.trim().is_empty() {
                Err(anyhow!("input file '{}' was empty", path.display()))
            } else {
                Ok(contents)
            }
        }
    }
}

fn load_build(source: &InputSource) -> Result<BuildResponse> {
    let raw = load_text(source, "build response")?;
    let build: BuildResponse =
        serde_json::from_str(&raw).context("input is not a valid build response")?;
    build.validate().context("input is not a valid build response")?;
    Ok(build)
}

fn write_output(dest: OutputDestination, bytes: &[u8], quiet: bool) -> Result<()> {
    match dest {
        OutputDestination::Stdout => {
            let mut stdout = io::stdout();
            stdout.write_all(bytes)?;
            stdout.flush()?;
        }
        OutputDestination::File(path) => {
            fs::write(&path, bytes)
                .with_context(|| format!("failed to write '{}'", path.display()))?;
            if !quiet {
                println!("Generated diagram -> {}", path.display());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subcommand_is_stripped_from_argv() {
        let args: Vec<String> = ["lr1view", "render", "-i", "x.json"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(subcommand_args(&args), vec!["lr1view", "-i", "x.json"]);
    }

    #[test]
    fn default_output_follows_input_stem() {
        let dest = parse_output(
            None,
            &InputSource::File(PathBuf::from("grammars/expr.txt")),
            None,
        )
        .unwrap();
        match dest {
            OutputDestination::File(path) => assert_eq!(path, PathBuf::from("grammars/expr.svg")),
            OutputDestination::Stdout => panic!("expected a file destination"),
        }
    }

    #[test]
    fn identity_viewport_is_omitted() {
        let args = RenderArgs::parse_from(["lr1view"]);
        assert!(args.viewport().is_none());

        let args = RenderArgs::parse_from(["lr1view", "--zoom", "1.4", "--pan-x", "-20"]);
        let view = args.viewport().unwrap();
        assert_eq!(view.zoom, 1.4);
        assert_eq!(view.pan, Point::new(-20.0, 0.0));
    }
}
