use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use charmsmith_contracts::analysis::{parse_model_output, parse_model_output_or_degraded, ImageAnalysis};
use charmsmith_contracts::classify::classify;
use charmsmith_contracts::events::read_events;
use charmsmith_contracts::presets::PresetRegistry;
use charmsmith_contracts::prompts::{ComposeMode, Directive, PromptComposer, PromptRequest};
use charmsmith_engine::generation::{parse_size, AspectRatio, DryrunGenerator, GenerationRequest, ImageGenerator};
use charmsmith_engine::{Gallery, SalesTier, Settings};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::json;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "charmsmith", version, about = "Accessory reference gallery and prompt composer")]
struct Cli {
    /// Presets document overriding the embedded defaults.
    #[arg(long, global = true)]
    presets: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Manage the reference gallery.
    Gallery(GalleryArgs),
    /// Resolve product type and style for an instruction.
    Classify(ClassifyArgs),
    /// Build a generation directive.
    Compose(ComposeArgs),
    /// Compose a directive and render it with the dryrun generator.
    Generate(GenerateArgs),
    /// List available presets.
    Presets,
}

#[derive(Debug, Args)]
struct GalleryArgs {
    /// Gallery root; defaults to CHARMSMITH_GALLERY_DIR or data/gallery.
    #[arg(long)]
    root: Option<PathBuf>,
    #[command(subcommand)]
    command: GalleryCommand,
}

#[derive(Debug, Subcommand)]
enum GalleryCommand {
    Add(AddArgs),
    List(ListArgs),
    Get { id: String },
    Delete { id: String },
    /// Replace the stored analysis of a reference and re-embed it.
    Reanalyze {
        id: String,
        #[arg(long)]
        analysis: PathBuf,
        #[arg(long)]
        lenient: bool,
    },
    Similar(SimilarArgs),
    /// Backfill missing embeddings, or recompute all with --force.
    Reembed {
        #[arg(long)]
        force: bool,
    },
    /// Report references whose images are byte-identical.
    Duplicates,
    /// Show the most recent journal entries.
    Events {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Debug, Args)]
struct AddArgs {
    #[arg(long)]
    image: PathBuf,
    /// Analysis JSON, or raw analyzer output containing a JSON object.
    #[arg(long)]
    analysis: Option<PathBuf>,
    /// Accept unparseable analysis output as a degraded placeholder.
    #[arg(long)]
    lenient: bool,
    #[arg(long, default_value = "B")]
    tier: SalesTier,
}

#[derive(Debug, Args)]
struct ListArgs {
    #[arg(long)]
    style: Option<String>,
    #[arg(long)]
    tier: Option<SalesTier>,
    #[arg(long, default_value_t = 50)]
    limit: usize,
}

#[derive(Debug, Args)]
struct SimilarArgs {
    /// Free-text query, embedded with the configured provider.
    #[arg(long, conflicts_with_all = ["like", "analysis"])]
    text: Option<String>,
    /// Use the stored embedding of this reference as the query.
    #[arg(long, conflicts_with = "analysis")]
    like: Option<String>,
    /// Query with the search description of an analysis file.
    #[arg(long)]
    analysis: Option<PathBuf>,
    #[arg(long, default_value_t = 5)]
    top_k: usize,
    /// Minimum similarity in [0, 1].
    #[arg(long, value_parser = parse_threshold)]
    threshold: f32,
}

#[derive(Debug, Args)]
struct ClassifyArgs {
    #[arg(long, default_value = "")]
    text: String,
    #[arg(long)]
    analysis: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Layered,
    Enhanced,
}

impl From<ModeArg> for ComposeMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Layered => ComposeMode::Layered,
            ModeArg::Enhanced => ComposeMode::Enhanced,
        }
    }
}

#[derive(Debug, Args)]
struct ComposeArgs {
    #[arg(long, default_value = "")]
    instruction: String,
    #[arg(long)]
    analysis: Option<PathBuf>,
    #[arg(long)]
    product_type: Option<String>,
    #[arg(long)]
    style: Option<String>,
    #[arg(long, value_enum, default_value_t = ModeArg::Layered)]
    mode: ModeArg,
    /// Print the full directive as JSON instead of the prompt text.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct GenerateArgs {
    #[command(flatten)]
    compose: ComposeArgs,
    #[arg(long)]
    out: PathBuf,
    /// Long edge: 1K, 2K, 4K or a pixel count.
    #[arg(long, default_value = "1K")]
    size: String,
    #[arg(long, default_value = "1:1")]
    aspect: AspectRatio,
    #[arg(long)]
    seed: Option<u64>,
    /// Reference image for the generator; repeatable.
    #[arg(long = "reference")]
    references: Vec<PathBuf>,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("charmsmith error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let settings = Settings::from_env()?;
    let presets = match &cli.presets {
        Some(path) => PresetRegistry::load(path),
        None => settings.load_presets(),
    };
    match cli.command {
        Command::Gallery(args) => run_gallery(&settings, args),
        Command::Classify(args) => run_classify(&presets, args),
        Command::Compose(args) => run_compose(&presets, args),
        Command::Generate(args) => run_generate(&settings, &presets, args),
        Command::Presets => {
            print_json(&presets.list_all())?;
            Ok(0)
        }
    }
}

fn run_gallery(settings: &Settings, args: GalleryArgs) -> Result<i32> {
    let root = args.root.unwrap_or_else(|| settings.gallery_dir.clone());
    let gallery = Gallery::open(
        &root,
        settings.build_embedding_provider(),
        settings.embedding_timeout,
    )
    .with_context(|| format!("failed to open gallery at {}", root.display()))?;

    match args.command {
        GalleryCommand::Add(add) => {
            let image = fs::read(&add.image)
                .with_context(|| format!("failed to read image {}", add.image.display()))?;
            let analysis = match &add.analysis {
                Some(path) => load_analysis(path, add.lenient)?,
                None => ImageAnalysis::default(),
            };
            let item = gallery.add_reference(&image, analysis, add.tier)?;
            print_json(&gallery.get_reference(&item.id)?)?;
        }
        GalleryCommand::List(list) => {
            let entries = gallery.list_references(list.style.as_deref(), list.tier, list.limit)?;
            print_json(&entries)?;
        }
        GalleryCommand::Get { id } => match gallery.get_reference(&id)? {
            Some(entry) => print_json(&entry)?,
            None => {
                eprintln!("no reference with id {id}");
                return Ok(1);
            }
        },
        GalleryCommand::Delete { id } => {
            let deleted = gallery.delete_reference(&id)?;
            print_json(&json!({ "id": id, "deleted": deleted }))?;
        }
        GalleryCommand::Reanalyze {
            id,
            analysis,
            lenient,
        } => {
            let analysis = load_analysis(&analysis, lenient)?;
            if !gallery.replace_analysis(&id, analysis)? {
                eprintln!("no reference with id {id}");
                return Ok(1);
            }
            print_json(&gallery.get_reference(&id)?)?;
        }
        GalleryCommand::Similar(similar) => {
            let hits = match (&similar.text, &similar.like, &similar.analysis) {
                (Some(text), None, None) => {
                    gallery.find_similar_to_text(text, similar.top_k, similar.threshold)?
                }
                (None, Some(id), None) => {
                    gallery.find_similar_to_reference(id, similar.top_k, similar.threshold)?
                }
                (None, None, Some(path)) => {
                    let analysis = load_analysis(path, false)?;
                    let description =
                        charmsmith_contracts::describe::search_description(&analysis);
                    debug!(description = %description, "analysis query");
                    gallery.find_similar_to_text(&description, similar.top_k, similar.threshold)?
                }
                _ => bail!("pass exactly one of --text, --like or --analysis"),
            };
            print_json(&hits)?;
        }
        GalleryCommand::Reembed { force } => {
            print_json(&gallery.regenerate_embeddings(force)?)?;
        }
        GalleryCommand::Duplicates => {
            print_json(&gallery.duplicate_groups()?)?;
        }
        GalleryCommand::Events { limit } => {
            print_json(&read_events(gallery.events_path(), limit)?)?;
        }
    }
    Ok(0)
}

fn run_classify(presets: &PresetRegistry, args: ClassifyArgs) -> Result<i32> {
    let analysis = args
        .analysis
        .as_deref()
        .map(|path| load_analysis(path, false))
        .transpose()?;
    let classification = classify(presets.rules(), &args.text, analysis.as_ref());
    print_json(&classification)?;
    Ok(0)
}

fn run_compose(presets: &PresetRegistry, args: ComposeArgs) -> Result<i32> {
    let json_output = args.json;
    let directive = compose(presets, args)?;
    if json_output {
        print_json(&directive)?;
    } else {
        println!("{}", directive.text());
    }
    Ok(0)
}

fn run_generate(settings: &Settings, presets: &PresetRegistry, args: GenerateArgs) -> Result<i32> {
    let directive = compose(presets, args.compose)?;
    let negative = match &directive {
        Directive::Layered(prompt) => prompt.negative.clone(),
        Directive::Enhanced(_) => presets.technical().negative.clone(),
    };
    let request = GenerationRequest {
        prompt: directive.text().to_string(),
        negative,
        long_edge: parse_size(&args.size)?,
        aspect: args.aspect,
        seed: args.seed,
        reference_images: args.references,
        out_dir: args.out,
        timeout: settings.embedding_timeout,
    };
    let generator = DryrunGenerator;
    let image = generator.generate(&request)?;
    print_json(&json!({
        "generator": generator.name(),
        "product_type": directive.product_type(),
        "style": directive.style(),
        "prompt": request.prompt,
        "image": image,
    }))?;
    Ok(0)
}

fn compose(presets: &PresetRegistry, args: ComposeArgs) -> Result<Directive> {
    let mut request = PromptRequest::new(args.instruction);
    if let Some(path) = &args.analysis {
        request = request.with_analysis(load_analysis(path, false)?);
    }
    if let Some(product_type) = args.product_type {
        request = request.with_product_type(product_type);
    }
    if let Some(style) = args.style {
        request = request.with_style(style);
    }
    Ok(PromptComposer::new(presets).compose(&request, args.mode.into()))
}

fn load_analysis(path: &Path, lenient: bool) -> Result<ImageAnalysis> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read analysis {}", path.display()))?;
    if lenient {
        return Ok(parse_model_output_or_degraded(&raw));
    }
    parse_model_output(&raw).with_context(|| format!("invalid analysis in {}", path.display()))
}

fn parse_threshold(raw: &str) -> Result<f32, String> {
    let value: f32 = raw
        .trim()
        .parse()
        .map_err(|_| format!("`{raw}` is not a number"))?;
    if !(0.0..=1.0).contains(&value) {
        return Err(format!("threshold must be within [0, 1], got {value}"));
    }
    Ok(value)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn similar_requires_a_threshold() {
        let missing = Cli::try_parse_from(["charmsmith", "gallery", "similar", "--text", "shell"]);
        assert!(missing.is_err());

        let parsed = Cli::try_parse_from([
            "charmsmith",
            "gallery",
            "similar",
            "--text",
            "shell",
            "--threshold",
            "0.3",
        ]);
        assert!(parsed.is_ok());
    }

    #[test]
    fn threshold_must_be_a_unit_interval_value() {
        assert_eq!(parse_threshold("0.5"), Ok(0.5));
        assert!(parse_threshold("1.5").is_err());
        assert!(parse_threshold("-0.1").is_err());
        assert!(parse_threshold("high").is_err());
    }

    #[test]
    fn tier_and_aspect_parse_from_flags() {
        let parsed = Cli::try_parse_from([
            "charmsmith",
            "gallery",
            "list",
            "--tier",
            "a",
        ]);
        match parsed.map(|cli| cli.command) {
            Ok(Command::Gallery(GalleryArgs {
                command: GalleryCommand::List(list),
                ..
            })) => assert_eq!(list.tier, Some(SalesTier::A)),
            other => panic!("unexpected parse result: {other:?}"),
        }

        assert!(Cli::try_parse_from([
            "charmsmith",
            "generate",
            "--out",
            "/tmp/out",
            "--aspect",
            "5:4",
        ])
        .is_err());
    }

    #[test]
    fn compose_honours_mode_flag() -> anyhow::Result<()> {
        let presets = PresetRegistry::builtin();
        let args = ComposeArgs {
            instruction: "add pearls".to_string(),
            analysis: None,
            product_type: Some("bag_charm".to_string()),
            style: None,
            mode: ModeArg::Enhanced,
            json: false,
        };
        let directive = compose(&presets, args)?;
        assert!(matches!(directive, Directive::Enhanced(_)));
        assert_eq!(directive.product_type(), "bag_charm");
        Ok(())
    }
}
