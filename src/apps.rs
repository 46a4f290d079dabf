use std::error::Error;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum, error::ErrorKind};

use crate::blocking::TargetCatalog;
use crate::cache::artifact_path;
use crate::catalog;
use crate::classifier::{ClassifierKind, Hyperparameters};
use crate::config::{BlockingConfig, EvaluationConfig, EvaluationStrategy, LinkerConfig, Metric};
use crate::constants::evaluation::{DEFAULT_K_FOLDS, DEFAULT_SEED};
use crate::constants::pipeline::{
    CONFIDENCE_THRESHOLD, DEFAULT_CHUNK_SIZE, DEFAULT_DIR_IO, FULL_TEXT_TOP_N,
};
use crate::constants::reconcile::{
    DEPRECATED_IDS_SUFFIX, EXTERNAL_IDS_SUFFIX, NON_EXISTENT_IDS_SUFFIX, URLS_SUFFIX,
};
use crate::data::Field;
use crate::evaluation::run_evaluation;
use crate::pipeline::{Linker, SourceDataset};
use crate::reconcile::{
    check_existence, check_links, split_additions, write_deprecations, write_statements,
};
use crate::transport::fs::{
    JsonlDataset, JsonlUploader, load_catalog, load_formatters, load_links, load_statements,
};
use crate::upload::Uploader;

/// Boxed source dataset handed out by a collaborator factory.
pub type DynDataset = Box<dyn SourceDataset + 'static>;
/// Boxed target catalog handed out by a collaborator factory.
pub type DynCatalog = Box<dyn TargetCatalog + 'static>;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StrategyArg {
    Average,
    Single,
    Nested,
}

impl From<StrategyArg> for EvaluationStrategy {
    fn from(value: StrategyArg) -> Self {
        match value {
            StrategyArg::Average => EvaluationStrategy::Average,
            StrategyArg::Single => EvaluationStrategy::Single,
            StrategyArg::Nested => EvaluationStrategy::Nested,
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "linkwise",
    disable_help_subcommand = true,
    about = "Link knowledge-base items to external catalog records",
    long_about = "Train and run record-linkage classifiers between the knowledge base and a target catalog, evaluate them, and validate existing identifier statements."
)]
struct LinkwiseCli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build the training set and persist a fitted model.
    Train(TrainArgs),
    /// Score candidate links with a persisted model.
    Classify(ClassifyArgs),
    /// Cross-validate a classifier on the cached training set.
    Evaluate(EvaluateArgs),
    /// Validate identifier statements through their links.
    CheckLinks(CheckLinksArgs),
    /// Find identifier statements whose target record does not exist.
    CheckExistence(CheckExistenceArgs),
}

#[derive(Debug, Args)]
struct TargetArgs {
    #[arg(help = "Target catalog key")]
    catalog: String,
    #[arg(help = "Entity type key within the catalog")]
    entity: String,
    #[arg(
        long = "dir-io",
        value_name = "DIR",
        default_value = DEFAULT_DIR_IO,
        help = "Directory for models, caches, and outputs"
    )]
    dir_io: PathBuf,
}

#[derive(Debug, Args)]
struct LinkerArgs {
    #[command(flatten)]
    target: TargetArgs,
    #[arg(help = "Classifier tag or alias")]
    classifier: String,
    #[arg(long, value_name = "PATH", help = "Source records (.jsonl file or directory)")]
    source: PathBuf,
    #[arg(
        long = "target-dump",
        value_name = "PATH",
        help = "Target catalog records (.jsonl file or directory)"
    )]
    target_dump: PathBuf,
    #[arg(
        long = "chunk-size",
        default_value_t = DEFAULT_CHUNK_SIZE,
        value_parser = parse_positive_usize,
        help = "Max source records per chunk"
    )]
    chunk_size: usize,
    #[arg(
        long = "block-source-field",
        value_parser = parse_field,
        help = "Source field used for exact-match blocking"
    )]
    block_source_field: Option<Field>,
    #[arg(
        long = "block-target-field",
        value_parser = parse_field,
        help = "Target field used for exact-match blocking"
    )]
    block_target_field: Option<Field>,
    #[arg(
        long = "full-text-top-n",
        default_value_t = FULL_TEXT_TOP_N,
        help = "Full-text hits kept per source record when building training sets"
    )]
    full_text_top_n: usize,
    #[arg(long, default_value_t = DEFAULT_SEED, help = "Seed for classifier initialization")]
    seed: u64,
}

#[derive(Debug, Args)]
struct HyperparameterArgs {
    #[arg(long, help = "Naive Bayes binarization threshold")]
    binarize: Option<f64>,
    #[arg(long, help = "Naive Bayes smoothing")]
    alpha: Option<f64>,
    #[arg(long, help = "SVM inverse regularization strength")]
    c: Option<f64>,
    #[arg(long, help = "Perceptron training epochs")]
    epochs: Option<usize>,
    #[arg(long = "batch-size", value_parser = parse_positive_usize, help = "Perceptron batch size")]
    batch_size: Option<usize>,
}

impl HyperparameterArgs {
    fn resolve(&self) -> Hyperparameters {
        let defaults = Hyperparameters::default();
        Hyperparameters {
            binarize: self.binarize.unwrap_or(defaults.binarize),
            alpha: self.alpha.unwrap_or(defaults.alpha),
            c: self.c.unwrap_or(defaults.c),
            epochs: self.epochs.unwrap_or(defaults.epochs),
            batch_size: self.batch_size.unwrap_or(defaults.batch_size),
            ..defaults
        }
    }
}

#[derive(Debug, Args)]
struct TrainArgs {
    #[command(flatten)]
    linker: LinkerArgs,
    #[command(flatten)]
    params: HyperparameterArgs,
}

#[derive(Debug, Args)]
struct ClassifyArgs {
    #[command(flatten)]
    linker: LinkerArgs,
    #[arg(
        long,
        default_value_t = CONFIDENCE_THRESHOLD,
        help = "Minimum score for a link to be emitted"
    )]
    threshold: f64,
    #[arg(
        long = "post-block-field",
        value_parser = parse_field,
        help = "Field whose values must overlap for a link to survive, repeat as needed"
    )]
    post_block_fields: Vec<Field>,
    #[arg(long, value_name = "PATH", help = "Append accepted links to this upload log")]
    upload: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct EvaluateArgs {
    #[command(flatten)]
    target: TargetArgs,
    #[arg(help = "Classifier tag or alias")]
    classifier: String,
    #[arg(long, value_enum, default_value = "average", help = "Cross-validation strategy")]
    strategy: StrategyArg,
    #[arg(
        long = "k-folds",
        default_value_t = DEFAULT_K_FOLDS,
        value_parser = parse_positive_usize,
        help = "Number of folds"
    )]
    k_folds: usize,
    #[arg(long, default_value = "f1", help = "Metric optimized by nested grid search")]
    metric: String,
    #[arg(long, default_value_t = DEFAULT_SEED, help = "Seed for folds and classifiers")]
    seed: u64,
    #[command(flatten)]
    params: HyperparameterArgs,
}

#[derive(Debug, Args)]
struct CheckLinksArgs {
    #[command(flatten)]
    target: TargetArgs,
    #[arg(long, value_name = "PATH", help = "Identifier statements, JSON {qid: [tids]}")]
    statements: PathBuf,
    #[arg(long = "source-links", value_name = "PATH", help = "Item links, JSON {qid: [urls]}")]
    source_links: PathBuf,
    #[arg(long = "target-links", value_name = "PATH", help = "Target links, JSON {tid: [urls]}")]
    target_links: PathBuf,
    #[arg(long, value_name = "PATH", help = "External-identifier formatters, JSON list")]
    formatters: Option<PathBuf>,
    #[arg(long, value_name = "PATH", help = "Append results to this upload log")]
    upload: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct CheckExistenceArgs {
    #[command(flatten)]
    target: TargetArgs,
    #[arg(long, value_name = "PATH", help = "Identifier statements, JSON {qid: [tids]}")]
    statements: PathBuf,
    #[arg(
        long = "target-dump",
        value_name = "PATH",
        help = "Target catalog records (.jsonl file or directory)"
    )]
    target_dump: PathBuf,
    #[arg(long, value_name = "PATH", help = "Append deprecations to this upload log")]
    upload: Option<PathBuf>,
}

/// Run the CLI with the file-backed collaborators.
pub fn run_linkwise<I>(args_iter: I) -> Result<(), Box<dyn Error>>
where
    I: Iterator<Item = String>,
{
    run_linkwise_with(
        args_iter,
        |path| Ok(Box::new(JsonlDataset::open("wikidata", path)?) as DynDataset),
        |id, path| Ok(Box::new(load_catalog(id, path)?) as DynCatalog),
    )
}

/// Run the CLI, opening the source dataset and target catalog through the
/// given factories.
pub fn run_linkwise_with<I, OpenSource, OpenCatalog>(
    args_iter: I,
    open_source: OpenSource,
    open_catalog: OpenCatalog,
) -> Result<(), Box<dyn Error>>
where
    I: Iterator<Item = String>,
    OpenSource: FnOnce(&Path) -> Result<DynDataset, Box<dyn Error>>,
    OpenCatalog: FnOnce(&str, &Path) -> Result<DynCatalog, Box<dyn Error>>,
{
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .try_init();

    let Some(cli) =
        parse_cli::<LinkwiseCli, _>(std::iter::once("linkwise".to_string()).chain(args_iter))?
    else {
        return Ok(());
    };

    match cli.command {
        Command::Train(args) => {
            let (linker, kind) = build_linker(&args.linker, LinkerConfig::default())?;
            let params = args.params.resolve();
            let source = open_source(&args.linker.source)?;
            let target = open_catalog(linker.catalog().key, &args.linker.target_dump)?;
            linker.train(kind, &params, source.as_ref(), target.as_ref())?;
            println!("model saved to {}", linker.model_path(kind).display());
        }
        Command::Classify(args) => {
            let base = LinkerConfig {
                confidence_threshold: args.threshold,
                post_block_fields: args.post_block_fields.clone(),
                ..LinkerConfig::default()
            };
            let (linker, kind) = build_linker(&args.linker, base)?;
            let source = open_source(&args.linker.source)?;
            let target = open_catalog(linker.catalog().key, &args.linker.target_dump)?;
            let mut uploader = args.upload.as_ref().map(JsonlUploader::new);
            let summary = linker.run_classification(
                kind,
                source.as_ref(),
                target.as_ref(),
                uploader.as_mut().map(|uploader| uploader as &mut dyn Uploader),
            )?;
            println!(
                "chunks: {}, candidates: {}, emitted: {}, vetoed: {}, overridden: {}, padded columns: {}{}",
                summary.chunks,
                summary.candidates,
                summary.emitted,
                summary.corrections.vetoed,
                summary.corrections.overridden,
                summary.padded_columns,
                if summary.from_cache { " (cached)" } else { "" }
            );
            println!("results written to {}", linker.result_path(kind).display());
        }
        Command::Evaluate(args) => {
            catalog::entity(&args.target.catalog, &args.target.entity)?;
            let kind: ClassifierKind = args.classifier.parse()?;
            let metric: Metric = args.metric.parse()?;
            let config = LinkerConfig {
                dir_io: args.target.dir_io.clone(),
                seed: args.seed,
                ..LinkerConfig::default()
            };
            let linker = Linker::new(config, &args.target.catalog, &args.target.entity)?;
            let evaluation = EvaluationConfig {
                k_folds: args.k_folds,
                strategy: args.strategy.into(),
                metric,
                seed: args.seed,
            };
            let output = run_evaluation(&linker, kind, &args.params.resolve(), &evaluation)?;
            println!("performance written to {}", output.performance_path.display());
            if let Some(path) = &output.predictions_path {
                println!("predictions written to {}", path.display());
            }
            for path in &output.best_model_paths {
                println!("best model saved to {}", path.display());
            }
        }
        Command::CheckLinks(args) => {
            let (spec, entity) = catalog::entity(&args.target.catalog, &args.target.entity)?;
            let statements = load_statements(&args.statements)?;
            let source_links = load_links(&args.source_links)?;
            let target_links = load_links(&args.target_links)?;
            let formatters = match &args.formatters {
                Some(path) => load_formatters(path)?,
                None => Vec::new(),
            };
            let check = check_links(&statements, &source_links, &target_links);
            let (external_ids, urls) = split_additions(&check.to_add, &formatters);

            let output =
                |tail: &str| artifact_path(&args.target.dir_io, spec.key, entity.key, tail);
            write_deprecations(&output(DEPRECATED_IDS_SUFFIX), &check.to_deprecate)?;
            write_statements(&output(EXTERNAL_IDS_SUFFIX), &external_ids)?;
            write_statements(&output(URLS_SUFFIX), &urls)?;
            if let Some(path) = &args.upload {
                let mut uploader = JsonlUploader::new(path);
                uploader.deprecate(spec, &check.to_deprecate)?;
                uploader.add_statements(&external_ids)?;
                uploader.add_statements(&urls)?;
            }
            println!(
                "{} {} ids to deprecate, {} external ids to add, {} urls to add (skipped {} items, {} target ids)",
                check.to_deprecate.len(),
                spec.key,
                external_ids.len(),
                urls.len(),
                check.skipped_qids,
                check.skipped_tids
            );
        }
        Command::CheckExistence(args) => {
            let (spec, entity) = catalog::entity(&args.target.catalog, &args.target.entity)?;
            let statements = load_statements(&args.statements)?;
            let target = open_catalog(spec.key, &args.target_dump)?;
            let invalid = check_existence(&statements, target.as_ref())?;
            let path = artifact_path(
                &args.target.dir_io,
                spec.key,
                entity.key,
                NON_EXISTENT_IDS_SUFFIX,
            );
            write_deprecations(&path, &invalid)?;
            if let Some(log) = &args.upload {
                JsonlUploader::new(log).deprecate(spec, &invalid)?;
            }
            println!("{} invalid target ids written to {}", invalid.len(), path.display());
        }
    }
    Ok(())
}

/// Resolve keys in catalog, entity, classifier order, then build the linker.
fn build_linker(
    args: &LinkerArgs,
    base: LinkerConfig,
) -> Result<(Linker, ClassifierKind), Box<dyn Error>> {
    catalog::entity(&args.target.catalog, &args.target.entity)?;
    let kind: ClassifierKind = args.classifier.parse()?;
    let config = LinkerConfig {
        dir_io: args.target.dir_io.clone(),
        chunk_size: args.chunk_size,
        blocking: BlockingConfig::resolve(args.block_source_field, args.block_target_field),
        full_text_top_n: args.full_text_top_n,
        seed: args.seed,
        ..base
    };
    let linker = Linker::new(config, &args.target.catalog, &args.target.entity)?;
    Ok((linker, kind))
}

fn parse_positive_usize(raw: &str) -> Result<usize, String> {
    let parsed = raw
        .parse::<usize>()
        .map_err(|_| format!("Could not parse '{}' as a positive integer", raw))?;
    if parsed == 0 {
        return Err("value must be greater than zero".to_string());
    }
    Ok(parsed)
}

fn parse_field(raw: &str) -> Result<Field, String> {
    raw.parse::<Field>().map_err(|err| err.to_string())
}

fn parse_cli<T, I>(args: I) -> Result<Option<T>, Box<dyn Error>>
where
    T: Parser,
    I: IntoIterator,
    I::Item: Into<std::ffi::OsString> + Clone,
{
    match T::try_parse_from(args) {
        Ok(cli) => Ok(Some(cli)),
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                err.print()?;
                Ok(None)
            }
            _ => Err(err.into()),
        },
    }
}
