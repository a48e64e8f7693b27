use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use popscale::classifier::softmax::SoftmaxRegression;
use popscale::classifier::{self, Evaluation};
use popscale::config::AppConfig;
use popscale::export::CONSISTENCY_TOLERANCE;
use popscale::features::{Feature, FeatureVector};
use popscale::pipeline::{self, PipelineOptions};
use popscale::popularity::PopularityClass;
use popscale::similarity::{self, Recommendation, SimilarityIndex};
use popscale::standardize::StandardizationParameters;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "popscale", version, about = "Song catalog standardizer and similarity lookup")]
struct Cli {
    /// Path to a TOML config file (defaults to the XDG config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Raw audio features of a query song.
#[derive(Args)]
struct QueryArgs {
    #[arg(long)]
    bpm: f64,
    #[arg(long)]
    danceability: f64,
    #[arg(long)]
    valence: f64,
    #[arg(long)]
    energy: f64,
    #[arg(long)]
    acousticness: f64,
    #[arg(long)]
    instrumentalness: f64,
    #[arg(long)]
    liveness: f64,
    #[arg(long)]
    speechiness: f64,
}

impl QueryArgs {
    fn to_vector(&self) -> Result<FeatureVector> {
        let pairs = [
            (Feature::Bpm, self.bpm),
            (Feature::Danceability, self.danceability),
            (Feature::Valence, self.valence),
            (Feature::Energy, self.energy),
            (Feature::Acousticness, self.acousticness),
            (Feature::Instrumentalness, self.instrumentalness),
            (Feature::Liveness, self.liveness),
            (Feature::Speechiness, self.speechiness),
        ];
        let v = similarity::query_vector(pairs.iter().map(|(f, v)| (f.query_key(), *v)))?;
        Ok(v)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Clean the dataset, fit scaling, train the classifier and export artifacts
    Build {
        /// Source CSV table
        input: PathBuf,

        /// Artifact directory (defaults to config output_dir, then ./data)
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Skip classifier training and only export
        #[arg(long)]
        skip_train: bool,
    },

    /// Train and evaluate the popularity classifier without exporting
    Train {
        /// Source CSV table
        input: PathBuf,
    },

    /// Recommend catalog songs closest to a set of raw audio features
    Recommend {
        #[command(flatten)]
        query: QueryArgs,

        /// Artifact directory to read
        #[arg(short, long)]
        data: Option<PathBuf>,

        /// Number of results (defaults to config query.top_k)
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Find catalog songs that sound like a given catalog song
    Similar {
        /// Song title to search for (substring match)
        song: String,

        /// Artifact directory to read
        #[arg(short, long)]
        data: Option<PathBuf>,

        /// Number of results (defaults to config query.top_k)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Check that exported artifacts match a fresh standardization of the CSV
    Verify {
        /// Source CSV table the artifacts were built from
        input: PathBuf,

        /// Artifact directory to check
        #[arg(short, long)]
        data: Option<PathBuf>,
    },

    /// Show cleaning results, class distribution and feature statistics
    Stats {
        /// Source CSV table
        input: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing unless --config was given)
    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Build { input, out, skip_train } => {
            let output_dir = out.unwrap_or_else(|| config.resolve_output_dir());
            let options = PipelineOptions {
                input,
                output_dir,
                thresholds: config.labels,
                training: (!skip_train).then(|| config.training.clone()),
                show_progress: true,
            };
            let report = pipeline::run(&options).context("Build failed")?;

            println!(
                "Loaded {} of {} rows ({} dropped)",
                report.loaded,
                report.total_rows,
                report.dropped.len()
            );
            print_distribution(&report.distribution);
            println!();
            print_parameters(&report.params);
            if let Some(eval) = &report.evaluation {
                println!();
                print_evaluation(eval);
            }
            println!();
            println!(
                "Exported {} songs to {} and {}",
                report.export.entries,
                report.export.catalog_path.display(),
                report.export.params_path.display()
            );
            println!(
                "Consistency check: {} rows, max error {:.2e}",
                report.consistency.checked, report.consistency.max_abs_error
            );
        }

        Commands::Train { input } => {
            let loaded = popscale::dataset::load_records(&input)
                .with_context(|| format!("Failed to load {}", input.display()))?;
            let params = StandardizationParameters::fit_records(&loaded.records)
                .context("Failed to fit standardizer")?;
            let trainer = SoftmaxRegression {
                show_progress: true,
                ..SoftmaxRegression::from(&config.training)
            };
            let (model, eval) = classifier::train_and_evaluate(
                &trainer,
                &loaded.records,
                &params,
                &config.labels,
                &config.training,
            )
            .context("Training failed")?;

            print_distribution(&popscale::popularity::class_distribution(
                &loaded.records,
                &config.labels,
            ));
            println!();
            print_evaluation(&eval);
            println!("Final training loss: {:.4}", model.final_loss);
        }

        Commands::Recommend { query, data, limit, json } => {
            let raw = query.to_vector()?;
            let index = load_index(data, &config)?;
            let k = limit.unwrap_or(config.query.top_k);
            let results = index
                .rank_with_workers(&raw, k, config.resolve_workers())
                .context("Query failed")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
                return Ok(());
            }
            if results.is_empty() {
                println!("Catalog is empty.");
                return Ok(());
            }

            println!("Top {} matches:", results.len());
            println!();
            print_recommendations(&results);
        }

        Commands::Similar { song, data, limit } => {
            let index = load_index(data, &config)?;
            let k = limit.unwrap_or(config.query.top_k);

            let Some(i) = index.find_track(&song) else {
                println!("No song matching \"{}\".", song);
                return Ok(());
            };
            let results = index.similar_to(i, k);
            println!("Songs similar to {}:", index.catalog()[i]);
            println!();
            print_recommendations(&results);
        }

        Commands::Verify { input, data } => {
            let dir = data.unwrap_or_else(|| config.resolve_output_dir());
            let loaded = popscale::dataset::load_records(&input)
                .with_context(|| format!("Failed to load {}", input.display()))?;
            let index = SimilarityIndex::load(&dir)
                .with_context(|| format!("Failed to load artifacts from {}", dir.display()))?;

            let report = popscale::export::verify_consistency(
                index.params(),
                &loaded.records,
                index.catalog(),
                CONSISTENCY_TOLERANCE,
            )
            .context("Verification failed")?;

            println!(
                "Checked {} rows, max error {:.2e}",
                report.checked, report.max_abs_error
            );
            for m in report.feature_mismatches.iter().take(10) {
                println!(
                    "  row {:>5} {:<20} expected {:>12.6} stored {:>12.6}",
                    m.row, m.feature, m.expected, m.stored
                );
            }
            for row in report.metadata_mismatches.iter().take(10) {
                println!("  row {:>5} metadata differs", row);
            }
            if !report.is_consistent() {
                anyhow::bail!(
                    "Artifacts are inconsistent ({} feature, {} metadata mismatches)",
                    report.feature_mismatches.len(),
                    report.metadata_mismatches.len()
                );
            }
            println!("Artifacts are consistent.");
        }

        Commands::Stats { input } => {
            let loaded = popscale::dataset::load_records(&input)
                .with_context(|| format!("Failed to load {}", input.display()))?;

            let stats = pipeline::dataset_stats(&loaded, &config.labels);

            println!("Dataset Statistics");
            println!("==================");
            println!("Rows read:        {}", stats.total_rows);
            println!("Clean records:    {}", stats.clean);
            println!("Dropped:          {}", loaded.dropped.len());
            for (reason, count) in &stats.drop_reasons {
                println!("  {:<16} {}", reason, count);
            }
            println!();

            print_distribution(&stats.distribution);

            println!();
            match &stats.params {
                Ok(params) => print_parameters(params),
                Err(e) => println!("Feature statistics unavailable: {}", e),
            }
        }
    }

    Ok(())
}

fn load_index(data: Option<PathBuf>, config: &AppConfig) -> Result<SimilarityIndex> {
    let dir = data.unwrap_or_else(|| config.resolve_output_dir());
    SimilarityIndex::load(&dir).with_context(|| {
        format!(
            "Failed to load artifacts from {}. Run `popscale build` first.",
            dir.display()
        )
    })
}

fn print_distribution(counts: &[usize; 3]) {
    let total: usize = counts.iter().sum();
    println!("Popularity classes:");
    for class in PopularityClass::ALL {
        let n = counts[class.index()];
        let pct = if total > 0 { n as f64 * 100.0 / total as f64 } else { 0.0 };
        println!("  {:<8} {:>6} ({:>5.1}%)", class.label(), n, pct);
    }
}

fn print_parameters(params: &StandardizationParameters) {
    println!("{:<20} {:>12} {:>12}", "Feature", "Mean", "Scale");
    println!("{}", "-".repeat(46));
    for f in Feature::ALL {
        println!(
            "{:<20} {:>12.4} {:>12.4}",
            f.column(),
            params.mean_of(f),
            params.scale_of(f)
        );
    }
}

fn print_evaluation(eval: &Evaluation) {
    println!(
        "Classifier: {} train / {} test, train accuracy {:.2}%, test accuracy {:.2}%",
        eval.train_size,
        eval.test_size,
        eval.train_accuracy * 100.0,
        eval.test_accuracy * 100.0
    );
    println!();
    println!("{:<10} {:>8} {:>8} {:>8}", "actual", "low", "medium", "high");
    for class in PopularityClass::ALL {
        let row = eval.confusion[class.index()];
        println!(
            "{:<10} {:>8} {:>8} {:>8}",
            class.label(),
            row[0],
            row[1],
            row[2]
        );
    }
}

/// Print a table of recommendations, closest first.
fn print_recommendations(results: &[Recommendation]) {
    println!(
        "{:<30} {:<25} {:>5} {:>7} {:>6}",
        "Song", "Artist", "Year", "Dist", "Match"
    );
    println!("{}", "-".repeat(77));

    for r in results {
        println!(
            "{:<30} {:<25} {:>5} {:>7.3} {:>5}%",
            truncate(&r.track_name, 30),
            truncate(&r.artist_name, 25),
            r.year,
            r.distance,
            r.match_score
        );
    }

    println!();
    for r in results {
        println!("  {}", r.search_link);
    }
}

/// Truncate on a char boundary.
fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() > width {
        let head: String = s.chars().take(width - 3).collect();
        format!("{}...", head)
    } else {
        s.to_string()
    }
}
