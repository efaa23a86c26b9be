mod display;
mod export;
mod import;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::warn;

use euroml_db::db::{db_path, delete_draw, fetch_all_chronological, fetch_draw, fetch_last_draws, migrate, open_db, store_stats};
use euroml_db::rusqlite::Connection;
use euroml_gbm::{
    BacktestOptions, BlendWeights, EraPolicy, FeatureConfig, Method, ModelContext, SuggestOptions, TrainConfig, artifact, backtest,
    score, suggest, train,
};

use crate::display::{
    display_backtest, display_draws, display_import_summary, display_model_info, display_scores, display_status, display_suggestions,
    display_training,
};

#[derive(Parser)]
#[command(name = "euroml", about = "Modèles d'apparition des numéros EuroMillions")]
struct Cli {
    /// Base SQLite des tirages (défaut : ./data/euroml.db)
    #[arg(long, global = true, env = "EUROML_DB")]
    db: Option<PathBuf>,

    /// Répertoire des modèles entraînés
    #[arg(long, global = true, env = "EUROML_MODELS", default_value = "models/euromillions")]
    models: PathBuf,

    /// Fenêtres glissantes des features, séparées par des virgules
    #[arg(long, global = true, default_value = "10,30,100")]
    windows: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Importer les tirages depuis un CSV (export FDJ ou format simple)
    Import {
        /// Chemin vers le fichier CSV
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Afficher le chemin de la base de données
    DbPath,

    /// Lister les derniers tirages
    List {
        /// Nombre de tirages à afficher
        #[arg(short, long, default_value = "10")]
        last: u32,
    },

    /// État de la base et du modèle courant
    Status,

    /// Supprimer un tirage par identifiant
    Delete {
        draw_id: String,
    },

    /// Entraîner les classifieurs par validation croisée chronologique
    Train {
        /// Nombre minimum de tirages requis
        #[arg(long, default_value = "300")]
        min_draws: usize,

        /// Nombre de plis de validation
        #[arg(long, default_value = "5")]
        folds: usize,

        /// Ères de règles retenues pour l'historique
        #[arg(long, value_enum, default_value = "modern-preferred")]
        era: EraPolicy,

        /// Pondérer la classe positive (ratio négatifs/positifs, borné à 1-20)
        #[arg(long)]
        balance_classes: bool,

        /// Nombre d'arbres par classifieur
        #[arg(long, default_value = "100")]
        rounds: usize,

        /// Seed du boosting
        #[arg(long, default_value = "42")]
        seed: u64,
    },

    /// Probabilités d'apparition au prochain tirage
    Score {
        /// Mélanger avec les heuristiques fréquence / paires / retard
        #[arg(long)]
        blend: bool,

        /// Poids du mélange : ml,fréquence,paires,retard
        #[arg(long, default_value = "0.4,0.25,0.2,0.15")]
        weights: String,

        /// Nombre de numéros affichés par pool
        #[arg(long, default_value = "15")]
        top: usize,
    },

    /// Proposer des grilles
    Suggest {
        /// Nombre de grilles
        #[arg(short, long, default_value = "5")]
        count: usize,

        /// Méthode de construction
        #[arg(short, long, value_enum, default_value = "hybrid")]
        method: Method,

        /// Seed pour la reproductibilité (aléatoire si absent)
        #[arg(long)]
        seed: Option<u64>,

        /// Boules candidates pour la méthode hybride
        #[arg(long, default_value = "15")]
        hybrid_top: usize,

        /// Étoiles candidates pour la méthode hybride
        #[arg(long, default_value = "5")]
        hybrid_top_stars: usize,

        /// Méthode de repli si la première échoue
        #[arg(long, value_enum)]
        fallback: Option<Method>,

        #[arg(long)]
        blend: bool,

        #[arg(long, default_value = "0.4,0.25,0.2,0.15")]
        weights: String,
    },

    /// Détails du modèle entraîné
    Info,

    /// Exporter tout l'historique en CSV (format simple, réimportable)
    Export {
        /// Fichier de sortie (défaut : euromillions_draws_<début>_to_<fin>.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Évaluer la chaîne complète sur les derniers tirages, sans regarder l'avenir
    Backtest {
        /// Nombre de tirages évalués
        #[arg(long, default_value = "10")]
        steps: usize,

        /// Réentraîner tous les N tirages
        #[arg(long, default_value = "1")]
        retrain_every: usize,

        #[arg(short, long, default_value = "5")]
        count: usize,

        #[arg(short, long, value_enum, default_value = "hybrid")]
        method: Method,

        #[arg(long, default_value = "42")]
        seed: u64,

        #[arg(long, default_value = "300")]
        min_draws: usize,

        #[arg(long, default_value = "5")]
        folds: usize,

        #[arg(long, value_enum, default_value = "modern-preferred")]
        era: EraPolicy,

        #[arg(long, default_value = "100")]
        rounds: usize,

        #[arg(long)]
        blend: bool,

        #[arg(long, default_value = "0.4,0.25,0.2,0.15")]
        weights: String,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn,euroml=info,euroml_gbm=info,euroml_db=info"))
        .init();

    let cli = Cli::parse();
    let path = cli.db.clone().unwrap_or_else(db_path);
    let features = feature_config(&cli.windows)?;

    if let Command::DbPath = cli.command {
        println!("{}", path.display());
        return Ok(());
    }

    let conn = open_db(&path)?;
    migrate(&conn)?;

    match cli.command {
        Command::Import { file } => cmd_import(&conn, &file),
        Command::DbPath => Ok(()),
        Command::List { last } => cmd_list(&conn, last),
        Command::Status => cmd_status(&conn, &cli.models),
        Command::Delete { draw_id } => cmd_delete(&conn, &draw_id),
        Command::Train {
            min_draws,
            folds,
            era,
            balance_classes,
            rounds,
            seed,
        } => {
            let mut config = TrainConfig {
                folds,
                min_draws,
                era_policy: era,
                balance_classes,
                features,
                ..TrainConfig::default()
            };
            config.boost.n_rounds = rounds;
            config.boost.seed = seed;
            cmd_train(&conn, &cli.models, &config)
        }
        Command::Score { blend, weights, top } => {
            let weights = blend_weights(blend, &weights)?;
            cmd_score(&conn, &cli.models, &features, weights.as_ref(), top)
        }
        Command::Suggest {
            count,
            method,
            seed,
            hybrid_top,
            hybrid_top_stars,
            fallback,
            blend,
            weights,
        } => {
            let options = SuggestOptions {
                method,
                count,
                seed: seed.unwrap_or_else(rand::random),
                hybrid_top_balls: hybrid_top,
                hybrid_top_stars,
                ..SuggestOptions::default()
            };
            let weights = blend_weights(blend, &weights)?;
            cmd_suggest(&conn, &cli.models, &features, weights.as_ref(), &options, fallback)
        }
        Command::Info => cmd_info(&cli.models),
        Command::Export { output } => cmd_export(&conn, output.as_deref()),
        Command::Backtest {
            steps,
            retrain_every,
            count,
            method,
            seed,
            min_draws,
            folds,
            era,
            rounds,
            blend,
            weights,
        } => {
            let mut config = TrainConfig {
                folds,
                min_draws,
                era_policy: era,
                features,
                ..TrainConfig::default()
            };
            config.boost.n_rounds = rounds;
            let options = BacktestOptions {
                steps,
                retrain_every,
                suggest: SuggestOptions {
                    method,
                    count,
                    seed,
                    ..SuggestOptions::default()
                },
                blend: blend_weights(blend, &weights)?,
            };
            cmd_backtest(&conn, &config, &options)
        }
    }
}

fn feature_config(windows: &str) -> Result<FeatureConfig> {
    let windows: Vec<usize> = windows
        .split(',')
        .map(|s| s.trim().parse::<usize>())
        .collect::<Result<_, _>>()
        .context("Format de fenêtres invalide")?;
    if windows.is_empty() || windows.contains(&0) {
        bail!("Les fenêtres doivent être des entiers positifs");
    }
    Ok(FeatureConfig {
        windows,
        ..FeatureConfig::default()
    })
}

fn blend_weights(blend: bool, weights: &str) -> Result<Option<BlendWeights>> {
    if !blend {
        return Ok(None);
    }
    Ok(Some(BlendWeights::parse(weights)?))
}

fn ensure_not_empty(conn: &Connection) -> Result<bool> {
    let stats = store_stats(conn)?;
    if stats.total_draws == 0 {
        println!("Base vide. Lancez d'abord : euroml import --file <csv>");
        return Ok(false);
    }
    Ok(true)
}

fn cmd_import(conn: &Connection, file: &Path) -> Result<()> {
    let report = import::import_csv(conn, file)?;
    display_import_summary(&report);
    Ok(())
}

fn cmd_list(conn: &Connection, last: u32) -> Result<()> {
    if !ensure_not_empty(conn)? {
        return Ok(());
    }
    let draws = fetch_last_draws(conn, last)?;
    display_draws(&draws);
    Ok(())
}

fn cmd_status(conn: &Connection, models_dir: &Path) -> Result<()> {
    let stats = store_stats(conn)?;
    let models = match artifact::load(models_dir) {
        Ok(models) => Some(models),
        Err(euroml_gbm::ModelError::ArtifactMissing(_)) => None,
        Err(e) => {
            warn!("Modèle illisible dans {} : {}", models_dir.display(), e);
            None
        }
    };
    display_status(&stats, models.as_ref().map(|m| &m.meta));
    Ok(())
}

fn cmd_delete(conn: &Connection, draw_id: &str) -> Result<()> {
    let Some(draw) = fetch_draw(conn, draw_id)? else {
        bail!("Aucun tirage avec l'identifiant {}", draw_id);
    };
    display_draws(std::slice::from_ref(&draw));
    if delete_draw(conn, draw_id)? {
        println!("Tirage {} supprimé.", draw_id);
    }
    Ok(())
}

fn cmd_train(conn: &Connection, models_dir: &Path, config: &TrainConfig) -> Result<()> {
    if !ensure_not_empty(conn)? {
        return Ok(());
    }
    let draws = fetch_all_chronological(conn)?;

    let pb = ProgressBar::new((config.folds * 2) as u64);
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("template de progression valide")
            .progress_chars("=> "),
    );
    let models = train(&draws, config, |report| {
        pb.set_message(format!("{} pli {} : {:.5}", report.pool, report.fold + 1, report.log_loss));
        pb.inc(1);
    });
    pb.finish_and_clear();
    let models = models?;

    artifact::save(models_dir, &models)
        .with_context(|| format!("Écriture des modèles dans {} impossible", models_dir.display()))?;
    display_training(&models);
    println!("\nModèles enregistrés dans {}", models_dir.display());
    Ok(())
}

fn cmd_score(
    conn: &Connection,
    models_dir: &Path,
    features: &FeatureConfig,
    weights: Option<&BlendWeights>,
    top: usize,
) -> Result<()> {
    if !ensure_not_empty(conn)? {
        return Ok(());
    }
    let draws = fetch_all_chronological(conn)?;
    let mut ctx = ModelContext::new(models_dir);
    let table = score(&mut ctx, &draws, features, weights)?;
    display_scores(&table, top);
    Ok(())
}

fn cmd_suggest(
    conn: &Connection,
    models_dir: &Path,
    features: &FeatureConfig,
    weights: Option<&BlendWeights>,
    options: &SuggestOptions,
    fallback: Option<Method>,
) -> Result<()> {
    if !ensure_not_empty(conn)? {
        return Ok(());
    }
    let draws = fetch_all_chronological(conn)?;
    let mut ctx = ModelContext::new(models_dir);
    let table = score(&mut ctx, &draws, features, weights)?;

    let combos = match (suggest(&table, options), fallback) {
        (Ok(combos), _) => combos,
        (Err(e), Some(method)) if method != options.method => {
            warn!("Méthode {} en échec ({}), repli sur {}", options.method, e, method);
            suggest(&table, &SuggestOptions { method, ..options.clone() })?
        }
        (Err(e), _) => return Err(e.into()),
    };
    display_suggestions(&combos, options.seed);

    let audit = serde_json::json!({
        "generated_at": chrono::Utc::now(),
        "options": options,
        "scores": table,
        "combinations": combos,
    });
    let path = artifact::write_latest_scores(ctx.dir(), &audit)?;
    log::debug!("journal écrit dans {}", path.display());
    Ok(())
}

fn cmd_export(conn: &Connection, output: Option<&Path>) -> Result<()> {
    let dir = std::env::current_dir().context("Répertoire courant inaccessible")?;
    let report = export::export_csv(conn, output, &dir)?;
    println!("{} tirages exportés vers {}", report.count, report.path.display());
    Ok(())
}

fn cmd_backtest(conn: &Connection, config: &TrainConfig, options: &BacktestOptions) -> Result<()> {
    if !ensure_not_empty(conn)? {
        return Ok(());
    }
    let draws = fetch_all_chronological(conn)?;

    let pb = ProgressBar::new(options.steps as u64);
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("template de progression valide")
            .progress_chars("=> "),
    );
    let report = backtest(&draws, config, options, |step| {
        pb.set_message(format!("{} ({})", step.draw_id, step.date));
        pb.inc(1);
    });
    pb.finish_and_clear();
    display_backtest(&report?);
    Ok(())
}

fn cmd_info(models_dir: &Path) -> Result<()> {
    let mut ctx = ModelContext::new(models_dir);
    let models = ctx.load()?;
    display_model_info(models);
    Ok(())
}
