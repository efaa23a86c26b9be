use comfy_table::{Cell, Color, ContentArrangement, Table, presets::UTF8_FULL};

use crate::import::ImportReport;
use euroml_db::db::StoreStats;
use euroml_db::models::{Combination, Draw, Pool};
use euroml_gbm::{BacktestReport, ScoreTable};
use euroml_gbm::training::{ModelMeta, PoolMetrics, TrainedModels};

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

fn join_numbers(numbers: &[u8]) -> String {
    numbers
        .iter()
        .map(|n| format!("{:2}", n))
        .collect::<Vec<_>>()
        .join(" - ")
}

fn pool_title(pool: Pool) -> &'static str {
    match pool {
        Pool::Balls => "Boules",
        Pool::Stars => "Étoiles",
    }
}

pub fn display_draws(draws: &[Draw]) {
    if draws.is_empty() {
        println!("Aucun tirage à afficher.");
        return;
    }

    let mut table = new_table(vec!["Tirage", "Date", "Boules", "Étoiles", "Jackpot", "Ère"]);
    for draw in draws {
        let mut stars = draw.stars;
        stars.sort();
        let jackpot = match draw.jackpot {
            Some(j) => format!("{:.0} €", j),
            None => "-".to_string(),
        };
        table.add_row(vec![
            draw.draw_id.clone(),
            draw.date.to_string(),
            join_numbers(&draw.sorted_balls()),
            join_numbers(&stars),
            jackpot,
            draw.era().to_string(),
        ]);
    }
    println!("{table}");
}

pub fn display_import_summary(report: &ImportReport) {
    println!("Import terminé :");
    println!("  Total lignes lues : {}", report.total_records);
    println!("  Insérés           : {}", report.summary.inserted);
    println!("  Mis à jour        : {}", report.summary.updated);
    let errors = report.parse_errors + report.summary.errors;
    if errors > 0 {
        println!("  Erreurs           : {}", errors);
    }
}

pub fn display_status(stats: &StoreStats, meta: Option<&ModelMeta>) {
    println!("Tirages en base : {}", stats.total_draws);
    if let (Some(first), Some(last)) = (stats.earliest, stats.latest) {
        println!("Période         : {} → {}", first, last);
    }
    match meta {
        Some(meta) => {
            println!(
                "Modèle          : {} (entraîné le {}, historique depuis {})",
                meta.run_id,
                meta.trained_at.format("%Y-%m-%d %H:%M"),
                meta.history_from
            );
            if let Some(last) = stats.latest {
                if last > meta.data.last_date {
                    println!("                  de nouveaux tirages sont disponibles depuis {}, pensez à réentraîner", meta.data.last_date);
                }
            }
        }
        None => println!("Modèle          : aucun (lancez : euroml train)"),
    }
}

fn display_pool_metrics(pool: Pool, metrics: &PoolMetrics) {
    println!("\n── {} ──", pool_title(pool));
    let mut table = new_table(vec!["Pli", "Log-loss", "Candidats constants", ""]);
    for (fold, loss) in metrics.fold_log_loss.iter().enumerate() {
        let chosen = fold == metrics.best_fold;
        let degenerate = metrics.degenerate_candidates.get(fold).copied().unwrap_or(0);
        let mark = if chosen { Cell::new("retenu").fg(Color::Green) } else { Cell::new("") };
        table.add_row(vec![
            Cell::new(fold + 1),
            Cell::new(format!("{:.5}", loss)),
            Cell::new(degenerate),
            mark,
        ]);
    }
    println!("{table}");
    println!(
        "Moyenne {:.5} ± {:.5}, référence (taux de base) {:.5}",
        metrics.mean_log_loss, metrics.std_log_loss, metrics.baseline_log_loss
    );
    let weights = &metrics.class_weights;
    if weights.iter().any(|&w| w != 1.0) {
        let min = weights.iter().copied().fold(f64::INFINITY, f64::min);
        let max = weights.iter().copied().fold(0.0, f64::max);
        println!("Poids de classe positive : {:.2} à {:.2}", min, max);
    }
}

pub fn display_training(models: &TrainedModels) {
    let meta = &models.meta;
    println!(
        "\nEntraînement {} : {} tirages ({} → {}), {} transitions",
        meta.run_id, meta.data.n_draws, meta.data.first_date, meta.data.last_date, meta.data.n_transitions
    );
    for pool in [Pool::Balls, Pool::Stars] {
        display_pool_metrics(pool, meta.metrics(pool));
    }
}

pub fn display_model_info(models: &TrainedModels) {
    let meta = &models.meta;
    println!("Modèle        : {}", meta.run_id);
    println!("Entraîné le   : {}", meta.trained_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("Historique    : {} → {} ({} tirages)", meta.history_from, meta.data.last_date, meta.data.n_draws);
    println!("Schéma        : {}", meta.schema.fingerprint());
    println!(
        "Boosting      : {} arbres, profondeur {}, taux {}, seed {}",
        meta.config.boost.n_rounds, meta.config.boost.max_depth, meta.config.boost.learning_rate, meta.config.boost.seed
    );
    println!(
        "Validation    : {} plis, politique d'ère {:?}, équilibrage {}",
        meta.config.folds,
        meta.config.era_policy,
        if meta.config.balance_classes { "oui" } else { "non" }
    );
    for pool in [Pool::Balls, Pool::Stars] {
        let model = models.pool(pool);
        println!(
            "{:<13} : pli {} retenu, {} classifieurs dont {} constants",
            pool_title(pool),
            model.fold + 1,
            model.candidates.len(),
            model.constant_count()
        );
    }
    for pool in [Pool::Balls, Pool::Stars] {
        display_pool_metrics(pool, meta.metrics(pool));
    }
}

pub fn display_scores(table: &ScoreTable, top: usize) {
    let kind = if table.blended { "mélangées" } else { "modèle" };
    println!("\n🎯 Probabilités ({kind}) pour le tirage suivant le {}\n", table.as_of);

    for pool in [Pool::Balls, Pool::Stars] {
        println!("── {} ──", pool_title(pool));
        let uniform = pool.pick_count() as f64 / pool.size() as f64;
        let mut out = new_table(vec!["Rang", "Numéro", "Probabilité", "Écart / uniforme"]);
        for (rank, score) in table.pool(pool).iter().take(top).enumerate() {
            let lift = score.probability / uniform;
            let color = if lift > 1.1 {
                Color::Green
            } else if lift < 0.9 {
                Color::Red
            } else {
                Color::White
            };
            out.add_row(vec![
                Cell::new(rank + 1),
                Cell::new(format!("{:2}", score.number)),
                Cell::new(format!("{:.4}", score.probability)),
                Cell::new(format!("{:+.1} %", (lift - 1.0) * 100.0)).fg(color),
            ]);
        }
        println!("{out}\n");
    }
}

pub fn display_suggestions(combos: &[Combination], seed: u64) {
    println!("\n🎲 Suggestions de grilles (seed {seed})\n");

    let mut table = new_table(vec!["#", "Boules", "Étoiles", "Méthode", "Confiance"]);
    for (i, combo) in combos.iter().enumerate() {
        table.add_row(vec![
            format!("{}", i + 1),
            join_numbers(&combo.balls),
            join_numbers(&combo.stars),
            combo.method.clone(),
            format!("{:.4}", combo.confidence),
        ]);
    }
    println!("{table}");
}

pub fn display_backtest(report: &BacktestReport) {
    if report.steps.is_empty() {
        println!("Aucun tirage évalué.");
        return;
    }
    println!("\n📈 Backtest glissant sur {} tirages\n", report.steps.len());

    let mut table = new_table(vec!["Tirage", "Date", "Appris sur", "Meilleure grille", "Brier boules", "Brier étoiles"]);
    for step in &report.steps {
        let (balls, stars) = step.best_hits();
        let color = if balls >= 2 || stars >= 2 { Color::Green } else { Color::White };
        table.add_row(vec![
            Cell::new(&step.draw_id),
            Cell::new(step.date),
            Cell::new(step.trained_on),
            Cell::new(format!("{balls} + {stars}")).fg(color),
            Cell::new(format!("{:.4}", step.brier_balls)),
            Cell::new(format!("{:.4}", step.brier_stars)),
        ]);
    }
    println!("{table}");
    println!(
        "Bons numéros par grille : {:.2} boules / {:.2} étoiles (hasard : {:.2} / {:.2})",
        report.mean_ball_hits, report.mean_star_hits, report.random_ball_hits, report.random_star_hits
    );
    println!(
        "Brier moyen {:.4} / {:.4}, log-loss moyenne {:.4} / {:.4}",
        report.mean_brier_balls, report.mean_brier_stars, report.mean_log_loss_balls, report.mean_log_loss_stars
    );
}
