use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use euroml_db::db::fetch_all_chronological;
use euroml_db::models::Draw;
use euroml_db::rusqlite::Connection;

/// Même colonnes que le format simple accepté par `import`.
const HEADER: [&str; 10] = ["draw_id", "date", "n1", "n2", "n3", "n4", "n5", "s1", "s2", "jackpot"];

#[derive(Debug)]
pub struct ExportReport {
    pub path: PathBuf,
    pub count: usize,
}

/// `euromillions_draws_<premier>_to_<dernier>.csv`
pub fn default_file_name(draws: &[Draw]) -> Option<String> {
    let (first, last) = (draws.first()?, draws.last()?);
    Some(format!("euromillions_draws_{}_to_{}.csv", first.date, last.date))
}

fn record(draw: &Draw) -> Vec<String> {
    let mut fields = vec![draw.draw_id.clone(), draw.date.to_string()];
    fields.extend(draw.balls.iter().map(|b| b.to_string()));
    fields.extend(draw.stars.iter().map(|s| s.to_string()));
    fields.push(draw.jackpot.map(|j| j.to_string()).unwrap_or_default());
    fields
}

/// Écrit tout l'historique, du plus ancien au plus récent. Sans `output`,
/// le fichier est créé dans `dir` sous le nom daté par défaut.
pub fn export_csv(conn: &Connection, output: Option<&Path>, dir: &Path) -> Result<ExportReport> {
    let draws = fetch_all_chronological(conn)?;
    let path = match output {
        Some(path) => path.to_path_buf(),
        None => match default_file_name(&draws) {
            Some(name) => dir.join(name),
            None => bail!("Aucun tirage à exporter"),
        },
    };

    let mut writer = csv::Writer::from_path(&path).with_context(|| format!("Impossible de créer {:?}", path))?;
    writer.write_record(HEADER)?;
    for draw in &draws {
        writer.write_record(record(draw))?;
    }
    writer.flush().with_context(|| format!("Écriture de {:?} impossible", path))?;
    log::info!("{} tirages exportés vers {}", draws.len(), path.display());

    Ok(ExportReport {
        path,
        count: draws.len(),
    })
}
