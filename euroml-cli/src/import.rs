use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use euroml_db::db::{UpsertSummary, upsert_draws};
use euroml_db::models::Draw;
use euroml_db::rusqlite::Connection;

/// Format d'un fichier d'historique, détecté sur la ligne d'en-tête.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsvFormat {
    /// Export FDJ, séparateur `;`, dates JJ/MM/AAAA.
    Fdj,
    /// `draw_id,date,n1,n2,n3,n4,n5,s1,s2[,jackpot]`, dates ISO.
    Simple,
}

pub fn parse_french_decimal(s: &str) -> Result<f64> {
    let normalized = s.trim().replace(' ', "").replace(',', ".");
    normalized
        .parse::<f64>()
        .with_context(|| format!("Impossible de parser le nombre: '{}'", s))
}

/// JJ/MM/AAAA, JJ/MM/AA, AAAAMMJJ ou AAAA-MM-JJ.
fn parse_date(raw: &str) -> Result<NaiveDate> {
    let raw = raw.trim();
    // %Y accepte aussi deux chiffres : l'année courte doit être testée à part
    let formats: &[&str] = if raw.len() == 8 && raw.contains('/') {
        &["%d/%m/%y"]
    } else {
        &["%d/%m/%Y", "%Y-%m-%d", "%Y%m%d"]
    };
    for format in formats {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Ok(date);
        }
    }
    bail!("Format de date invalide: '{}'", raw)
}

fn field<'r>(record: &'r csv::StringRecord, idx: usize) -> Result<&'r str> {
    record
        .get(idx)
        .map(str::trim)
        .with_context(|| format!("Champ manquant à l'index {}", idx))
}

fn number(record: &csv::StringRecord, idx: usize) -> Result<u8> {
    let s = field(record, idx)?;
    s.parse::<u8>()
        .with_context(|| format!("Impossible de parser '{}' (index {})", s, idx))
}

fn raw_line(record: &csv::StringRecord, sep: &str) -> String {
    record.iter().collect::<Vec<_>>().join(sep)
}

fn parse_fdj_record(record: &csv::StringRecord) -> Result<Draw> {
    let draw_id = field(record, 0)?;
    let date = parse_date(field(record, 2)?)?;
    let balls = [number(record, 5)?, number(record, 6)?, number(record, 7)?, number(record, 8)?, number(record, 9)?];
    let stars = [number(record, 10)?, number(record, 11)?];

    // rang 1 : nombre de gagnants et gain unitaire
    let winners = record.get(15).and_then(|s| s.trim().parse::<u32>().ok());
    let prize = record.get(16).and_then(|s| parse_french_decimal(s).ok());
    let prize_table = match (winners, prize) {
        (None, None) => None,
        (w, p) => Some(serde_json::json!({ "rank_1": { "winners": w, "prize": p } })),
    };

    Ok(Draw::new(draw_id, date, balls, stars)?
        .with_prize_table(prize_table)
        .with_raw_source(Some(raw_line(record, ";"))))
}

fn parse_simple_record(record: &csv::StringRecord) -> Result<Draw> {
    let draw_id = field(record, 0)?;
    let date = parse_date(field(record, 1)?)?;
    let balls = [number(record, 2)?, number(record, 3)?, number(record, 4)?, number(record, 5)?, number(record, 6)?];
    let stars = [number(record, 7)?, number(record, 8)?];
    let jackpot = match record.get(9).map(str::trim) {
        Some(s) if !s.is_empty() => Some(parse_french_decimal(s)?),
        _ => None,
    };

    Ok(Draw::new(draw_id, date, balls, stars)?
        .with_jackpot(jackpot)
        .with_raw_source(Some(raw_line(record, ","))))
}

pub fn detect_format(path: &Path) -> Result<CsvFormat> {
    let file = File::open(path).with_context(|| format!("Impossible d'ouvrir {:?}", path))?;
    let mut header = String::new();
    BufReader::new(file)
        .read_line(&mut header)
        .with_context(|| format!("Lecture de l'en-tête de {:?} impossible", path))?;
    Ok(if header.contains(';') { CsvFormat::Fdj } else { CsvFormat::Simple })
}

#[derive(Debug, Default)]
pub struct ImportReport {
    pub total_records: u32,
    pub parse_errors: u32,
    pub summary: UpsertSummary,
}

/// Lit le fichier, normalise chaque ligne en `Draw` validé, puis upsert le tout.
pub fn import_csv(conn: &Connection, path: &Path) -> Result<ImportReport> {
    let format = detect_format(path)?;
    let delimiter = match format {
        CsvFormat::Fdj => b';',
        CsvFormat::Simple => b',',
    };
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Impossible d'ouvrir {:?}", path))?;

    let mut report = ImportReport::default();
    let mut draws = Vec::new();
    for record_result in reader.records() {
        report.total_records += 1;
        let parsed = record_result
            .context("Ligne illisible")
            .and_then(|record| match format {
                CsvFormat::Fdj => parse_fdj_record(&record),
                CsvFormat::Simple => parse_simple_record(&record),
            });
        match parsed {
            Ok(draw) => draws.push(draw),
            Err(e) => {
                log::warn!("Ligne {} ignorée : {:#}", report.total_records, e);
                report.parse_errors += 1;
            }
        }
    }

    report.summary = upsert_draws(conn, &draws)?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use euroml_db::db::{fetch_all_chronological, migrate};
    use std::io::Write;

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        conn
    }

    fn write_file(dir: &tempfile::TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_parse_french_decimal() {
        assert!((parse_french_decimal("109156,50").unwrap() - 109156.50).abs() < 0.001);
        assert!((parse_french_decimal(" 17 000 000,00 ").unwrap() - 17_000_000.0).abs() < 0.001);
        assert!(parse_french_decimal("").is_err());
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2026, 2, 17).unwrap();
        assert_eq!(parse_date("17/02/2026").unwrap(), expected);
        assert_eq!(parse_date("2026-02-17").unwrap(), expected);
        assert_eq!(parse_date("20260217").unwrap(), expected);
        assert_eq!(parse_date("17/02/26").unwrap(), expected);
        assert!(parse_date("17-02").is_err());
    }

    #[test]
    fn test_import_simple_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "draws.csv",
            "draw_id,date,n1,n2,n3,n4,n5,s1,s2,jackpot\n\
             2024001,2024-01-02,5,12,23,34,45,3,11,17000000\n\
             2024002,2024-01-05,1,2,3,4,5,1,12,\n\
             2024003,2024-01-09,1,1,3,4,5,1,2,\n",
        );
        let conn = memory_db();
        let report = import_csv(&conn, &path).unwrap();
        assert_eq!(report.total_records, 3);
        assert_eq!(report.parse_errors, 1);
        assert_eq!(report.summary.inserted, 2);

        let draws = fetch_all_chronological(&conn).unwrap();
        assert_eq!(draws[0].jackpot, Some(17_000_000.0));
        assert_eq!(draws[1].jackpot, None);
        assert_eq!(draws[1].stars, [1, 12]);
    }

    #[test]
    fn test_import_fdj_format_and_reimport_updates() {
        let dir = tempfile::tempdir().unwrap();
        let header = "annee_numero_de_tirage;jour_de_tirage;date_de_tirage;date_de_forclusion;boule_1_x;boule_1;boule_2;boule_3;boule_4;boule_5;etoile_1;etoile_2;combinaison;x;y;nombre_de_gagnant_au_rang1;rapport_du_rang1\n";
        let line = "26014;MARDI;17/02/2026;18/04/2026;0;7;19;28;41;50;4;9;x;x;x;0;0,00\n";
        let path = write_file(&dir, "fdj.csv", &format!("{header}{line}"));
        assert_eq!(detect_format(&path).unwrap(), CsvFormat::Fdj);

        let conn = memory_db();
        let first = import_csv(&conn, &path).unwrap();
        assert_eq!(first.summary.inserted, 1);
        let again = import_csv(&conn, &path).unwrap();
        assert_eq!(again.summary.updated, 1);

        let draws = fetch_all_chronological(&conn).unwrap();
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].balls, [7, 19, 28, 41, 50]);
        assert_eq!(draws[0].prize_table.as_ref().unwrap()["rank_1"]["winners"], 0);
        assert!(draws[0].raw_source.as_ref().unwrap().starts_with("26014;MARDI"));
    }
}
