use anyhow::{bail, Result};
use chrono::NaiveDate;

/// Règles EuroMillions en vigueur à une date donnée.
/// Seul le nombre d'étoiles a changé : 9 jusqu'en mai 2011, 11 jusqu'en septembre 2016, 12 depuis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Era {
    Classic,
    ElevenStars,
    Modern,
}

impl Era {
    pub fn eleven_stars_start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2011, 5, 10).unwrap_or_default()
    }

    pub fn modern_start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2016, 9, 27).unwrap_or_default()
    }

    pub fn of(date: NaiveDate) -> Self {
        if date >= Self::modern_start() {
            Era::Modern
        } else if date >= Self::eleven_stars_start() {
            Era::ElevenStars
        } else {
            Era::Classic
        }
    }

    pub fn max_ball(&self) -> u8 {
        50
    }

    pub fn max_star(&self) -> u8 {
        match self {
            Era::Classic => 9,
            Era::ElevenStars => 11,
            Era::Modern => 12,
        }
    }
}

impl std::fmt::Display for Era {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Era::Classic => write!(f, "classic (1-9)"),
            Era::ElevenStars => write!(f, "11 étoiles (1-11)"),
            Era::Modern => write!(f, "moderne (1-12)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Draw {
    pub draw_id: String,
    pub date: NaiveDate,
    pub balls: [u8; 5],
    pub stars: [u8; 2],
    pub jackpot: Option<f64>,
    pub prize_table: Option<serde_json::Value>,
    pub raw_source: Option<String>,
}

impl Draw {
    /// Point d'entrée unique des données externes : tout tirage construit ici est valide pour son ère.
    pub fn new(draw_id: impl Into<String>, date: NaiveDate, balls: [u8; 5], stars: [u8; 2]) -> Result<Self> {
        let draw_id = draw_id.into();
        if draw_id.trim().is_empty() {
            bail!("Identifiant de tirage vide ({})", date);
        }
        validate_draw(date, &balls, &stars)?;
        Ok(Self {
            draw_id,
            date,
            balls,
            stars,
            jackpot: None,
            prize_table: None,
            raw_source: None,
        })
    }

    pub fn with_jackpot(mut self, jackpot: Option<f64>) -> Self {
        self.jackpot = jackpot;
        self
    }

    pub fn with_prize_table(mut self, prize_table: Option<serde_json::Value>) -> Self {
        self.prize_table = prize_table;
        self
    }

    pub fn with_raw_source(mut self, raw_source: Option<String>) -> Self {
        self.raw_source = raw_source;
        self
    }

    pub fn era(&self) -> Era {
        Era::of(self.date)
    }

    pub fn sorted_balls(&self) -> [u8; 5] {
        let mut balls = self.balls;
        balls.sort_unstable();
        balls
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pool {
    Balls,
    Stars,
}

impl Pool {
    /// Taille du domaine le plus large (règles actuelles).
    pub fn size(&self) -> usize {
        match self {
            Pool::Balls => 50,
            Pool::Stars => 12,
        }
    }

    pub fn pick_count(&self) -> usize {
        match self {
            Pool::Balls => 5,
            Pool::Stars => 2,
        }
    }

    pub fn numbers_from<'a>(&self, draw: &'a Draw) -> &'a [u8] {
        match self {
            Pool::Balls => &draw.balls,
            Pool::Stars => &draw.stars,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Pool::Balls => "balls",
            Pool::Stars => "stars",
        }
    }
}

impl std::fmt::Display for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Grille proposée : 5 boules et 2 étoiles triées, avec un score de confiance.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Combination {
    pub balls: [u8; 5],
    pub stars: [u8; 2],
    pub confidence: f64,
    pub method: String,
}

impl Combination {
    /// Seul constructeur : trie et refuse toute grille hors domaine (1-50, 1-12) ou avec doublon.
    pub fn new(balls: &[u8], stars: &[u8], confidence: f64, method: impl Into<String>) -> Result<Self> {
        let balls: [u8; 5] = balls
            .try_into()
            .map_err(|_| anyhow::anyhow!("{} boules au lieu de 5", balls.len()))?;
        let stars: [u8; 2] = stars
            .try_into()
            .map_err(|_| anyhow::anyhow!("{} étoiles au lieu de 2", stars.len()))?;
        check_numbers(&balls, Pool::Balls.size() as u8, "Boule")?;
        check_numbers(&stars, Pool::Stars.size() as u8, "Étoile")?;
        if !confidence.is_finite() {
            bail!("Confiance non finie : {}", confidence);
        }
        let mut balls = balls;
        let mut stars = stars;
        balls.sort_unstable();
        stars.sort_unstable();
        Ok(Self {
            balls,
            stars,
            confidence,
            method: method.into(),
        })
    }
}

impl std::fmt::Display for Combination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let balls: Vec<String> = self.balls.iter().map(|b| format!("{:2}", b)).collect();
        let stars: Vec<String> = self.stars.iter().map(|s| format!("{:2}", s)).collect();
        write!(f, "{} | {}", balls.join(" "), stars.join(" "))
    }
}

fn check_numbers(numbers: &[u8], max: u8, kind: &str) -> Result<()> {
    for (i, &n) in numbers.iter().enumerate() {
        if n < 1 || n > max {
            bail!("{} {} hors limites (1-{})", kind, n, max);
        }
        if numbers[..i].contains(&n) {
            bail!("{} en double : {}", kind, n);
        }
    }
    Ok(())
}

pub fn validate_draw(date: NaiveDate, balls: &[u8; 5], stars: &[u8; 2]) -> Result<()> {
    let era = Era::of(date);
    for &b in balls {
        if b < 1 || b > era.max_ball() {
            bail!("Boule {} hors limites (1-{}) le {}", b, era.max_ball(), date);
        }
    }
    for &s in stars {
        if s < 1 || s > era.max_star() {
            bail!("Étoile {} hors limites (1-{}) le {}, ère {}", s, era.max_star(), date, era);
        }
    }
    for i in 0..balls.len() {
        for j in (i + 1)..balls.len() {
            if balls[i] == balls[j] {
                bail!("Boule en double : {}", balls[i]);
            }
        }
    }
    if stars[0] == stars[1] {
        bail!("Étoile en double : {}", stars[0]);
    }
    Ok(())
}
