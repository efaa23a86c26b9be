use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use euroml_db::models::Pool;
use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::error::{ModelError, Result};
use crate::training::{ModelMeta, PoolModel, TrainedModels};

pub const BALLS_FILE: &str = "balls.model.json";
pub const STARS_FILE: &str = "stars.model.json";
pub const META_FILE: &str = "meta.json";
pub const SCORES_FILE: &str = "latest_scores.json";

pub fn model_file(pool: Pool) -> &'static str {
    match pool {
        Pool::Balls => BALLS_FILE,
        Pool::Stars => STARS_FILE,
    }
}

/// Writes both pool models, then the metadata sidecar. Each file replaces
/// the previous one atomically, so a reader never sees a partial file.
pub fn save(dir: &Path, models: &TrainedModels) -> Result<()> {
    fs::create_dir_all(dir)?;
    write_json_atomic(dir, BALLS_FILE, &models.balls, false)?;
    write_json_atomic(dir, STARS_FILE, &models.stars, false)?;
    let meta = write_json_atomic(dir, META_FILE, &models.meta, true)?;
    info!("models {} saved to {}", models.meta.run_id, meta.display());
    Ok(())
}

/// True when `dir` holds a metadata sidecar, i.e. a saved run.
pub fn exists(dir: &Path) -> bool {
    dir.join(META_FILE).is_file()
}

pub fn load(dir: &Path) -> Result<TrainedModels> {
    let meta_path = dir.join(META_FILE);
    if !meta_path.exists() {
        return Err(ModelError::ArtifactMissing(dir.to_path_buf()));
    }
    let meta: ModelMeta = read_json(&meta_path)?;
    let balls: PoolModel = read_pool(dir, Pool::Balls)?;
    let stars: PoolModel = read_pool(dir, Pool::Stars)?;

    for model in [&balls, &stars] {
        if model.run_id != meta.run_id {
            return Err(ModelError::ArtifactInconsistent(format!(
                "{} belongs to run {}, {} to run {}",
                model_file(model.pool),
                model.run_id,
                META_FILE,
                meta.run_id
            )));
        }
    }
    debug!("loaded models {} from {}", meta.run_id, dir.display());
    Ok(TrainedModels { balls, stars, meta })
}

fn read_pool(dir: &Path, pool: Pool) -> Result<PoolModel> {
    let path = dir.join(model_file(pool));
    if !path.exists() {
        return Err(ModelError::ArtifactMissing(path));
    }
    let model: PoolModel = read_json(&path)?;
    if model.pool != pool {
        return Err(ModelError::ArtifactInconsistent(format!(
            "{} holds the {} model",
            path.display(),
            model.pool
        )));
    }
    Ok(model)
}

/// Overwrites the scoring audit log next to the models.
pub fn write_latest_scores<T: Serialize>(dir: &Path, value: &T) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    write_json_atomic(dir, SCORES_FILE, value, true)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

fn write_json_atomic<T: Serialize>(dir: &Path, name: &str, value: &T, pretty: bool) -> Result<PathBuf> {
    let path = dir.join(name);
    let mut tmp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(&mut tmp);
        if pretty {
            serde_json::to_writer_pretty(&mut writer, value)?;
        } else {
            serde_json::to_writer(&mut writer, value)?;
        }
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(&path).map_err(|e| e.error)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{fast_config, make_test_draws};
    use crate::training::train;

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let draws = make_test_draws(80);
        let models = train(&draws, &fast_config(), |_| {}).unwrap();
        save(dir.path(), &models).unwrap();

        let loaded = load(dir.path()).unwrap();
        assert_eq!(loaded.meta.run_id, models.meta.run_id);
        assert_eq!(loaded.meta.schema, models.meta.schema);
        assert_eq!(loaded.balls.candidates.len(), 50);
        assert_eq!(loaded.stars.fold, models.stars.fold);

        let mut names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec![BALLS_FILE, META_FILE, STARS_FILE]);
    }

    #[test]
    fn test_load_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!exists(dir.path()));
        let err = load(&dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, ModelError::ArtifactMissing(_)));
    }

    #[test]
    fn test_load_rejects_mixed_runs() {
        let dir = tempfile::tempdir().unwrap();
        let draws = make_test_draws(80);
        let mut models = train(&draws, &fast_config(), |_| {}).unwrap();
        save(dir.path(), &models).unwrap();

        models.stars.run_id = "older-run".to_string();
        write_json_atomic(dir.path(), STARS_FILE, &models.stars, false).unwrap();
        let err = load(dir.path()).unwrap_err();
        assert!(matches!(err, ModelError::ArtifactInconsistent(_)));
        assert!(err.to_string().contains("older-run"));
    }

    #[test]
    fn test_load_rejects_swapped_pools() {
        let dir = tempfile::tempdir().unwrap();
        let draws = make_test_draws(80);
        let models = train(&draws, &fast_config(), |_| {}).unwrap();
        save(dir.path(), &models).unwrap();
        write_json_atomic(dir.path(), BALLS_FILE, &models.stars, false).unwrap();
        assert!(matches!(
            load(dir.path()),
            Err(ModelError::ArtifactInconsistent(_))
        ));
    }

    #[test]
    fn test_write_latest_scores_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        write_latest_scores(dir.path(), &vec![1, 2, 3]).unwrap();
        let path = write_latest_scores(dir.path(), &vec![4]).unwrap();
        let content: Vec<u32> = read_json(&path).unwrap();
        assert_eq!(content, vec![4]);
    }
}
