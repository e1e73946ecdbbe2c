use anyhow::Result;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct IntakePaths {
    pub intake_home: PathBuf,
    pub tables_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub state_dir: PathBuf,
}

fn required_home_dir() -> Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        return Ok(home);
    }
    Err(anyhow::anyhow!("HOME directory could not be resolved"))
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

impl IntakePaths {
    pub fn under(intake_home: PathBuf) -> Self {
        Self {
            tables_dir: intake_home.join("tables"),
            logs_dir: intake_home.join("logs"),
            state_dir: intake_home.join("state"),
            intake_home,
        }
    }

    pub fn dotenv_file(&self) -> PathBuf {
        self.intake_home.join(".env")
    }

    pub fn table_file(&self, table: &str) -> PathBuf {
        self.tables_dir.join(format!("{table}.json"))
    }
}

/// `CASE_INTAKE_HOME`, else `~/.case_intake`.
pub fn resolve_intake_home() -> Result<PathBuf> {
    match env::var("CASE_INTAKE_HOME") {
        Ok(v) if !v.trim().is_empty() => Ok(PathBuf::from(v.trim())),
        _ => Ok(required_home_dir()?.join(".case_intake")),
    }
}

pub fn resolve_paths() -> Result<IntakePaths> {
    let mut paths = IntakePaths::under(resolve_intake_home()?);
    paths.logs_dir = env_or_default_path("CASE_INTAKE_LOGS_DIR", paths.logs_dir);
    Ok(paths)
}
