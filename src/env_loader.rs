use std::path::Path;

use crate::intake::paths::{IntakePaths, resolve_intake_home};

/// Apply `path` when it exists. Returns whether a file was read.
fn apply_env_file(path: &Path) -> Result<bool, dotenvy::Error> {
    if !path.is_file() {
        return Ok(false);
    }
    dotenvy::from_path(path)?;
    Ok(true)
}

/// Load `.env` from the working directory (or a parent), then `<intake_home>/.env`.
/// Variables already in the environment win. Runs before logging is set up, so
/// problems go straight to stderr.
pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(_) => {}
        Err(err) if err.not_found() => {}
        Err(err) => eprintln!("warning: ignoring unreadable .env in working directory: {err}"),
    }

    let Ok(intake_home) = resolve_intake_home() else {
        return;
    };
    let path = IntakePaths::under(intake_home).dotenv_file();
    if let Err(err) = apply_env_file(&path) {
        eprintln!("warning: ignoring unreadable {}: {err}", path.display());
    }
}
