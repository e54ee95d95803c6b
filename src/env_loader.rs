use std::env;
use std::path::PathBuf;

fn fallback_dotenv_path(vault_home: Option<PathBuf>, home_dir: Option<PathBuf>) -> Option<PathBuf> {
    match vault_home {
        Some(home) => Some(home.join(".env")),
        None => Some(home_dir?.join("jvault/.env")),
    }
}

/// Loads `.env` from the working directory, falling back to the vault home.
pub fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let fallback = fallback_dotenv_path(
        env::var_os("JVAULT_HOME")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from),
        dirs::home_dir(),
    );

    let Some(path) = fallback else {
        return;
    };
    if path.is_file() {
        let _ = dotenvy::from_path(&path);
    }
}

#[cfg(test)]
mod tests {
    use super::fallback_dotenv_path;
    use std::path::PathBuf;

    #[test]
    fn fallback_reads_env_file_inside_vault_home() {
        let got = fallback_dotenv_path(
            Some(PathBuf::from("/srv/vault")),
            Some(PathBuf::from("/home/alice")),
        );
        assert_eq!(got, Some(PathBuf::from("/srv/vault/.env")));
    }

    #[test]
    fn fallback_uses_default_vault_home_when_unset() {
        let got = fallback_dotenv_path(None, Some(PathBuf::from("/home/alice")));
        assert_eq!(got, Some(PathBuf::from("/home/alice/jvault/.env")));
    }

    #[test]
    fn no_fallback_without_any_home() {
        assert_eq!(fallback_dotenv_path(None, None), None);
    }
}
