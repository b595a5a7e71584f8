// Session credential persistence
// Two-line plain text file: account name, then the opaque session key

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user: String,
    pub key: String,
}

impl Session {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read session file {path:?}"))?;

        let mut lines = content.lines();
        let user = lines.next().unwrap_or("").trim().to_string();
        let key = lines.next().unwrap_or("").trim().to_string();

        if user.is_empty() || key.is_empty() {
            bail!("session file {path:?} is incomplete");
        }

        Ok(Self { user, key })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create session directory {parent:?}"))?;
        }

        fs::write(path, format!("{}\n{}\n", self.user, self.key))
            .with_context(|| format!("failed to write session file {path:?}"))?;

        log::info!("session saved to {path:?}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_the_two_line_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session");

        let session = Session {
            user: "alice".to_string(),
            key: "0123456789abcdef".to_string(),
        };
        session.save(&path).unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "alice\n0123456789abcdef\n"
        );
        assert_eq!(Session::load(&path).unwrap(), session);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Session::load(&dir.path().join("nope")).is_err());
    }

    #[test]
    fn truncated_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session");
        std::fs::write(&path, "alice\n").unwrap();
        assert!(Session::load(&path).is_err());
    }
}
