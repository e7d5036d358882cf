use std::{
    collections::BTreeSet,
    env,
    path::{Path, PathBuf},
};

use anyhow::{Result, bail};

/// Fails when any of `bins` cannot be found on `PATH`.
pub fn ensure_bins<I, S>(bins: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let missing: BTreeSet<String> = bins
        .into_iter()
        .filter(|b| which(b.as_ref()).is_none())
        .map(|b| b.as_ref().to_string())
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    let list: Vec<String> = missing.into_iter().collect();
    bail!("missing required binaries in PATH: {}", list.join(", "))
}

pub fn which(bin: &str) -> Option<PathBuf> {
    let p = Path::new(bin);
    if p.is_absolute() {
        return is_executable(p).then(|| p.to_path_buf());
    }
    let path = env::var_os("PATH")?;
    env::split_paths(&path)
        .map(|dir| dir.join(bin))
        .find(|cand| is_executable(cand))
}

fn is_executable(p: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(p) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_shell() {
        assert!(which("sh").is_some());
        ensure_bins(["sh"]).unwrap();
    }

    #[test]
    fn reports_missing_sorted() {
        let err = ensure_bins(["zz-not-here", "aa-not-here", "sh"])
            .unwrap_err()
            .to_string();
        assert_eq!(
            err,
            "missing required binaries in PATH: aa-not-here, zz-not-here"
        );
    }
}
