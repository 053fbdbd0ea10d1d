use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

/// Expands a leading `@alias` component and makes the path absolute.
///
/// `@app/uploads` with `app: /srv/app` becomes `/srv/app/uploads`. Paths
/// without an alias are made absolute against the current directory.
pub fn resolve_path<P: AsRef<Path>>(path: P, aliases: &BTreeMap<String, PathBuf>) -> Result<PathBuf> {
    let path = path.as_ref();
    let mut components = path.components();
    let expanded = match components.next() {
        Some(Component::Normal(first)) if first.to_string_lossy().starts_with('@') => {
            let first = first.to_string_lossy();
            let alias = &first[1..];
            let base = aliases
                .get(alias)
                .ok_or_else(|| Error::configuration(format!("unknown path alias {first:?} in {path:?}")))?;
            base.join(components.as_path())
        }
        _ => path.to_path_buf(),
    };

    Ok(std::path::absolute(&expanded)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aliases() -> BTreeMap<String, PathBuf> {
        BTreeMap::from([("app".to_string(), PathBuf::from("/srv/app"))])
    }

    #[test]
    fn test_alias_expanded() {
        let resolved = resolve_path("@app/web/uploads", &aliases()).unwrap();
        assert_eq!(resolved, PathBuf::from("/srv/app/web/uploads"));
    }

    #[test]
    fn test_bare_alias() {
        let resolved = resolve_path("@app", &aliases()).unwrap();
        assert_eq!(resolved, PathBuf::from("/srv/app"));
    }

    #[test]
    fn test_unknown_alias() {
        match resolve_path("@runtime/logs", &aliases()) {
            Err(Error::Configuration(msg)) => assert!(msg.contains("@runtime")),
            other => panic!("Expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn test_plain_paths() {
        assert_eq!(
            resolve_path("/var/log", &aliases()).unwrap(),
            PathBuf::from("/var/log")
        );
        let relative = resolve_path("data", &aliases()).unwrap();
        assert!(relative.is_absolute());
        assert!(relative.ends_with("data"));
    }
}
