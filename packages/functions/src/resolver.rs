// ABOUTME: Resolves the effective import map and JWT verification flag for a serve run
// ABOUTME: Precedence is explicit override, then declared per-function setting, then directory fallback

use crate::slug::validate_function_slug;
use crate::{Result, ServeError};
use fnserve_config::{ProjectConfig, ProjectPaths};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Caller input for one serve run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServeRequest {
    /// Function to serve; `None` serves every function in a persistent runtime
    pub slug: Option<String>,
    pub env_file: Option<PathBuf>,
    /// `--no-verify-jwt` as given: unset, or explicitly true/false
    pub no_verify_jwt: Option<bool>,
    pub import_map: Option<PathBuf>,
}

impl ServeRequest {
    pub fn function(slug: impl Into<String>) -> Self {
        Self {
            slug: Some(slug.into()),
            ..Default::default()
        }
    }

    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_env_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.env_file = Some(path.into());
        self
    }

    pub fn with_import_map(mut self, path: impl Into<PathBuf>) -> Self {
        self.import_map = Some(path.into());
        self
    }

    pub fn with_no_verify_jwt(mut self, no_verify: bool) -> Self {
        self.no_verify_jwt = Some(no_verify);
        self
    }

    /// Empty paths count as "not given". An empty slug is kept so validation rejects it.
    pub fn normalized(mut self) -> Self {
        self.env_file = self.env_file.filter(|p| !p.as_os_str().is_empty());
        self.import_map = self.import_map.filter(|p| !p.as_os_str().is_empty());
        self
    }

    pub fn is_serve_all(&self) -> bool {
        self.slug.is_none()
    }
}

/// Effective settings for one run, computed once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    /// Validated host path of the import map mounted at the custom location
    pub import_map: Option<PathBuf>,
    pub verify_jwt: bool,
}

/// Resolve settings for a single function.
pub fn resolve_function(
    slug: &str,
    request: &ServeRequest,
    config: &ProjectConfig,
    paths: &ProjectPaths,
) -> Result<ResolvedConfig> {
    validate_function_slug(slug)?;
    let declared = config.function(slug);

    let import_map = if let Some(path) = &request.import_map {
        Some(paths.resolve_host(path))
    } else if let Some(declared) = declared.and_then(|f| f.import_map.as_deref()) {
        Some(paths.resolve_declared(declared))
    } else {
        fallback_import_map(paths)
    };
    let import_map = import_map.map(ensure_readable).transpose()?;

    let verify_jwt = match request.no_verify_jwt {
        Some(no_verify) => !no_verify,
        None => declared.map(|f| f.verify_jwt()).unwrap_or(true),
    };

    debug!(
        "Resolved {}: import map {:?}, verify JWT {}",
        slug, import_map, verify_jwt
    );
    Ok(ResolvedConfig {
        import_map,
        verify_jwt,
    })
}

/// Resolve settings for serving every function at once.
///
/// Any explicit `--no-verify-jwt`, even `=false`, disables verification.
pub fn resolve_all(request: &ServeRequest, paths: &ProjectPaths) -> Result<ResolvedConfig> {
    let import_map = match &request.import_map {
        Some(path) => Some(paths.resolve_host(path)),
        None => fallback_import_map(paths),
    };
    let import_map = import_map.map(ensure_readable).transpose()?;
    let verify_jwt = request.no_verify_jwt.is_none();

    debug!(
        "Resolved all functions: import map {:?}, verify JWT {}",
        import_map, verify_jwt
    );
    Ok(ResolvedConfig {
        import_map,
        verify_jwt,
    })
}

fn fallback_import_map(paths: &ProjectPaths) -> Option<PathBuf> {
    let fallback = paths.fallback_import_map();
    match fs::metadata(&fallback) {
        Ok(meta) if meta.is_file() => Some(fallback),
        _ => None,
    }
}

fn ensure_readable(path: PathBuf) -> Result<PathBuf> {
    match fs::metadata(&path) {
        Ok(_) => Ok(path),
        Err(source) => Err(ServeError::ImportMap { path, source }),
    }
}

/// Whether an optional file is present; errors other than absence are returned.
pub(crate) fn file_present(path: &Path) -> std::io::Result<bool> {
    match fs::metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fnserve_config::FunctionConfig;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn project() -> (TempDir, ProjectPaths) {
        let dir = TempDir::new().unwrap();
        let paths = ProjectPaths::new(dir.path());
        fs::create_dir_all(paths.function_dir("hello")).unwrap();
        (dir, paths)
    }

    fn declare(config: &mut ProjectConfig, slug: &str, import_map: Option<&str>, verify: Option<bool>) {
        config.functions.insert(
            slug.to_string(),
            FunctionConfig {
                import_map: import_map.map(str::to_string),
                verify_jwt: verify,
            },
        );
    }

    fn write(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "{}").unwrap();
    }

    #[test]
    fn test_declared_verify_false_without_import_map() {
        let (_dir, paths) = project();
        let mut config = ProjectConfig::default();
        declare(&mut config, "hello", None, Some(false));

        let request = ServeRequest::function("hello")
            .with_env_file("")
            .with_import_map("")
            .normalized();
        let resolved = resolve_function("hello", &request, &config, &paths).unwrap();

        assert_eq!(
            resolved,
            ResolvedConfig {
                import_map: None,
                verify_jwt: false
            }
        );
    }

    #[test]
    fn test_override_beats_declared_and_fallback() {
        let (dir, paths) = project();
        write(&paths.fallback_import_map());
        write(&paths.config_dir().join("declared.json"));
        write(&dir.path().join("custom.json"));
        let mut config = ProjectConfig::default();
        declare(&mut config, "hello", Some("declared.json"), None);

        let request = ServeRequest::function("hello").with_import_map("custom.json");
        let resolved = resolve_function("hello", &request, &config, &paths).unwrap();

        assert_eq!(resolved.import_map, Some(dir.path().join("custom.json")));
    }

    #[test]
    fn test_declared_beats_fallback_and_resolves_against_config_dir() {
        let (_dir, paths) = project();
        write(&paths.fallback_import_map());
        write(&paths.config_dir().join("declared.json"));
        let mut config = ProjectConfig::default();
        declare(&mut config, "hello", Some("declared.json"), None);

        let resolved =
            resolve_function("hello", &ServeRequest::function("hello"), &config, &paths).unwrap();

        assert_eq!(resolved.import_map, Some(paths.config_dir().join("declared.json")));
    }

    #[test]
    fn test_absolute_declared_path_passes_through() {
        let (dir, paths) = project();
        let absolute = dir.path().join("elsewhere").join("map.json");
        write(&absolute);
        let mut config = ProjectConfig::default();
        declare(&mut config, "hello", Some(absolute.to_str().unwrap()), None);

        let resolved =
            resolve_function("hello", &ServeRequest::function("hello"), &config, &paths).unwrap();

        assert_eq!(resolved.import_map, Some(absolute));
    }

    #[test]
    fn test_fallback_used_when_nothing_declared() {
        let (_dir, paths) = project();
        write(&paths.fallback_import_map());

        let resolved = resolve_function(
            "hello",
            &ServeRequest::function("hello"),
            &ProjectConfig::default(),
            &paths,
        )
        .unwrap();

        assert_eq!(resolved.import_map, Some(paths.fallback_import_map()));
        assert!(resolved.verify_jwt);
    }

    #[test]
    fn test_fallback_directory_is_never_selected() {
        let (_dir, paths) = project();
        fs::create_dir_all(paths.fallback_import_map()).unwrap();

        let resolved = resolve_function(
            "hello",
            &ServeRequest::function("hello"),
            &ProjectConfig::default(),
            &paths,
        )
        .unwrap();

        assert_eq!(resolved.import_map, None);
    }

    #[test]
    fn test_missing_override_is_fatal() {
        let (_dir, paths) = project();
        let request = ServeRequest::function("hello").with_import_map("missing.json");

        let err = resolve_function("hello", &request, &ProjectConfig::default(), &paths)
            .unwrap_err();

        assert!(matches!(err, ServeError::ImportMap { .. }));
        assert!(err.to_string().starts_with("Failed to read import map"));
    }

    #[test]
    fn test_missing_declared_map_is_fatal() {
        let (_dir, paths) = project();
        let mut config = ProjectConfig::default();
        declare(&mut config, "hello", Some("nope.json"), None);

        let result = resolve_function("hello", &ServeRequest::function("hello"), &config, &paths);

        assert!(matches!(result, Err(ServeError::ImportMap { .. })));
    }

    #[test]
    fn test_verify_override_beats_declared() {
        let (_dir, paths) = project();
        let mut config = ProjectConfig::default();
        declare(&mut config, "hello", None, Some(false));

        let request = ServeRequest::function("hello").with_no_verify_jwt(false);
        let resolved = resolve_function("hello", &request, &config, &paths).unwrap();
        assert!(resolved.verify_jwt);

        let request = ServeRequest::function("hello").with_no_verify_jwt(true);
        let resolved = resolve_function("hello", &request, &ProjectConfig::default(), &paths)
            .unwrap();
        assert!(!resolved.verify_jwt);
    }

    #[test]
    fn test_invalid_slug_is_rejected() {
        let (_dir, paths) = project();
        let result = resolve_function(
            "../hello",
            &ServeRequest::function("../hello"),
            &ProjectConfig::default(),
            &paths,
        );
        assert!(matches!(result, Err(ServeError::InvalidSlug { .. })));
    }

    #[test]
    fn test_serve_all_without_import_map() {
        let (_dir, paths) = project();

        let resolved = resolve_all(&ServeRequest::all(), &paths).unwrap();

        assert_eq!(
            resolved,
            ResolvedConfig {
                import_map: None,
                verify_jwt: true
            }
        );
    }

    #[test]
    fn test_serve_all_uses_fallback() {
        let (_dir, paths) = project();
        write(&paths.fallback_import_map());

        let resolved = resolve_all(&ServeRequest::all(), &paths).unwrap();

        assert_eq!(resolved.import_map, Some(paths.fallback_import_map()));
    }

    #[test]
    fn test_serve_all_any_override_disables_verification() {
        let (_dir, paths) = project();

        for no_verify in [true, false] {
            let request = ServeRequest::all().with_no_verify_jwt(no_verify);
            let resolved = resolve_all(&request, &paths).unwrap();
            assert!(!resolved.verify_jwt);
        }
    }

    #[test]
    fn test_normalized_treats_empty_paths_as_absent() {
        let request = ServeRequest {
            slug: None,
            env_file: Some(PathBuf::new()),
            no_verify_jwt: None,
            import_map: Some(PathBuf::from("")),
        }
        .normalized();

        assert_eq!(request, ServeRequest::all());
        assert!(request.is_serve_all());
    }

    #[test]
    fn test_empty_slug_stays_single_function_and_is_rejected() {
        let (_dir, paths) = project();
        let request = ServeRequest::function("").normalized();

        assert!(!request.is_serve_all());
        let result = resolve_function("", &request, &ProjectConfig::default(), &paths);
        assert!(matches!(result, Err(ServeError::InvalidSlug { .. })));
    }

    #[test]
    fn test_file_present_distinguishes_absence() {
        let (dir, paths) = project();
        assert!(!file_present(&paths.function_import_map("hello")).unwrap());
        write(&dir.path().join("x.json"));
        assert!(file_present(&dir.path().join("x.json")).unwrap());
    }
}
