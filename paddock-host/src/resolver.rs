//! Virtual resource resolution
//!
//! Maps a scheme-stripped virtual path (host + path, as one string) onto a
//! confined real file under the serving root matching the request's origin.
//! Unsafe paths and missing files produce the same not-found outcome, so a
//! caller cannot probe the confinement boundary through the responses.

use crate::boundary::Boundary;
use std::path::PathBuf;
use thiserror::Error;

/// The single failure a caller can observe. Whether the path was unsafe or
/// the file absent is logged, never returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("resource not found")]
pub struct ResourceNotFound;

/// Which serving root a request originates from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ServeOrigin {
    /// Shipped UI content under the application root.
    #[default]
    App,
    /// Content staged into the sandbox.
    Sandbox,
}

/// Resolves virtual resource paths to confined absolute file locations.
#[derive(Debug, Clone)]
pub struct ResourceResolver {
    app: Boundary,
    sandbox: Boundary,
}

impl ResourceResolver {
    pub fn new(app: Boundary, sandbox: Boundary) -> Self {
        Self { app, sandbox }
    }

    /// Decode a virtual path, confine it against the origin's boundary, and
    /// return the absolute location if it points at an existing file.
    pub async fn resolve(
        &self,
        origin: ServeOrigin,
        virtual_path: &str,
    ) -> Result<PathBuf, ResourceNotFound> {
        let boundary = match origin {
            ServeOrigin::App => &self.app,
            ServeOrigin::Sandbox => &self.sandbox,
        };

        let decoded = percent_decode(virtual_path).ok_or_else(|| {
            tracing::warn!(path = virtual_path, "undecodable resource path");
            ResourceNotFound
        })?;
        let relative = decoded.trim_start_matches('/');

        let Some(absolute) = boundary.confine(relative) else {
            tracing::warn!(path = relative, "unsafe resource path blocked");
            return Err(ResourceNotFound);
        };

        match tokio::fs::metadata(&absolute).await {
            Ok(meta) if meta.is_file() => {
                tracing::debug!(path = %absolute.display(), "serving resource");
                Ok(absolute)
            }
            _ => {
                tracing::warn!(path = %absolute.display(), "resource missing");
                Err(ResourceNotFound)
            }
        }
    }
}

/// Decode `%XX` escapes. Returns `None` on malformed escapes or non-UTF-8
/// results; the resolver treats both as not-found.
fn percent_decode(input: &str) -> Option<String> {
    if !input.contains('%') {
        return Some(input.to_string());
    }

    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes.get(i + 1..i + 3)?;
            let hex = std::str::from_utf8(hex).ok()?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_decode_plain() {
        assert_eq!(percent_decode("launcher/menu.html").as_deref(), Some("launcher/menu.html"));
    }

    #[test]
    fn test_percent_decode_escapes() {
        assert_eq!(percent_decode("a%20b/c.txt").as_deref(), Some("a b/c.txt"));
        assert_eq!(percent_decode("%2e%2e/etc").as_deref(), Some("../etc"));
    }

    #[test]
    fn test_percent_decode_malformed() {
        assert_eq!(percent_decode("bad%2"), None);
        assert_eq!(percent_decode("bad%zz"), None);
        assert_eq!(percent_decode("trailing%"), None);
    }

    #[tokio::test]
    async fn test_resolve_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("launcher")).unwrap();
        std::fs::write(dir.path().join("launcher/menu.html"), "<html></html>").unwrap();

        let resolver = ResourceResolver::new(
            Boundary::new(dir.path()),
            Boundary::new(dir.path().join("sandbox")),
        );
        let resolved = resolver
            .resolve(ServeOrigin::App, "launcher/menu.html")
            .await
            .unwrap();
        assert!(resolved.ends_with("launcher/menu.html"));
    }

    #[tokio::test]
    async fn test_unsafe_and_missing_look_identical() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = ResourceResolver::new(
            Boundary::new(dir.path()),
            Boundary::new(dir.path().join("sandbox")),
        );

        let unsafe_err = resolver
            .resolve(ServeOrigin::App, "%2e%2e/etc/passwd")
            .await
            .unwrap_err();
        let missing_err = resolver
            .resolve(ServeOrigin::App, "nope.html")
            .await
            .unwrap_err();
        assert_eq!(unsafe_err, missing_err);
        assert_eq!(unsafe_err.to_string(), missing_err.to_string());
    }

    #[tokio::test]
    async fn test_leading_separators_stripped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "x").unwrap();

        let resolver = ResourceResolver::new(
            Boundary::new(dir.path()),
            Boundary::new(dir.path().join("sandbox")),
        );
        assert!(resolver.resolve(ServeOrigin::App, "//index.html").await.is_ok());
    }
}
