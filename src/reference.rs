//! Categorizing names into [`Reference`]s.

use crate::record::{BuildTarget, MetaData, RefKind, Reference};
use std::path::Path;

/// Classifies `name` against the trace metadata.
///
/// `name` may be a path (absolute or relative to the build directory), a
/// `-l<name>` library argument, or a `//`-qualified target name.
pub fn create_reference(metadata: &MetaData, name: &str) -> Reference {
    if name.starts_with("//") {
        return Reference {
            kind: RefKind::BuildTarget,
            name: name.to_string(),
        };
    }
    if let Some(lib) = name.strip_prefix("-l") {
        return Reference {
            kind: RefKind::Library,
            name: lib.to_string(),
        };
    }

    let path = Path::new(name);
    if path.is_absolute() {
        let root = &metadata.project_root;
        if path == root.as_path() {
            return Reference {
                kind: RefKind::RelativeToProjectRoot,
                name: ".".to_string(),
            };
        }
        return match path.strip_prefix(root) {
            Ok(rest) => Reference {
                kind: RefKind::RelativeToProjectRoot,
                name: rest.to_string_lossy().into_owned(),
            },
            Err(_) => Reference {
                kind: RefKind::Absolute,
                name: name.to_string(),
            },
        };
    }

    if let Some(build_dir) = &metadata.build_dir {
        if path == build_dir.as_path() {
            return Reference {
                kind: RefKind::RelativeToBuildDir,
                name: ".".to_string(),
            };
        }
        if let Ok(rest) = path.strip_prefix(build_dir) {
            return Reference {
                kind: RefKind::RelativeToBuildDir,
                name: rest.to_string_lossy().into_owned(),
            };
        }
    }

    Reference {
        kind: RefKind::RelativeToProjectRoot,
        name: name.to_string(),
    }
}

/// A reference to another build target by qualified name.
pub fn target_reference(target: &BuildTarget) -> Reference {
    Reference {
        kind: RefKind::BuildTarget,
        name: target.qualified_name.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(build_dir: Option<&str>) -> MetaData {
        MetaData {
            project_root: "/proj".into(),
            project_name: "proj".into(),
            build_dir: build_dir.map(Into::into),
        }
    }

    #[test]
    fn test_build_target_name() {
        let r = create_reference(&metadata(None), "//src:foo");
        assert_eq!(r.kind, RefKind::BuildTarget);
        assert_eq!(r.name, "//src:foo");
    }

    #[test]
    fn test_library_name() {
        let r = create_reference(&metadata(None), "-lpthread");
        assert_eq!(r.kind, RefKind::Library);
        assert_eq!(r.name, "pthread");
    }

    #[test]
    fn test_absolute_inside_project() {
        let r = create_reference(&metadata(None), "/proj/src/a.c");
        assert_eq!(r.kind, RefKind::RelativeToProjectRoot);
        assert_eq!(r.name, "src/a.c");
    }

    #[test]
    fn test_absolute_project_root_itself() {
        let r = create_reference(&metadata(None), "/proj");
        assert_eq!(r.kind, RefKind::RelativeToProjectRoot);
        assert_eq!(r.name, ".");
    }

    #[test]
    fn test_absolute_outside_project() {
        let r = create_reference(&metadata(None), "/usr/lib/libc.so");
        assert_eq!(r.kind, RefKind::Absolute);
        assert_eq!(r.name, "/usr/lib/libc.so");
    }

    #[test]
    fn test_relative_in_build_dir() {
        let r = create_reference(&metadata(Some("build")), "build/foo.o");
        assert_eq!(r.kind, RefKind::RelativeToBuildDir);
        assert_eq!(r.name, "foo.o");
    }

    #[test]
    fn test_relative_without_build_dir() {
        let r = create_reference(&metadata(None), "src/a.c");
        assert_eq!(r.kind, RefKind::RelativeToProjectRoot);
        assert_eq!(r.name, "src/a.c");
    }

    #[test]
    fn test_similar_prefix_is_not_project_relative() {
        let r = create_reference(&metadata(None), "/project-other/a.c");
        assert_eq!(r.kind, RefKind::Absolute);
    }
}
