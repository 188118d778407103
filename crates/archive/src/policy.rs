//! Path policy for archive entry names and symlink targets.
//!
//! Both the packer and the unpacker run every entry through [`PathPolicy`]
//! before touching the file system. Entry names are slash-separated and
//! relative to the archive root (`node_modules/pkg/index.js`).

use crate::error::{ErrorKind, Result};
use std::path::{Component, Path, PathBuf};

/// Characters never allowed in an entry name or link target, on top of the
/// ASCII control range.
const DISALLOWED_CHARACTERS: &[char] = &[
    '<', '>', ':', '"', '*', '?', '\\', '|', '!', '@', '#', '$', '%', '^', '&', '(', ')', '+', '=', '{', '}', '[',
    ']', ',', '`', '~',
];

/// Device names that Windows reserves regardless of extension.
const RESERVED_NAMES: &[&str] = &["CON", "PRN", "AUX", "NUL"];
/// Device name prefixes reserved when followed by a single digit 1-9.
const RESERVED_NUMBERED: &[&str] = &["COM", "LPT"];

/// Permissiveness profile applied to entry names and link targets.
///
/// The [`Default`] profile is the strict one: every flag off.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PathPolicy {
    /// Permit `..` segments in entry names.
    pub allow_double_dot: bool,
    /// Permit absolute entry names and absolute link targets.
    pub allow_absolute_paths: bool,
    /// Permit links that resolve outside the root (reported as a warning).
    pub allow_links_outside_root: bool,
}

/// Outcome of a successful [`PathPolicy::check_link`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkCheck {
    /// The target resolves inside the root.
    Contained,
    /// The target resolves outside the root and the policy permits it.
    Outside,
}

impl PathPolicy {
    /// Every flag off.
    pub const STRICT: Self = Self {
        allow_double_dot: false,
        allow_absolute_paths: false,
        allow_links_outside_root: false,
    };

    /// Returns `true` if `path` must not be packed or extracted.
    pub fn is_bad(&self, path: &str) -> bool {
        if path.is_empty() || has_disallowed_characters(path) {
            return true;
        }
        if path.starts_with('/') && !self.allow_absolute_paths {
            return true;
        }
        path.split('/')
            .any(|segment| (segment == ".." && !self.allow_double_dot) || is_reserved_device(segment))
    }

    /// Validates the target of the symlink at `link` (relative to `root`).
    ///
    /// The target is resolved lexically against the link's parent directory;
    /// `root` must be absolute. A target that leaves the root is an
    /// [`InvalidPath`](ErrorKind::InvalidPath) unless the policy allows it, in
    /// which case [`LinkCheck::Outside`] is returned for the caller to report.
    pub fn check_link(&self, root: &Path, link: &Path, target: &str) -> Result<LinkCheck> {
        let rejected = || ErrorKind::InvalidPath(format!("{} -> {}", link.display(), target));
        if target.is_empty() || has_disallowed_characters(target) {
            exn::bail!(rejected());
        }
        let target_path = Path::new(target);
        if target_path.is_absolute() && !self.allow_absolute_paths {
            exn::bail!(rejected());
        }

        let root = lexical_normalize(root);
        let parent = link.parent().unwrap_or(Path::new(""));
        // Joining an absolute target replaces everything before it.
        let resolved = lexical_normalize(&root.join(parent).join(target_path));
        if resolved.starts_with(&root) {
            Ok(LinkCheck::Contained)
        } else if self.allow_links_outside_root {
            Ok(LinkCheck::Outside)
        } else {
            exn::bail!(rejected())
        }
    }
}

/// Returns `true` if `value` holds a control character or a disallowed
/// character, or if any of its segments begins with a space.
pub fn has_disallowed_characters(value: &str) -> bool {
    value.chars().any(|c| c < ' ' || DISALLOWED_CHARACTERS.contains(&c))
        || value.split('/').any(|segment| segment.starts_with(' '))
}

fn is_reserved_device(segment: &str) -> bool {
    let stem = segment.split('.').next().unwrap_or(segment).to_ascii_uppercase();
    if RESERVED_NAMES.contains(&stem.as_str()) {
        return true;
    }
    match stem.as_bytes() {
        [a, b, c, digit] => {
            let prefix = [*a, *b, *c];
            RESERVED_NUMBERED.iter().any(|name| name.as_bytes() == prefix) && (b'1'..=b'9').contains(digit)
        },
        _ => false,
    }
}

/// Resolves `.` and `..` components without touching the file system.
///
/// `..` never climbs above the root of an absolute path; on a relative path it
/// is kept when there is nothing left to pop.
pub(crate) fn lexical_normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {},
            Component::ParentDir => match normalized.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalized.pop();
                },
                Some(Component::RootDir | Component::Prefix(_)) => {},
                _ => normalized.push(".."),
            },
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const DOUBLE_DOT: PathPolicy = PathPolicy {
        allow_double_dot: true,
        allow_absolute_paths: false,
        allow_links_outside_root: false,
    };
    const ABSOLUTE: PathPolicy = PathPolicy {
        allow_double_dot: false,
        allow_absolute_paths: true,
        allow_links_outside_root: false,
    };

    #[rstest]
    #[case("node_modules/pkg/index.js", PathPolicy::STRICT, false)]
    #[case("node_modules/.bin/tsc", PathPolicy::STRICT, false)]
    #[case("node_modules/pkg/lib/äöü.js", PathPolicy::STRICT, false)]
    #[case("node_modules/console/index.js", PathPolicy::STRICT, false)]
    #[case("node_modules/com10/index.js", PathPolicy::STRICT, false)]
    #[case("", PathPolicy::STRICT, true)]
    #[case("../evil.txt", PathPolicy::STRICT, true)]
    #[case("a/../../evil.txt", PathPolicy::STRICT, true)]
    #[case("..", PathPolicy::STRICT, true)]
    #[case("../evil.txt", DOUBLE_DOT, false)]
    #[case("a..b/c", PathPolicy::STRICT, false)]
    #[case("/evil.txt", PathPolicy::STRICT, true)]
    #[case("/evil.txt", ABSOLUTE, false)]
    #[case("C:/Windows/evil.txt", PathPolicy::STRICT, true)]
    #[case("C:|Windows/evil.txt", PathPolicy::STRICT, true)]
    #[case("C:\\Windows\\evil.txt", PathPolicy::STRICT, true)]
    #[case("node_modules\\evil.txt", PathPolicy::STRICT, true)]
    #[case("COM1>", PathPolicy::STRICT, true)]
    #[case("CON", PathPolicy::STRICT, true)]
    #[case("node_modules/nul", PathPolicy::STRICT, true)]
    #[case("node_modules/aux.txt", PathPolicy::STRICT, true)]
    #[case("node_modules/lpt9.log", PathPolicy::STRICT, true)]
    #[case("node_modules/COM0", PathPolicy::STRICT, false)]
    #[case(" leading", PathPolicy::STRICT, true)]
    #[case("node_modules/ leading", PathPolicy::STRICT, true)]
    #[case("node_modules/trailing ", PathPolicy::STRICT, false)]
    #[case("node_modules/@scope/pkg", PathPolicy::STRICT, true)]
    #[case("node_modules/what?.js", PathPolicy::STRICT, true)]
    #[case("node_modules/tab\there", PathPolicy::STRICT, true)]
    #[case("node_modules/a~b", PathPolicy::STRICT, true)]
    #[case("node_modules/a`b", PathPolicy::STRICT, true)]
    fn is_bad_table(#[case] path: &str, #[case] policy: PathPolicy, #[case] expected: bool) {
        assert_eq!(policy.is_bad(path), expected, "path {path:?} with {policy:?}");
    }

    #[test]
    fn double_dot_segments_follow_the_policy() {
        for path in ["..", "../a", "a/..", "a/../b", "a/b/../../.."] {
            assert!(PathPolicy::STRICT.is_bad(path), "{path}");
            assert!(!DOUBLE_DOT.is_bad(path), "{path}");
        }
    }

    #[rstest]
    #[case("node_modules/.bin/tsc", "../typescript/bin/tsc", LinkCheck::Contained)]
    #[case("node_modules/link", "pkg", LinkCheck::Contained)]
    #[case("node_modules/link", ".", LinkCheck::Contained)]
    #[case("node_modules/link", "..", LinkCheck::Contained)]
    #[case("node_modules/a/b/link", "../../../node_modules/x", LinkCheck::Contained)]
    fn check_link_contained(#[case] link: &str, #[case] target: &str, #[case] expected: LinkCheck) {
        let result = PathPolicy::STRICT.check_link(Path::new("/app"), Path::new(link), target);
        assert_eq!(result.unwrap(), expected);
    }

    #[rstest]
    #[case("node_modules/abs_link", "/etc/passwd")]
    #[case("node_modules/outside_link", "../../outside_cwd")]
    #[case("outside_link", "../outside_cwd")]
    #[case("node_modules/deep", "../a/../../../etc")]
    #[case("node_modules/bad", "C:\\Windows")]
    #[case("node_modules/empty", "")]
    fn check_link_rejected(#[case] link: &str, #[case] target: &str) {
        let err = PathPolicy::STRICT.check_link(Path::new("/app"), Path::new(link), target).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidPath(_)));
    }

    #[test]
    fn check_link_outside_root_when_permitted() {
        let policy = PathPolicy {
            allow_links_outside_root: true,
            ..PathPolicy::STRICT
        };
        let result = policy.check_link(Path::new("/app"), Path::new("outside_link"), "../outside_cwd");
        assert_eq!(result.unwrap(), LinkCheck::Outside);
        // Absolute targets still need their own flag.
        assert!(policy.check_link(Path::new("/app"), Path::new("abs_link"), "/etc/passwd").is_err());
    }

    #[test]
    fn check_link_absolute_inside_root() {
        let result = ABSOLUTE.check_link(Path::new("/app"), Path::new("node_modules/l"), "/app/node_modules/x");
        assert_eq!(result.unwrap(), LinkCheck::Contained);
    }

    #[test]
    fn lexical_normalization() {
        assert_eq!(lexical_normalize(Path::new("/a/./b/../c")), Path::new("/a/c"));
        assert_eq!(lexical_normalize(Path::new("/../..")), Path::new("/"));
        assert_eq!(lexical_normalize(Path::new("a/../../b")), Path::new("../b"));
    }
}
