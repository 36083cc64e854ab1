//! Command construction for native, containerized, and emulated runs.
//!
//! The container runtime and the emulator/analyzer are always external
//! executables; nothing here links against them. Builders are pure so that
//! the exact argv can be recorded for reproduction before anything runs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Container settings for the native Linux oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub image: String,
    pub platform: String,
    /// Host directory mounted into the container.
    pub mount_host: PathBuf,
    /// Mount point and working directory inside the container.
    pub mount_guest: String,
}

/// Builds the direct native invocation: the binary followed by its arguments.
#[must_use]
pub fn build_native_cmd(binary: &Path, args: &[String]) -> Vec<String> {
    let mut cmd = vec![binary.display().to_string()];
    cmd.extend(args.iter().cloned());
    cmd
}

/// Rewrites an absolute host path under `host_mount` to its in-container
/// location under `guest_mount`. Relative values and paths outside the mount
/// pass through unchanged.
#[must_use]
pub fn map_host_path_to_container(value: &str, host_mount: &Path, guest_mount: &str) -> String {
    let path = Path::new(value);
    if !path.is_absolute() {
        return value.to_string();
    }
    match path.strip_prefix(host_mount) {
        Ok(rel) if rel.as_os_str().is_empty() => guest_mount.to_string(),
        Ok(rel) => {
            let mut mapped = PathBuf::from(guest_mount);
            mapped.push(rel);
            mapped.display().to_string()
        }
        Err(_) => value.to_string(),
    }
}

/// Wraps a native command in a `docker run` invocation.
///
/// Every argument is remapped through [`map_host_path_to_container`] so the
/// oracle sees container paths. Environment overrides travel as `-e` flags,
/// not through the container runtime's own environment.
#[must_use]
pub fn build_native_container_cmd(
    native_cmd: &[String],
    spec: &ContainerSpec,
    env_overrides: &BTreeMap<String, String>,
) -> Vec<String> {
    let mut cmd = vec!["docker".to_string(), "run".to_string(), "--rm".to_string()];
    if !spec.platform.is_empty() {
        cmd.push("--platform".to_string());
        cmd.push(spec.platform.clone());
    }
    cmd.push("-v".to_string());
    cmd.push(format!(
        "{}:{}",
        spec.mount_host.display(),
        spec.mount_guest
    ));
    cmd.push("-w".to_string());
    cmd.push(spec.mount_guest.clone());
    for (key, value) in env_overrides {
        cmd.push("-e".to_string());
        cmd.push(format!("{key}={value}"));
    }
    cmd.push(spec.image.clone());
    cmd.extend(
        native_cmd
            .iter()
            .map(|arg| map_host_path_to_container(arg, &spec.mount_host, &spec.mount_guest)),
    );
    cmd
}

/// Builds the emulated invocation: `analyzer --root <root> <binary> args...`.
#[must_use]
pub fn build_emu_cmd(analyzer: &Path, root: &Path, binary: &Path, args: &[String]) -> Vec<String> {
    let mut cmd = vec![
        analyzer.display().to_string(),
        "--root".to_string(),
        root.display().to_string(),
        binary.display().to_string(),
    ];
    cmd.extend(args.iter().cloned());
    cmd
}

/// Builds the pre-pull command for the native oracle image.
#[must_use]
pub fn build_pull_cmd(image: &str, platform: &str) -> Vec<String> {
    vec![
        "docker".to_string(),
        "pull".to_string(),
        "--platform".to_string(),
        platform.to_string(),
        image.to_string(),
    ]
}

/// Resolves a possibly-relative document path against `base`.
#[must_use]
pub fn resolve_path(base: &Path, raw: &str) -> PathBuf {
    let path = Path::new(raw);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ContainerSpec {
        ContainerSpec {
            image: "debian:bookworm-slim".to_string(),
            platform: "linux/amd64".to_string(),
            mount_host: PathBuf::from("/repo"),
            mount_guest: "/work".to_string(),
        }
    }

    #[test]
    fn native_cmd_is_binary_plus_args() {
        let cmd = build_native_cmd(Path::new("/repo/bin/t1"), &["--fast".to_string()]);
        assert_eq!(cmd, vec!["/repo/bin/t1", "--fast"]);
    }

    #[test]
    fn maps_absolute_path_under_mount() {
        let mapped = map_host_path_to_container("/repo/bin/t1", Path::new("/repo"), "/work");
        assert_eq!(mapped, "/work/bin/t1");
    }

    #[test]
    fn mount_root_itself_maps_to_guest_root() {
        let mapped = map_host_path_to_container("/repo", Path::new("/repo"), "/work");
        assert_eq!(mapped, "/work");
    }

    #[test]
    fn relative_and_foreign_paths_pass_through() {
        assert_eq!(
            map_host_path_to_container("--flag", Path::new("/repo"), "/work"),
            "--flag"
        );
        assert_eq!(
            map_host_path_to_container("/etc/hosts", Path::new("/repo"), "/work"),
            "/etc/hosts"
        );
    }

    #[test]
    fn container_cmd_has_expected_shape() {
        let mut env = BTreeMap::new();
        env.insert("LANG".to_string(), "C".to_string());
        let native = build_native_cmd(Path::new("/repo/bin/t1"), &["arg".to_string()]);
        let cmd = build_native_container_cmd(&native, &spec(), &env);
        assert_eq!(
            cmd,
            vec![
                "docker",
                "run",
                "--rm",
                "--platform",
                "linux/amd64",
                "-v",
                "/repo:/work",
                "-w",
                "/work",
                "-e",
                "LANG=C",
                "debian:bookworm-slim",
                "/work/bin/t1",
                "arg",
            ]
        );
    }

    #[test]
    fn empty_platform_is_omitted() {
        let mut bare = spec();
        bare.platform = String::new();
        let cmd = build_native_container_cmd(&["/repo/x".to_string()], &bare, &BTreeMap::new());
        assert!(!cmd.contains(&"--platform".to_string()));
    }

    #[test]
    fn emu_cmd_places_root_before_binary() {
        let cmd = build_emu_cmd(
            Path::new("/tools/analyzer"),
            Path::new("/repo"),
            Path::new("/repo/bin/t1"),
            &["a".to_string(), "b".to_string()],
        );
        assert_eq!(
            cmd,
            vec!["/tools/analyzer", "--root", "/repo", "/repo/bin/t1", "a", "b"]
        );
    }

    #[test]
    fn resolve_path_honors_absolute_input() {
        assert_eq!(
            resolve_path(Path::new("/base"), "/abs/x"),
            PathBuf::from("/abs/x")
        );
        assert_eq!(
            resolve_path(Path::new("/base"), "rel/x"),
            PathBuf::from("/base/rel/x")
        );
    }
}
