use glob::glob;
use std::path::{Path, PathBuf};

/// Bare runtime name, resolved through PATH by the OS.
#[cfg(target_os = "windows")]
pub const JAVA_BARE: &str = "java.exe";
#[cfg(not(target_os = "windows"))]
pub const JAVA_BARE: &str = "java";

pub struct PathDetector;

impl PathDetector {
    /// Pick the Java binary used to launch the server.
    ///
    /// Tries each preferred path in order (glob patterns allowed, first match
    /// wins), then `$JAVA_HOME/bin/java`, and finally the bare `java` name.
    pub fn detect_java(preferred_paths: &[String]) -> String {
        Self::detect_java_with_home(preferred_paths, std::env::var_os("JAVA_HOME").map(PathBuf::from))
    }

    fn detect_java_with_home(preferred_paths: &[String], java_home: Option<PathBuf>) -> String {
        for pattern in preferred_paths {
            if let Some(found) = Self::first_file(pattern) {
                tracing::debug!("Using Java at {}", found.display());
                return found.to_string_lossy().to_string();
            }
        }

        if let Some(home) = java_home {
            let candidate = home.join("bin").join(JAVA_BARE);
            if candidate.is_file() {
                tracing::debug!("Using Java from JAVA_HOME: {}", candidate.display());
                return candidate.to_string_lossy().to_string();
            }
        }

        tracing::debug!("No preferred Java found, falling back to '{}' on PATH", JAVA_BARE);
        JAVA_BARE.to_string()
    }

    fn first_file(pattern: &str) -> Option<PathBuf> {
        if !pattern.contains(['*', '?', '[']) {
            let p = Path::new(pattern);
            return p.is_file().then(|| p.to_path_buf());
        }
        let paths = glob(pattern).ok()?;
        let mut matches: Vec<PathBuf> = paths.flatten().filter(|p| p.is_file()).collect();
        // 여러 버전이 있으면 이름순으로 가장 마지막(보통 최신) 선택
        matches.sort();
        matches.pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_bare_name() {
        let java = PathDetector::detect_java_with_home(&["/definitely/not/here/java".to_string()], None);
        assert_eq!(java, JAVA_BARE);
    }

    #[test]
    fn preferred_path_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let java = tmp.path().join("java");
        std::fs::write(&java, b"").unwrap();

        let found = PathDetector::detect_java_with_home(
            &["/missing/java".to_string(), java.to_string_lossy().to_string()],
            None,
        );
        assert_eq!(found, java.to_string_lossy());
    }

    #[test]
    fn glob_pattern_picks_latest() {
        let tmp = tempfile::tempdir().unwrap();
        for v in ["jdk-17", "jdk-21"] {
            let bin = tmp.path().join(v).join("bin");
            std::fs::create_dir_all(&bin).unwrap();
            std::fs::write(bin.join("java"), b"").unwrap();
        }
        let pattern = format!("{}/*/bin/java", tmp.path().display());
        let found = PathDetector::detect_java_with_home(&[pattern], None);
        assert!(found.contains("jdk-21"));
    }

    #[test]
    fn java_home_is_used() {
        let tmp = tempfile::tempdir().unwrap();
        let bin = tmp.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        std::fs::write(bin.join(JAVA_BARE), b"").unwrap();

        let found = PathDetector::detect_java_with_home(&[], Some(tmp.path().to_path_buf()));
        assert_eq!(found, bin.join(JAVA_BARE).to_string_lossy());
    }
}
