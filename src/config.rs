//! Read-only settings handed to the class parser and the application loader.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::bytes::index_of_from;

/// Limits and package lists used while parsing smali files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Ceiling on the bytes read from a single class file (default: 4 MiB).
    pub max_file_size: u64,

    /// Ceiling on the length of a single line (default: 64 KiB).
    pub max_line_length: usize,

    /// Package prefixes of bundled advertising SDKs, in `com/google/ads` or `com.google.ads` form.
    pub ad_framework_packages: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_file_size: 4 * 1024 * 1024,
            max_line_length: 64 * 1024,
            ad_framework_packages: [
                "com/google/ads",
                "com/google/android/gms/ads",
                "com/admob",
                "com/millennialmedia",
                "com/inmobi",
                "com/flurry",
                "com/mopub",
                "com/applovin",
                "com/startapp",
                "com/unity3d/ads",
            ]
            .iter()
            .map(|p| p.to_string())
            .collect(),
        }
    }
}

impl Config {
    /// True if the file lives below one of the configured ad framework packages.
    /// A package only matches whole path components.
    pub fn is_ad_framework_package(&self, file: &Path) -> bool {
        let path: Vec<u8> = file
            .to_string_lossy()
            .bytes()
            .map(|b| if b == b'\\' { b'/' } else { b })
            .collect();

        self.ad_framework_packages.iter().any(|package| {
            let package: Vec<u8> = package
                .trim_matches(|c| c == '/' || c == '.')
                .bytes()
                .map(|b| if b == b'.' { b'/' } else { b })
                .collect();
            if package.is_empty() {
                return false;
            }
            let mut from = 0;
            while let Some(at) = index_of_from(&path, &package, from) {
                let end = at + package.len();
                let starts_component = at == 0 || path[at - 1] == b'/';
                if starts_component && path.get(end) == Some(&b'/') {
                    return true;
                }
                from = at + 1;
            }
            false
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.max_file_size, 4_194_304);
        assert_eq!(config.max_line_length, 65_536);
        assert!(config.ad_framework_packages.contains(&"com/mopub".to_string()));
    }

    #[test]
    fn ad_framework_matches_whole_components() {
        let config = Config::default();
        assert!(config.is_ad_framework_package(Path::new("out/smali/com/google/ads/AdView.smali")));
        assert!(config.is_ad_framework_package(Path::new("com/mopub/mobileads/Banner.smali")));
        assert!(!config.is_ad_framework_package(Path::new("out/smali/com/google/adsense/Foo.smali")));
        assert!(!config.is_ad_framework_package(Path::new("out/smali/org/com/admobx/Foo.smali")));
        assert!(!config.is_ad_framework_package(Path::new("out/smali/com/example/Main.smali")));
    }

    #[test]
    fn dotted_packages_are_accepted() {
        let config = Config {
            ad_framework_packages: vec!["net.tracker.sdk".to_string()],
            ..Config::default()
        };
        assert!(config.is_ad_framework_package(Path::new("smali_classes2/net/tracker/sdk/A.smali")));
        assert!(!config.is_ad_framework_package(Path::new("smali/com/google/ads/AdView.smali")));
    }
}
