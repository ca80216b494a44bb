//! The set of classes of one decompiled application.

use log::{info, warn};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::class::SmaliClass;
use crate::config::Config;
use crate::error::SmaliError;

/// Parsed classes keyed by the path of their smali file.
#[derive(Debug)]
pub struct Application {
    classes: BTreeMap<PathBuf, SmaliClass>,
    skipped: Vec<(PathBuf, String)>,
    config: Config,
    /// Label for the next accepted class. Never reused, even when a path is added again.
    next_label: usize,
}

impl Application {
    pub fn new(config: Config) -> Application {
        Application { classes: BTreeMap::new(), skipped: vec![], config, next_label: 0 }
    }

    /// Recurses a base path, typically a 'smali' folder from apktool, and parses
    /// every `.smali` file below it. Files that fail to parse are logged and
    /// skipped; only a failure to list a directory aborts the load.
    ///
    /// # Examples
    ///
    /// ```no_run
    ///  use smali_cfg::application::Application;
    ///  use smali_cfg::config::Config;
    ///  use std::path::Path;
    ///
    ///  let app = Application::load(Path::new("smali"), Config::default()).unwrap();
    ///  println!("{} smali classes loaded.", app.len());
    /// ```
    pub fn load(dir: &Path, config: Config) -> Result<Application, SmaliError> {
        let mut files = vec![];
        find_smali_files(dir, &mut files)?;
        files.sort();

        let mut app = Application::new(config);
        for file in files {
            app.add_file(&file);
        }
        info!("Loaded {} classes from {} ({} skipped)", app.classes.len(), dir.display(), app.skipped.len());
        Ok(app)
    }

    /// Parses one file and adds it. Returns false if the file was skipped.
    pub fn add_file(&mut self, path: &Path) -> bool {
        match SmaliClass::parse(path, &self.config, self.next_label) {
            Ok(class) => {
                self.next_label += 1;
                self.classes.insert(path.to_path_buf(), class);
                true
            }
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                self.skipped.push((path.to_path_buf(), e.to_string()));
                false
            }
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_ad_framework_package(&self, file: &Path) -> bool {
        self.config.is_ad_framework_package(file)
    }

    pub fn class_by_path(&self, path: &Path) -> Option<&SmaliClass> {
        self.classes.get(path)
    }

    pub fn class_by_path_mut(&mut self, path: &Path) -> Option<&mut SmaliClass> {
        self.classes.get_mut(path)
    }

    /// Lookup by fully qualified name, e.g. `com.example.Main`
    pub fn class_by_name(&self, name: &str) -> Option<&SmaliClass> {
        self.classes.values().find(|c| c.class_name() == name)
    }

    pub fn classes_in_package<'a>(&'a self, package: &'a str) -> impl Iterator<Item = &'a SmaliClass> + 'a {
        self.classes.values().filter(move |c| c.package() == package)
    }

    /// Classes whose file path ends with the given components, e.g. `com/example/Main.smali`
    pub fn classes_by_component<'a>(&'a self, component: &'a Path) -> impl Iterator<Item = &'a SmaliClass> + 'a {
        self.classes
            .iter()
            .filter(move |(path, _)| path.ends_with(component))
            .map(|(_, c)| c)
    }

    /// All classes in path order.
    pub fn classes(&self) -> impl Iterator<Item = &SmaliClass> {
        self.classes.values()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Files that could not be parsed, with the reason.
    pub fn skipped(&self) -> &[(PathBuf, String)] {
        &self.skipped
    }
}

fn find_smali_files(dir: &Path, results: &mut Vec<PathBuf>) -> Result<(), SmaliError> {
    let entries = dir.read_dir().map_err(|source| SmaliError::Io { path: dir.to_path_buf(), source })?;
    for entry in entries.flatten() {
        let path = entry.path();
        if let Ok(file_type) = entry.file_type() {
            if file_type.is_dir() {
                // Directory: recurse sub-directory
                find_smali_files(&path, results)?;
            } else if path.extension().is_some_and(|e| e == "smali") {
                results.push(path);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(root: &Path, rel: &str, content: &str) -> PathBuf {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn loads_recursively_and_skips_failures() {
        let dir = tempfile::tempdir().unwrap();
        let main = write(dir.path(), "com/example/Main.smali", ".class public Lcom/example/Main;\n.super Ljava/lang/Object;\n");
        write(dir.path(), "com/example/Util.smali", ".class Lcom/example/Util;\n");
        write(dir.path(), "com/google/ads/AdView.smali", ".class public Lcom/google/ads/AdView;\n");
        write(dir.path(), "com/example/Broken.smali", ".super Ljava/lang/Object;\n");
        write(dir.path(), "README.txt", "not smali");

        let app = Application::load(dir.path(), Config::default()).unwrap();
        assert_eq!(app.len(), 3);
        assert_eq!(app.skipped().len(), 1);
        assert!(app.skipped()[0].0.ends_with("Broken.smali"));

        let c = app.class_by_path(&main).unwrap();
        assert_eq!(c.class_name(), "com.example.Main");
        assert_eq!(app.class_by_name("com.example.Util").map(|c| c.package()), Some("com.example"));
        assert_eq!(app.classes_in_package("com.example").count(), 2);
        assert_eq!(app.classes_by_component(Path::new("example/Main.smali")).count(), 1);
        assert!(app.class_by_name("com.google.ads.AdView").unwrap().is_ad_framework());
        assert!(app.is_ad_framework_package(Path::new("com/google/ads/AdView.smali")));
    }

    #[test]
    fn labels_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "A.smali", ".class LA;\n");
        write(dir.path(), "B.smali", ".class LB;\n");
        write(dir.path(), "C.smali", ".class LC;\n");
        let app = Application::load(dir.path(), Config::default()).unwrap();
        let mut labels: Vec<usize> = app.classes().map(|c| c.label()).collect();
        labels.sort();
        assert_eq!(labels, vec![0, 1, 2]);
    }

    #[test]
    fn readding_a_path_keeps_labels_unique() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(dir.path(), "A.smali", ".class LA;\n");
        let b = write(dir.path(), "B.smali", ".class LB;\n");
        let mut app = Application::new(Config::default());
        assert!(app.add_file(&a));
        assert!(app.add_file(&a));
        assert!(app.add_file(&b));
        assert_eq!(app.len(), 2);
        assert_eq!(app.class_by_path(&a).map(|c| c.label()), Some(1));
        assert_eq!(app.class_by_path(&b).map(|c| c.label()), Some(2));
    }

    #[test]
    fn missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let e = Application::load(&dir.path().join("nope"), Config::default()).unwrap_err();
        assert!(matches!(e, SmaliError::Io { .. }));
    }

    #[test]
    fn oversized_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "A.smali", ".class LA;\n.field public a:I\n");
        let config = Config { max_file_size: 8, ..Config::default() };
        let app = Application::load(dir.path(), config).unwrap();
        assert!(app.is_empty());
        assert!(app.skipped()[0].1.contains("exceeds the maximum size of 8 bytes"));
    }
}
