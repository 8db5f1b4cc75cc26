use crate::error::AppError;
use crate::models::organize_types::OrganizeReport;
use crate::services::classifier::ImageClassifier;
use crate::services::fs_service;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Classifies every accepted image directly inside `input_dir` and moves it
/// into `output_dir/<label>/`, keeping its file name.
///
/// Fails fast if `input_dir` does not exist, before touching the filesystem.
/// The first classification or move error aborts the pass; files moved up to
/// that point stay where they are.
pub fn organize(
    input_dir: &Path,
    output_dir: &Path,
    classifier: &dyn ImageClassifier,
) -> Result<OrganizeReport, AppError> {
    if !input_dir.is_dir() {
        return Err(format!("The directory `{}` does not exist.", input_dir.display()).into());
    }

    fs::create_dir_all(output_dir).map_err(|e| AppError {
        message: format!(
            "Failed to create output directory {}: {}",
            output_dir.display(),
            e
        ),
    })?;

    let images = fs_service::list_image_files(input_dir)?;
    let mut files_moved = 0;

    for image in &images {
        let prediction = classifier.classify(image)?;

        let file_name = image
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();

        let class_dir = output_dir.join(label_to_dir_name(&prediction.label));
        fs::create_dir_all(&class_dir).map_err(|e| AppError {
            message: format!("Failed to create directory {}: {}", class_dir.display(), e),
        })?;

        let dest = unique_destination(&class_dir, &file_name);
        move_file(image, &dest)?;

        info!(
            "Moved {} -> {} ({:.1}%)",
            file_name,
            dest.display(),
            prediction.confidence * 100.0
        );
        files_moved += 1;
    }

    Ok(OrganizeReport {
        files_moved,
        output_dir: output_dir.display().to_string(),
    })
}

/// Maps a model label to a folder name. Labels come straight from the label
/// table and can contain characters that are awkward on disk.
fn label_to_dir_name(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == ' ' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    cleaned.trim().to_string()
}

/// Picks a destination path that does not clobber an existing file:
/// `img.jpg`, then `img_1.jpg`, `img_2.jpg`, ...
fn unique_destination(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let stem = Path::new(file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| file_name.to_string());
    let extension = Path::new(file_name)
        .extension()
        .map(|s| s.to_string_lossy().to_string());

    let mut n = 1;
    loop {
        let name = match &extension {
            Some(ext) => format!("{}_{}.{}", stem, n, ext),
            None => format!("{}_{}", stem, n),
        };
        let candidate = dir.join(name);
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

/// Rename is atomic on the same filesystem; fall back to copy + delete when
/// source and destination live on different mounts.
fn move_file(source: &Path, dest: &Path) -> Result<(), AppError> {
    if fs::rename(source, dest).is_ok() {
        return Ok(());
    }

    fs::copy(source, dest).map_err(|e| AppError {
        message: format!(
            "Failed to move {} to {}: {}",
            source.display(),
            dest.display(),
            e
        ),
    })?;
    fs::remove_file(source).map_err(|e| AppError {
        message: format!("Failed to remove {}: {}", source.display(), e),
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::classify_types::Prediction;
    use std::collections::HashMap;
    use std::fs;

    /// Canned predictor keyed by file name.
    struct FakeClassifier {
        labels: HashMap<String, String>,
    }

    impl FakeClassifier {
        fn new(pairs: &[(&str, &str)]) -> Self {
            FakeClassifier {
                labels: pairs
                    .iter()
                    .map(|(file, label)| (file.to_string(), label.to_string()))
                    .collect(),
            }
        }
    }

    impl ImageClassifier for FakeClassifier {
        fn classify(&self, image: &Path) -> Result<Prediction, AppError> {
            let name = image.file_name().unwrap().to_string_lossy().to_string();
            let label = self
                .labels
                .get(&name)
                .ok_or_else(|| AppError::new(format!("no prediction for {}", name)))?;
            Ok(Prediction {
                label: label.clone(),
                confidence: 1.0,
            })
        }
    }

    #[test]
    fn moves_images_into_class_folders() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in");
        let output = dir.path().join("out");
        fs::create_dir(&input).unwrap();
        fs::write(input.join("cat1.jpg"), b"cat").unwrap();
        fs::write(input.join("dog1.png"), b"dog").unwrap();
        fs::write(input.join("notes.txt"), b"text").unwrap();

        let classifier = FakeClassifier::new(&[("cat1.jpg", "cat"), ("dog1.png", "dog")]);
        let report = organize(&input, &output, &classifier).unwrap();

        assert_eq!(report.files_moved, 2);
        assert!(output.join("cat").join("cat1.jpg").exists());
        assert!(output.join("dog").join("dog1.png").exists());
        assert!(input.join("notes.txt").exists());
        assert!(!input.join("cat1.jpg").exists());
        assert!(!input.join("dog1.png").exists());
    }

    #[test]
    fn missing_input_dir_fails_without_writes() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("missing");
        let output = dir.path().join("out");

        let classifier = FakeClassifier::new(&[]);
        let err = organize(&input, &output, &classifier).unwrap_err();

        assert!(err.message.contains("does not exist"));
        assert!(!output.exists());
    }

    #[test]
    fn empty_input_dir_is_a_successful_noop() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in");
        let output = dir.path().join("out");
        fs::create_dir(&input).unwrap();

        let classifier = FakeClassifier::new(&[]);
        let report = organize(&input, &output, &classifier).unwrap();
        assert_eq!(report.files_moved, 0);
        assert!(output.exists());

        // Running again over the emptied input still succeeds.
        let report = organize(&input, &output, &classifier).unwrap();
        assert_eq!(report.files_moved, 0);
    }

    #[test]
    fn collision_at_destination_renames_instead_of_overwriting() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in");
        let output = dir.path().join("out");
        fs::create_dir(&input).unwrap();
        fs::create_dir_all(output.join("cat")).unwrap();
        fs::write(output.join("cat").join("cat1.jpg"), b"old").unwrap();
        fs::write(input.join("cat1.jpg"), b"new").unwrap();

        let classifier = FakeClassifier::new(&[("cat1.jpg", "cat")]);
        let report = organize(&input, &output, &classifier).unwrap();

        assert_eq!(report.files_moved, 1);
        assert_eq!(
            fs::read(output.join("cat").join("cat1.jpg")).unwrap(),
            b"old"
        );
        assert_eq!(
            fs::read(output.join("cat").join("cat1_1.jpg")).unwrap(),
            b"new"
        );
    }

    #[test]
    fn classification_error_aborts_the_pass() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in");
        let output = dir.path().join("out");
        fs::create_dir(&input).unwrap();
        fs::write(input.join("a.jpg"), b"a").unwrap();
        fs::write(input.join("b.jpg"), b"b").unwrap();
        fs::write(input.join("c.jpg"), b"c").unwrap();

        // The scan is sorted, so a.jpg moves first, b.jpg fails, c.jpg is
        // never reached.
        let classifier = FakeClassifier::new(&[("a.jpg", "cat"), ("c.jpg", "cat")]);
        let err = organize(&input, &output, &classifier).unwrap_err();

        assert!(err.message.contains("b.jpg"));
        assert!(output.join("cat").join("a.jpg").exists());
        assert!(input.join("b.jpg").exists());
        assert!(input.join("c.jpg").exists());
    }

    #[test]
    fn labels_with_awkward_characters_get_safe_folder_names() {
        assert_eq!(label_to_dir_name("tench, Tinca tinca"), "tench_ Tinca tinca");
        assert_eq!(label_to_dir_name("a/b\\c"), "a_b_c");
        assert_eq!(label_to_dir_name("  spaced  "), "spaced");
        assert_eq!(label_to_dir_name("plain-label_1"), "plain-label_1");
    }
}
