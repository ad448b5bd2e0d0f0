use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use crate::{FewShotErr, Result, error::Context};

/// The only subdirectories of a font directory that hold glyphs.
pub const CASE_DIRS: [&str; 3] = ["lowercase", "uppercase", "digits"];

/// The extension every glyph image has.
pub const IMAGE_EXT: &str = "png";

/// A single glyph image paired with its label.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Sample {
    pub path: PathBuf,
    pub label: char,
}

impl Sample {
    pub fn new(path: impl Into<PathBuf>, label: char) -> Self {
        Self {
            path: path.into(),
            label,
        }
    }
}

/// Reads every sample under a font dump directory.
///
/// The directory holds one directory per font, and each font directory may hold any of the
/// `lowercase`, `uppercase` and `digits` directories. Inside them, every `<c>.png` file is a
/// sample labeled `c`. Anything else is ignored.
///
/// # Returns
/// The samples in filesystem order, or an error if a directory couldn't be listed.
pub fn read_samples(root: impl AsRef<Path>) -> Result<Vec<Sample>> {
    read_samples_inner(root.as_ref()).context("read samples")
}

fn read_samples_inner(root: &Path) -> Result<Vec<Sample>> {
    let mut samples = Vec::new();

    for font in list_dirs(root)? {
        for case in list_dirs(&font)? {
            let supported = case
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| CASE_DIRS.contains(&name));

            if supported {
                list_images(&case, &mut samples)?;
            }
        }
    }

    Ok(samples)
}

fn list_dirs(path: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();

    for entry in fs::read_dir(path).map_err(|e| FewShotErr::io(path, e))? {
        let entry = entry.map_err(|e| FewShotErr::io(path, e))?;
        let file_type = entry
            .file_type()
            .map_err(|e| FewShotErr::io(entry.path(), e))?;

        if file_type.is_dir() {
            dirs.push(entry.path());
        }
    }

    Ok(dirs)
}

fn list_images(path: &Path, dest: &mut Vec<Sample>) -> Result<()> {
    for entry in fs::read_dir(path).map_err(|e| FewShotErr::io(path, e))? {
        let entry = entry.map_err(|e| FewShotErr::io(path, e))?;
        let file_type = entry
            .file_type()
            .map_err(|e| FewShotErr::io(entry.path(), e))?;
        let path = entry.path();

        if file_type.is_dir() {
            continue;
        }

        if let Some(label) = image_label(&path) {
            dest.push(Sample::new(path, label));
        }
    }

    Ok(())
}

/// Returns the label of a `<c>.png` file name, `None` for any other name.
fn image_label(path: &Path) -> Option<char> {
    if path.extension()? != IMAGE_EXT {
        return None;
    }

    let mut chars = path.file_stem()?.to_str()?.chars();
    match (chars.next(), chars.next()) {
        (Some(label), None) => Some(label),
        _ => None,
    }
}

/// Splits the samples by label.
///
/// # Arguments
/// * `samples` - The samples to split.
/// * `validation` - Holds every label that goes to the validation set.
///
/// # Returns
/// The validation and training sets, each one keeping the relative order of `samples`.
pub fn partition(samples: Vec<Sample>, validation: &str) -> (Vec<Sample>, Vec<Sample>) {
    let labels: HashSet<char> = validation.chars().collect();
    samples
        .into_iter()
        .partition(|sample| labels.contains(&sample.label))
}
