//! Trainer source distribution for managed jobs.
//!
//! ```text
//! trainer-0.1.tar.gz
//!   trainer-0.1/setup.py
//!   trainer-0.1/PKG-INFO
//!   trainer-0.1/trainer/__init__.py
//!   trainer-0.1/trainer/<source tree>
//! ```

use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::path::{Path, PathBuf};
use tar::{Builder, Header};
use tracing::info;

use super::{io_err, CloudError};

pub const PACKAGE_FILE: &str = "trainer-0.1.tar.gz";
const ROOT: &str = "trainer-0.1";

const SETUP_PY: &str = r#"from setuptools import find_packages, setup

setup(
    name="trainer",
    version="0.1",
    packages=find_packages(),
    install_requires=[
        "tensorflow==2.12.0",
        "pandas",
        "pyarrow",
        "numpy",
        "pyyaml",
        "scikit-learn",
    ],
)
"#;

const PKG_INFO: &str = "Metadata-Version: 2.1\nName: trainer\nVersion: 0.1\n";

const INIT_PY: &str = "# Trainer package\n";

fn append_text<W: std::io::Write>(builder: &mut Builder<W>, path: &str, text: &str) -> std::io::Result<()> {
    let mut header = Header::new_gnu();
    header.set_size(text.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, path, text.as_bytes())
}

/// Build `work_dir/trainer-0.1.tar.gz` from the package directory `src`.
///
/// `src/setup.py` is used as the distribution's setup script when present;
/// otherwise one is generated. `__init__.py` is added when missing.
pub fn package_trainer(src: &Path, work_dir: &Path) -> Result<PathBuf, CloudError> {
    if !src.is_dir() {
        return Err(CloudError::NotFound(src.display().to_string()));
    }
    std::fs::create_dir_all(work_dir).map_err(io_err(work_dir))?;

    let archive = work_dir.join(PACKAGE_FILE);
    let file = File::create(&archive).map_err(io_err(&archive))?;
    let mut builder = Builder::new(GzEncoder::new(file, Compression::default()));

    let setup = src.join("setup.py");
    let result = (|| -> std::io::Result<()> {
        if setup.is_file() {
            builder.append_path_with_name(&setup, format!("{ROOT}/setup.py"))?;
        } else {
            append_text(&mut builder, &format!("{ROOT}/setup.py"), SETUP_PY)?;
        }
        append_text(&mut builder, &format!("{ROOT}/PKG-INFO"), PKG_INFO)?;
        if !src.join("__init__.py").is_file() {
            append_text(&mut builder, &format!("{ROOT}/trainer/__init__.py"), INIT_PY)?;
        }
        builder.append_dir_all(format!("{ROOT}/trainer"), src)?;
        builder.into_inner()?.finish()?;
        Ok(())
    })();
    result.map_err(io_err(&archive))?;

    info!(archive = %archive.display(), "Packaged trainer");
    Ok(archive)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use tar::Archive;

    fn entries(archive: &Path) -> Vec<String> {
        let mut archive = Archive::new(GzDecoder::new(File::open(archive).unwrap()));
        let mut names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_generates_setup_and_init() {
        let root = tempfile::tempdir().unwrap();
        let src = root.path().join("trainer");
        std::fs::create_dir(&src).unwrap();
        std::fs::write(src.join("task.py"), "print('train')\n").unwrap();

        let archive = package_trainer(&src, &root.path().join("work")).unwrap();
        let names = entries(&archive);

        assert!(archive.ends_with(PACKAGE_FILE));
        assert!(names.contains(&"trainer-0.1/setup.py".to_string()));
        assert!(names.contains(&"trainer-0.1/trainer/__init__.py".to_string()));
        assert!(names.contains(&"trainer-0.1/trainer/task.py".to_string()));
    }

    #[test]
    fn test_existing_init_is_not_duplicated() {
        let root = tempfile::tempdir().unwrap();
        let src = root.path().join("trainer");
        std::fs::create_dir(&src).unwrap();
        std::fs::write(src.join("__init__.py"), "").unwrap();

        let names = entries(&package_trainer(&src, root.path()).unwrap());
        let inits = names.iter().filter(|n| n.ends_with("__init__.py")).count();
        assert_eq!(inits, 1);
    }

    #[test]
    fn test_missing_source_is_not_found() {
        let root = tempfile::tempdir().unwrap();
        assert!(matches!(
            package_trainer(&root.path().join("missing"), root.path()),
            Err(CloudError::NotFound(_))
        ));
    }
}
