//! Archive extraction.
//!
//! Agent releases ship as zip files, so that is the primary format. Gzipped
//! tarballs are accepted too. Either way every entry must stay inside the
//! destination directory.
//!
//! # Examples
//!
//! ```no_run
//! use std::path::Path;
//!
//! fn main() -> vsotap::Result<()> {
//!     let files = vsotap::extract::extract_archive(
//!         Path::new("/tmp/vso--3604372.zip"),
//!         Path::new("/tmp/staging"),
//!     )?;
//!     println!("Extracted {} files", files);
//!     Ok(())
//! }
//! ```

use crate::error::{Result, TapError};
use crate::symlink::normalize_path;
use anyhow::Context;
use flate2::read::GzDecoder;
use std::fs;
use std::io::{self, Read};
use std::os::unix::fs::{self as unix_fs, PermissionsExt};
use std::path::Path;
use tar::Archive;

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

fn escapes(entry: &str) -> TapError {
    TapError::Other(anyhow::anyhow!(
        "Refusing to extract {:?}: path escapes destination",
        entry
    ))
}

/// Extract an archive into `dest`, returning the number of files written
pub fn extract_archive(archive_path: &Path, dest: &Path) -> Result<usize> {
    fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create directory: {}", dest.display()))?;

    let name = archive_path
        .file_name()
        .map(|n| n.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    let count = if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        extract_tar_gz(archive_path, dest)?
    } else {
        extract_zip(archive_path, dest)?
    };

    tracing::debug!(
        "Extracted {} files from {} into {}",
        count,
        archive_path.display(),
        dest.display()
    );
    Ok(count)
}

fn extract_zip(archive_path: &Path, dest: &Path) -> Result<usize> {
    let file = fs::File::open(archive_path)
        .with_context(|| format!("Failed to open archive: {}", archive_path.display()))?;
    let mut archive = zip::ZipArchive::new(file)
        .with_context(|| format!("Not a zip archive: {}", archive_path.display()))?;

    let root = fs::canonicalize(dest)?;
    let mut count = 0;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).context("Corrupt zip entry")?;

        let relative = entry.enclosed_name().ok_or_else(|| escapes(entry.name()))?;
        let out_path = dest.join(&relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }

        let parent = out_path.parent().unwrap_or(dest);
        fs::create_dir_all(parent)?;
        // An earlier symlink entry may have redirected this directory
        let real_parent = fs::canonicalize(parent)?;
        if !real_parent.starts_with(&root) {
            return Err(escapes(entry.name()));
        }

        let mode = entry.unix_mode();
        if mode.is_some_and(|m| m & S_IFMT == S_IFLNK) {
            let mut target = String::new();
            entry.read_to_string(&mut target)?;
            let resolved = normalize_path(&real_parent.join(&target));
            if Path::new(&target).is_absolute() || !resolved.starts_with(&root) {
                return Err(escapes(entry.name()));
            }
            unix_fs::symlink(&target, &out_path).with_context(|| {
                format!("Failed to create symlink {} -> {}", out_path.display(), target)
            })?;
            count += 1;
            continue;
        }

        let mut out = fs::File::create(&out_path)
            .with_context(|| format!("Failed to create {}", out_path.display()))?;
        io::copy(&mut entry, &mut out)?;

        if let Some(mode) = mode {
            fs::set_permissions(&out_path, fs::Permissions::from_mode(mode & 0o7777))?;
        }

        count += 1;
    }

    Ok(count)
}

fn extract_tar_gz(archive_path: &Path, dest: &Path) -> Result<usize> {
    let file = fs::File::open(archive_path)
        .with_context(|| format!("Failed to open archive: {}", archive_path.display()))?;
    let mut archive = Archive::new(GzDecoder::new(file));
    archive.set_preserve_permissions(true);

    let mut count = 0;
    for entry in archive.entries().context("Failed to read tar archive")? {
        let mut entry = entry?;
        let is_file = entry.header().entry_type().is_file();

        // unpack_in refuses entries that would land outside `dest`
        if !entry.unpack_in(dest)? {
            return Err(escapes(&entry.path()?.to_string_lossy()));
        }

        if is_file {
            count += 1;
        }
    }

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, entries: &[(&str, &str, u32)]) {
        let file = fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        for (name, contents, mode) in entries {
            let options = SimpleFileOptions::default().unix_permissions(*mode);
            zip.start_file(*name, options).unwrap();
            zip.write_all(contents.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_extract_zip_preserves_layout_and_modes() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("agent_1.zip");
        write_zip(
            &archive,
            &[
                ("vso", "#!/bin/sh\nexit 0\n", 0o755),
                ("runtimes/lib.dylib", "binary", 0o644),
            ],
        );

        let dest = temp.path().join("out");
        let count = extract_archive(&archive, &dest).unwrap();
        assert_eq!(count, 2);
        assert!(dest.join("runtimes/lib.dylib").is_file());

        let mode = fs::metadata(dest.join("vso")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn test_zip_entry_outside_destination_is_rejected() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("agent_1.zip");
        write_zip(&archive, &[("../evil", "payload", 0o644)]);

        let dest = temp.path().join("out");
        let err = extract_archive(&archive, &dest).unwrap_err();
        assert!(err.to_string().contains("escapes destination"), "{}", err);
        assert!(!temp.path().join("evil").exists());
    }

    #[test]
    fn test_zip_symlinks_are_recreated() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("agent_1.zip");
        let file = fs::File::create(&archive).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        zip.start_file("runtimes/libcoreclr.1.dylib", SimpleFileOptions::default())
            .unwrap();
        zip.write_all(b"binary").unwrap();
        zip.add_symlink(
            "runtimes/libcoreclr.dylib",
            "libcoreclr.1.dylib",
            SimpleFileOptions::default(),
        )
        .unwrap();
        zip.finish().unwrap();

        let dest = temp.path().join("out");
        assert_eq!(extract_archive(&archive, &dest).unwrap(), 2);

        let link = dest.join("runtimes/libcoreclr.dylib");
        assert!(link.symlink_metadata().unwrap().file_type().is_symlink());
        assert_eq!(fs::read_link(&link).unwrap(), Path::new("libcoreclr.1.dylib"));
        assert_eq!(fs::read_to_string(&link).unwrap(), "binary");
    }

    #[test]
    fn test_zip_symlink_outside_destination_is_rejected() {
        let temp = TempDir::new().unwrap();
        for target in ["../../victim", "/etc/passwd"] {
            let archive = temp.path().join("agent_1.zip");
            let file = fs::File::create(&archive).unwrap();
            let mut zip = zip::ZipWriter::new(file);
            zip.add_symlink("lib/escape", target, SimpleFileOptions::default())
                .unwrap();
            zip.finish().unwrap();

            let dest = temp.path().join("out");
            assert!(extract_archive(&archive, &dest).is_err(), "{} accepted", target);
            assert!(dest.join("lib/escape").symlink_metadata().is_err());
        }
    }

    #[test]
    fn test_tar_entry_outside_destination_is_rejected() {
        let temp = TempDir::new().unwrap();
        let archive_path = temp.path().join("agent-1.0.tar.gz");

        let file = fs::File::create(&archive_path).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let data = b"payload";
        let mut header = tar::Header::new_gnu();
        // The builder's path setters refuse `..`, so write the raw name
        let name = b"../evil";
        header.as_gnu_mut().unwrap().name[..name.len()].copy_from_slice(name);
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        builder.append(&header, &data[..]).unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let dest = temp.path().join("out");
        let err = extract_archive(&archive_path, &dest).unwrap_err();
        assert!(err.to_string().contains("escapes destination"), "{}", err);
        assert!(!temp.path().join("evil").exists());
    }

    #[test]
    fn test_extract_tar_gz() {
        let temp = TempDir::new().unwrap();
        let archive_path = temp.path().join("agent-1.0.tar.gz");

        let file = fs::File::create(&archive_path).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let data = b"hello";
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder
            .append_data(&mut header, "bin/agent", &data[..])
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let dest = temp.path().join("out");
        assert_eq!(extract_archive(&archive_path, &dest).unwrap(), 1);
        assert_eq!(fs::read_to_string(dest.join("bin/agent")).unwrap(), "hello");
    }

    #[test]
    fn test_rejects_non_archive() {
        let temp = TempDir::new().unwrap();
        let bogus = temp.path().join("bogus.zip");
        fs::write(&bogus, "not a zip").unwrap();
        assert!(extract_archive(&bogus, &temp.path().join("out")).is_err());
    }
}
