//! ZIP archive backups

use crate::error::Result;
use crate::game::{FileSet, GameEntry};
use ::zip::write::SimpleFileOptions;
use ::zip::{CompressionMethod, ZipArchive, ZipWriter};
use std::fs::File;
use std::io::{BufReader, Read, Seek, Write};
use std::path::Path;

use super::{ArchiveProgress, Archiver, ExtractReport, ProgressTracker, METADATA_ENTRY};

/// Deflate compressed `.zip` backups
#[derive(Debug, Clone)]
pub struct ZipArchiver {
    compression_level: i64,
}

impl Default for ZipArchiver {
    fn default() -> Self {
        Self::new()
    }
}

impl ZipArchiver {
    pub const KEY: &'static str = "zipfile";

    pub fn new() -> Self {
        Self {
            compression_level: 6, // Balanced compression
        }
    }

    /// Use a specific deflate level (0-9)
    pub fn with_compression_level(level: i64) -> Self {
        Self {
            compression_level: level.clamp(0, 9),
        }
    }

    fn options(&self) -> SimpleFileOptions {
        SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(self.compression_level))
    }

    fn open(path: &Path) -> Result<ZipArchive<BufReader<File>>> {
        let file = File::open(path)?;
        Ok(ZipArchive::new(BufReader::new(file))?)
    }
}

impl Archiver for ZipArchiver {
    fn key(&self) -> &str {
        Self::KEY
    }

    fn description(&self) -> &str {
        "ZIP archive"
    }

    fn extension(&self) -> &str {
        "zip"
    }

    fn is_archive(&self, path: &Path) -> bool {
        let mut archive = match Self::open(path) {
            Ok(archive) => archive,
            Err(_) => return false,
        };
        let found = archive.by_name(METADATA_ENTRY).is_ok();
        found
    }

    fn write_archive(
        &self,
        dest: &Path,
        metadata: &[u8],
        files: &FileSet,
        progress: &dyn Fn(ArchiveProgress),
    ) -> Result<()> {
        let file = File::create(dest)?;
        let mut zip = ZipWriter::new(file);
        let options = self.options();
        let mut tracker = ProgressTracker::new(files.len());

        zip.start_file(METADATA_ENTRY, options)?;
        zip.write_all(metadata)?;
        progress(tracker.advance(METADATA_ENTRY));

        for (path, archive_path) in files {
            add_file_to_zip(&mut zip, path, archive_path, options)?;
            tracing::debug!("Added {} as {}", path.display(), archive_path);
            progress(tracker.advance(archive_path));
        }

        zip.finish()?;
        Ok(())
    }

    fn read_game(&self, path: &Path) -> Result<GameEntry> {
        let mut archive = Self::open(path)?;
        let mut entry = archive.by_name(METADATA_ENTRY)?;
        let mut content = Vec::new();
        entry.read_to_end(&mut content)?;
        GameEntry::from_json_slice(&content)
    }

    fn extract(&self, path: &Path, root: &Path) -> Result<ExtractReport> {
        let mut archive = Self::open(path)?;
        let mut report = ExtractReport::default();

        for i in 0..archive.len() {
            let mut file = match archive.by_index(i) {
                Ok(file) => file,
                Err(e) => {
                    tracing::error!("Cannot read entry {} of {}: {}", i, path.display(), e);
                    report.failed += 1;
                    continue;
                }
            };

            if file.name() == METADATA_ENTRY {
                continue;
            }

            let outpath = match file.enclosed_name() {
                Some(rel) => root.join(rel),
                None => {
                    tracing::error!("Refusing to extract {} outside of {}", file.name(), root.display());
                    report.failed += 1;
                    continue;
                }
            };

            let result = if file.is_dir() {
                std::fs::create_dir_all(&outpath)
            } else {
                write_entry(&mut file, &outpath).map(|_| report.extracted += 1)
            };

            if let Err(e) = result {
                tracing::error!("Failed to restore {}: {}", outpath.display(), e);
                report.failed += 1;
            }
        }

        Ok(report)
    }
}

/// Stream one file into the archive under `archive_path`
fn add_file_to_zip<W: Write + Seek>(
    zip: &mut ZipWriter<W>,
    file_path: &Path,
    archive_path: &str,
    options: SimpleFileOptions,
) -> Result<()> {
    let mut file = BufReader::new(File::open(file_path)?);
    zip.start_file(archive_path, options)?;
    std::io::copy(&mut file, zip)?;
    Ok(())
}

fn write_entry(reader: &mut impl Read, outpath: &Path) -> std::io::Result<u64> {
    if let Some(parent) = outpath.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut outfile = File::create(outpath)?;
    std::io::copy(reader, &mut outfile)
}
