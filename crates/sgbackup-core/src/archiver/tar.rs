//! Tar archive backups, plain or compressed

use crate::error::{Error, Result};
use crate::game::{FileSet, GameEntry};
use ::tar::{Archive, Builder, Header};
use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use xz2::read::XzDecoder;
use xz2::write::XzEncoder;

use super::{ArchiveProgress, Archiver, ExtractReport, ProgressTracker, METADATA_ENTRY};

/// Compression applied to the tar stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TarCompression {
    None,
    Gzip,
    Bzip2,
    Xz,
}

impl TarCompression {
    fn key(&self) -> &'static str {
        match self {
            TarCompression::None => "tarfile",
            TarCompression::Gzip => "tarfile-gzip",
            TarCompression::Bzip2 => "tarfile-bzip2",
            TarCompression::Xz => "tarfile-xz",
        }
    }

    fn extension(&self) -> &'static str {
        match self {
            TarCompression::None => "tar",
            TarCompression::Gzip => "tar.gz",
            TarCompression::Bzip2 => "tar.bz2",
            TarCompression::Xz => "tar.xz",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            TarCompression::None => "Tar archive",
            TarCompression::Gzip => "Tar archive (gzip compressed)",
            TarCompression::Bzip2 => "Tar archive (bzip2 compressed)",
            TarCompression::Xz => "Tar archive (xz compressed)",
        }
    }
}

/// Output stream of a tar archive
enum TarWriter {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
    Bzip2(BzEncoder<BufWriter<File>>),
    Xz(XzEncoder<BufWriter<File>>),
}

impl TarWriter {
    fn create(path: &Path, compression: TarCompression) -> io::Result<Self> {
        let file = BufWriter::new(File::create(path)?);
        Ok(match compression {
            TarCompression::None => TarWriter::Plain(file),
            TarCompression::Gzip => TarWriter::Gzip(GzEncoder::new(file, flate2::Compression::default())),
            TarCompression::Bzip2 => TarWriter::Bzip2(BzEncoder::new(file, bzip2::Compression::default())),
            TarCompression::Xz => TarWriter::Xz(XzEncoder::new(file, 6)),
        })
    }

    /// Flush the compressor trailer and the file
    fn finish(self) -> io::Result<()> {
        let mut file = match self {
            TarWriter::Plain(file) => file,
            TarWriter::Gzip(encoder) => encoder.finish()?,
            TarWriter::Bzip2(encoder) => encoder.finish()?,
            TarWriter::Xz(encoder) => encoder.finish()?,
        };
        file.flush()
    }
}

impl Write for TarWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            TarWriter::Plain(w) => w.write(buf),
            TarWriter::Gzip(w) => w.write(buf),
            TarWriter::Bzip2(w) => w.write(buf),
            TarWriter::Xz(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            TarWriter::Plain(w) => w.flush(),
            TarWriter::Gzip(w) => w.flush(),
            TarWriter::Bzip2(w) => w.flush(),
            TarWriter::Xz(w) => w.flush(),
        }
    }
}

/// `.tar`, `.tar.gz`, `.tar.bz2` and `.tar.xz` backups
#[derive(Debug, Clone)]
pub struct TarArchiver {
    compression: TarCompression,
}

impl TarArchiver {
    pub fn new(compression: TarCompression) -> Self {
        Self { compression }
    }

    pub fn compression(&self) -> TarCompression {
        self.compression
    }

    fn open(&self, path: &Path) -> io::Result<Archive<Box<dyn Read>>> {
        let file = BufReader::new(File::open(path)?);
        let reader: Box<dyn Read> = match self.compression {
            TarCompression::None => Box::new(file),
            TarCompression::Gzip => Box::new(GzDecoder::new(file)),
            TarCompression::Bzip2 => Box::new(BzDecoder::new(file)),
            TarCompression::Xz => Box::new(XzDecoder::new(file)),
        };
        Ok(Archive::new(reader))
    }

    fn read_error(path: &Path, e: impl std::fmt::Display) -> Error {
        Error::ArchiveRead {
            path: path.to_path_buf(),
            message: e.to_string(),
        }
    }
}

fn is_metadata(entry: &::tar::Entry<'_, Box<dyn Read>>) -> bool {
    entry
        .path()
        .map(|p| p == Path::new(METADATA_ENTRY))
        .unwrap_or(false)
}

impl Archiver for TarArchiver {
    fn key(&self) -> &str {
        self.compression.key()
    }

    fn description(&self) -> &str {
        self.compression.description()
    }

    fn extension(&self) -> &str {
        self.compression.extension()
    }

    fn is_archive(&self, path: &Path) -> bool {
        let mut archive = match self.open(path) {
            Ok(archive) => archive,
            Err(_) => return false,
        };
        let entries = match archive.entries() {
            Ok(entries) => entries,
            Err(_) => return false,
        };

        for entry in entries {
            match entry {
                Ok(entry) if is_metadata(&entry) => return true,
                Ok(_) => continue,
                Err(_) => return false,
            }
        }
        false
    }

    fn write_archive(
        &self,
        dest: &Path,
        metadata: &[u8],
        files: &FileSet,
        progress: &dyn Fn(ArchiveProgress),
    ) -> Result<()> {
        let writer = TarWriter::create(dest, self.compression)?;
        let mut builder = Builder::new(writer);
        let mut tracker = ProgressTracker::new(files.len());

        let mut header = Header::new_gnu();
        header.set_size(metadata.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(chrono::Utc::now().timestamp().max(0) as u64);
        header.set_cksum();
        builder.append_data(&mut header, METADATA_ENTRY, metadata)?;
        progress(tracker.advance(METADATA_ENTRY));

        for (path, archive_path) in files {
            builder.append_path_with_name(path, archive_path)?;
            tracing::debug!("Added {} as {}", path.display(), archive_path);
            progress(tracker.advance(archive_path));
        }

        builder.into_inner()?.finish()?;
        Ok(())
    }

    fn read_game(&self, path: &Path) -> Result<GameEntry> {
        let mut archive = self.open(path)?;
        for entry in archive.entries()? {
            let mut entry = entry?;
            if is_metadata(&entry) {
                let mut content = Vec::new();
                entry.read_to_end(&mut content)?;
                return GameEntry::from_json_slice(&content);
            }
        }
        Err(Self::read_error(path, "missing metadata entry"))
    }

    fn extract(&self, path: &Path, root: &Path) -> Result<ExtractReport> {
        let mut archive = self.open(path)?;
        let mut report = ExtractReport::default();

        for entry in archive.entries()? {
            let mut entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    // The stream is unusable past a broken header
                    tracing::error!("Corrupt entry in {}: {}", path.display(), e);
                    report.failed += 1;
                    break;
                }
            };

            if is_metadata(&entry) {
                continue;
            }

            let name = entry
                .path()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            let is_file = entry.header().entry_type().is_file();

            match entry.unpack_in(root) {
                Ok(true) => {
                    if is_file {
                        report.extracted += 1;
                    }
                }
                Ok(false) => {
                    tracing::error!("Refusing to extract {} outside of {}", name, root.display());
                    report.failed += 1;
                }
                Err(e) => {
                    tracing::error!("Failed to restore {}: {}", name, e);
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}
