//! Export archives: naming, extraction, and best-effort conversion of the
//! extracted delimited files to Parquet.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use rayon::prelude::*;
use spendline_core::{StringTable, write_parquet};

use crate::job::JobError;
use crate::request::FileFormat;

/// Replace runs of unsafe filename characters with `_` and trim underscores.
pub fn safe_slug(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_run = false;
    for c in s.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('_');
            in_run = true;
        }
    }
    out.trim_matches('_').to_string()
}

/// Local archive name for a job identifier, always ending in `.zip`
pub fn archive_file_name(file_name: &str) -> String {
    let mut name = safe_slug(file_name);
    if name.is_empty() {
        name.push_str("download");
    }
    if !name.to_ascii_lowercase().ends_with(".zip") {
        name.push_str(".zip");
    }
    name
}

/// Extract every entry of `zip_path` into `dest`. Entries whose names would
/// escape `dest` are skipped. Returns the extracted file paths.
pub fn extract_zip(zip_path: &Path, dest: &Path) -> Result<Vec<PathBuf>, JobError> {
    let archive_err = |message: String| JobError::Archive {
        path: zip_path.to_path_buf(),
        message,
    };
    let file = File::open(zip_path)?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| archive_err(e.to_string()))?;
    fs::create_dir_all(dest)?;

    let mut extracted = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| archive_err(e.to_string()))?;
        let Some(rel) = entry.enclosed_name() else {
            log::warn!("Skipping unsafe archive entry: {}", entry.name());
            continue;
        };
        let out_path = dest.join(rel);
        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&out_path)?;
        io::copy(&mut entry, &mut out)?;
        extracted.push(out_path);
    }
    log::info!(
        "Extracted {} files: {} -> {}",
        extracted.len(),
        zip_path.display(),
        dest.display()
    );
    Ok(extracted)
}

/// Result of converting one extracted file
#[derive(Debug, Clone)]
pub struct ConvertedFile {
    pub source: PathBuf,
    pub output: PathBuf,
    pub rows: usize,
    pub duplicates_removed: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ConversionReport {
    pub converted: Vec<ConvertedFile>,
    /// Files whose table had no rows (nothing written)
    pub empty: Vec<PathBuf>,
    /// Files that failed to parse or write, with the reason
    pub failed: Vec<(PathBuf, String)>,
}

impl ConversionReport {
    pub fn rows(&self) -> usize {
        self.converted.iter().map(|c| c.rows).sum()
    }

    pub fn duplicates_removed(&self) -> usize {
        self.converted.iter().map(|c| c.duplicates_removed).sum()
    }
}

enum Converted {
    Written(ConvertedFile),
    Empty(PathBuf),
}

/// Convert every extracted file of `format` under `dir` to a sibling
/// `.parquet` file, deduplicating on `dedup_keys`. Failures are logged and
/// collected; they never abort the job since the raw files stay on disk.
pub fn convert_extracted(
    dir: &Path,
    format: FileFormat,
    dedup_keys: &[String],
    zstd_level: i32,
) -> ConversionReport {
    let pattern = format!(
        "{}/**/*.{}",
        glob::Pattern::escape(&dir.to_string_lossy()),
        format.extension()
    );
    let files: Vec<PathBuf> = match glob::glob(&pattern) {
        Ok(paths) => paths.filter_map(Result::ok).filter(|p| p.is_file()).collect(),
        Err(e) => {
            log::warn!("Invalid glob {pattern}: {e}");
            return ConversionReport::default();
        }
    };
    if files.is_empty() {
        log::info!("No .{} files to convert in {}", format.extension(), dir.display());
        return ConversionReport::default();
    }

    let keys: Vec<&str> = dedup_keys.iter().map(String::as_str).collect();
    let results: Vec<(PathBuf, io::Result<Converted>)> = files
        .par_iter()
        .map(|path| {
            let result = convert_file(path, format.delimiter(), &keys, zstd_level);
            (path.clone(), result)
        })
        .collect();

    let mut report = ConversionReport::default();
    for (path, result) in results {
        match result {
            Ok(Converted::Written(file)) => report.converted.push(file),
            Ok(Converted::Empty(path)) => report.empty.push(path),
            Err(e) => {
                let name = path.file_name().map_or_else(
                    || path.display().to_string(),
                    |n| n.to_string_lossy().into_owned(),
                );
                log::warn!("Could not convert {name} -> Parquet: {e}");
                report.failed.push((path, e.to_string()));
            }
        }
    }
    report
}

fn convert_file(path: &Path, delimiter: u8, keys: &[&str], zstd_level: i32) -> io::Result<Converted> {
    let start = Instant::now();
    let mut table = StringTable::from_delimited(path, delimiter)?;
    if table.is_empty() {
        log::warn!("{}: no rows, skipping Parquet", path.display());
        return Ok(Converted::Empty(path.to_path_buf()));
    }

    let before = table.num_rows();
    let removed = table.dedup_by_keys(keys);
    if removed > 0 {
        log::info!(
            "Deduped rows: {before} -> {} (-{removed})",
            table.num_rows()
        );
    }

    let output = path.with_extension("parquet");
    let rows = write_parquet(&table, &output, zstd_level)?;
    log::info!(
        "Wrote Parquet: {} (rows={rows}) [{:.1}s]",
        output.display(),
        start.elapsed().as_secs_f64()
    );
    Ok(Converted::Written(ConvertedFile {
        source: path.to_path_buf(),
        output,
        rows,
        duplicates_removed: removed,
    }))
}
