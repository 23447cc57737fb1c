//! Daily rotation and retention of the activity log.
//!
//! A current log last written before today is archived as
//! `<dir>/<YYYY-MM-DD>_<base>.zip`; archives older than the retention window
//! are pruned. Failures are logged and end the routine for this run only.

use chrono::{DateTime, Local, NaiveDate, TimeDelta};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::errors::{HarvestError, HarvestResult};
use crate::logger::ActivityLog;

const ARCHIVE_EXTENSION: &str = "zip";
const ISO_DATE: &str = "%Y-%m-%d";

/// What a rotation pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RotationSummary {
    pub archived: Option<PathBuf>,
    pub pruned: Vec<PathBuf>,
}

/// Rotate `<directory>/<base_name>` if it is stale and prune expired archives.
///
/// `now` is the reference instant for both the staleness check and the
/// retention cutoff.
pub fn rotate(
    log: &mut ActivityLog,
    directory: &Path,
    base_name: &str,
    retention_days: u32,
    now: DateTime<Local>,
) -> RotationSummary {
    let mut summary = RotationSummary::default();

    match archive_stale_log(directory, base_name, now) {
        Ok(Some(archive)) => {
            log.info(format!("rotated previous log to {}", archive.display()));
            summary.archived = Some(archive);
        }
        Ok(None) => {}
        Err(err) => {
            log.error(err.to_string());
            return summary;
        }
    }

    if let Err(err) = prune_archives(log, directory, base_name, retention_days, now, &mut summary)
    {
        log.error(err.to_string());
    }
    summary
}

fn archive_stale_log(
    directory: &Path,
    base_name: &str,
    now: DateTime<Local>,
) -> HarvestResult<Option<PathBuf>> {
    let current = directory.join(base_name);
    let metadata = match fs::metadata(&current) {
        Ok(meta) => meta,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(rotation_io("reading metadata of", &current, err)),
    };
    let modified = metadata
        .modified()
        .map_err(|err| rotation_io("reading modification time of", &current, err))?;
    let modified_date = DateTime::<Local>::from(modified).date_naive();
    if modified_date >= now.date_naive() {
        return Ok(None);
    }

    let rotated = directory.join(format!("{}_{}", modified_date.format(ISO_DATE), base_name));
    fs::rename(&current, &rotated).map_err(|err| rotation_io("renaming", &current, err))?;

    let archive = archive_path(&rotated);
    compress(&rotated, &archive)?;
    fs::remove_file(&rotated).map_err(|err| rotation_io("removing", &rotated, err))?;
    Ok(Some(archive))
}

fn archive_path(rotated: &Path) -> PathBuf {
    let mut name = rotated.as_os_str().to_os_string();
    name.push(".");
    name.push(ARCHIVE_EXTENSION);
    PathBuf::from(name)
}

fn compress(source: &Path, archive: &Path) -> HarvestResult<()> {
    let entry_name = source
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| HarvestError::Rotation(format!("invalid log path {}", source.display())))?;

    let mut input = File::open(source).map_err(|err| rotation_io("opening", source, err))?;
    let output = File::create(archive).map_err(|err| rotation_io("creating", archive, err))?;
    let mut writer = ZipWriter::new(output);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let zip_err = |err: zip::result::ZipError| {
        HarvestError::Rotation(format!("compressing {}: {err}", source.display()))
    };
    writer.start_file(entry_name, options).map_err(zip_err)?;
    io::copy(&mut input, &mut writer).map_err(|err| rotation_io("compressing", source, err))?;
    writer.finish().map_err(zip_err)?;
    Ok(())
}

fn prune_archives(
    log: &mut ActivityLog,
    directory: &Path,
    base_name: &str,
    retention_days: u32,
    now: DateTime<Local>,
    summary: &mut RotationSummary,
) -> HarvestResult<()> {
    let cutoff = SystemTime::from(now - TimeDelta::days(i64::from(retention_days)));
    let entries =
        fs::read_dir(directory).map_err(|err| rotation_io("reading directory", directory, err))?;

    for entry in entries {
        let entry = entry.map_err(|err| rotation_io("reading directory", directory, err))?;
        let path = entry.path();
        let matches = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| is_archive_name(name, base_name));
        if !matches {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|meta| meta.modified())
            .map_err(|err| rotation_io("reading modification time of", &path, err))?;
        if modified < cutoff {
            fs::remove_file(&path).map_err(|err| rotation_io("removing", &path, err))?;
            log.info(format!("removed expired log archive {}", path.display()));
            summary.pruned.push(path);
        }
    }
    Ok(())
}

/// `<YYYY-MM-DD>_<base_name>.zip`
fn is_archive_name(name: &str, base_name: &str) -> bool {
    let Some(stem) = name
        .strip_suffix(ARCHIVE_EXTENSION)
        .and_then(|rest| rest.strip_suffix('.'))
    else {
        return false;
    };
    let Some(date) = stem
        .strip_suffix(base_name)
        .and_then(|rest| rest.strip_suffix('_'))
    else {
        return false;
    };
    NaiveDate::parse_from_str(date, ISO_DATE).is_ok()
}

fn rotation_io(action: &str, path: &Path, err: io::Error) -> HarvestError {
    HarvestError::Rotation(format!("{action} {}: {err}", path.display()))
}
