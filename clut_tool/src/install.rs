use std::path::{Path, PathBuf};
use std::sync::Arc;

use clut_config::{ClutConfig, clut_config};
use clut_core::{ParsedVersion, Snapshot, SnapshotDiff};
use patch_client::PatchSource;
use range_reconstruction::{
    FileSystemSink, FilteredFileLedger, FilteredSink, RangeReconstructor, ReconstructionSummary, TargetSink,
    apply_removals,
};
use regex::{Regex, RegexBuilder};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::errors::{ClutToolError, Result};

const GIB: f64 = (1u64 << 30) as f64;

/// Patterns selecting the files of an install. No patterns selects everything.
///
/// Each pattern is a case-insensitive regex that has to match the whole `/`-separated path.
#[derive(Debug, Clone, Default)]
pub struct IncludeFilter {
    patterns: Vec<Regex>,
}

impl IncludeFilter {
    pub fn new<S: AsRef<str>>(patterns: impl IntoIterator<Item = S>) -> Result<Self> {
        let patterns = patterns
            .into_iter()
            .map(|p| {
                let p = p.as_ref();
                RegexBuilder::new(&format!("^(?:{p})$"))
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| ClutToolError::ParameterError(format!("Invalid include pattern {p:?}: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn matches(&self, path: &str) -> bool {
        self.patterns.is_empty() || self.patterns.iter().any(|p| p.is_match(path))
    }
}

/// Counts describing a finished install.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallSummary {
    pub from_version: Option<ParsedVersion>,
    pub to_version: ParsedVersion,
    /// The output directory was already at `to_version`.
    pub up_to_date: bool,
    pub write_size: u64,
    pub download_size: u64,
    pub filtered_files: usize,
    pub reconstruction: Option<ReconstructionSummary>,
}

/// Brings an output directory from one snapshot's version to another's.
///
/// The directory remembers which version it holds and which files a filtered install skipped; a
/// later install that would include any of those files is refused, since their contents were never
/// written.
pub struct InstallSession {
    to: Snapshot,
    from: Option<Snapshot>,
    output_dir: PathBuf,
    source: Arc<dyn PatchSource>,
    include: IncludeFilter,
    base_url: Option<String>,
    concurrency: Option<usize>,
    config: Arc<ClutConfig>,
    cancellation: CancellationToken,
}

impl InstallSession {
    pub fn new(to: Snapshot, output_dir: impl Into<PathBuf>, source: Arc<dyn PatchSource>) -> Self {
        Self {
            to,
            from: None,
            output_dir: output_dir.into(),
            source,
            include: IncludeFilter::default(),
            base_url: None,
            concurrency: None,
            config: clut_config(),
            cancellation: CancellationToken::new(),
        }
    }

    /// The snapshot the output directory currently holds; without one the install starts from scratch.
    pub fn with_from(self, from: Snapshot) -> Self {
        Self {
            from: Some(from),
            ..self
        }
    }

    pub fn with_include(self, include: IncludeFilter) -> Self {
        Self { include, ..self }
    }

    /// Patch location used when the snapshots carry none.
    pub fn with_base_url(self, base_url: impl Into<String>) -> Self {
        Self {
            base_url: Some(base_url.into()),
            ..self
        }
    }

    pub fn with_concurrency(self, concurrency: usize) -> Self {
        Self {
            concurrency: Some(concurrency),
            ..self
        }
    }

    pub fn with_config(self, config: Arc<ClutConfig>) -> Self {
        Self { config, ..self }
    }

    pub fn with_cancellation_token(self, cancellation: CancellationToken) -> Self {
        Self { cancellation, ..self }
    }

    #[instrument(skip_all, name = "InstallSession::run", fields(to = %self.to.version, output_dir = %self.output_dir.display()))]
    pub async fn run(self) -> Result<InstallSummary> {
        info!(
            repository = %self.to.repository,
            from = ?self.from.as_ref().map(|s| s.version.to_string()),
            "Starting install"
        );

        let result = self.run_inner().await;

        match &result {
            Ok(summary) if summary.up_to_date => info!("Install already up to date"),
            Ok(summary) => info!(filtered = summary.filtered_files, "Install completed successfully"),
            Err(e) => info!(error = %e, "Install failed"),
        }

        result
    }

    async fn run_inner(self) -> Result<InstallSummary> {
        tokio::fs::create_dir_all(&self.output_dir).await?;
        let ledger = FilteredFileLedger::load(&self.output_dir).await?;

        let mut reincluded = ledger.files.iter().filter(|f| self.include.matches(f));
        if let Some(example) = reincluded.next() {
            return Err(ClutToolError::PreviouslyFilteredFiles {
                count: reincluded.count() + 1,
                example: example.clone(),
            });
        }

        let from_version = self.from.as_ref().map(|s| s.version.clone());
        match (&ledger.installed_version, &from_version) {
            (Some(installed), _) if *installed == self.to.version => {
                return Ok(InstallSummary {
                    from_version,
                    to_version: self.to.version.clone(),
                    up_to_date: true,
                    filtered_files: ledger.files.len(),
                    ..Default::default()
                });
            },
            (Some(installed), Some(from)) if installed != from => {
                return Err(ClutToolError::ParameterError(format!(
                    "Output directory holds version {installed}, not {from}"
                )));
            },
            (Some(installed), None) => warn!(%installed, "Installing from scratch over an existing install"),
            (None, Some(from)) => warn!(%from, "Output directory has no install record, assuming it holds the from version"),
            _ => {},
        }

        let mut diff = match &self.from {
            Some(from) => SnapshotDiff::between(from, &self.to)?,
            None => SnapshotDiff::from_empty(&self.to)?,
        };

        // Files left out of the diff are recorded like files the sink filters; filtered files the new
        // version deletes are forgotten.
        let mut filtered = ledger.files.clone();
        filtered.extend(diff.added_files.keys().filter(|p| !self.include.matches(p)).cloned());
        for path in diff.removed_files.iter().filter(|p| !self.include.matches(p)) {
            filtered.remove(path);
        }
        diff.retain_paths(|path| self.include.matches(path));

        let write_size = diff.write_size();
        let download_size = diff.download_size();
        info!(
            files = diff.added_files.len(),
            removed = diff.removed_files.len(),
            write_gib = format_args!("{:.2}", write_size as f64 / GIB),
            download_gib = format_args!("{:.2}", download_size as f64 / GIB),
            "Planned install"
        );

        let include = self.include.clone();
        let sink = Arc::new(
            FilteredSink::new(
                FileSystemSink::new(&self.output_dir).with_config(&self.config.sink),
                move |path: &str| include.matches(path),
            )
            .with_filtered_files(filtered),
        );

        apply_removals(&diff, sink.as_ref()).await?;

        let mut reconstructor = RangeReconstructor::new(diff, self.source.clone())
            .with_config(&self.config.reconstruction)
            .with_sink_config(&self.config.sink)
            .with_cancellation_token(self.cancellation.clone());
        if let Some(base_url) = &self.base_url {
            reconstructor = reconstructor.with_base_url(base_url);
        }
        if let Some(concurrency) = self.concurrency {
            reconstructor = reconstructor.with_concurrency(concurrency);
        }

        let target: Arc<dyn TargetSink> = sink.clone();
        let reconstruction = reconstructor.run(target).await?;

        let filtered = sink.filtered_files();
        let filtered_files = filtered.len();
        FilteredFileLedger::new(filtered)
            .with_installed_version(self.to.version.clone())
            .save(&self.output_dir)
            .await?;

        Ok(InstallSummary {
            from_version,
            to_version: self.to.version,
            up_to_date: false,
            write_size,
            download_size,
            filtered_files,
            reconstruction: Some(reconstruction),
        })
    }
}

/// The version an output directory was last installed at, if any.
pub async fn installed_version(output_dir: &Path) -> Result<Option<ParsedVersion>> {
    Ok(FilteredFileLedger::load(output_dir).await?.installed_version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_include_filter() {
        let everything = IncludeFilter::default();
        assert!(everything.matches("sqpack/ffxiv/000000.win32.dat0"));

        let filter = IncludeFilter::new([r"sqpack/ffxiv/.*", r"boot/ffxivboot\.exe"]).unwrap();
        assert!(filter.matches("sqpack/ffxiv/000000.win32.dat0"));
        assert!(filter.matches("boot/ffxivboot.exe"));
        assert!(filter.matches("BOOT/FFXIVBoot.EXE"));
        assert!(!filter.matches("sqpack/ex1/020000.win32.dat0"));
        assert!(!filter.matches("game/ffxiv_dx11.exe"));
    }

    #[test]
    fn test_include_filter_matches_whole_path() {
        let filter = IncludeFilter::new([r"sqpack/ffxiv/0a.*\.win32\.index"]).unwrap();
        assert!(filter.matches("sqpack/ffxiv/0a0000.win32.index"));
        assert!(!filter.matches("sqpack/ffxiv/0a0000.win32.index2"));
        assert!(!filter.matches("sqpack/ffxiv/0a0000.win32.dat0"));

        // A bare prefix selects nothing below it.
        let prefix = IncludeFilter::new(["sqpack/ffxiv"]).unwrap();
        assert!(!prefix.matches("sqpack/ffxiv/0a0000.win32.index"));
    }

    #[test]
    fn test_include_filter_rejects_invalid_pattern() {
        assert!(matches!(IncludeFilter::new(["sqpack/(ffxiv"]), Err(ClutToolError::ParameterError(_))));
    }
}
