use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use clut_core::{ApplyOperation, CompressionType, OverrideLookup, ParsedVersion, Snapshot, VersionOverrides};
use serde::Deserialize;
use tracing::{debug, info, instrument};

use crate::errors::{ClutToolError, Result};
use crate::snapshot_io::{clut_file_name, write_snapshot};

const KIB: f64 = (1u64 << 10) as f64;

/// One version of an upstream repository and the versions it can be installed on top of.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VersionNode {
    pub version: ParsedVersion,
    #[serde(default)]
    pub prerequisites: Vec<ParsedVersion>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// The upstream version graph of one repository.
#[derive(Debug, Clone, Default)]
pub struct VersionGraph {
    nodes: BTreeMap<ParsedVersion, VersionNode>,
}

impl VersionGraph {
    pub fn new(nodes: impl IntoIterator<Item = VersionNode>) -> Self {
        Self {
            nodes: nodes.into_iter().map(|n| (n.version.clone(), n)).collect(),
        }
    }

    /// Reads a JSON array of `{ "version", "prerequisites", "active" }` objects.
    pub fn from_json(json: &str) -> Result<Self> {
        let nodes: Vec<VersionNode> = serde_json::from_str(json)?;
        Ok(Self::new(nodes))
    }

    pub fn latest(&self) -> Option<&ParsedVersion> {
        self.nodes.keys().next_back()
    }

    fn node(&self, version: &ParsedVersion) -> Result<&VersionNode> {
        self.nodes
            .get(version)
            .ok_or_else(|| ClutToolError::ChainError(format!("Version {version} is not in the version graph")))
    }

    /// The versions to apply, oldest first, to install `target` from scratch.
    ///
    /// Walks back from `target`: an override redirects the walk or ends it at the overridden version,
    /// otherwise the walk continues with the newest prerequisite not yet in the chain. Active versions
    /// only continue through active prerequisites.
    pub fn resolve_chain(
        &self,
        slug: &str,
        target: &ParsedVersion,
        overrides: &VersionOverrides,
    ) -> Result<Vec<ParsedVersion>> {
        let mut chain: Vec<ParsedVersion> = Vec::new();
        let mut next = Some(self.node(target)?);

        while let Some(node) = next {
            chain.push(node.version.clone());

            match overrides.lookup(slug, &node.version) {
                OverrideLookup::Terminate => break,
                OverrideLookup::Redirect(version) => {
                    if chain.contains(&version) {
                        return Err(ClutToolError::ChainError(format!(
                            "Override of {} loops back to {version}",
                            node.version
                        )));
                    }
                    debug!(from = %node.version, to = %version, "Overriding prerequisite");
                    next = Some(self.node(&version)?);
                    continue;
                },
                OverrideLookup::NotOverridden => {},
            }

            let mut candidates = Vec::new();
            for prerequisite in node.prerequisites.iter().filter(|p| !chain.contains(p)) {
                let candidate = self.node(prerequisite)?;
                if !node.active || candidate.active {
                    candidates.push(candidate);
                }
            }
            next = candidates.into_iter().max_by(|a, b| a.version.cmp(&b.version));
        }

        chain.reverse();
        Ok(chain)
    }
}

/// A version of the chain and the operations its patch performs.
#[derive(Debug, Clone)]
pub struct ChainVersion {
    pub version: ParsedVersion,
    pub operations: Vec<ApplyOperation>,
}

/// What [`build_chain`] produced.
#[derive(Debug, Clone)]
pub struct ChainSummary {
    /// The snapshot after the last version.
    pub snapshot: Snapshot,
    /// One persisted snapshot per folded version, in chain order.
    pub written: Vec<PathBuf>,
    pub skipped: usize,
}

/// Folds each version into `base` in order and writes the snapshot after every version as
/// `{patch_name}.clut` into `output_dir`.
///
/// Versions at or below the version of `base` are skipped; any other version out of order fails.
#[instrument(skip_all, fields(repository = %base.repository, output_dir = %output_dir.display()))]
pub fn build_chain(
    base: Snapshot,
    versions: impl IntoIterator<Item = ChainVersion>,
    output_dir: &Path,
    compression: CompressionType,
) -> Result<ChainSummary> {
    std::fs::create_dir_all(output_dir)?;
    info!(base_version = %base.version, %compression, "Building chain");

    let base_version = base.version.clone();
    let mut snapshot = base;
    let mut written = Vec::new();
    let mut skipped = 0;

    for ChainVersion { version, operations } in versions {
        if version <= base_version {
            info!(%version, "Skipping version already in the base snapshot");
            skipped += 1;
            continue;
        }

        info!(%version, operations = operations.len(), "Processing");
        let mut fold = snapshot.begin_fold(version.clone())?;
        for operation in &operations {
            fold.apply(operation)?;
        }
        let summary = fold.finish();
        debug!(
            %version,
            intervals = summary.intervals_inserted,
            files_touched = summary.files_touched,
            files_removed = summary.files_removed,
            "Folded version"
        );

        let file_name = clut_file_name(&version);
        let path = output_dir.join(&file_name);
        let size = write_snapshot(&path, &snapshot, compression)?;
        info!(file = %file_name, kib = format_args!("{:.2}", size as f64 / KIB), "Wrote snapshot");
        written.push(path);
    }

    Ok(ChainSummary {
        snapshot,
        written,
        skipped,
    })
}

#[cfg(test)]
mod tests {
    use clut_core::PlatformId;
    use clut_core::operations::FileBlock;
    use tempfile::TempDir;

    use super::*;
    use crate::snapshot_io::read_chain_snapshot;

    fn v(s: &str) -> ParsedVersion {
        s.parse().unwrap()
    }

    fn node(version: &str, prerequisites: &[&str], active: bool) -> VersionNode {
        VersionNode {
            version: v(version),
            prerequisites: prerequisites.iter().map(|p| v(p)).collect(),
            active,
        }
    }

    fn add_file(path: &str, size: u32) -> ApplyOperation {
        ApplyOperation::AddFile {
            path: path.to_owned(),
            file_offset: 0,
            blocks: vec![FileBlock {
                blob_offset: 0,
                compressed_size: None,
                data_size: size,
            }],
        }
    }

    // ==================== Version Graph Tests ====================

    #[test]
    fn test_resolve_follows_newest_prerequisite() {
        let graph = VersionGraph::new([
            node("H2017.06.06.0000.0001a", &[], true),
            node("2017.06.06.0000.0001", &["H2017.06.06.0000.0001a"], true),
            node("2017.07.01.0000.0000", &["2017.06.06.0000.0001"], true),
            node("2017.08.01.0000.0000", &["2017.06.06.0000.0001", "2017.07.01.0000.0000"], true),
        ]);

        let chain = graph
            .resolve_chain("ffxiv", &v("2017.08.01.0000.0000"), &VersionOverrides::new())
            .unwrap();
        assert_eq!(
            chain,
            [
                v("H2017.06.06.0000.0001a"),
                v("2017.06.06.0000.0001"),
                v("2017.07.01.0000.0000"),
                v("2017.08.01.0000.0000")
            ]
        );
        assert_eq!(graph.latest(), Some(&v("2017.08.01.0000.0000")));
    }

    #[test]
    fn test_active_versions_skip_inactive_prerequisites() {
        let graph = VersionGraph::new([
            node("2024.01.01.0000.0000", &[], true),
            node("2024.01.15.0000.0000", &["2024.01.01.0000.0000"], false),
            node("2024.02.01.0000.0000", &["2024.01.01.0000.0000", "2024.01.15.0000.0000"], true),
        ]);

        let chain = graph
            .resolve_chain("ffxiv", &v("2024.02.01.0000.0000"), &VersionOverrides::new())
            .unwrap();
        assert_eq!(chain, [v("2024.01.01.0000.0000"), v("2024.02.01.0000.0000")]);
    }

    #[test]
    fn test_overrides_redirect_and_terminate() {
        let graph = VersionGraph::new([
            node("2024.01.01.0000.0000", &[], true),
            node("2024.01.02.0000.0000", &["2024.01.01.0000.0000"], true),
            node("2024.02.01.0000.0000", &["2024.01.02.0000.0000"], true),
            node("2024.03.01.0000.0000", &["2024.02.01.0000.0000"], true),
        ]);

        let mut overrides = VersionOverrides::new();
        overrides.insert("ffxiv", v("2024.03.01.0000.0000"), Some(v("2024.01.02.0000.0000")));
        overrides.insert("ffxiv", v("2024.01.02.0000.0000"), None);

        let chain = graph.resolve_chain("ffxiv", &v("2024.03.01.0000.0000"), &overrides).unwrap();
        assert_eq!(chain, [v("2024.01.02.0000.0000"), v("2024.03.01.0000.0000")]);

        // Overrides are per repository.
        let chain = graph.resolve_chain("other", &v("2024.03.01.0000.0000"), &overrides).unwrap();
        assert_eq!(chain.len(), 4);
    }

    #[test]
    fn test_resolve_errors() {
        let graph = VersionGraph::new([
            node("2024.01.01.0000.0000", &["2023.01.01.0000.0000"], true),
            node("2024.02.01.0000.0000", &["2024.01.01.0000.0000"], true),
        ]);
        let none = VersionOverrides::new();

        assert!(matches!(
            graph.resolve_chain("ffxiv", &v("2025.01.01.0000.0000"), &none),
            Err(ClutToolError::ChainError(_))
        ));
        assert!(matches!(
            graph.resolve_chain("ffxiv", &v("2024.02.01.0000.0000"), &none),
            Err(ClutToolError::ChainError(_))
        ));

        let mut looping = VersionOverrides::new();
        looping.insert("ffxiv", v("2024.01.01.0000.0000"), Some(v("2024.02.01.0000.0000")));
        assert!(matches!(
            graph.resolve_chain("ffxiv", &v("2024.02.01.0000.0000"), &looping),
            Err(ClutToolError::ChainError(_))
        ));
    }

    #[test]
    fn test_graph_from_json() {
        let graph = VersionGraph::from_json(
            r#"[
                { "version": "2024.01.01.0000.0000" },
                { "version": "2024.02.01.0000.0000", "prerequisites": ["2024.01.01.0000.0000"], "active": false }
            ]"#,
        )
        .unwrap();
        let chain = graph
            .resolve_chain("ffxiv", &v("2024.02.01.0000.0000"), &VersionOverrides::new())
            .unwrap();
        assert_eq!(chain.len(), 2);
    }

    // ==================== Build Chain Tests ====================

    #[test]
    fn test_build_chain_writes_every_version() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("cluts");
        let base = Snapshot::empty("ffxiv", PlatformId::Win32).with_base_patch_url("http://patch/game");

        let summary = build_chain(
            base,
            [
                ChainVersion {
                    version: v("2024.01.01.0000.0000"),
                    operations: vec![add_file("a", 100)],
                },
                ChainVersion {
                    version: v("2024.02.01.0000.0000"),
                    operations: vec![add_file("b", 50), ApplyOperation::DeleteFile { path: "a".to_owned() }],
                },
            ],
            &out,
            CompressionType::Brotli,
        )
        .unwrap();

        assert_eq!(summary.written.len(), 2);
        assert_eq!(summary.skipped, 0);
        assert_eq!(summary.snapshot.version, v("2024.02.01.0000.0000"));

        let first = read_chain_snapshot(&out, &v("2024.01.01.0000.0000")).unwrap();
        assert!(first.files.contains_key("a"));
        assert_eq!(first.base_patch_url.as_deref(), Some("http://patch/game"));

        let second = read_chain_snapshot(&out, &v("2024.02.01.0000.0000")).unwrap();
        assert_eq!(second, summary.snapshot);
        assert!(!second.files.contains_key("a"));
    }

    #[test]
    fn test_build_chain_continues_from_base() {
        let dir = TempDir::new().unwrap();
        let mut base = Snapshot::empty("ffxiv", PlatformId::Win32);
        let mut fold = base.begin_fold(v("2024.01.01.0000.0000")).unwrap();
        fold.apply(&add_file("a", 10)).unwrap();
        fold.finish();

        let summary = build_chain(
            base,
            [
                ChainVersion {
                    version: v("2024.01.01.0000.0000"),
                    operations: vec![add_file("ignored", 10)],
                },
                ChainVersion {
                    version: v("2024.02.01.0000.0000"),
                    operations: vec![add_file("b", 10)],
                },
            ],
            dir.path(),
            CompressionType::None,
        )
        .unwrap();

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.written, [dir.path().join("D2024.02.01.0000.0000.clut")]);
        assert!(summary.snapshot.files.contains_key("a"));
        assert!(!summary.snapshot.files.contains_key("ignored"));
    }

    #[test]
    fn test_build_chain_rejects_out_of_order_versions() {
        let dir = TempDir::new().unwrap();
        let result = build_chain(
            Snapshot::empty("ffxiv", PlatformId::Win32),
            [
                ChainVersion {
                    version: v("2024.02.01.0000.0000"),
                    operations: vec![],
                },
                ChainVersion {
                    version: v("2024.01.01.0000.0000"),
                    operations: vec![],
                },
            ],
            dir.path(),
            CompressionType::Zlib,
        );
        assert!(matches!(result, Err(ClutToolError::ClutError(_))));
    }
}
