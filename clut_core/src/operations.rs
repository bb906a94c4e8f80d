use serde::{Deserialize, Serialize};

/// Top-level directories that hold per-expansion data.
pub const EXPANSION_DIRECTORIES: [&str; 2] = ["sqpack", "movie"];

/// Files with these suffixes survive an expansion removal.
const KEEP_SUFFIXES: [&str; 5] = [".var", "00000.bk2", "00001.bk2", "00002.bk2", "00003.bk2"];

/// Size of a file header written by [`ApplyOperation::WriteHeader`].
pub const HEADER_SIZE: u32 = 1024;

/// Which header of a file a header write targets; the version header sits at offset 0, the others after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderKind {
    Version,
    Index,
    Data,
}

/// One block of a whole-file write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileBlock {
    pub blob_offset: u64,
    /// Present when the block is stored deflated in the patch.
    #[serde(default)]
    pub compressed_size: Option<u32>,
    pub data_size: u32,
}

/// An abstract operation decoded from an upstream patch, with enough provenance to record where its bytes
/// come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ApplyOperation {
    AddDirectory {
        path: String,
    },
    DeleteDirectory {
        path: String,
    },
    WriteHeader {
        path: String,
        kind: HeaderKind,
        blob_offset: u64,
    },
    /// Writes `length` raw bytes then zeroes `delete_length` bytes after them.
    AddData {
        path: String,
        blob_offset: u64,
        file_offset: u64,
        length: u32,
        #[serde(default)]
        delete_length: u32,
    },
    DeleteData {
        path: String,
        file_offset: u64,
        length: u32,
    },
    ExpandData {
        path: String,
        file_offset: u64,
        length: u32,
    },
    /// Writes `blocks` back to back from `file_offset`. At offset 0 the file is replaced.
    AddFile {
        path: String,
        file_offset: u64,
        blocks: Vec<FileBlock>,
    },
    DeleteFile {
        path: String,
    },
    MakeDirTree {
        path: String,
    },
    RemoveExpansion {
        expansion_id: u16,
    },
}

impl ApplyOperation {
    /// The path this operation targets, if it targets one.
    pub fn path(&self) -> Option<&str> {
        match self {
            ApplyOperation::AddDirectory { path }
            | ApplyOperation::DeleteDirectory { path }
            | ApplyOperation::WriteHeader { path, .. }
            | ApplyOperation::AddData { path, .. }
            | ApplyOperation::DeleteData { path, .. }
            | ApplyOperation::ExpandData { path, .. }
            | ApplyOperation::AddFile { path, .. }
            | ApplyOperation::DeleteFile { path }
            | ApplyOperation::MakeDirTree { path } => Some(path),
            ApplyOperation::RemoveExpansion { .. } => None,
        }
    }
}

/// Forward slashes, no leading or trailing separator.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/").trim_matches('/').to_string()
}

/// Folder name of an expansion inside each of [`EXPANSION_DIRECTORIES`].
pub fn expansion_folder(expansion_id: u16) -> String {
    if expansion_id == 0 {
        "ffxiv".to_string()
    } else {
        format!("ex{expansion_id}")
    }
}

/// Whether a file is exempt from expansion removal.
pub fn should_keep(path: &str) -> bool {
    KEEP_SUFFIXES.iter().any(|suffix| path.ends_with(suffix))
}

/// The expansion whose folders hold `path`, at any depth below them.
pub fn expansion_of(path: &str) -> Option<u16> {
    let mut parts = path.split('/');
    let top = parts.next()?;
    let folder = parts.next()?;
    parts.next()?;
    if !EXPANSION_DIRECTORIES.contains(&top) {
        return None;
    }
    let id = match folder.strip_prefix("ex") {
        Some(n) => n.parse().ok()?,
        None => 0,
    };
    (expansion_folder(id) == folder).then_some(id)
}

/// The folders, relative to the install root, whose files an expansion removal deletes.
pub fn expansion_directories(expansion_id: u16) -> Vec<String> {
    let folder = expansion_folder(expansion_id);
    EXPANSION_DIRECTORIES.iter().map(|dir| format!("{dir}/{folder}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("\\sqpack\\ffxiv\\000000.win32.dat0"), "sqpack/ffxiv/000000.win32.dat0");
        assert_eq!(normalize_path("/boot/"), "boot");
        assert_eq!(normalize_path(""), "");
    }

    #[test]
    fn test_expansion_helpers() {
        assert_eq!(expansion_folder(0), "ffxiv");
        assert_eq!(expansion_folder(3), "ex3");
        assert_eq!(expansion_directories(2), vec!["sqpack/ex2".to_string(), "movie/ex2".to_string()]);
        assert!(should_keep("movie/ffxiv/00002.bk2"));
        assert!(should_keep("sqpack/ex1/ex1.ver.var"));
        assert!(!should_keep("movie/ffxiv/00004.bk2"));

        assert_eq!(expansion_of("sqpack/ffxiv/000000.win32.dat0"), Some(0));
        assert_eq!(expansion_of("movie/ex3/00004.bk2"), Some(3));
        assert_eq!(expansion_of("sqpack/ex1/nested/a.dat"), Some(1));
        assert_eq!(expansion_of("sqpack/ex01/a.dat"), None);
        assert_eq!(expansion_of("sqpack/ex0/a.dat"), None);
        assert_eq!(expansion_of("sqpack/ex1"), None);
        assert_eq!(expansion_of("game/ex1/a.dat"), None);
    }

    #[test]
    fn test_deserialize_operations() {
        let ops: Vec<ApplyOperation> = serde_json::from_str(
            r#"[
                { "op": "add_directory", "path": "sqpack" },
                { "op": "write_header", "path": "a.dat", "kind": "version", "blob_offset": 16 },
                { "op": "add_data", "path": "a.dat", "blob_offset": 2048, "file_offset": 1024, "length": 128 },
                { "op": "add_file", "path": "b.exe", "file_offset": 0,
                  "blocks": [ { "blob_offset": 10, "compressed_size": 7, "data_size": 20 }, { "blob_offset": 30, "data_size": 5 } ] },
                { "op": "remove_expansion", "expansion_id": 1 }
            ]"#,
        )
        .unwrap();

        assert_eq!(ops.len(), 5);
        assert_eq!(
            ops[2],
            ApplyOperation::AddData {
                path: "a.dat".into(),
                blob_offset: 2048,
                file_offset: 1024,
                length: 128,
                delete_length: 0,
            }
        );
        let ApplyOperation::AddFile { blocks, .. } = &ops[3] else {
            panic!("expected add_file");
        };
        assert_eq!(blocks[0].compressed_size, Some(7));
        assert_eq!(blocks[1].compressed_size, None);
        assert_eq!(ops[4].path(), None);
    }
}
