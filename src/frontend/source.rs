use std::path::Path;

/// One input file: the path it is addressed by (also used by `import`) and its text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: String,
    pub text: String,
    /// Line in the file as written for each line of `text`. Empty when
    /// `text` is the file as written.
    pub origins: Vec<usize>,
}

impl SourceFile {
    pub fn new(path: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            text: text.into(),
            origins: Vec::new(),
        }
    }

    /// 1-based line of the file as written behind line `line` of `text`.
    pub fn origin(&self, line: usize) -> usize {
        line.checked_sub(1)
            .and_then(|i| self.origins.get(i))
            .copied()
            .unwrap_or(line)
    }
}

#[derive(Debug)]
pub enum SourceError {
    Read { path: String, message: String },
    Manifest { path: String, message: String },
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Read { path, message } => {
                write!(f, "cannot read '{}': {}", path, message)
            }
            SourceError::Manifest { path, message } => {
                write!(f, "invalid core library manifest '{}': {}", path, message)
            }
        }
    }
}

impl std::error::Error for SourceError {}

/// Reads every path, keeping the given order.
pub fn load_sources(paths: &[String]) -> Result<Vec<SourceFile>, SourceError> {
    paths
        .iter()
        .map(|path| {
            std::fs::read_to_string(path)
                .map(|text| SourceFile::new(path.clone(), text))
                .map_err(|e| SourceError::Read {
                    path: path.clone(),
                    message: e.to_string(),
                })
        })
        .collect()
}

/// Parses a manifest: a JSON array of file paths.
pub fn parse_manifest(json: &str) -> Result<Vec<String>, serde_json::Error> {
    serde_json::from_str(json)
}

pub fn read_manifest(path: &Path) -> Result<Vec<String>, SourceError> {
    let display = path.display().to_string();
    let json = std::fs::read_to_string(path).map_err(|e| SourceError::Read {
        path: display.clone(),
        message: e.to_string(),
    })?;
    parse_manifest(&json).map_err(|e| SourceError::Manifest {
        path: display,
        message: e.to_string(),
    })
}

/// User paths first, then library paths not already listed.
pub fn merge_paths(user: Vec<String>, library: Vec<String>) -> Vec<String> {
    let mut merged = user;
    for path in library {
        if !merged.contains(&path) {
            merged.push(path);
        }
    }
    merged
}
