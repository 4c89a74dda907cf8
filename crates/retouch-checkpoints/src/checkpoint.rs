use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};

/// Marker separating the selector from the rest of a generator weight file name.
pub const GENERATOR_MARKER: &str = "_net_G";

/// Selector that names the rolling "most recent" checkpoint.
pub const LATEST: &str = "latest";

/// One persisted generator weight file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Checkpoint {
    /// Directory of the model this checkpoint belongs to.
    pub model_dir: PathBuf,
    /// Logical identity of the file (`latest`, `200`, `iter_5000`, ...).
    pub selector: String,
    /// Absolute path of the weight file.
    pub path: PathBuf,
    /// Last-modified time reported by the filesystem.
    pub modified: DateTime<Utc>,
}

impl Checkpoint {
    /// Name of the owning model (the model directory's final component).
    #[must_use]
    pub fn model_name(&self) -> String {
        model_name_of(&self.model_dir)
    }

    #[must_use]
    pub fn file_name(&self) -> &str {
        self.path.file_name().and_then(|n| n.to_str()).unwrap_or_default()
    }

    #[must_use]
    pub fn kind(&self) -> SelectorKind<'_> {
        SelectorKind::of(&self.selector)
    }

    /// Numeric epoch, if the selector is a decimal integer that fits in `u64`.
    #[must_use]
    pub fn epoch(&self) -> Option<u64> {
        match self.kind() {
            SelectorKind::Epoch(_) => self.selector.parse().ok(),
            _ => None,
        }
    }

    /// Listing order: `latest`, then tags, then epochs descending; ties by file name.
    pub(crate) fn listing_cmp(&self, other: &Self) -> Ordering {
        self.kind()
            .cmp(&other.kind())
            .then_with(|| self.file_name().cmp(other.file_name()))
    }

    /// Between two files carrying the same selector, the unsuffixed (shorter) name wins.
    pub(crate) fn preferred_over(&self, other: &Self) -> bool {
        (self.file_name().len(), self.file_name()) < (other.file_name().len(), other.file_name())
    }
}

/// Classification of a selector string, ordered the way listings present them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorKind<'a> {
    Latest,
    Tag,
    /// Purely decimal selector; holds the digits with leading zeros stripped.
    Epoch(&'a str),
}

impl<'a> SelectorKind<'a> {
    #[must_use]
    pub fn of(selector: &'a str) -> Self {
        if selector == LATEST {
            Self::Latest
        } else if !selector.is_empty() && selector.bytes().all(|b| b.is_ascii_digit()) {
            Self::Epoch(selector.trim_start_matches('0'))
        } else {
            Self::Tag
        }
    }

    fn rank(self) -> u8 {
        match self {
            Self::Latest => 0,
            Self::Tag => 1,
            Self::Epoch(_) => 2,
        }
    }
}

/// Compare two digit strings (no leading zeros) by numeric value without parsing,
/// so arbitrarily long epochs never overflow.
pub(crate) fn cmp_digits(a: &str, b: &str) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

impl Ord for SelectorKind<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            // Larger epochs first.
            (Self::Epoch(a), Self::Epoch(b)) => cmp_digits(b, a),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for SelectorKind<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Extract the selector from a weight file name.
///
/// `200_net_G.pth` → `200`, `latest_net_G_A.pth` → `latest`. Returns `None`
/// for files without the generator marker, with another extension, or with an
/// empty selector.
#[must_use]
pub fn parse_selector<'a>(file_name: &'a str, extension: &str) -> Option<&'a str> {
    let stem = file_name.strip_suffix(extension)?.strip_suffix('.')?;
    let (selector, _suffix) = stem.split_once(GENERATOR_MARKER)?;
    (!selector.is_empty()).then_some(selector)
}

pub(crate) fn model_name_of(model_dir: &Path) -> String {
    model_dir
        .file_name()
        .map_or_else(|| model_dir.display().to_string(), |n| n.to_string_lossy().into_owned())
}
