//! Library path naming
//!
//! Builds the relative path `publisher/product/filename` for a catalog file.
//! Two naming schemes exist:
//!
//! - [`NamingMode::Friendly`] keeps names readable: HTML entities are decoded and
//!   only characters Windows refuses in filenames are replaced (with ` - `).
//! - [`NamingMode::Compatibility`] reproduces the directory names produced by the
//!   storefront's own client app, quirks included. It never decodes entities, so a
//!   publisher spelled `Bob&#39;s` in the catalog ends up as `Bob__39_s` on disk.
//!
//! Resolution is pure: no filesystem access, same input, same output.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::error::PlanningError;
use crate::types::{FileMetadata, Product, ProductId};

mod entities;

/// Publisher segment used when the catalog does not name one
pub const UNKNOWN_PUBLISHER: &str = "Others";

/// Path naming scheme
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum NamingMode {
    /// Readable names, only filesystem-illegal characters replaced
    #[default]
    Friendly,
    /// Bit-for-bit the names of the storefront's client app
    Compatibility,
}

// Characters Windows rejects in file names; used on every platform.
const ILLEGAL_CHARACTERS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
const FRIENDLY_SEPARATOR: &str = " - ";

#[allow(clippy::expect_used)] // literal patterns
static REPEATED_SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"( - )+").expect("valid separator pattern"));
#[allow(clippy::expect_used)]
static WHITESPACE_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace pattern"));
#[allow(clippy::expect_used)]
static HTML_ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z][a-zA-Z0-9]{1,31})(;?)")
        .expect("valid entity pattern")
});

/// Decode HTML character references the way browsers do.
///
/// Numeric references and the Latin-1 names work without the closing `;`;
/// unknown references are left untouched.
pub fn decode_html_entities(input: &str) -> String {
    HTML_ENTITY
        .replace_all(input, |caps: &Captures<'_>| {
            let whole = &caps[0];
            let body = &caps[1];
            let terminator = &caps[2];
            if let Some(num) = body.strip_prefix('#') {
                let code = match num.strip_prefix(['x', 'X']) {
                    Some(hex) => u32::from_str_radix(hex, 16).ok(),
                    None => num.parse::<u32>().ok(),
                };
                return code
                    .map(|c| entities::numeric(c).to_string())
                    .unwrap_or_else(|| whole.to_string());
            }
            if !terminator.is_empty()
                && let Some(c) = entities::named(body)
            {
                return c.to_string();
            }
            // `&copyright` reads as `©right`
            match entities::legacy_prefix(body) {
                Some((c, len)) => format!("{c}{}{terminator}", &body[len..]),
                None => whole.to_string(),
            }
        })
        .into_owned()
}

/// Friendly normalization of a single path segment
pub fn normalize_friendly(part: &str) -> String {
    let decoded = decode_html_entities(part);
    let replaced: String = decoded
        .chars()
        .map(|c| {
            if ILLEGAL_CHARACTERS.contains(&c) {
                FRIENDLY_SEPARATOR.to_string()
            } else {
                c.to_string()
            }
        })
        .collect();
    let trimmed = replaced.trim_matches(|c: char| c == ' ' || c == '-');
    let separated = REPEATED_SEPARATORS.replace_all(trimmed, FRIENDLY_SEPARATOR);
    WHITESPACE_RUNS.replace_all(&separated, " ").into_owned()
}

/// Character classes of the compatibility table
#[derive(Clone, Copy, Debug)]
enum CharClass {
    AsciiLetter,
    AsciiDigit,
    Literal(char),
    Whitespace,
    Any,
}

impl CharClass {
    fn matches(self, c: char) -> bool {
        match self {
            CharClass::AsciiLetter => c.is_ascii_alphabetic(),
            CharClass::AsciiDigit => c.is_ascii_digit(),
            CharClass::Literal(l) => c == l,
            CharClass::Whitespace => c.is_whitespace(),
            CharClass::Any => true,
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Substitution {
    Keep,
    /// Whitespace runs become a single space
    CollapseToSpace,
    With(&'static str),
}

/// Substitutions applied by the storefront's client, first match wins.
///
/// Only ASCII letters, ASCII digits, `.` and whitespace survive. Everything else,
/// including apostrophes, parentheses, `&`, `#`, `;` and non-ASCII letters,
/// becomes `_`.
const COMPATIBILITY_TABLE: &[(CharClass, Substitution)] = &[
    (CharClass::AsciiLetter, Substitution::Keep),
    (CharClass::AsciiDigit, Substitution::Keep),
    (CharClass::Literal('.'), Substitution::Keep),
    (CharClass::Whitespace, Substitution::CollapseToSpace),
    (CharClass::Any, Substitution::With("_")),
];

fn compatibility_substitution(c: char) -> Substitution {
    COMPATIBILITY_TABLE
        .iter()
        .find(|(class, _)| class.matches(c))
        .map(|(_, substitution)| *substitution)
        .unwrap_or(Substitution::With("_"))
}

/// Compatibility normalization of a single path segment
pub fn normalize_compatible(part: &str) -> String {
    let mut out = String::with_capacity(part.len());
    let mut in_whitespace = false;
    for c in part.chars() {
        match compatibility_substitution(c) {
            Substitution::CollapseToSpace => {
                if !in_whitespace {
                    out.push(' ');
                }
                in_whitespace = true;
                continue;
            }
            Substitution::Keep => out.push(c),
            Substitution::With(replacement) => out.push_str(replacement),
        }
        in_whitespace = false;
    }
    out
}

/// Builds relative library paths for catalog files
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PathResolver {
    mode: NamingMode,
    omit_publisher: bool,
}

impl PathResolver {
    /// Create a resolver for the given naming mode
    pub fn new(mode: NamingMode, omit_publisher: bool) -> Self {
        Self {
            mode,
            omit_publisher,
        }
    }

    /// Naming mode in use
    pub fn mode(&self) -> NamingMode {
        self.mode
    }

    fn normalize(&self, part: &str) -> String {
        match self.mode {
            NamingMode::Friendly => normalize_friendly(part),
            NamingMode::Compatibility => normalize_compatible(part),
        }
    }

    fn segment(
        &self,
        raw: &str,
        product: &Product,
        file: &FileMetadata,
    ) -> Result<String, PlanningError> {
        let normalized = self.normalize(raw);
        if normalized.trim().is_empty() || normalized == "." || normalized == ".." {
            return Err(PlanningError::UnresolvablePath {
                product: product.name.clone(),
                filename: file.filename.clone(),
                reason: format!("{raw:?} normalizes to {normalized:?}"),
            });
        }
        Ok(normalized)
    }

    /// Relative path of a single file, without collision handling
    pub fn resolve(
        &self,
        product: &Product,
        file: &FileMetadata,
    ) -> Result<PathBuf, PlanningError> {
        let mut path = PathBuf::new();
        if !self.omit_publisher {
            let publisher = if product.publisher.trim().is_empty() {
                UNKNOWN_PUBLISHER
            } else {
                product.publisher.as_str()
            };
            path.push(self.segment(publisher, product, file)?);
        }
        path.push(self.segment(&product.name, product, file)?);
        path.push(self.segment(&file.filename, product, file)?);
        Ok(path)
    }

    /// Relative paths for every file of a product, pairwise distinct.
    ///
    /// Files whose paths collide (ignoring case) all get the remote file id
    /// appended to the file stem, so the outcome does not depend on catalog order.
    pub fn resolve_product<'a>(
        &self,
        product: &'a Product,
    ) -> Vec<(&'a FileMetadata, Result<PathBuf, PlanningError>)> {
        let mut resolved: Vec<_> = product
            .files
            .iter()
            .map(|file| (file, self.resolve(product, file)))
            .collect();

        let mut occurrences: HashMap<String, usize> = HashMap::new();
        for (_, path) in &resolved {
            if let Ok(path) = path {
                *occurrences.entry(collision_key(path)).or_default() += 1;
            }
        }

        for (file, path) in resolved.iter_mut() {
            if let Ok(p) = path {
                if occurrences.get(&collision_key(p)).copied().unwrap_or(0) > 1 {
                    let suffix = self.normalize(file.id.as_str());
                    *p = with_suffix(p, &suffix);
                }
            }
        }

        // Exact duplicate entries (same name and id) cannot be told apart
        let mut seen = HashSet::new();
        for (file, path) in resolved.iter_mut() {
            let duplicate = matches!(path, Ok(p) if !seen.insert(collision_key(p)));
            if duplicate {
                *path = Err(PlanningError::UnresolvablePath {
                    product: product.name.clone(),
                    filename: file.filename.clone(),
                    reason: format!("duplicate catalog entry for file id {}", file.id),
                });
            }
        }

        resolved
    }

    /// Relative paths for every file of the catalog, pairwise distinct.
    ///
    /// Products whose files land on the same path as another product's (two
    /// publishers' "Core Rules" with the publisher omitted, or two products
    /// sharing a name) all get their product id appended to the product
    /// directory. Paths still shared after that become planning errors.
    pub fn resolve_catalog<'a>(&self, products: &'a [Product]) -> Vec<ResolvedFile<'a>> {
        let mut resolved: Vec<ResolvedFile<'a>> = products
            .iter()
            .flat_map(|product| {
                self.resolve_product(product)
                    .into_iter()
                    .map(move |(file, path)| (product, file, path))
            })
            .collect();

        let mut owners: HashMap<String, HashSet<ProductId>> = HashMap::new();
        for (product, _, path) in &resolved {
            if let Ok(path) = path {
                owners
                    .entry(collision_key(path))
                    .or_default()
                    .insert(product.id.clone());
            }
        }
        let clashing: HashSet<ProductId> = owners
            .into_values()
            .filter(|ids| ids.len() > 1)
            .flatten()
            .collect();

        for (product, _, path) in resolved.iter_mut() {
            if let Ok(p) = path
                && clashing.contains(&product.id)
            {
                let suffix = self.normalize(product.id.as_str());
                *p = with_product_suffix(p, &suffix);
            }
        }

        let mut seen = HashSet::new();
        for (product, file, path) in resolved.iter_mut() {
            let duplicate = matches!(path, Ok(p) if !seen.insert(collision_key(p)));
            if duplicate {
                *path = Err(PlanningError::UnresolvablePath {
                    product: product.name.clone(),
                    filename: file.filename.clone(),
                    reason: format!(
                        "another catalog entry already uses this path (product id {})",
                        product.id
                    ),
                });
            }
        }

        resolved
    }
}

/// A catalog file with its resolved relative path
pub type ResolvedFile<'a> = (
    &'a Product,
    &'a FileMetadata,
    Result<PathBuf, PlanningError>,
);

/// `pub/Book/book.pdf` + `123` => `pub/Book [123]/book.pdf`
fn with_product_suffix(path: &Path, suffix: &str) -> PathBuf {
    let (Some(dir), Some(file_name)) = (path.parent(), path.file_name()) else {
        return path.to_path_buf();
    };
    let product_dir = dir
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    dir.with_file_name(format!("{product_dir} [{suffix}]"))
        .join(file_name)
}

fn collision_key(path: &Path) -> String {
    path.to_string_lossy().to_lowercase()
}

/// `dir/book.pdf` + `123` => `dir/book [123].pdf`
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem} [{suffix}].{}", ext.to_string_lossy()),
        None => format!("{stem} [{suffix}]"),
    };
    path.with_file_name(name)
}
