//! Module graph construction
//!
//! The graph is built breadth-first from the entry location. Every module is
//! fetched once per load: resolved locations are memoized in a visited set,
//! which also makes import cycles terminate. Import specifiers are linked
//! before compilation by rewriting each literal to its canonical location,
//! so evaluation never has to re-resolve relative paths.

use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use rhai::{AST, Engine};
use url::Url;

use super::builtins::Builtins;
use super::fetch::SourceFetcher;
use crate::{Error, Result};

/// Prefix marking a host built-in module specifier
pub const BUILTIN_PREFIX: &str = "host:";

/// Comments and string literals are matched as whole tokens so that only
/// `import "..."` statements in code capture group 1.
static IMPORT_SCANNER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?s)//[^\n]*|/\*.*?\*/|`(?:[^`\\]|\\.)*`|'(?:[^'\\]|\\.)*'|"(?:[^"\\]|\\.)*"|\bimport\s+"((?:[^"\\]|\\.)*)""#,
    )
    .expect("valid regex")
});

/// Target of an import specifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ImportTarget {
    /// Host built-in, bound without fetching
    Builtin(String),
    /// Module fetched from a resolved location
    Module(Url),
}

impl ImportTarget {
    /// Canonical specifier written back into the importing source
    #[must_use]
    pub fn canonical(&self) -> String {
        match self {
            Self::Builtin(name) => format!("{BUILTIN_PREFIX}{name}"),
            Self::Module(url) => url.to_string(),
        }
    }
}

/// A literal import specifier found in module source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSite {
    /// Byte range of the specifier text (inside the quotes)
    pub range: Range<usize>,
    /// Specifier as written
    pub specifier: String,
}

/// Find every literal `import "..."` specifier in a module's source
#[must_use]
pub fn scan_imports(source: &str) -> Vec<ImportSite> {
    IMPORT_SCANNER
        .captures_iter(source)
        .filter_map(|caps| caps.get(1))
        .map(|m| ImportSite {
            range: m.range(),
            specifier: m.as_str().to_string(),
        })
        .collect()
}

/// Resolve a specifier relative to the importing module's location
///
/// # Errors
///
/// Returns error if the specifier cannot be joined onto `base`
pub fn resolve_specifier(base: &Url, specifier: &str) -> std::result::Result<ImportTarget, url::ParseError> {
    if let Some(name) = specifier.strip_prefix(BUILTIN_PREFIX) {
        return Ok(ImportTarget::Builtin(name.to_string()));
    }
    base.join(specifier).map(ImportTarget::Module)
}

/// Rewrite a module's import specifiers to their canonical targets
///
/// Returns the linked source and the module's import targets in source order.
///
/// # Errors
///
/// Returns error if a specifier cannot be resolved, names an unknown
/// built-in, or reaches a `file` location from a non-`file` module
pub fn link_source(
    location: &Url,
    source: &str,
    builtins: &Builtins,
) -> Result<(String, Vec<ImportTarget>)> {
    let sites = scan_imports(source);
    let mut linked = String::with_capacity(source.len());
    let mut targets = Vec::with_capacity(sites.len());
    let mut cursor = 0;

    for site in sites {
        let target = resolve_specifier(location, &site.specifier).map_err(|e| {
            Error::load(location, format!("cannot resolve import {:?}: {e}", site.specifier))
        })?;

        if let ImportTarget::Builtin(name) = &target
            && !builtins.contains(name)
        {
            return Err(Error::load(
                location,
                format!("unknown built-in module {:?}", site.specifier),
            ));
        }

        // Only local modules may import from the host's disk
        if let ImportTarget::Module(url) = &target
            && url.scheme() == "file"
            && location.scheme() != "file"
        {
            return Err(Error::load(
                location,
                format!("remote module cannot import local file {:?}", site.specifier),
            ));
        }

        linked.push_str(&source[cursor..site.range.start]);
        linked.push_str(&target.canonical());
        cursor = site.range.end;
        targets.push(target);
    }

    linked.push_str(&source[cursor..]);
    Ok((linked, targets))
}

/// Compiled module graph of one plugin, keyed by resolved location
pub struct ModuleGraph {
    entry: Url,
    modules: HashMap<Url, AST>,
    imports: HashMap<Url, Vec<ImportTarget>>,
}

impl ModuleGraph {
    /// Location of the entry module
    #[must_use]
    pub const fn entry(&self) -> &Url {
        &self.entry
    }

    /// Compiled module at a resolved location
    #[must_use]
    pub fn module(&self, location: &Url) -> Option<&AST> {
        self.modules.get(location)
    }

    /// Import targets of the module at `location`, in source order
    #[must_use]
    pub fn imports(&self, location: &Url) -> &[ImportTarget] {
        self.imports.get(location).map_or(&[], Vec::as_slice)
    }

    /// Number of fetched modules (built-ins excluded)
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Whether the graph holds no modules
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Split into entry location and compiled modules
    #[must_use]
    pub fn into_modules(self) -> (Url, HashMap<Url, AST>) {
        (self.entry, self.modules)
    }
}

impl std::fmt::Debug for ModuleGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleGraph")
            .field("entry", &self.entry.as_str())
            .field("modules", &self.modules.keys().map(Url::as_str).collect::<Vec<_>>())
            .finish()
    }
}

/// Fetch, link and compile the transitive import graph of `entry`
///
/// Each level of the graph is fetched concurrently. The first failure
/// anywhere aborts the whole build.
///
/// # Errors
///
/// Returns [`Error::PluginLoad`] naming the module that failed
pub async fn build_graph(
    entry: &Url,
    fetcher: &dyn SourceFetcher,
    engine: &Engine,
    builtins: &Builtins,
) -> Result<ModuleGraph> {
    let mut graph = ModuleGraph {
        entry: entry.clone(),
        modules: HashMap::new(),
        imports: HashMap::new(),
    };
    let mut visited = HashSet::from([entry.clone()]);
    let mut frontier = vec![entry.clone()];

    while !frontier.is_empty() {
        let sources =
            futures::future::try_join_all(frontier.iter().map(|url| fetch_module(fetcher, url)))
                .await?;

        let mut next = Vec::new();
        for (location, source) in frontier.into_iter().zip(sources) {
            let (linked, targets) = link_source(&location, &source, builtins)?;

            let mut ast = engine
                .compile(&linked)
                .map_err(|e| Error::load(&location, format!("compile error: {e}")))?;
            ast.set_source(location.as_str());

            for target in &targets {
                if let ImportTarget::Module(dep) = target
                    && visited.insert(dep.clone())
                {
                    next.push(dep.clone());
                }
            }

            tracing::trace!(
                location = %location,
                imports = targets.len(),
                "linked module"
            );
            graph.modules.insert(location.clone(), ast);
            graph.imports.insert(location, targets);
        }

        frontier = next;
    }

    Ok(graph)
}

async fn fetch_module(fetcher: &dyn SourceFetcher, location: &Url) -> Result<String> {
    fetcher.fetch(location).await.map_err(|e| match e {
        Error::PluginLoad { .. } => e,
        other => Error::load(location, format!("fetch failed: {other}")),
    })
}
