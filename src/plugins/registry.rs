//! Installed plugin registry and reconciliation

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use rhai::Dynamic;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

use super::descriptor::{Descriptor, PluginIdentity};
use crate::loader::{ModuleExports, ModuleLoader, SETUP_FN};
use crate::routing::{NamespaceRouter, RouterFactory};
use crate::sandbox;

/// A plugin installed under its namespace
#[derive(Debug)]
pub struct InstalledPlugin {
    /// Descriptor the plugin was installed from
    pub descriptor: Descriptor,
    /// `name@version`
    pub identity: PluginIdentity,
    /// When the plugin was installed
    pub installed_at: DateTime<Utc>,
    router: NamespaceRouter,
}

impl InstalledPlugin {
    /// Namespace the plugin is mounted under
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.descriptor.namespace()
    }

    /// The plugin's routes
    #[must_use]
    pub const fn router(&self) -> &NamespaceRouter {
        &self.router
    }

    /// Summary for listings and logs
    #[must_use]
    pub fn summary(&self) -> PluginSummary {
        PluginSummary {
            identity: self.identity.to_string(),
            namespace: self.namespace().to_string(),
            location: self.descriptor.location.clone(),
            routes: self
                .router
                .routes()
                .iter()
                .map(|r| format!("{} {}", r.method, r.pattern.as_str()))
                .collect(),
            installed_at: self.installed_at,
        }
    }
}

/// Listing entry of an installed plugin
#[derive(Debug, Clone, Serialize)]
pub struct PluginSummary {
    /// `name@version`
    pub identity: String,
    /// Mount namespace
    pub namespace: String,
    /// Entry module location
    pub location: String,
    /// Routes as `METHOD pattern`, in match order
    pub routes: Vec<String>,
    /// When the plugin was installed
    pub installed_at: DateTime<Utc>,
}

/// A namespace whose plugin was replaced by a new version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginUpdate {
    /// Identity that was replaced
    pub from: PluginIdentity,
    /// Identity now installed
    pub to: PluginIdentity,
}

/// Changes applied by one reconciliation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Plugins installed under a previously free namespace
    pub installed: Vec<PluginIdentity>,
    /// Plugins replaced in place
    pub updated: Vec<PluginUpdate>,
    /// Plugins whose namespace is gone
    pub removed: Vec<PluginIdentity>,
}

impl ReconcileReport {
    /// Whether nothing changed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.installed.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Authoritative namespace to plugin mapping
///
/// Readers see each namespace either absent or fully installed: plugins are
/// loaded and set up before a single map write publishes them.
pub struct PluginRegistry {
    loader: ModuleLoader,
    factory: RouterFactory,
    plugins: RwLock<HashMap<String, Arc<InstalledPlugin>>>,
    mutations: Mutex<()>,
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("loader", &self.loader)
            .field("factory", &self.factory)
            .finish_non_exhaustive()
    }
}

impl PluginRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new(loader: ModuleLoader, factory: RouterFactory) -> Self {
        Self {
            loader,
            factory,
            plugins: RwLock::new(HashMap::new()),
            mutations: Mutex::new(()),
        }
    }

    /// Loader used for installs
    #[must_use]
    pub const fn loader(&self) -> &ModuleLoader {
        &self.loader
    }

    /// Factory used to build plugin routers
    #[must_use]
    pub const fn factory(&self) -> &RouterFactory {
        &self.factory
    }

    /// Installed plugin owning `namespace`
    pub async fn get(&self, namespace: &str) -> Option<Arc<InstalledPlugin>> {
        self.plugins.read().await.get(namespace).cloned()
    }

    /// Installed namespaces, sorted
    pub async fn namespaces(&self) -> Vec<String> {
        let mut namespaces: Vec<String> = self.plugins.read().await.keys().cloned().collect();
        namespaces.sort();
        namespaces
    }

    /// Identities currently installed
    pub async fn present(&self) -> HashSet<PluginIdentity> {
        self.plugins
            .read()
            .await
            .values()
            .map(|p| p.identity.clone())
            .collect()
    }

    /// Summaries of installed plugins, sorted by namespace
    pub async fn installed(&self) -> Vec<PluginSummary> {
        let mut summaries: Vec<PluginSummary> = self
            .plugins
            .read()
            .await
            .values()
            .map(|p| p.summary())
            .collect();
        summaries.sort_by(|a, b| a.namespace.cmp(&b.namespace));
        summaries
    }

    /// Install a plugin, replacing whatever owns its namespace
    ///
    /// A plugin that fails to load or set up is still installed, with no
    /// routes.
    pub async fn install(&self, descriptor: &Descriptor) -> Arc<InstalledPlugin> {
        let _guard = self.mutations.lock().await;

        let plugin = Arc::new(self.prepare(descriptor).await);
        let previous = self
            .plugins
            .write()
            .await
            .insert(descriptor.name.clone(), Arc::clone(&plugin));

        if let Some(previous) = previous {
            tracing::info!(from = %previous.identity, to = %plugin.identity, "replaced plugin");
        }
        plugin
    }

    /// Uninstall a plugin if its exact identity is installed
    ///
    /// Returns `true` if the namespace was removed.
    pub async fn uninstall(&self, descriptor: &Descriptor) -> bool {
        let _guard = self.mutations.lock().await;
        let identity = descriptor.identity();

        let mut plugins = self.plugins.write().await;
        let owned = plugins
            .get(descriptor.namespace())
            .is_some_and(|p| p.identity == identity);
        if owned {
            plugins.remove(descriptor.namespace());
            tracing::info!(identity = %identity, "uninstalled plugin");
        }
        owned
    }

    /// Converge the installed set onto `latest`
    ///
    /// Pure removals are applied first. New versions of installed
    /// namespaces are loaded alongside fresh installs and swapped in with
    /// one map write, so the namespace never goes missing during an update.
    pub async fn reconcile(&self, latest: &[Descriptor]) -> ReconcileReport {
        let _guard = self.mutations.lock().await;
        let desired = dedupe(latest);
        let mut report = ReconcileReport::default();

        let current: HashMap<String, PluginIdentity> = self
            .plugins
            .read()
            .await
            .iter()
            .map(|(ns, p)| (ns.clone(), p.identity.clone()))
            .collect();

        {
            let mut plugins = self.plugins.write().await;
            for (namespace, identity) in &current {
                if !desired.contains_key(namespace) {
                    plugins.remove(namespace);
                    tracing::info!(identity = %identity, "uninstalled plugin");
                    report.removed.push(identity.clone());
                }
            }
        }

        let pending: Vec<&Descriptor> = desired
            .values()
            .filter(|d| current.get(&d.name) != Some(&d.identity()))
            .collect();
        let prepared =
            futures::future::join_all(pending.into_iter().map(|d| self.prepare(d))).await;

        let mut plugins = self.plugins.write().await;
        for plugin in prepared {
            let identity = plugin.identity.clone();
            match plugins.insert(plugin.namespace().to_string(), Arc::new(plugin)) {
                Some(previous) => {
                    tracing::info!(from = %previous.identity, to = %identity, "updated plugin");
                    report.removed.push(previous.identity.clone());
                    report.updated.push(PluginUpdate {
                        from: previous.identity.clone(),
                        to: identity,
                    });
                }
                None => report.installed.push(identity),
            }
        }
        drop(plugins);

        report.installed.sort();
        report.removed.sort();
        report.updated.sort_by(|a, b| a.to.cmp(&b.to));
        report
    }

    /// Load and set up a plugin without publishing it
    async fn prepare(&self, descriptor: &Descriptor) -> InstalledPlugin {
        let identity = descriptor.identity();
        tracing::info!(identity = %identity, location = %descriptor.location, "installing plugin");

        let exports = self.loader.load(&descriptor.location).await;
        let router = self.build_router(descriptor.namespace(), &identity, &exports).await;
        tracing::info!(identity = %identity, routes = router.len(), "installed plugin");

        InstalledPlugin {
            descriptor: descriptor.clone(),
            identity,
            installed_at: Utc::now(),
            router,
        }
    }

    /// Run the plugin's `setup` against a fresh router
    ///
    /// Any setup failure discards every route registered so far.
    async fn build_router(
        &self,
        namespace: &str,
        identity: &PluginIdentity,
        exports: &ModuleExports,
    ) -> NamespaceRouter {
        let instance = match exports.instance() {
            Some(instance) if exports.has_setup() => instance.clone(),
            Some(_) => {
                tracing::warn!(identity = %identity, "plugin exports no setup(router), no routes");
                return self.factory.empty(namespace);
            }
            None => return self.factory.empty(namespace),
        };

        let builder = self
            .factory
            .build_namespace_router(namespace, Arc::new(exports.functions()));
        let arg = Dynamic::from(builder.clone());
        let timeout = self.loader.timeout();
        let deadline = Instant::now() + timeout;
        let setup = instance.clone();
        let task = tokio::task::spawn_blocking(move || {
            sandbox::with_deadline(deadline, || setup.call(SETUP_FN, vec![arg]))
        });

        let failure = match tokio::time::timeout(timeout, task).await {
            Ok(Ok(Ok(_))) => return builder.finish(instance),
            Ok(Ok(Err(e))) => e.to_string(),
            Ok(Err(e)) => format!("setup aborted: {e}"),
            Err(_) => format!("setup timed out after {timeout:?}"),
        };
        tracing::warn!(identity = %identity, error = %failure, "plugin setup failed, no routes");
        self.factory.empty(namespace)
    }
}

/// Index descriptors by namespace; the last descriptor for a name wins
fn dedupe(latest: &[Descriptor]) -> HashMap<String, Descriptor> {
    let mut desired = HashMap::with_capacity(latest.len());
    for descriptor in latest {
        if let Some(earlier) = desired.insert(descriptor.name.clone(), descriptor.clone()) {
            tracing::warn!(
                dropped = %earlier.identity(),
                kept = %descriptor.identity(),
                "duplicate plugin name in feed"
            );
        }
    }
    desired
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::loader::StaticFetcher;

    const CALC_V1: &str = r#"
        fn setup(router) { router.get("/compute", "compute"); }
        fn compute(req, reply) { reply.send("v1"); }
    "#;

    const CALC_V2: &str = r#"
        fn setup(router) {
            router.get("/compute", "compute");
            router.get("/version", "compute");
        }
        fn compute(req, reply) { reply.send("v2"); }
    "#;

    const NOTES: &str = r#"
        fn setup(router) { router.get("/", "list"); }
        fn list(req, reply) { reply.send([]); }
    "#;

    fn registry() -> PluginRegistry {
        let fetcher = StaticFetcher::new([
            ("https://x/calc-1.rhai", CALC_V1),
            ("https://x/calc-2.rhai", CALC_V2),
            ("https://x/notes.rhai", NOTES),
            ("https://x/broken.rhai", r#"throw "bad module";"#),
            ("https://x/no-setup.rhai", "fn helper() {}"),
            (
                "https://x/half-setup.rhai",
                r#"fn setup(router) { router.get("/a", "a"); router.get("/b", "nope"); }
                   fn a(req, reply) {}"#,
            ),
        ]);
        let loader = ModuleLoader::with_fetcher(Arc::new(fetcher), Duration::from_secs(5));
        PluginRegistry::new(loader, RouterFactory::new("/api"))
    }

    fn calc_v1() -> Descriptor {
        Descriptor::new("calc", "1.0.0", "https://x/calc-1.rhai")
    }

    fn calc_v2() -> Descriptor {
        Descriptor::new("calc", "1.1.0", "https://x/calc-2.rhai")
    }

    fn notes() -> Descriptor {
        Descriptor::new("notes", "0.1.0", "https://x/notes.rhai")
    }

    #[tokio::test]
    async fn install_then_uninstall_restores_registry() {
        let registry = registry();
        registry.install(&notes()).await;
        let before = registry.installed().await;

        let plugin = registry.install(&calc_v1()).await;
        assert_eq!(plugin.router().len(), 1);
        assert!(registry.get("calc").await.is_some());

        assert!(registry.uninstall(&calc_v1()).await);
        assert!(registry.get("calc").await.is_none());

        let after = registry.installed().await;
        assert_eq!(
            before.iter().map(|s| &s.routes).collect::<Vec<_>>(),
            after.iter().map(|s| &s.routes).collect::<Vec<_>>()
        );
        assert_eq!(registry.namespaces().await, vec!["notes"]);
    }

    #[tokio::test]
    async fn uninstall_requires_matching_identity() {
        let registry = registry();
        registry.install(&calc_v2()).await;

        assert!(!registry.uninstall(&calc_v1()).await);
        assert!(registry.get("calc").await.is_some());
    }

    #[tokio::test]
    async fn reconcile_converges_on_latest() {
        let registry = registry();

        let report = registry.reconcile(&[calc_v1(), notes()]).await;
        assert_eq!(report.installed.len(), 2);
        assert_eq!(registry.namespaces().await, vec!["calc", "notes"]);

        let report = registry.reconcile(&[calc_v2()]).await;
        assert_eq!(registry.namespaces().await, vec!["calc"]);
        assert_eq!(
            report.updated,
            vec![PluginUpdate {
                from: calc_v1().identity(),
                to: calc_v2().identity(),
            }]
        );
        assert_eq!(report.removed, vec![calc_v1().identity(), notes().identity()]);
        assert_eq!(
            registry.present().await,
            HashSet::from([calc_v2().identity()])
        );

        let report = registry.reconcile(&[calc_v2()]).await;
        assert!(report.is_empty());

        registry.reconcile(&[]).await;
        assert!(registry.namespaces().await.is_empty());
    }

    #[tokio::test]
    async fn last_duplicate_wins() {
        let registry = registry();
        registry.reconcile(&[calc_v1(), calc_v2()]).await;

        let plugin = registry.get("calc").await.unwrap();
        assert_eq!(plugin.identity, calc_v2().identity());
    }

    #[tokio::test]
    async fn failed_plugins_have_zero_routes() {
        let registry = registry();
        registry
            .reconcile(&[
                Descriptor::new("broken", "1.0.0", "https://x/broken.rhai"),
                Descriptor::new("missing", "1.0.0", "https://x/missing.rhai"),
                Descriptor::new("bare", "1.0.0", "https://x/no-setup.rhai"),
                Descriptor::new("half", "1.0.0", "https://x/half-setup.rhai"),
            ])
            .await;

        for namespace in ["broken", "missing", "bare", "half"] {
            let plugin = registry.get(namespace).await.unwrap();
            assert!(plugin.router().is_empty(), "{namespace} has routes");
        }
    }
}
